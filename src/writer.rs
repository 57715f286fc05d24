//! Persisting rendered configs
//!
//! Synthesis does no I/O; callers hand rendered text to a [`ConfigWriter`].
//! [`FileConfigWriter`] writes owner-only files and, for a whole mesh,
//! stages every file before renaming any of them into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default mode for config files: they contain private keys
pub const DEFAULT_MODE: u32 = 0o600;

/// Destination for rendered configs
pub trait ConfigWriter {
    /// Store one node's rendered config
    fn persist(&mut self, name: &str, text: &str) -> Result<()>;

    /// Store a whole mesh. The default writes nodes one by one.
    fn persist_all(&mut self, rendered: &BTreeMap<String, String>) -> Result<()> {
        for (name, text) in rendered {
            self.persist(name, text)?;
        }
        Ok(())
    }
}

/// Writes `<directory>/<name>.<extension>` files
#[derive(Debug, Clone)]
pub struct FileConfigWriter {
    directory: PathBuf,
    extension: String,
    mode: u32,
}

impl FileConfigWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: "conf".to_string(),
            mode: DEFAULT_MODE,
        }
    }

    /// File extension without the dot; empty for none
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Final path for node `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        if self.extension.is_empty() {
            self.directory.join(name)
        } else {
            self.directory.join(format!("{}.{}", name, self.extension))
        }
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!(".{}.{}.tmp", name, std::process::id()))
    }

    /// Write `text` to a staging file with the configured mode
    fn stage(&self, name: &str, text: &str) -> Result<PathBuf> {
        let path = self.staging_path(name);
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }
        let mut file = options.open(&path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;

        // umask may have stripped bits at creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(self.mode))?;
        }
        Ok(path)
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!(".{}.{}.bak", name, std::process::id()))
    }

    /// Move `tmp` onto `target`, setting any existing file aside first.
    /// Returns the backup path, if one was made.
    fn swap_in(&self, name: &str, tmp: &Path, target: &Path) -> Result<Option<PathBuf>> {
        let backup = if target.is_file() {
            let backup = self.backup_path(name);
            fs::rename(target, &backup)?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(tmp, target) {
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, target);
            }
            return Err(Error::Io(std::io::Error::new(
                e.kind(),
                format!("cannot move config into {}: {}", target.display(), e),
            )));
        }
        Ok(backup)
    }

    fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.directory).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("cannot create {}: {}", self.directory.display(), e),
            ))
        })
    }
}

impl ConfigWriter for FileConfigWriter {
    fn persist(&mut self, name: &str, text: &str) -> Result<()> {
        self.ensure_directory()?;
        let staged = self.stage(name, text)?;
        let target = self.path_for(name);
        if let Err(e) = fs::rename(&staged, &target) {
            let _ = fs::remove_file(&staged);
            return Err(e.into());
        }
        info!("Wrote {}", target.display());
        Ok(())
    }

    /// Stage every file first, then swap them in. If any swap fails, the
    /// ones already done are undone: earlier configs are restored and new
    /// files removed.
    fn persist_all(&mut self, rendered: &BTreeMap<String, String>) -> Result<()> {
        self.ensure_directory()?;

        let mut staged: Vec<(&str, PathBuf, PathBuf)> = Vec::with_capacity(rendered.len());
        for (name, text) in rendered {
            match self.stage(name, text) {
                Ok(path) => staged.push((name.as_str(), path, self.path_for(name))),
                Err(e) => {
                    warn!("Staging {} failed, discarding {} staged file(s)", name, staged.len());
                    cleanup(staged.iter().map(|(_, tmp, _)| tmp.as_path()));
                    return Err(e);
                }
            }
        }
        debug!("Staged {} config(s) in {}", staged.len(), self.directory.display());

        let mut swapped: Vec<(&Path, Option<PathBuf>)> = Vec::with_capacity(staged.len());
        for (i, (name, tmp, target)) in staged.iter().enumerate() {
            match self.swap_in(name, tmp, target) {
                Ok(backup) => swapped.push((target.as_path(), backup)),
                Err(e) => {
                    warn!("Replacing {} failed, rolling back {} config(s)", target.display(), swapped.len());
                    rollback(&swapped);
                    cleanup(staged[i..].iter().map(|(_, tmp, _)| tmp.as_path()));
                    return Err(e);
                }
            }
        }

        for (target, backup) in &swapped {
            if let Some(backup) = backup {
                if let Err(e) = fs::remove_file(backup) {
                    warn!("Failed to remove backup {}: {}", backup.display(), e);
                }
            }
            info!("Wrote {}", target.display());
        }
        Ok(())
    }
}

/// Undo completed swaps, newest first
fn rollback(swapped: &[(&Path, Option<PathBuf>)]) {
    for (target, backup) in swapped.iter().rev() {
        let result = match backup {
            Some(backup) => fs::rename(backup, target),
            None => fs::remove_file(target),
        };
        if let Err(e) = result {
            warn!("Failed to roll back {}: {}", target.display(), e);
        }
    }
}

fn cleanup<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove staged file {}: {}", path.display(), e);
        }
    }
}

/// Keeps rendered configs in memory (dry runs and tests)
#[derive(Debug, Default, Clone)]
pub struct MemoryWriter {
    pub files: BTreeMap<String, String>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigWriter for MemoryWriter {
    fn persist(&mut self, name: &str, text: &str) -> Result<()> {
        self.files.insert(name.to_string(), text.to_string());
        Ok(())
    }
}
