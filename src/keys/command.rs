//! Key backend that shells out to the `wg` tool
//!
//! `wg genkey` prints a private key, `wg pubkey` reads one on stdin and
//! prints the matching public key. Each invocation is bounded by a timeout;
//! a child that overruns it is killed.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{KeyPair, KeyProvider, PrivateKey, PublicKey};
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Key provider backed by the `wg` binary
#[derive(Debug, Clone)]
pub struct WgCommandKeyProvider {
    program: PathBuf,
    timeout: Duration,
}

impl WgCommandKeyProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("wg", timeout)
    }

    /// Use a specific `wg` executable
    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Run `wg <subcommand>`, feeding `input` on stdin, and return trimmed stdout
    fn run(&self, subcommand: &str, input: Option<&str>) -> Result<String> {
        let mut child = Command::new(&self.program)
            .arg(subcommand)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::KeyGeneration(format!(
                    "failed to run {} {}: {}",
                    self.program.display(),
                    subcommand,
                    e
                ))
            })?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .and_then(|_| stdin.write_all(b"\n"))
                    .map_err(|e| Error::KeyGeneration(format!("failed to write to wg {}: {}", subcommand, e)))?;
            }
        }

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::KeyGeneration(format!(
                        "wg {} timed out after {:?}",
                        subcommand, self.timeout
                    )));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(Error::KeyGeneration(format!("failed to wait for wg {}: {}", subcommand, e)));
                }
            }
        };

        let stdout = match child.stdout.take() {
            Some(out) => read_pipe(out, subcommand, "stdout")?,
            None => String::new(),
        };

        if !status.success() {
            let stderr = match child.stderr.take() {
                Some(err) => read_pipe(err, subcommand, "stderr")?,
                None => String::new(),
            };
            return Err(Error::KeyGeneration(format!(
                "wg {} exited with {}: {}",
                subcommand,
                status,
                stderr.trim()
            )));
        }

        debug!("wg {} completed in {:?}", subcommand, started.elapsed());
        Ok(stdout.trim().to_string())
    }
}

fn read_pipe(mut pipe: impl Read, subcommand: &str, stream: &str) -> Result<String> {
    let mut text = String::new();
    pipe.read_to_string(&mut text)
        .map_err(|e| Error::KeyGeneration(format!("failed to read wg {} {}: {}", subcommand, stream, e)))?;
    Ok(text)
}

impl KeyProvider for WgCommandKeyProvider {
    fn generate_keypair(&self) -> Result<KeyPair> {
        let private = PrivateKey::parse(&self.run("genkey", None)?)
            .map_err(|e| Error::KeyGeneration(format!("wg genkey returned a malformed key: {}", e)))?;
        let public = self.derive_public(&private)?;
        Ok(KeyPair { private, public })
    }

    fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey> {
        let output = self.run("pubkey", Some(private.expose()))?;
        PublicKey::parse(&output)
            .map_err(|e| Error::KeyGeneration(format!("wg pubkey returned a malformed key: {}", e)))
    }
}
