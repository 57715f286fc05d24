//! wgmesh Configuration
//!
//! A mesh is described in one TOML file: mesh-wide options, the server,
//! its peers, and where the rendered configs go.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::mesh::{MeshOptions, MeshSpec, NodeSpec};
use crate::writer::{FileConfigWriter, DEFAULT_MODE};

/// Main wgmesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WgMeshConfig {
    /// Mesh-wide options
    #[serde(default)]
    pub mesh: MeshOptions,

    /// The hub every peer connects to
    pub server: NodeSpec,

    /// Peers, in allocation order
    #[serde(default)]
    pub peers: Vec<NodeSpec>,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where rendered configs are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory for `<name>.<extension>` files
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// File extension (without dot)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Unix file mode
    #[serde(default = "default_mode")]
    pub mode: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/etc/wireguard")
}

fn default_extension() -> String {
    "conf".to_string()
}

fn default_mode() -> u32 {
    DEFAULT_MODE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            extension: default_extension(),
            mode: default_mode(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WgMeshConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WgMeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration without generating anything
    pub fn validate(&self) -> crate::Result<()> {
        if self.output.mode & !0o777 != 0 {
            return Err(crate::Error::Config(format!(
                "output.mode {:o} has bits outside 0777",
                self.output.mode
            )));
        }
        if self.output.mode & 0o077 != 0 {
            tracing::warn!(
                "output.mode {:o} lets other users read private keys",
                self.output.mode
            );
        }
        if self.output.extension.contains('/') {
            return Err(crate::Error::Config("output.extension cannot contain '/'".into()));
        }

        let spec = self.spec();
        let pool = crate::synth::validate(&spec)?;
        crate::synth::assign_addresses(&spec, &pool)?;
        Ok(())
    }

    /// The mesh description synthesis works from
    pub fn spec(&self) -> MeshSpec {
        MeshSpec::new(self.server.clone(), self.peers.clone(), self.mesh.clone())
    }

    /// Writer for the configured output directory
    pub fn writer(&self) -> FileConfigWriter {
        self.writer_at(&self.output.directory)
    }

    /// Writer for `directory`, keeping the configured extension and mode
    pub fn writer_at(&self, directory: &Path) -> FileConfigWriter {
        FileConfigWriter::new(directory)
            .with_extension(self.output.extension.clone())
            .with_mode(self.output.mode)
    }

    /// A commented starter configuration
    pub fn sample(server_name: &str, endpoint: &str) -> String {
        format!(
            r#"# wgmesh mesh description

[mesh]
# Write a config for every peer as well as the server
generate_peers = true
# Tunnel addresses: server gets .1, peers .2, .3, ... in order
pool = "10.200.200.0/24"
# Server ListenPort when none is set below
listen_port = 51820

[server]
name = "{server_name}"
# Address peers dial
endpoint = "{endpoint}"
# private_key = "..."   # generated when omitted
# post_up = "iptables -A FORWARD -i %i -j ACCEPT"
# post_down = "iptables -D FORWARD -i %i -j ACCEPT"

[[peers]]
name = "peer1"
dns = "1.1.1.1"
# allowed_ips = ["10.200.200.0/24"]   # default 0.0.0.0/0
# persistent_keepalive = 25

[[peers]]
name = "peer2"

[output]
directory = "/etc/wireguard"
extension = "conf"
mode = 0o600
"#
        )
    }
}
