//! wgmesh - WireGuard hub-and-spoke config synthesis
//!
//! Turns one mesh description (a server plus its peers) into a consistent
//! set of wg-quick configurations: every node gets one key pair, a unique
//! tunnel address, and peer entries that reference the other side correctly.
//!
//! # Architecture
//!
//! - [`keys`]: key providers (native X25519 or the `wg` tool) and the
//!   per-node memo that guarantees one key pair per node per run
//! - [`address`]: deterministic tunnel address allocation
//! - [`builder`]: assembles one node's config
//! - [`synth`]: validates the mesh and wires every node together
//! - [`render`]: canonical wg-quick text, and re-parsing it
//! - [`writer`]: owner-only config files, staged all-or-nothing
//!
//! Synthesis itself does no I/O and either returns every node's config or
//! an error.

pub mod address;
pub mod builder;
pub mod config;
pub mod error;
pub mod keys;
pub mod mesh;
pub mod model;
pub mod render;
pub mod synth;
pub mod writer;

pub use config::WgMeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WgMeshConfig;
    pub use crate::error::{Error, Result};
    pub use crate::keys::{KeyPair, KeyProvider, WgCommandKeyProvider, X25519KeyProvider};
    pub use crate::mesh::{MeshOptions, MeshSpec, NodeSpec};
    pub use crate::model::{InterfaceConfig, NodeConfig, PeerConfig};
    pub use crate::render::{parse, render};
    pub use crate::synth::{MeshConfigs, MeshSynthesizer};
    pub use crate::writer::{ConfigWriter, FileConfigWriter, MemoryWriter};
}
