//! Rendered-config data model
//!
//! One [`NodeConfig`] per mesh member: its own `[Interface]` and the
//! `[Peer]` entries it carries. Optional fields are explicit `Option`s or
//! possibly-empty lists; the serializer skips whatever is absent.

use crate::keys::{PresharedKey, PrivateKey, PublicKey};

/// A node's own tunnel identity and settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub private_key: PrivateKey,
    /// Ordered, without duplicates
    pub addresses: Vec<String>,
    pub listen_port: Option<u16>,
    pub dns: Vec<String>,
    pub mtu: Option<u16>,
    pub table: Option<String>,
    pub save_config: Option<bool>,
    pub pre_up: Option<String>,
    pub pre_down: Option<String>,
    pub post_up: Option<String>,
    pub post_down: Option<String>,
}

impl InterfaceConfig {
    /// An interface with only a key; every optional field absent
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            addresses: Vec::new(),
            listen_port: None,
            dns: Vec::new(),
            mtu: None,
            table: None,
            save_config: None,
            pre_up: None,
            pre_down: None,
            post_up: None,
            post_down: None,
        }
    }
}

/// A remote party as seen from one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: PublicKey,
    pub preshared_key: Option<PresharedKey>,
    pub allowed_ips: Vec<String>,
    pub endpoint: Option<String>,
    pub persistent_keepalive: Option<u16>,
}

impl PeerConfig {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            preshared_key: None,
            allowed_ips: Vec::new(),
            endpoint: None,
            persistent_keepalive: None,
        }
    }
}

/// Complete configuration of one mesh member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Interface name and file stem
    pub name: String,
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
}

impl NodeConfig {
    /// Find the peer entry for `public_key`
    pub fn peer(&self, public_key: &PublicKey) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| &p.public_key == public_key)
    }
}
