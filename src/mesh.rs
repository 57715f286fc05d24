//! Mesh description: one server, its peers, and mesh-wide options
//!
//! These are the inputs to synthesis. They are built once (usually from the
//! TOML config) and only read afterwards.

use serde::{Deserialize, Deserializer, Serialize};

use crate::address::DEFAULT_POOL;
use crate::keys::{PresharedKey, PrivateKey, PublicKey};

/// Listen port substituted for the server in generate-peers mode
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Peer route used when a peer names no allowed IPs (full tunnel)
pub const FULL_TUNNEL: &str = "0.0.0.0/0";

/// Mesh-wide options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshOptions {
    /// Produce a config for every peer, not only for the server
    #[serde(default)]
    pub generate_peers: bool,

    /// Pool tunnel addresses are allocated from (IPv4 CIDR)
    #[serde(default = "default_pool")]
    pub pool: String,

    /// Server listen port used when generating peers and none is given
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_pool() -> String {
    DEFAULT_POOL.to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            generate_peers: false,
            pool: default_pool(),
            listen_port: default_listen_port(),
        }
    }
}

/// Declaration of one mesh member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    /// Interface name, also the config file stem
    pub name: String,

    #[serde(default)]
    pub private_key: Option<PrivateKey>,

    /// Accepted together with `private_key`, or alone for a peer whose
    /// own config is not generated
    #[serde(default)]
    pub public_key: Option<PublicKey>,

    /// Explicit interface addresses; allocation is skipped when present
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,

    #[serde(default)]
    pub listen_port: Option<u16>,

    #[serde(default)]
    pub mtu: Option<u16>,

    /// Routing table ("off", "auto" or a table number)
    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub pre_up: Option<String>,

    #[serde(default)]
    pub pre_down: Option<String>,

    #[serde(default)]
    pub post_up: Option<String>,

    #[serde(default)]
    pub post_down: Option<String>,

    #[serde(default)]
    pub save_config: Option<bool>,

    /// Public `host:port` peers dial (server only)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Routes a peer sends through the server; defaults to full tunnel
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub allowed_ips: Vec<String>,

    /// Shared by both ends of this peer's link to the server
    #[serde(default)]
    pub preshared_key: Option<PresharedKey>,

    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
}

impl NodeSpec {
    /// A node with only a name; everything else defaulted
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// The whole mesh: server, peers in declaration order, and options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshSpec {
    pub server: NodeSpec,
    pub peers: Vec<NodeSpec>,
    pub options: MeshOptions,
}

impl MeshSpec {
    pub fn new(server: NodeSpec, peers: Vec<NodeSpec>, options: MeshOptions) -> Self {
        Self { server, peers, options }
    }

    /// All members, server first
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        std::iter::once(&self.server).chain(self.peers.iter())
    }
}

/// Accept either `key = "a"` or `key = ["a", "b"]`
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_or_many() {
        let node: NodeSpec = toml::from_str(
            r#"
name = "alice"
dns = "1.1.1.1"
allowed_ips = ["10.200.200.0/24", "192.168.1.0/24"]
"#,
        )
        .unwrap();
        assert_eq!(node.dns, vec!["1.1.1.1"]);
        assert_eq!(node.allowed_ips.len(), 2);
        assert!(node.addresses.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let parsed: Result<NodeSpec, _> = toml::from_str("name = \"alice\"\nallowedIPs = \"0.0.0.0/0\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_bad_key_rejected_at_parse() {
        let parsed: Result<NodeSpec, _> = toml::from_str("name = \"alice\"\nprivate_key = \"short\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_nodes_order() {
        let mesh = MeshSpec::new(
            NodeSpec::named("wg0"),
            vec![NodeSpec::named("alice"), NodeSpec::named("bob")],
            MeshOptions::default(),
        );
        let names: Vec<&str> = mesh.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["wg0", "alice", "bob"]);
    }
}
