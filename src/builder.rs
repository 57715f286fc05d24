//! Assembles one node's config from its declaration
//!
//! The builder knows nothing about other nodes: the peer entries a node
//! carries are computed by the synthesizer and handed in.

use tracing::warn;

use crate::error::Result;
use crate::keys::NodeKeys;
use crate::mesh::NodeSpec;
use crate::model::{InterfaceConfig, NodeConfig, PeerConfig};

/// Builds a [`NodeConfig`] for one [`NodeSpec`]
#[derive(Debug, Clone)]
pub struct NodeConfigBuilder<'a> {
    spec: &'a NodeSpec,
    default_listen_port: Option<u16>,
}

impl<'a> NodeConfigBuilder<'a> {
    pub fn new(spec: &'a NodeSpec) -> Self {
        Self {
            spec,
            default_listen_port: None,
        }
    }

    /// Port to use when the declaration gives none
    pub fn default_listen_port(mut self, port: u16) -> Self {
        self.default_listen_port = Some(port);
        self
    }

    /// Build the node config. Pass-through fields are copied verbatim and
    /// left absent when not declared.
    pub fn build(
        &self,
        keys: &NodeKeys,
        addresses: Vec<String>,
        peers: Vec<PeerConfig>,
    ) -> Result<NodeConfig> {
        let spec = self.spec;

        let mut interface = InterfaceConfig::new(keys.private(&spec.name)?.clone());
        interface.addresses = dedup(&spec.name, addresses);
        interface.listen_port = spec.listen_port.or(self.default_listen_port);
        interface.dns = spec.dns.clone();
        interface.mtu = spec.mtu;
        interface.table = spec.table.clone();
        interface.save_config = spec.save_config;
        interface.pre_up = spec.pre_up.clone();
        interface.pre_down = spec.pre_down.clone();
        interface.post_up = spec.post_up.clone();
        interface.post_down = spec.post_down.clone();

        Ok(NodeConfig {
            name: spec.name.clone(),
            interface,
            peers,
        })
    }
}

/// Drop repeated addresses, keeping first occurrences in order
fn dedup(node: &str, addresses: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(addresses.len());
    for address in addresses {
        if unique.contains(&address) {
            warn!("Dropping duplicate address {} on {}", address, node);
        } else {
            unique.push(address);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testing::private_key;
    use crate::keys::{KeyProvider, PublicKey, X25519KeyProvider};

    fn keys() -> NodeKeys {
        let private = private_key(1);
        NodeKeys {
            public: X25519KeyProvider.derive_public(&private).unwrap(),
            private: Some(private),
        }
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let spec = NodeSpec::named("alice");
        let node = NodeConfigBuilder::new(&spec)
            .build(&keys(), vec!["10.200.200.2/24".into()], Vec::new())
            .unwrap();

        assert_eq!(node.name, "alice");
        assert_eq!(node.interface.addresses, vec!["10.200.200.2/24"]);
        assert_eq!(node.interface.listen_port, None);
        assert_eq!(node.interface.mtu, None);
        assert_eq!(node.interface.save_config, None);
        assert!(node.interface.dns.is_empty());
        assert!(node.peers.is_empty());
    }

    #[test]
    fn test_pass_through_fields() {
        let spec = NodeSpec {
            dns: vec!["1.1.1.1".into(), "9.9.9.9".into()],
            mtu: Some(1380),
            table: Some("off".into()),
            save_config: Some(false),
            post_up: Some("iptables -A FORWARD -i %i -j ACCEPT".into()),
            ..NodeSpec::named("wg0")
        };
        let node = NodeConfigBuilder::new(&spec)
            .build(&keys(), vec!["10.0.0.1/24".into()], Vec::new())
            .unwrap();

        assert_eq!(node.interface.dns, vec!["1.1.1.1", "9.9.9.9"]);
        assert_eq!(node.interface.mtu, Some(1380));
        assert_eq!(node.interface.table.as_deref(), Some("off"));
        assert_eq!(node.interface.save_config, Some(false));
        assert_eq!(
            node.interface.post_up.as_deref(),
            Some("iptables -A FORWARD -i %i -j ACCEPT")
        );
        assert_eq!(node.interface.pre_down, None);
    }

    #[test]
    fn test_listen_port_default_only_when_absent() {
        let spec = NodeSpec::named("wg0");
        let node = NodeConfigBuilder::new(&spec)
            .default_listen_port(51820)
            .build(&keys(), Vec::new(), Vec::new())
            .unwrap();
        assert_eq!(node.interface.listen_port, Some(51820));

        let spec = NodeSpec {
            listen_port: Some(4500),
            ..NodeSpec::named("wg0")
        };
        let node = NodeConfigBuilder::new(&spec)
            .default_listen_port(51820)
            .build(&keys(), Vec::new(), Vec::new())
            .unwrap();
        assert_eq!(node.interface.listen_port, Some(4500));
    }

    #[test]
    fn test_duplicate_addresses_dropped() {
        let spec = NodeSpec::named("alice");
        let node = NodeConfigBuilder::new(&spec)
            .build(
                &keys(),
                vec!["10.0.0.2/24".into(), "10.1.0.2/24".into(), "10.0.0.2/24".into()],
                Vec::new(),
            )
            .unwrap();
        assert_eq!(node.interface.addresses, vec!["10.0.0.2/24", "10.1.0.2/24"]);
    }

    #[test]
    fn test_public_only_cannot_build() {
        let spec = NodeSpec::named("alice");
        let keys = NodeKeys {
            public: PublicKey::from_bytes([2u8; 32]),
            private: None,
        };
        assert!(NodeConfigBuilder::new(&spec)
            .build(&keys, Vec::new(), Vec::new())
            .is_err());
    }
}
