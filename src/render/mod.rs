//! wg-quick text output
//!
//! Layout is fixed so output is byte-for-byte reproducible:
//!
//! ```text
//! [Interface]
//! PrivateKey, ListenPort, Address, DNS, MTU, Table, SaveConfig,
//! PreUp, PreDown, PostUp, PostDown
//!
//! [Peer]
//! PublicKey, PresharedKey, AllowedIPs, Endpoint, PersistentKeepalive
//! ```
//!
//! Absent fields are omitted, lists are joined with ", ".

mod parse;

use std::fmt::Write as _;

use crate::model::{InterfaceConfig, NodeConfig, PeerConfig};

pub use parse::parse;

pub(crate) const INTERFACE: &str = "[Interface]";
pub(crate) const PEER: &str = "[Peer]";

/// Render a node config as wg-quick text
pub fn render(node: &NodeConfig) -> String {
    let mut out = String::new();
    write_interface(&mut out, &node.interface);
    for peer in &node.peers {
        out.push('\n');
        write_peer(&mut out, peer);
    }
    out
}

fn write_interface(out: &mut String, iface: &InterfaceConfig) {
    out.push_str(INTERFACE);
    out.push('\n');
    field(out, "PrivateKey", Some(iface.private_key.expose()));
    field(out, "ListenPort", iface.listen_port);
    list(out, "Address", &iface.addresses);
    list(out, "DNS", &iface.dns);
    field(out, "MTU", iface.mtu);
    field(out, "Table", iface.table.as_deref());
    field(out, "SaveConfig", iface.save_config);
    field(out, "PreUp", iface.pre_up.as_deref());
    field(out, "PreDown", iface.pre_down.as_deref());
    field(out, "PostUp", iface.post_up.as_deref());
    field(out, "PostDown", iface.post_down.as_deref());
}

fn write_peer(out: &mut String, peer: &PeerConfig) {
    out.push_str(PEER);
    out.push('\n');
    field(out, "PublicKey", Some(peer.public_key.as_str()));
    field(out, "PresharedKey", peer.preshared_key.as_ref().map(|k| k.expose()));
    list(out, "AllowedIPs", &peer.allowed_ips);
    field(out, "Endpoint", peer.endpoint.as_deref());
    field(out, "PersistentKeepalive", peer.persistent_keepalive);
}

fn field<T: std::fmt::Display>(out: &mut String, key: &str, value: Option<T>) {
    if let Some(value) = value {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{} = {}", key, value);
    }
}

fn list(out: &mut String, key: &str, values: &[String]) {
    if !values.is_empty() {
        field(out, key, Some(values.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testing::private_key;
    use crate::keys::{KeyProvider, PresharedKey, X25519KeyProvider};

    fn minimal() -> NodeConfig {
        let mut iface = InterfaceConfig::new(private_key(1));
        iface.addresses = vec!["10.200.200.2/24".into()];
        NodeConfig {
            name: "alice".into(),
            interface: iface,
            peers: Vec::new(),
        }
    }

    #[test]
    fn test_render_interface_only() {
        let node = minimal();
        let expected = format!(
            "[Interface]\nPrivateKey = {}\nAddress = 10.200.200.2/24\n",
            node.interface.private_key.expose()
        );
        assert_eq!(render(&node), expected);
    }

    #[test]
    fn test_render_full_order() {
        let mut node = minimal();
        let iface = &mut node.interface;
        iface.listen_port = Some(51820);
        iface.addresses.push("10.201.0.2/24".into());
        iface.dns = vec!["1.1.1.1".into(), "8.8.8.8".into()];
        iface.mtu = Some(1420);
        iface.table = Some("off".into());
        iface.save_config = Some(true);
        iface.pre_up = Some("echo pre-up".into());
        iface.pre_down = Some("echo pre-down".into());
        iface.post_up = Some("echo post-up".into());
        iface.post_down = Some("echo post-down".into());

        let server_public = X25519KeyProvider.derive_public(&private_key(2)).unwrap();
        let psk = PresharedKey::parse(private_key(3).expose()).unwrap();
        let mut peer = PeerConfig::new(server_public.clone());
        peer.preshared_key = Some(psk.clone());
        peer.allowed_ips = vec!["0.0.0.0/0".into(), "10.9.0.0/16".into()];
        peer.endpoint = Some("vpn.example.com:51820".into());
        peer.persistent_keepalive = Some(25);
        node.peers.push(peer);

        let expected = format!(
            "[Interface]\n\
             PrivateKey = {private}\n\
             ListenPort = 51820\n\
             Address = 10.200.200.2/24, 10.201.0.2/24\n\
             DNS = 1.1.1.1, 8.8.8.8\n\
             MTU = 1420\n\
             Table = off\n\
             SaveConfig = true\n\
             PreUp = echo pre-up\n\
             PreDown = echo pre-down\n\
             PostUp = echo post-up\n\
             PostDown = echo post-down\n\
             \n\
             [Peer]\n\
             PublicKey = {public}\n\
             PresharedKey = {psk}\n\
             AllowedIPs = 0.0.0.0/0, 10.9.0.0/16\n\
             Endpoint = vpn.example.com:51820\n\
             PersistentKeepalive = 25\n",
            private = node.interface.private_key.expose(),
            public = server_public,
            psk = psk.expose(),
        );
        assert_eq!(render(&node), expected);
    }

    #[test]
    fn test_every_peer_section_is_separated() {
        let mut node = minimal();
        for byte in 10..13 {
            let mut peer = PeerConfig::new(X25519KeyProvider.derive_public(&private_key(byte)).unwrap());
            peer.allowed_ips = vec![format!("10.200.200.{}/32", byte)];
            node.peers.push(peer);
        }

        let text = render(&node);
        assert_eq!(text.matches("\n\n[Peer]\n").count(), 3);
        assert_eq!(text.matches("PrivateKey").count(), 1);
        assert!(text.ends_with("AllowedIPs = 10.200.200.12/32\n"));
    }
}
