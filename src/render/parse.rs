//! Re-parse rendered configs back into the model
//!
//! Accepts the layout [`render`](super::render) produces (plus blank lines
//! and `#` comments). It is not a general wg-quick reader: unknown keys are
//! rejected rather than skipped.

use crate::error::{Error, Result};
use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use crate::model::{InterfaceConfig, NodeConfig, PeerConfig};

use super::{INTERFACE, PEER};

#[derive(Default)]
struct InterfaceDraft {
    private_key: Option<PrivateKey>,
    addresses: Vec<String>,
    listen_port: Option<u16>,
    dns: Vec<String>,
    mtu: Option<u16>,
    table: Option<String>,
    save_config: Option<bool>,
    pre_up: Option<String>,
    pre_down: Option<String>,
    post_up: Option<String>,
    post_down: Option<String>,
}

#[derive(Default)]
struct PeerDraft {
    public_key: Option<PublicKey>,
    preshared_key: Option<PresharedKey>,
    allowed_ips: Vec<String>,
    endpoint: Option<String>,
    persistent_keepalive: Option<u16>,
}

enum Section {
    None,
    Interface,
    Peer,
}

/// Parse wg-quick text for the node called `name`
pub fn parse(name: &str, text: &str) -> Result<NodeConfig> {
    let mut interface: Option<InterfaceDraft> = None;
    let mut peers: Vec<PeerDraft> = Vec::new();
    let mut section = Section::None;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.eq_ignore_ascii_case(INTERFACE) {
            if interface.is_some() {
                return Err(syntax(line_no, "duplicate [Interface] section"));
            }
            interface = Some(InterfaceDraft::default());
            section = Section::Interface;
            continue;
        }
        if line.eq_ignore_ascii_case(PEER) {
            peers.push(PeerDraft::default());
            section = Section::Peer;
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .ok_or_else(|| syntax(line_no, "expected 'Key = Value'"))?;

        match section {
            Section::None => return Err(syntax(line_no, "key outside of any section")),
            Section::Interface => {
                let draft = interface
                    .as_mut()
                    .ok_or_else(|| Error::Internal("interface section without draft".into()))?;
                interface_field(draft, key, value).map_err(|e| at_line(line_no, e))?;
            }
            Section::Peer => {
                let draft = peers
                    .last_mut()
                    .ok_or_else(|| Error::Internal("peer section without draft".into()))?;
                peer_field(draft, key, value).map_err(|e| at_line(line_no, e))?;
            }
        }
    }

    let draft = interface.ok_or_else(|| Error::Serialization("missing [Interface] section".into()))?;
    let private_key = draft
        .private_key
        .ok_or_else(|| Error::Serialization("[Interface] is missing PrivateKey".into()))?;

    let mut iface = InterfaceConfig::new(private_key);
    iface.addresses = draft.addresses;
    iface.listen_port = draft.listen_port;
    iface.dns = draft.dns;
    iface.mtu = draft.mtu;
    iface.table = draft.table;
    iface.save_config = draft.save_config;
    iface.pre_up = draft.pre_up;
    iface.pre_down = draft.pre_down;
    iface.post_up = draft.post_up;
    iface.post_down = draft.post_down;

    let peers = peers
        .into_iter()
        .enumerate()
        .map(|(i, draft)| {
            let public_key = draft.public_key.ok_or_else(|| {
                Error::Serialization(format!("[Peer] #{} is missing PublicKey", i + 1))
            })?;
            let mut peer = PeerConfig::new(public_key);
            peer.preshared_key = draft.preshared_key;
            peer.allowed_ips = draft.allowed_ips;
            peer.endpoint = draft.endpoint;
            peer.persistent_keepalive = draft.persistent_keepalive;
            Ok(peer)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NodeConfig {
        name: name.to_string(),
        interface: iface,
        peers,
    })
}

fn interface_field(draft: &mut InterfaceDraft, key: &str, value: &str) -> Result<()> {
    match key {
        "PrivateKey" => draft.private_key = Some(PrivateKey::parse(value)?),
        "ListenPort" => draft.listen_port = Some(number(key, value)?),
        "Address" => draft.addresses.extend(split_list(value)),
        "DNS" => draft.dns.extend(split_list(value)),
        "MTU" => draft.mtu = Some(number(key, value)?),
        "Table" => draft.table = Some(value.to_string()),
        "SaveConfig" => draft.save_config = Some(boolean(key, value)?),
        "PreUp" => draft.pre_up = Some(value.to_string()),
        "PreDown" => draft.pre_down = Some(value.to_string()),
        "PostUp" => draft.post_up = Some(value.to_string()),
        "PostDown" => draft.post_down = Some(value.to_string()),
        "PublicKey" => {
            return Err(Error::Serialization("PublicKey does not belong in [Interface]".into()))
        }
        other => return Err(Error::Serialization(format!("unknown [Interface] key '{}'", other))),
    }
    Ok(())
}

fn peer_field(draft: &mut PeerDraft, key: &str, value: &str) -> Result<()> {
    match key {
        "PublicKey" => draft.public_key = Some(PublicKey::parse(value)?),
        "PresharedKey" => draft.preshared_key = Some(PresharedKey::parse(value)?),
        "AllowedIPs" => draft.allowed_ips.extend(split_list(value)),
        "Endpoint" => draft.endpoint = Some(value.to_string()),
        "PersistentKeepalive" => {
            draft.persistent_keepalive = match value {
                "off" => None,
                _ => Some(number(key, value)?),
            }
        }
        "PrivateKey" => {
            return Err(Error::Serialization("PrivateKey must never appear in [Peer]".into()))
        }
        other => return Err(Error::Serialization(format!("unknown [Peer] key '{}'", other))),
    }
    Ok(())
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn number(key: &str, value: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::Serialization(format!("{} must be a number from 0 to 65535, got '{}'", key, value)))
}

fn boolean(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::Serialization(format!("{} must be true or false, got '{}'", key, value))),
    }
}

fn syntax(line: usize, msg: &str) -> Error {
    Error::Serialization(format!("line {}: {}", line, msg))
}

fn at_line(line: usize, err: Error) -> Error {
    match err {
        Error::Serialization(msg) => Error::Serialization(format!("line {}: {}", line, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testing::{private_key, CountingKeyProvider};
    use crate::mesh::{MeshOptions, MeshSpec, NodeSpec};
    use crate::render::render;
    use crate::synth::MeshSynthesizer;

    #[test]
    fn test_round_trip_synthesized_mesh() {
        let mesh = MeshSpec::new(
            NodeSpec {
                endpoint: Some("vpn.example.com:51820".into()),
                dns: vec!["10.200.200.1".into()],
                mtu: Some(1420),
                table: Some("1234".into()),
                save_config: Some(false),
                post_up: Some("iptables -A FORWARD -i %i -j ACCEPT".into()),
                post_down: Some("iptables -D FORWARD -i %i -j ACCEPT".into()),
                persistent_keepalive: Some(21),
                ..NodeSpec::named("wg0")
            },
            vec![
                NodeSpec {
                    dns: vec!["1.1.1.1".into(), "1.0.0.1".into()],
                    persistent_keepalive: Some(25),
                    preshared_key: Some(PresharedKey::parse(private_key(77).expose()).unwrap()),
                    ..NodeSpec::named("alice")
                },
                NodeSpec {
                    allowed_ips: vec!["10.200.200.0/24".into(), "192.168.10.0/24".into()],
                    ..NodeSpec::named("bob")
                },
            ],
            MeshOptions {
                generate_peers: true,
                ..MeshOptions::default()
            },
        );

        let configs = MeshSynthesizer::new(CountingKeyProvider::new())
            .synthesize(&mesh)
            .unwrap();
        for (name, node) in &configs {
            let text = render(node);
            let reparsed = parse(name, &text).unwrap();
            assert_eq!(&reparsed, node);
            assert_eq!(render(&reparsed), text);
        }
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let text = format!(
            "# generated\n\n[Interface]\nPrivateKey = {}\n\n# hub\n[Peer]\nPublicKey = {}\nPersistentKeepalive = off\n",
            private_key(1).expose(),
            PublicKey::from_bytes([2u8; 32])
        );
        let node = parse("wg0", &text).unwrap();
        assert_eq!(node.peers.len(), 1);
        assert_eq!(node.peers[0].persistent_keepalive, None);
    }

    #[test]
    fn test_non_numeric_port() {
        let text = format!(
            "[Interface]\nPrivateKey = {}\nListenPort = fifty\n",
            private_key(1).expose()
        );
        match parse("wg0", &text) {
            Err(Error::Serialization(msg)) => {
                assert!(msg.contains("line 3"));
                assert!(msg.contains("ListenPort"));
            }
            other => panic!("expected serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_private_key_in_peer_rejected() {
        let key = private_key(1);
        let text = format!(
            "[Interface]\nPrivateKey = {}\n\n[Peer]\nPrivateKey = {}\n",
            key.expose(),
            key.expose()
        );
        assert!(matches!(parse("wg0", &text), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_structural_errors() {
        assert!(parse("wg0", "ListenPort = 1\n").is_err());
        assert!(parse("wg0", "[Interface]\nListenPort = 1\n").is_err());
        assert!(parse("wg0", "").is_err());

        let key = private_key(1);
        let missing_pub = format!("[Interface]\nPrivateKey = {}\n[Peer]\nAllowedIPs = 0.0.0.0/0\n", key.expose());
        assert!(parse("wg0", &missing_pub).is_err());

        let bad_bool = format!("[Interface]\nPrivateKey = {}\nSaveConfig = yes\n", key.expose());
        assert!(parse("wg0", &bad_bool).is_err());

        let unknown = format!("[Interface]\nPrivateKey = {}\nFwMark = 0x1\n", key.expose());
        assert!(parse("wg0", &unknown).is_err());
    }
}
