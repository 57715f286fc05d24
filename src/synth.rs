//! Mesh synthesis
//!
//! Turns one [`MeshSpec`] into a config per member with every cross
//! reference consistent. The pass runs in four phases and fails as a whole:
//!
//! 1. validate the description (no side effects)
//! 2. assign addresses (pure)
//! 3. resolve keys, once per node, in parallel
//! 4. wire peers and build each node
//!
//! Peers always reach the server through its declared endpoint; the server
//! never holds an endpoint for its peers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

use tracing::{debug, info, warn};

use crate::address::{self, AddressPool, SERVER_INDEX};
use crate::builder::NodeConfigBuilder;
use crate::error::{Error, Result};
use crate::keys::{KeyCache, KeyProvider};
use crate::mesh::{MeshSpec, NodeSpec, FULL_TUNNEL};
use crate::model::{NodeConfig, PeerConfig};

/// Synthesized configs keyed by node name
pub type MeshConfigs = BTreeMap<String, NodeConfig>;

/// Longest interface name the kernel accepts
const MAX_INTERFACE_NAME: usize = 15;

/// Builds the full set of node configs for a mesh
pub struct MeshSynthesizer<P: KeyProvider> {
    provider: P,
}

impl<P: KeyProvider> MeshSynthesizer<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Synthesize every node config. Either the complete mapping is
    /// returned or an error; there is no partial result.
    pub fn synthesize(&self, mesh: &MeshSpec) -> Result<MeshConfigs> {
        let pool = validate(mesh)?;
        let generate_peers = mesh.options.generate_peers;

        let (server_addresses, peer_addresses) = assign_addresses(mesh, &pool)?;

        let nodes: Vec<&NodeSpec> = mesh.nodes().collect();
        let cache = KeyCache::new(&self.provider, nodes.iter().map(|n| n.name.as_str()));
        cache.resolve_all(&nodes)?;
        let server_keys = cache.resolve(&mesh.server)?;

        let mut configs = MeshConfigs::new();
        let mut server_peers = Vec::with_capacity(mesh.peers.len());

        for (peer, addresses) in mesh.peers.iter().zip(peer_addresses) {
            let peer_keys = cache.resolve(peer)?;

            let mut to_peer = PeerConfig::new(peer_keys.public.clone());
            to_peer.allowed_ips = addresses
                .iter()
                .map(|a| address::host_route(a))
                .collect::<Result<Vec<_>>>()?;
            to_peer.preshared_key = peer.preshared_key.clone();
            to_peer.persistent_keepalive = mesh.server.persistent_keepalive;
            server_peers.push(to_peer);

            if generate_peers {
                let mut to_server = PeerConfig::new(server_keys.public.clone());
                to_server.preshared_key = peer.preshared_key.clone();
                to_server.allowed_ips = if peer.allowed_ips.is_empty() {
                    vec![FULL_TUNNEL.to_string()]
                } else {
                    peer.allowed_ips.clone()
                };
                to_server.endpoint = mesh.server.endpoint.clone();
                to_server.persistent_keepalive = peer.persistent_keepalive;

                let node = NodeConfigBuilder::new(peer).build(&peer_keys, addresses, vec![to_server])?;
                info!("Built peer {} at {}", node.name, node.interface.addresses.join(", "));
                configs.insert(node.name.clone(), node);
            }
        }

        let mut builder = NodeConfigBuilder::new(&mesh.server);
        if generate_peers {
            builder = builder.default_listen_port(mesh.options.listen_port);
        }
        let server = builder.build(&server_keys, server_addresses, server_peers)?;
        info!(
            "Synthesized mesh {} with {} peer(s), {} config(s)",
            server.name,
            mesh.peers.len(),
            configs.len() + 1
        );
        configs.insert(server.name.clone(), server);

        Ok(configs)
    }
}

/// Tunnel addresses for the server and each peer, in declaration order.
///
/// The server takes index 1, peers 2..=N+1. An explicit address skips
/// allocation but still uses up its index. Fails if any host address would
/// belong to two nodes.
pub fn assign_addresses(mesh: &MeshSpec, pool: &AddressPool) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let server = assign(pool, &mesh.server, SERVER_INDEX)?;
    let peers = mesh
        .peers
        .iter()
        .zip(SERVER_INDEX + 1..)
        .map(|(peer, index)| assign(pool, peer, index))
        .collect::<Result<Vec<_>>>()?;

    let assigned = std::iter::once((&mesh.server, &server)).chain(mesh.peers.iter().zip(&peers));
    check_distinct(assigned)?;
    Ok((server, peers))
}

/// Explicit addresses verbatim, or the pool address for `index`
fn assign(pool: &AddressPool, node: &NodeSpec, index: u32) -> Result<Vec<String>> {
    if node.addresses.is_empty() {
        let address = pool.allocate(index)?;
        debug!("Allocated {} to {} (index {})", address, node.name, index);
        Ok(vec![address])
    } else {
        Ok(node.addresses.clone())
    }
}

/// Every tunnel host address belongs to exactly one node
fn check_distinct<'a>(assigned: impl Iterator<Item = (&'a NodeSpec, &'a Vec<String>)>) -> Result<()> {
    let mut owners: HashMap<IpAddr, &str> = HashMap::new();
    for (node, addresses) in assigned {
        for address in addresses {
            let ip = address::host_ip(address)?;
            match owners.get(&ip) {
                Some(owner) if *owner != node.name => {
                    return Err(Error::Validation(format!(
                        "address {} is assigned to both '{}' and '{}'",
                        ip, owner, node.name
                    )));
                }
                Some(_) => {}
                None => {
                    owners.insert(ip, &node.name);
                }
            }
        }
    }
    Ok(())
}

/// Check the whole description before anything is generated
pub fn validate(mesh: &MeshSpec) -> Result<AddressPool> {
    let pool = AddressPool::parse(&mesh.options.pool)?;
    let generate_peers = mesh.options.generate_peers;

    let mut seen = HashSet::new();
    for node in mesh.nodes() {
        check_name(&node.name)?;
        if !seen.insert(node.name.as_str()) {
            return Err(Error::Validation(format!("node name '{}' is used twice", node.name)));
        }
        for value in node.addresses.iter().chain(node.allowed_ips.iter()) {
            address::check_cidr(value)?;
        }
        if node.dns.iter().any(|d| d.trim().is_empty()) {
            return Err(Error::Validation(format!("node '{}' has an empty DNS entry", node.name)));
        }
        if let Some(endpoint) = &node.endpoint {
            check_endpoint(endpoint)?;
        }
    }

    let server = &mesh.server;
    if server.private_key.is_none() && server.public_key.is_some() {
        return Err(Error::Validation(format!(
            "server '{}' has a public key but no private key",
            server.name
        )));
    }
    if generate_peers && server.endpoint.is_none() {
        return Err(Error::Validation(format!(
            "server '{}' needs an endpoint when generating peers",
            server.name
        )));
    }
    if !server.allowed_ips.is_empty() {
        warn!("Ignoring allowed_ips on server {}", server.name);
    }
    if server.preshared_key.is_some() {
        warn!("Ignoring preshared_key on server {}: set it on each peer", server.name);
    }

    for peer in &mesh.peers {
        if generate_peers && peer.private_key.is_none() && peer.public_key.is_some() {
            return Err(Error::Validation(format!(
                "peer '{}' has a public key but no private key; its config cannot be generated",
                peer.name
            )));
        }
        // Only the server config is written, so a generated private key would be lost
        if !generate_peers && peer.private_key.is_none() && peer.public_key.is_none() {
            return Err(Error::Validation(format!(
                "peer '{}' needs a public_key or private_key when peer configs are not generated",
                peer.name
            )));
        }
        if peer.endpoint.is_some() {
            warn!("Ignoring endpoint on peer {}: peers reach the server, not the reverse", peer.name);
        }
    }

    Ok(pool)
}

/// wg-quick interface names: 1 to 15 of `[A-Za-z0-9_=+.-]`
fn check_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'));
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME || !valid_chars || name == "." || name == ".." {
        return Err(Error::Validation(format!(
            "'{}' is not a valid interface name (1-{} of A-Z a-z 0-9 _ = + . -)",
            name, MAX_INTERFACE_NAME
        )));
    }
    Ok(())
}

/// `host:port` with a numeric port
fn check_endpoint(endpoint: &str) -> Result<()> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::Serialization(format!("endpoint '{}' is missing a port", endpoint)))?;
    if host.is_empty() || host == "[]" {
        return Err(Error::Serialization(format!("endpoint '{}' is missing a host", endpoint)));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Serialization(format!("endpoint '{}' has a non-numeric port", endpoint)))?;
    Ok(())
}
