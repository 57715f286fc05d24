//! Per-node key memo
//!
//! Every node gets exactly one slot, created up front. Resolving a node
//! locks only that node's slot, so distinct nodes resolve in parallel while
//! a given node is generated or derived at most once per run. Every reader
//! of a node's identity (its own `[Interface]` and every `[Peer]` that
//! points at it) goes through the same slot and sees the same bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::debug;

use super::{KeyProvider, NodeKeys};
use crate::error::{Error, Result};
use crate::mesh::NodeSpec;

/// Single-flight key resolution for the nodes of one synthesis run
pub struct KeyCache<'a> {
    provider: &'a dyn KeyProvider,
    slots: HashMap<String, Mutex<Option<NodeKeys>>>,
}

impl<'a> KeyCache<'a> {
    /// Create a cache with one empty slot per node name
    pub fn new<'n>(provider: &'a dyn KeyProvider, names: impl IntoIterator<Item = &'n str>) -> Self {
        let slots = names
            .into_iter()
            .map(|name| (name.to_string(), Mutex::new(None)))
            .collect();
        Self { provider, slots }
    }

    /// Resolve `node`'s keys, consulting the provider only on first use
    pub fn resolve(&self, node: &NodeSpec) -> Result<NodeKeys> {
        let slot = self
            .slots
            .get(&node.name)
            .ok_or_else(|| Error::Internal(format!("no key slot for node '{}'", node.name)))?;
        let mut slot = slot
            .lock()
            .map_err(|_| Error::Internal(format!("key slot for node '{}' poisoned", node.name)))?;

        if let Some(keys) = slot.as_ref() {
            return Ok(keys.clone());
        }

        let keys = match (&node.private_key, &node.public_key) {
            (Some(private), Some(public)) => NodeKeys {
                public: public.clone(),
                private: Some(private.clone()),
            },
            (Some(private), None) => {
                debug!("Deriving public key for {}", node.name);
                NodeKeys {
                    public: self.provider.derive_public(private)?,
                    private: Some(private.clone()),
                }
            }
            (None, Some(public)) => NodeKeys {
                public: public.clone(),
                private: None,
            },
            (None, None) => {
                debug!("Generating keypair for {}", node.name);
                self.provider.generate_keypair()?.into()
            }
        };

        *slot = Some(keys.clone());
        Ok(keys)
    }

    /// Resolve every node, spreading the work over a few scoped threads.
    /// The first failure is returned; nothing is retried.
    pub fn resolve_all(&self, nodes: &[&NodeSpec]) -> Result<HashMap<String, NodeKeys>> {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(nodes.len())
            .max(1);
        let next = AtomicUsize::new(0);

        let results: Vec<Result<Vec<(String, NodeKeys)>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| -> Result<Vec<(String, NodeKeys)>> {
                        let mut resolved = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::SeqCst);
                            let Some(node) = nodes.get(i) else { break };
                            resolved.push((node.name.clone(), self.resolve(node)?));
                        }
                        Ok(resolved)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Error::Internal("key resolution thread panicked".into())))
                })
                .collect()
        });

        let mut all = HashMap::with_capacity(nodes.len());
        for result in results {
            all.extend(result?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testing::{private_key, CountingKeyProvider};
    use crate::keys::X25519KeyProvider;

    #[test]
    fn test_generate_once_per_node() {
        let provider = CountingKeyProvider::new();
        let node = NodeSpec::named("alice");
        let cache = KeyCache::new(&provider, ["alice"]);

        let first = cache.resolve(&node).unwrap();
        let second = cache.resolve(&node).unwrap();
        assert_eq!(first.public, second.public);
        assert_eq!(first.private, second.private);
        assert_eq!(provider.generate_calls(), 1);
        assert_eq!(provider.derive_calls(), 0);
    }

    #[test]
    fn test_derive_once_for_explicit_private() {
        let provider = CountingKeyProvider::new();
        let node = NodeSpec {
            private_key: Some(private_key(4)),
            ..NodeSpec::named("wg0")
        };
        let cache = KeyCache::new(&provider, ["wg0"]);

        for _ in 0..5 {
            cache.resolve(&node).unwrap();
        }
        assert_eq!(provider.derive_calls(), 1);
        assert_eq!(provider.generate_calls(), 0);
        assert_eq!(
            cache.resolve(&node).unwrap().public,
            X25519KeyProvider.derive_public(&private_key(4)).unwrap()
        );
    }

    #[test]
    fn test_explicit_pair_needs_no_provider() {
        let provider = CountingKeyProvider::new();
        let private = private_key(8);
        let public = X25519KeyProvider.derive_public(&private).unwrap();
        let node = NodeSpec {
            private_key: Some(private),
            public_key: Some(public.clone()),
            ..NodeSpec::named("wg0")
        };
        let cache = KeyCache::new(&provider, ["wg0"]);

        assert_eq!(cache.resolve(&node).unwrap().public, public);
        assert_eq!(provider.total_calls(), 0);
    }

    #[test]
    fn test_unknown_node() {
        let provider = CountingKeyProvider::new();
        let cache = KeyCache::new(&provider, ["wg0"]);
        assert!(matches!(
            cache.resolve(&NodeSpec::named("mallory")),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_resolve_all_concurrently() {
        let provider = CountingKeyProvider::new();
        let nodes: Vec<NodeSpec> = (0..40).map(|i| NodeSpec::named(format!("peer{}", i))).collect();
        let refs: Vec<&NodeSpec> = nodes.iter().chain(nodes.iter()).collect();
        let cache = KeyCache::new(&provider, nodes.iter().map(|n| n.name.as_str()));

        let resolved = cache.resolve_all(&refs).unwrap();
        assert_eq!(resolved.len(), 40);
        // Each node listed twice, still generated once
        assert_eq!(provider.generate_calls(), 40);

        for node in &nodes {
            assert_eq!(cache.resolve(node).unwrap().public, resolved[&node.name].public);
        }
    }

    #[test]
    fn test_failure_propagates() {
        let provider = CountingKeyProvider::failing();
        let nodes = [NodeSpec::named("a"), NodeSpec::named("b")];
        let cache = KeyCache::new(&provider, ["a", "b"]);
        let refs: Vec<&NodeSpec> = nodes.iter().collect();
        assert!(matches!(cache.resolve_all(&refs), Err(Error::KeyGeneration(_))));
    }
}
