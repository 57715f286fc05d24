//! Native key backend
//!
//! Uses X25519 from `x25519-dalek`, the same curve and encoding `wg genkey`
//! produces, so no external binary is needed.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};

use super::{KeyPair, KeyProvider, PrivateKey, PublicKey};
use crate::error::Result;

/// In-process X25519 key generation
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519KeyProvider;

impl KeyProvider for X25519KeyProvider {
    fn generate_keypair(&self) -> Result<KeyPair> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = DalekPublicKey::from(&secret);
        Ok(KeyPair {
            private: PrivateKey::from_bytes(secret.to_bytes()),
            public: PublicKey::from_bytes(public.to_bytes()),
        })
    }

    fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey> {
        let secret = StaticSecret::from(private.to_bytes()?);
        let public = DalekPublicKey::from(&secret);
        Ok(PublicKey::from_bytes(public.to_bytes()))
    }
}
