//! Key material for mesh nodes
//!
//! Keys are carried in the base64 text form that `wg genkey` emits and
//! wg-quick reads. Generation is delegated to a [`KeyProvider`] so the
//! synthesizer can run against the native X25519 backend, the `wg` binary,
//! or a deterministic test double.

pub mod cache;
pub mod command;
pub mod x25519;

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use cache::KeyCache;
pub use command::WgCommandKeyProvider;
pub use x25519::X25519KeyProvider;

/// Length of a Curve25519 key in bytes
pub const KEY_LEN: usize = 32;

/// Decode a base64 wg key, checking its length
fn decode_key(what: &str, b64: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|e| Error::Serialization(format!("{} is not valid base64: {}", what, e)))?;
    if bytes.len() != KEY_LEN {
        return Err(Error::Serialization(format!(
            "Invalid {} length: {} (expected {})",
            what,
            bytes.len(),
            KEY_LEN
        )));
    }
    let mut arr = [0u8; KEY_LEN];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// A node's private key. Never logged: `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Parse a base64 private key
    pub fn parse(b64: &str) -> Result<Self> {
        decode_key("private key", b64)?;
        Ok(Self(b64.trim().to_string()))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(BASE64.encode(bytes))
    }

    pub fn to_bytes(&self) -> Result<[u8; KEY_LEN]> {
        decode_key("private key", &self.0)
    }

    /// The base64 text written into `[Interface]`
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// A node's public key, the identity other nodes reference it by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(String);

impl PublicKey {
    /// Parse a base64 public key
    pub fn parse(b64: &str) -> Result<Self> {
        decode_key("public key", b64)?;
        Ok(Self(b64.trim().to_string()))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(BASE64.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symmetric key shared by both ends of one link
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PresharedKey(String);

impl PresharedKey {
    pub fn parse(b64: &str) -> Result<Self> {
        decode_key("preshared key", b64)?;
        Ok(Self(b64.trim().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(<redacted>)")
    }
}

macro_rules! string_conversions {
    ($($key:ident),*) => {$(
        impl TryFrom<String> for $key {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::parse(&value)
            }
        }

        impl From<$key> for String {
            fn from(key: $key) -> String {
                key.0
            }
        }
    )*};
}

string_conversions!(PrivateKey, PublicKey, PresharedKey);

/// Private key plus the public key derived from it
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

/// The resolved identity of one node for one synthesis run.
///
/// `private` is absent only for peers that supplied nothing but a public
/// key, whose own configuration is not rendered.
#[derive(Debug, Clone)]
pub struct NodeKeys {
    pub public: PublicKey,
    pub private: Option<PrivateKey>,
}

impl NodeKeys {
    /// The private key, required when rendering this node's `[Interface]`
    pub fn private(&self, node: &str) -> Result<&PrivateKey> {
        self.private.as_ref().ok_or_else(|| {
            Error::Validation(format!("node '{}' has a public key but no private key", node))
        })
    }
}

impl From<KeyPair> for NodeKeys {
    fn from(kp: KeyPair) -> Self {
        Self {
            public: kp.public,
            private: Some(kp.private),
        }
    }
}

/// External key-generation capability
pub trait KeyProvider: Send + Sync {
    /// Generate a fresh keypair
    fn generate_keypair(&self) -> Result<KeyPair>;

    /// Derive the public key belonging to `private`
    fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey>;
}

/// Lets the CLI pick a backend at runtime
impl<P: KeyProvider + ?Sized> KeyProvider for Box<P> {
    fn generate_keypair(&self) -> Result<KeyPair> {
        (**self).generate_keypair()
    }

    fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey> {
        (**self).derive_public(private)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_bad_length() {
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(PrivateKey::parse(&short), Err(Error::Serialization(_))));
        assert!(matches!(PublicKey::parse("not base64!"), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let key = testing::private_key(7);
        let shown = format!("{:?}", key);
        assert!(!shown.contains(key.expose()));
        assert_eq!(shown, "PrivateKey(<redacted>)");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let encoded = BASE64.encode([9u8; KEY_LEN]);
        let key = PublicKey::parse(&format!("  {}\n", encoded)).unwrap();
        assert_eq!(key.as_str(), encoded);
    }

    #[test]
    fn test_lone_public_key_has_no_private() {
        let keys = NodeKeys {
            public: PublicKey::from_bytes([3u8; KEY_LEN]),
            private: None,
        };
        assert!(matches!(keys.private("alice"), Err(Error::Validation(_))));
    }
}
