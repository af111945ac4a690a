// Key material: relay X25519 identities, directory Ed25519 signing keys and
// per-hop symmetric circuit keys.

use crate::relay::protocol::NodeDescriptor;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of a per-hop symmetric key (AES-256)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of an X25519 public or secret key
pub const X25519_KEY_SIZE: usize = 32;

/// Size of an Ed25519 public or secret key
pub const ED25519_KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// Symmetric key shared between the proxy and exactly one hop of one circuit.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Long-term X25519 key pair of a relay. The public half is published to the
/// directory; the secret half unwraps circuit keys sent by proxies.
#[derive(Clone)]
pub struct RelayKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl RelayKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; X25519_KEY_SIZE];
        OsRng.fill_bytes(&mut secret_bytes);
        let secret = StaticSecret::from(secret_bytes);
        secret_bytes.zeroize();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; X25519_KEY_SIZE] {
        *self.public.as_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Descriptor announcing this relay at `address`
    pub fn descriptor(&self, address: impl Into<String>) -> NodeDescriptor {
        NodeDescriptor {
            address: address.into(),
            public_key: self.public_key_bytes(),
        }
    }
}

impl fmt::Debug for RelayKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayKeyPair")
            .field("public", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Ed25519 key pair the directory signs node sets with.
#[derive(Clone)]
pub struct DirectoryKeyPair {
    signing_key: SigningKey,
}

impl DirectoryKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut secret_key_bytes = [0u8; ED25519_KEY_SIZE];
        OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    /// Restore a key pair from its hex-encoded 32-byte secret
    pub fn from_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(decode_fixed::<ED25519_KEY_SIZE>(secret_hex)?);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Hex-encoded secret. Wiped from memory on drop.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// Parse a hex-encoded Ed25519 public key, e.g. the pinned directory key
pub fn parse_verifying_key(public_hex: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = decode_fixed::<ED25519_KEY_SIZE>(public_hex)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

fn decode_fixed<const N: usize>(input: &str) -> Result<[u8; N], KeyError> {
    let decoded = Zeroizing::new(
        hex::decode(input.trim()).map_err(|e| KeyError::InvalidHex(e.to_string()))?,
    );
    <[u8; N]>::try_from(decoded.as_slice()).map_err(|_| KeyError::InvalidLength {
        expected: N,
        actual: decoded.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_keypair_unique() {
        let a = RelayKeyPair::generate();
        let b = RelayKeyPair::generate();
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_relay_descriptor() {
        let keys = RelayKeyPair::generate();
        let descriptor = keys.descriptor("127.0.0.1:9001");
        assert_eq!(descriptor.address, "127.0.0.1:9001");
        assert_eq!(descriptor.public_key, keys.public_key_bytes());
    }

    #[test]
    fn test_directory_key_hex_restore() {
        let keys = DirectoryKeyPair::generate();
        let restored = DirectoryKeyPair::from_hex(&keys.secret_hex()).unwrap();
        assert_eq!(keys.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_parse_verifying_key() {
        let keys = DirectoryKeyPair::generate();
        let parsed = parse_verifying_key(&keys.public_key_hex()).unwrap();
        assert_eq!(parsed, keys.verifying_key());
    }

    #[test]
    fn test_parse_verifying_key_rejects_bad_input() {
        assert!(matches!(
            parse_verifying_key("not hex"),
            Err(KeyError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_verifying_key("abcd"),
            Err(KeyError::InvalidLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn test_symmetric_key_debug_redacted() {
        let key = SymmetricKey::from_bytes([7u8; SYMMETRIC_KEY_SIZE]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains('7'));
    }
}
