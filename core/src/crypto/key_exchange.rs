// Circuit key exchange: sealed-box wrapping of per-hop symmetric keys
//
// Flow:
// 1. Proxy draws a fresh symmetric key for the hop
// 2. Generate ephemeral X25519 keypair
// 3. ECDH: ephemeral_secret × relay_public → shared_secret
// 4. KDF: Blake3::derive_key(shared_secret ‖ ephemeral_public) → wrapping key, nonce
// 5. Encrypt: XChaCha20-Poly1305(wrapping_key, nonce, symmetric_key)
// 6. Output: ephemeral_public (32) ‖ ciphertext (32 + 16)
//
// The relay reverses with its static X25519 secret.

use super::keys::{RelayKeyPair, SymmetricKey, SYMMETRIC_KEY_SIZE, X25519_KEY_SIZE};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, Zeroizing};

/// KDF context strings. Changing these breaks every relay's ability to
/// recover keys wrapped by older proxies.
const KDF_KEY_CONTEXT: &str = "shallot circuit key wrap 2026-10-01 key";
const KDF_NONCE_CONTEXT: &str = "shallot circuit key wrap 2026-10-01 nonce";

const XCHACHA_NONCE_SIZE: usize = 24;
const POLY1305_TAG_SIZE: usize = 16;

/// Exact length of a wrapped symmetric key
pub const WRAPPED_KEY_SIZE: usize = X25519_KEY_SIZE + SYMMETRIC_KEY_SIZE + POLY1305_TAG_SIZE;

#[derive(Debug, Error)]
pub enum KeyExchangeError {
    #[error("Key wrapping failed")]
    WrapFailed,
    #[error("Key recovery failed: {0}")]
    KeyRecovery(&'static str),
}

/// Draw a fresh symmetric key from the OS CSPRNG. One per hop per circuit.
pub fn generate_symmetric_key() -> SymmetricKey {
    let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// Wrap `key` so that only the holder of the secret matching
/// `node_public_key` can recover it.
pub fn wrap_key(
    node_public_key: &[u8; X25519_KEY_SIZE],
    key: &SymmetricKey,
) -> Result<Vec<u8>, KeyExchangeError> {
    let relay_public = PublicKey::from(*node_public_key);

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(&relay_public);

    let (cipher, nonce) = wrapping_cipher(shared_secret.as_bytes(), ephemeral_public.as_bytes());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: key.as_bytes(),
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| KeyExchangeError::WrapFailed)?;

    let mut wrapped = Vec::with_capacity(WRAPPED_KEY_SIZE);
    wrapped.extend_from_slice(ephemeral_public.as_bytes());
    wrapped.extend_from_slice(&ciphertext);
    Ok(wrapped)
}

/// Recover a symmetric key wrapped for `relay`.
///
/// Fails with [`KeyExchangeError::KeyRecovery`] on truncated input, a key
/// wrapped for a different relay, or any tampering with the ciphertext.
pub fn unwrap_key(relay: &RelayKeyPair, wrapped: &[u8]) -> Result<SymmetricKey, KeyExchangeError> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(KeyExchangeError::KeyRecovery("unexpected wrapped key length"));
    }

    let (ephemeral_bytes, ciphertext) = wrapped.split_at(X25519_KEY_SIZE);
    let ephemeral_array = <[u8; X25519_KEY_SIZE]>::try_from(ephemeral_bytes)
        .map_err(|_| KeyExchangeError::KeyRecovery("malformed ephemeral key"))?;
    let ephemeral_public = PublicKey::from(ephemeral_array);

    let shared_secret = relay.secret().diffie_hellman(&ephemeral_public);
    let (cipher, nonce) = wrapping_cipher(shared_secret.as_bytes(), ephemeral_public.as_bytes());

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: ephemeral_public.as_bytes(),
                },
            )
            .map_err(|_| KeyExchangeError::KeyRecovery("authentication failed"))?,
    );

    let key_bytes = <[u8; SYMMETRIC_KEY_SIZE]>::try_from(plaintext.as_slice())
        .map_err(|_| KeyExchangeError::KeyRecovery("unexpected key length"))?;
    Ok(SymmetricKey::from_bytes(key_bytes))
}

fn wrapping_cipher(
    shared_secret: &[u8],
    ephemeral_public: &[u8],
) -> (XChaCha20Poly1305, [u8; XCHACHA_NONCE_SIZE]) {
    let mut material = Zeroizing::new(Vec::with_capacity(shared_secret.len() + ephemeral_public.len()));
    material.extend_from_slice(shared_secret);
    material.extend_from_slice(ephemeral_public);

    let mut key_bytes = blake3::derive_key(KDF_KEY_CONTEXT, &material);
    let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key_bytes));
    key_bytes.zeroize();

    let nonce_hash = blake3::derive_key(KDF_NONCE_CONTEXT, &material);
    let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
    nonce.copy_from_slice(&nonce_hash[..XCHACHA_NONCE_SIZE]);

    (cipher, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let relay = RelayKeyPair::generate();
        let key = generate_symmetric_key();

        let wrapped = wrap_key(&relay.public_key_bytes(), &key).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);

        let recovered = unwrap_key(&relay, &wrapped).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn test_generated_keys_distinct() {
        let a = generate_symmetric_key();
        let b = generate_symmetric_key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrap_is_randomized() {
        let relay = RelayKeyPair::generate();
        let key = generate_symmetric_key();

        let first = wrap_key(&relay.public_key_bytes(), &key).unwrap();
        let second = wrap_key(&relay.public_key_bytes(), &key).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_unwrap_wrong_relay_fails() {
        let intended = RelayKeyPair::generate();
        let other = RelayKeyPair::generate();
        let key = generate_symmetric_key();

        let wrapped = wrap_key(&intended.public_key_bytes(), &key).unwrap();
        let result = unwrap_key(&other, &wrapped);
        assert!(matches!(result, Err(KeyExchangeError::KeyRecovery(_))));
    }

    #[test]
    fn test_unwrap_truncated_fails() {
        let relay = RelayKeyPair::generate();
        let key = generate_symmetric_key();
        let wrapped = wrap_key(&relay.public_key_bytes(), &key).unwrap();

        let result = unwrap_key(&relay, &wrapped[..WRAPPED_KEY_SIZE - 1]);
        assert!(matches!(result, Err(KeyExchangeError::KeyRecovery(_))));

        assert!(unwrap_key(&relay, &[]).is_err());
    }

    #[test]
    fn test_unwrap_tampered_fails() {
        let relay = RelayKeyPair::generate();
        let key = generate_symmetric_key();
        let mut wrapped = wrap_key(&relay.public_key_bytes(), &key).unwrap();
        wrapped[X25519_KEY_SIZE + 3] ^= 0x01;

        assert!(unwrap_key(&relay, &wrapped).is_err());
    }

    #[test]
    fn test_key_exchange_error_display() {
        let err = KeyExchangeError::KeyRecovery("authentication failed");
        assert!(err.to_string().contains("authentication failed"));
    }
}
