// Cryptography: relay/directory key material, circuit key exchange and
// node-set trust verification.

pub mod key_exchange;
pub mod keys;
pub mod trust;

pub use key_exchange::{
    generate_symmetric_key, unwrap_key, wrap_key, KeyExchangeError, WRAPPED_KEY_SIZE,
};
pub use keys::{
    parse_verifying_key, DirectoryKeyPair, KeyError, RelayKeyPair, SymmetricKey,
    SYMMETRIC_KEY_SIZE, X25519_KEY_SIZE,
};
pub use trust::{node_set_digest, sign_node_set, TrustError, TrustVerifier};
