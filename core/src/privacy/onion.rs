// Onion-Layered Relay: Tor-like onion routing for hop anonymity
//
// Each layer reveals only the next hop to relays, protecting both
// origin and destination from intermediate nodes.
//
// Layer wire format: IV (16 bytes) ‖ AES-256-CFB(layer_key, IV, bincode(OnionLayer))
//
// There is no authentication tag. A relay holding the wrong key, or a
// forged/corrupted cell, is only detected because the decrypted bytes fail
// to deserialize. Tampering that still parses goes unnoticed.

use crate::crypto::keys::SymmetricKey;
use crate::privacy::circuit::Circuit;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use bincode::Options;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the random IV prefixed to every layer (AES block size)
pub const IV_SIZE: usize = 16;

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

#[derive(Debug, Error)]
pub enum OnionError {
    #[error("Layer decode failed: {0}")]
    Decode(String),
    #[error("Layer encode failed: {0}")]
    Encode(String),
}

/// A single decrypted onion layer
///
/// Exactly one of `is_exit` / `next_hop_address` is meaningful: exit layers
/// carry the application payload, all others carry the successor's address
/// and the still-encrypted remainder of the onion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnionLayer {
    pub payload: Vec<u8>,
    pub is_exit: bool,
    pub next_hop_address: Option<String>,
}

/// Where a relay sends a decrypted layer's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRoute<'a> {
    Exit,
    Forward(&'a str),
}

impl OnionLayer {
    pub fn exit(payload: Vec<u8>) -> Self {
        Self {
            payload,
            is_exit: true,
            next_hop_address: None,
        }
    }

    pub fn relay(payload: Vec<u8>, next_hop_address: impl Into<String>) -> Self {
        Self {
            payload,
            is_exit: false,
            next_hop_address: Some(next_hop_address.into()),
        }
    }

    pub fn route(&self) -> Result<LayerRoute<'_>, OnionError> {
        if self.is_exit {
            return Ok(LayerRoute::Exit);
        }
        match self.next_hop_address.as_deref() {
            Some(address) if !address.is_empty() => Ok(LayerRoute::Forward(address)),
            _ => Err(OnionError::Decode("non-exit layer without next hop".into())),
        }
    }
}

fn layer_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Wrap `message` for every hop of `circuit`.
///
/// The innermost layer is sealed for the exit; each preceding hop's layer
/// names its successor. The result is what the guard receives.
pub fn encrypt(message: &[u8], circuit: &Circuit) -> Result<Vec<u8>, OnionError> {
    let hops = circuit.hops();
    let exit = hops
        .last()
        .ok_or_else(|| OnionError::Encode("circuit has no hops".into()))?;

    let mut sealed = seal_layer(&OnionLayer::exit(message.to_vec()), &exit.key)?;

    // Wrap with each relay in reverse order (from second-to-last to first)
    for position in (0..hops.len() - 1).rev() {
        let successor = &hops[position + 1].descriptor.address;
        let layer = OnionLayer::relay(sealed, successor.as_str());
        sealed = seal_layer(&layer, &hops[position].key)?;
    }

    Ok(sealed)
}

/// Peel one layer with this hop's key
pub fn decrypt_one_layer(ciphertext: &[u8], key: &SymmetricKey) -> Result<OnionLayer, OnionError> {
    if ciphertext.len() < IV_SIZE {
        return Err(OnionError::Decode("ciphertext shorter than IV".into()));
    }

    let (iv, body) = ciphertext.split_at(IV_SIZE);
    let mut plaintext = body.to_vec();
    Aes256CfbDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| OnionError::Decode(e.to_string()))?
        .decrypt(&mut plaintext);

    let layer: OnionLayer = layer_codec()
        .deserialize(&plaintext)
        .map_err(|e| OnionError::Decode(e.to_string()))?;
    layer.route()?;
    Ok(layer)
}

/// Serialize and encrypt one layer under a fresh IV
fn seal_layer(layer: &OnionLayer, key: &SymmetricKey) -> Result<Vec<u8>, OnionError> {
    let plaintext = layer_codec()
        .serialize(layer)
        .map_err(|e| OnionError::Encode(e.to_string()))?;

    let mut sealed = vec![0u8; IV_SIZE + plaintext.len()];
    let (iv, body) = sealed.split_at_mut(IV_SIZE);
    OsRng.fill_bytes(iv);
    body.copy_from_slice(&plaintext);

    Aes256CfbEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| OnionError::Encode(e.to_string()))?
        .encrypt(body);

    Ok(sealed)
}
