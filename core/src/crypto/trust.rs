// Trust verification of directory node sets
//
// A node set is accepted only when it was signed by the single pinned
// directory key and the signature covers exactly the delivered descriptors.

use super::keys::DirectoryKeyPair;
use crate::relay::protocol::{NodeDescriptor, NodeSet};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("Node set signed by an untrusted directory key")]
    UntrustedSigner,
    #[error("Node set signature is invalid")]
    InvalidSignature,
    #[error("Node set encoding failed: {0}")]
    Encoding(String),
}

/// Checks node sets against a pinned directory key.
#[derive(Debug, Clone)]
pub struct TrustVerifier {
    pinned: VerifyingKey,
}

impl TrustVerifier {
    pub fn new(pinned: VerifyingKey) -> Self {
        Self { pinned }
    }

    pub fn pinned_key(&self) -> &VerifyingKey {
        &self.pinned
    }

    /// Verify `node_set` and release its descriptors.
    ///
    /// The node set itself is consumed; only the descriptors survive.
    pub fn verify(&self, node_set: NodeSet) -> Result<Vec<NodeDescriptor>, TrustError> {
        if node_set.signer_public_key != self.pinned.to_bytes() {
            return Err(TrustError::UntrustedSigner);
        }

        let signature =
            Signature::from_slice(&node_set.signature).map_err(|_| TrustError::InvalidSignature)?;
        self.pinned
            .verify(&node_set.digest, &signature)
            .map_err(|_| TrustError::InvalidSignature)?;

        // A valid signature over some other digest is not a signature over these nodes
        if node_set_digest(&node_set.descriptors)? != node_set.digest {
            return Err(TrustError::InvalidSignature);
        }

        Ok(node_set.descriptors)
    }
}

/// SHA-256 over the canonical bincode encoding of the descriptors
pub fn node_set_digest(descriptors: &[NodeDescriptor]) -> Result<[u8; 32], TrustError> {
    let encoded =
        bincode::serialize(descriptors).map_err(|e| TrustError::Encoding(e.to_string()))?;
    Ok(Sha256::digest(&encoded).into())
}

/// Directory side: sign `descriptors` into a publishable node set
pub fn sign_node_set(
    directory: &DirectoryKeyPair,
    descriptors: Vec<NodeDescriptor>,
) -> Result<NodeSet, TrustError> {
    let digest = node_set_digest(&descriptors)?;
    let signature = directory.signing_key().sign(&digest);

    Ok(NodeSet {
        descriptors,
        signature: signature.to_bytes().to_vec(),
        signer_public_key: directory.verifying_key().to_bytes(),
        digest,
    })
}
