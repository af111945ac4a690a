// Circuit Building: trusted node set, per-hop key exchange, hop table
//
// The proxy fetches a signed node set, verifies it against the pinned
// directory key, then hands every hop (guard first, exit last) a fresh
// symmetric key wrapped for that hop's public key. A circuit is only
// returned once every hop has acknowledged its key.

use crate::crypto::key_exchange::{generate_symmetric_key, wrap_key, KeyExchangeError};
use crate::crypto::keys::SymmetricKey;
use crate::crypto::trust::{TrustError, TrustVerifier};
use crate::relay::client::{DirectoryClient, RelayConnector};
use crate::relay::protocol::{CircuitInfo, NodeDescriptor};
use crate::relay::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Unique identifier for a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId(u32);

impl CircuitId {
    pub fn new(value: u32) -> Self {
        CircuitId(value)
    }

    /// Generate a new random circuit ID. Uniqueness among live circuits is
    /// probabilistic over the 32-bit space.
    pub fn random() -> Self {
        use rand::RngCore;
        CircuitId(rand::rngs::OsRng.next_u32())
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("Could not fetch node set: {0}")]
    Directory(#[source] TransportError),
    #[error("Node set rejected: {0}")]
    Trust(#[from] TrustError),
    #[error("Directory returned no nodes")]
    EmptyNodeSet,
    #[error("Circuit has no hops")]
    EmptyPath,
    #[error("Could not wrap key for hop {hop}: {source}")]
    KeyWrap {
        hop: usize,
        #[source]
        source: KeyExchangeError,
    },
    #[error("Key exchange with hop {hop} ({address}) failed: {source}")]
    KeyExchange {
        hop: usize,
        address: String,
        #[source]
        source: TransportError,
    },
}

/// One hop of a built circuit
#[derive(Debug, Clone)]
pub struct CircuitHop {
    pub descriptor: NodeDescriptor,
    pub key: SymmetricKey,
}

/// A complete circuit: every hop holds its key under `id`.
///
/// Owned by the proxy only. Relays never see the hop list.
#[derive(Debug, Clone)]
pub struct Circuit {
    id: CircuitId,
    hops: Vec<CircuitHop>,
}

impl Circuit {
    pub fn new(id: CircuitId, hops: Vec<CircuitHop>) -> Result<Self, CircuitError> {
        if hops.is_empty() {
            return Err(CircuitError::EmptyPath);
        }
        Ok(Self { id, hops })
    }

    pub fn id(&self) -> CircuitId {
        self.id
    }

    /// Hops in path order: 0 = guard, last = exit
    pub fn hops(&self) -> &[CircuitHop] {
        &self.hops
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    pub fn guard(&self) -> &CircuitHop {
        &self.hops[0]
    }

    pub fn exit(&self) -> &CircuitHop {
        &self.hops[self.hops.len() - 1]
    }

    /// Hop addresses in path order
    pub fn addresses(&self) -> Vec<&str> {
        self.hops
            .iter()
            .map(|hop| hop.descriptor.address.as_str())
            .collect()
    }
}

/// Builds circuits from the directory's node set
pub struct CircuitBuilder {
    directory: Arc<dyn DirectoryClient>,
    connector: Arc<dyn RelayConnector>,
    verifier: TrustVerifier,
}

impl CircuitBuilder {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        connector: Arc<dyn RelayConnector>,
        verifier: TrustVerifier,
    ) -> Self {
        Self {
            directory,
            connector,
            verifier,
        }
    }

    /// Build a fresh circuit.
    ///
    /// Any failure aborts the whole build. Hops that already accepted a key
    /// keep it; nothing is published to the caller.
    pub async fn build(&self) -> Result<Circuit, CircuitError> {
        let node_set = self
            .directory
            .get_nodes()
            .await
            .map_err(CircuitError::Directory)?;

        let descriptors = self.verifier.verify(node_set)?;
        if descriptors.is_empty() {
            return Err(CircuitError::EmptyNodeSet);
        }

        let circuit_id = CircuitId::random();
        let mut hops = Vec::with_capacity(descriptors.len());

        for (hop, descriptor) in descriptors.into_iter().enumerate() {
            let key = generate_symmetric_key();
            let wrapped_symmetric_key = wrap_key(&descriptor.public_key, &key)
                .map_err(|source| CircuitError::KeyWrap { hop, source })?;

            let info = CircuitInfo {
                circuit_id,
                wrapped_symmetric_key,
            };
            self.connector
                .send_circuit_info(&descriptor.address, info)
                .await
                .map_err(|source| CircuitError::KeyExchange {
                    hop,
                    address: descriptor.address.clone(),
                    source,
                })?;

            debug!("Circuit {}: hop {} keyed at {}", circuit_id, hop, descriptor.address);
            hops.push(CircuitHop { descriptor, key });
        }

        let circuit = Circuit::new(circuit_id, hops)?;
        info!(
            "Circuit {} built through {} hops",
            circuit.id(),
            circuit.hop_count()
        );
        Ok(circuit)
    }
}
