//! Development directory service
//!
//! Keeps the relays that registered with it, tracks when each last pinged,
//! and hands out a signed selection of live relays on request. There is no
//! consensus and no weighting: live relays are drawn uniformly at random.

use crate::config::{ConfigError, DirectoryConfig};
use crate::crypto::keys::DirectoryKeyPair;
use crate::crypto::trust::{sign_node_set, TrustError};
use crate::relay::protocol::{ErrorKind, NodeDescriptor, NodeSet, Request, Response};
use crate::relay::transport::RequestHandler;
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Could not sign node set: {0}")]
    Signing(#[from] TrustError),
}

impl DirectoryError {
    pub fn to_response(&self) -> Response {
        Response::error(ErrorKind::Directory, self.to_string())
    }
}

#[derive(Debug, Clone)]
struct Registration {
    descriptor: NodeDescriptor,
    last_seen: Instant,
}

pub struct DirectoryService {
    keypair: DirectoryKeyPair,
    nodes: RwLock<HashMap<String, Registration>>,
    circuit_length: usize,
    liveness_window: Duration,
}

impl DirectoryService {
    pub fn new(keypair: DirectoryKeyPair, circuit_length: usize, liveness_window: Duration) -> Self {
        Self {
            keypair,
            nodes: RwLock::new(HashMap::new()),
            circuit_length,
            liveness_window,
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            config.signing_keypair()?,
            config.circuit_length,
            config.liveness_window(),
        ))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Add or replace a relay. Registration counts as a liveness ping.
    pub fn register_node(&self, descriptor: NodeDescriptor) {
        info!("Relay registered at {}", descriptor.address);
        let registration = Registration {
            descriptor: descriptor.clone(),
            last_seen: Instant::now(),
        };
        self.nodes.write().insert(descriptor.address, registration);
    }

    pub fn keep_alive(&self, address: &str) -> Result<(), DirectoryError> {
        let mut nodes = self.nodes.write();
        let registration = nodes
            .get_mut(address)
            .ok_or_else(|| DirectoryError::UnknownNode(address.to_string()))?;
        registration.last_seen = Instant::now();
        Ok(())
    }

    /// Relays heard from within the liveness window
    pub fn live_nodes(&self) -> Vec<NodeDescriptor> {
        let now = Instant::now();
        self.nodes
            .read()
            .values()
            .filter(|r| now.duration_since(r.last_seen) <= self.liveness_window)
            .map(|r| r.descriptor.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Up to `circuit_length` live relays in random order, signed
    pub fn get_nodes(&self) -> Result<NodeSet, DirectoryError> {
        let live = self.live_nodes();
        let selection: Vec<NodeDescriptor> = live
            .choose_multiple(&mut rand::thread_rng(), self.circuit_length)
            .cloned()
            .collect();

        if selection.len() < self.circuit_length {
            warn!(
                "Only {} live relays for a {}-hop node set",
                selection.len(),
                self.circuit_length
            );
        }
        debug!("Serving node set of {} relays", selection.len());
        Ok(sign_node_set(&self.keypair, selection)?)
    }
}

#[async_trait]
impl RequestHandler for DirectoryService {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetNodes => match self.get_nodes() {
                Ok(node_set) => Response::Nodes(node_set),
                Err(e) => e.to_response(),
            },
            Request::RegisterNode(descriptor) => {
                self.register_node(descriptor);
                Response::Ack
            }
            Request::KeepAlive { address } => match self.keep_alive(&address) {
                Ok(()) => Response::Ack,
                Err(e) => {
                    warn!("Keep-alive rejected: {}", e);
                    e.to_response()
                }
            },
            other => Response::unsupported(&other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::RelayKeyPair;
    use crate::crypto::trust::TrustVerifier;
    use std::collections::HashSet;

    fn service(circuit_length: usize) -> DirectoryService {
        DirectoryService::new(
            DirectoryKeyPair::generate(),
            circuit_length,
            Duration::from_millis(1000),
        )
    }

    fn register(service: &DirectoryService, count: usize) {
        for i in 0..count {
            service.register_node(RelayKeyPair::generate().descriptor(format!("127.0.0.1:{}", 9001 + i)));
        }
    }

    #[tokio::test]
    async fn test_node_set_verifies_under_directory_key() {
        let service = service(3);
        register(&service, 5);

        let node_set = service.get_nodes().unwrap();
        let descriptors = TrustVerifier::new(service.verifying_key())
            .verify(node_set)
            .unwrap();

        assert_eq!(descriptors.len(), 3);
        let distinct: HashSet<_> = descriptors.iter().map(|d| d.address.clone()).collect();
        assert_eq!(distinct.len(), 3);
    }

    #[tokio::test]
    async fn test_short_node_set_when_few_relays() {
        let service = service(3);
        register(&service, 2);
        assert_eq!(service.get_nodes().unwrap().descriptors.len(), 2);
    }

    #[tokio::test]
    async fn test_register_replaces_same_address() {
        let service = service(3);
        let first = RelayKeyPair::generate().descriptor("127.0.0.1:9001");
        let second = RelayKeyPair::generate().descriptor("127.0.0.1:9001");

        service.register_node(first);
        service.register_node(second.clone());

        assert_eq!(service.node_count(), 1);
        assert_eq!(service.live_nodes(), vec![second]);
    }

    #[tokio::test]
    async fn test_keep_alive_unknown_node() {
        let service = service(3);
        assert!(matches!(
            service.keep_alive("10.0.0.9:1"),
            Err(DirectoryError::UnknownNode(_))
        ));

        let response = service
            .handle(Request::KeepAlive {
                address: "10.0.0.9:1".into(),
            })
            .await;
        assert!(matches!(response, Response::Error { kind: ErrorKind::Directory, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_relays_expire() {
        let service = service(3);
        register(&service, 2);

        tokio::time::advance(Duration::from_millis(600)).await;
        service.keep_alive("127.0.0.1:9001").unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;

        let live = service.live_nodes();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].address, "127.0.0.1:9001");
        assert_eq!(service.node_count(), 2);
    }

    #[tokio::test]
    async fn test_handles_directory_requests() {
        let service = service(1);
        let descriptor = RelayKeyPair::generate().descriptor("127.0.0.1:9100");

        assert!(matches!(
            service.handle(Request::RegisterNode(descriptor.clone())).await,
            Response::Ack
        ));
        match service.handle(Request::GetNodes).await {
            Response::Nodes(node_set) => assert_eq!(node_set.descriptors, vec![descriptor]),
            other => panic!("unexpected response {}", other.message_type()),
        }
        assert!(matches!(
            service.handle(Request::NewCircuit).await,
            Response::Error { kind: ErrorKind::Unsupported, .. }
        ));
    }
}
