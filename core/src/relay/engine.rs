//! Relay engine: key exchange and per-cell routing
//!
//! On key exchange a relay recovers the circuit key with its X25519 secret
//! and records it under the circuit id. On every cell it looks the key up,
//! peels exactly one onion layer, then either hands the payload to the exit
//! sink or forwards the remainder to the next hop under the same circuit id
//! and cell kind. The downstream reply, error or not, travels back unchanged.

use super::circuit_keys::CircuitKeyRecord;
use super::client::{ExitSink, RelayConnector};
use super::protocol::{Cell, CellKind, CellReply, CircuitInfo, ErrorKind, ExitRequest, Request, Response};
use super::transport::{RequestHandler, TransportError};
use crate::crypto::key_exchange::{unwrap_key, KeyExchangeError};
use crate::crypto::keys::RelayKeyPair;
use crate::privacy::circuit::CircuitId;
use crate::privacy::onion::{decrypt_one_layer, LayerRoute, OnionError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default number of concurrent outbound forwards per relay
pub const DEFAULT_MAX_OUTBOUND_CALLS: usize = 64;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unknown circuit {0}")]
    UnknownCircuit(CircuitId),
    #[error(transparent)]
    Decode(#[from] OnionError),
    #[error(transparent)]
    KeyRecovery(#[from] KeyExchangeError),
    #[error("Forward to {address} failed: {source}")]
    Forward {
        address: String,
        #[source]
        source: TransportError,
    },
    #[error("Exit delivery failed: {0}")]
    ExitSink(#[source] TransportError),
    #[error("Exit payload is not a valid request: {0}")]
    ExitPayload(String),
    #[error("Outbound call pool closed")]
    PoolClosed,
}

impl RelayError {
    /// Wire form of this error. A downstream hop's error response is passed
    /// back as received.
    pub fn to_response(&self) -> Response {
        match self {
            RelayError::UnknownCircuit(_) => Response::error(ErrorKind::UnknownCircuit, self.to_string()),
            RelayError::Decode(_) | RelayError::ExitPayload(_) => {
                Response::error(ErrorKind::Decode, self.to_string())
            }
            RelayError::KeyRecovery(_) => Response::error(ErrorKind::KeyRecovery, self.to_string()),
            RelayError::Forward {
                source: TransportError::Remote { kind, message },
                ..
            } => Response::error(*kind, message.clone()),
            RelayError::Forward { .. } | RelayError::PoolClosed => {
                Response::error(ErrorKind::Transport, self.to_string())
            }
            RelayError::ExitSink(_) => Response::error(ErrorKind::ExitSink, self.to_string()),
        }
    }
}

/// Routing core of a relay process
pub struct RelayEngine {
    identity: RelayKeyPair,
    keys: Arc<CircuitKeyRecord>,
    connector: Arc<dyn RelayConnector>,
    exit_sink: Arc<dyn ExitSink>,
    outbound: Semaphore,
}

impl RelayEngine {
    pub fn new(
        identity: RelayKeyPair,
        connector: Arc<dyn RelayConnector>,
        exit_sink: Arc<dyn ExitSink>,
        max_outbound_calls: usize,
    ) -> Self {
        Self {
            identity,
            keys: Arc::new(CircuitKeyRecord::new()),
            connector,
            exit_sink,
            outbound: Semaphore::new(max_outbound_calls.max(1)),
        }
    }

    pub fn identity(&self) -> &RelayKeyPair {
        &self.identity
    }

    pub fn keys(&self) -> &Arc<CircuitKeyRecord> {
        &self.keys
    }

    /// Recover and record the key for `info.circuit_id`
    pub fn handle_circuit_info(&self, info: CircuitInfo) -> Result<(), RelayError> {
        let key = unwrap_key(&self.identity, &info.wrapped_symmetric_key)?;
        if self.keys.insert(info.circuit_id, key) {
            debug!("Circuit {} re-keyed", info.circuit_id);
        } else {
            debug!("Circuit {} keyed", info.circuit_id);
        }
        Ok(())
    }

    /// Peel one layer of `cell` and deliver or forward the rest
    pub async fn handle_cell(&self, kind: CellKind, cell: Cell) -> Result<CellReply, RelayError> {
        let key = self
            .keys
            .get(cell.circuit_id)
            .ok_or(RelayError::UnknownCircuit(cell.circuit_id))?;

        let layer = decrypt_one_layer(&cell.ciphertext, &key)?;
        match layer.route()? {
            LayerRoute::Exit => self.deliver_exit(cell.circuit_id, &layer.payload).await,
            LayerRoute::Forward(next_hop) => {
                let _permit = self
                    .outbound
                    .acquire()
                    .await
                    .map_err(|_| RelayError::PoolClosed)?;

                debug!("Circuit {}: forwarding {:?} cell to {}", cell.circuit_id, kind, next_hop);
                let forwarded = Cell {
                    circuit_id: cell.circuit_id,
                    ciphertext: layer.payload.clone(),
                };
                self.connector
                    .deliver_cell(next_hop, kind, forwarded)
                    .await
                    .map_err(|source| RelayError::Forward {
                        address: next_hop.to_string(),
                        source,
                    })
            }
        }
    }

    async fn deliver_exit(&self, circuit_id: CircuitId, payload: &[u8]) -> Result<CellReply, RelayError> {
        let request =
            ExitRequest::from_bytes(payload).map_err(|e| RelayError::ExitPayload(e.to_string()))?;

        match request {
            ExitRequest::Publish {
                chat_server,
                username,
                text,
            } => {
                debug!("Circuit {}: exit publish to {}", circuit_id, chat_server);
                self.exit_sink
                    .publish_message(&chat_server, &username, &text)
                    .await
                    .map_err(RelayError::ExitSink)?;
                Ok(CellReply::Ack)
            }
            ExitRequest::Poll {
                chat_server,
                last_message_id,
            } => {
                debug!("Circuit {}: exit poll from {}", circuit_id, chat_server);
                let messages = self
                    .exit_sink
                    .get_new_messages(&chat_server, last_message_id)
                    .await
                    .map_err(RelayError::ExitSink)?;
                Ok(CellReply::Messages(messages))
            }
            ExitRequest::RegisterUser {
                chat_server,
                username,
            } => {
                info!("Circuit {}: registering user at {}", circuit_id, chat_server);
                self.exit_sink
                    .register_user_name(&chat_server, &username)
                    .await
                    .map_err(RelayError::ExitSink)?;
                Ok(CellReply::Ack)
            }
        }
    }

    async fn answer_cell(&self, kind: CellKind, cell: Cell) -> Response {
        let circuit_id = cell.circuit_id;
        match self.handle_cell(kind, cell).await {
            Ok(reply) => reply.into(),
            Err(e) => {
                match &e {
                    RelayError::UnknownCircuit(_) => warn!("Dropping cell: {}", e),
                    _ => debug!("Circuit {}: {}", circuit_id, e),
                }
                e.to_response()
            }
        }
    }
}

#[async_trait]
impl RequestHandler for RelayEngine {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::SendCircuitInfo(info) => match self.handle_circuit_info(info) {
                Ok(()) => Response::Ack,
                Err(e) => {
                    warn!("Key exchange rejected: {}", e);
                    e.to_response()
                }
            },
            Request::DeliverChatCell(cell) => self.answer_cell(CellKind::Chat, cell).await,
            Request::DeliverPollCell(cell) => self.answer_cell(CellKind::Poll, cell).await,
            other => Response::unsupported(&other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
