//! Onion proxy: the client side of a circuit
//!
//! The proxy owns the current circuit and the only copy of its hop keys.
//! Every send takes a snapshot of the current circuit, so a renewal that
//! swaps in a new circuit never disturbs a send already under way; relays
//! keep the old keys and finish it.

pub mod control;

use crate::config::{ConfigError, NetworkConfig, ProxyConfig};
use crate::crypto::trust::TrustVerifier;
use crate::privacy::circuit::{Circuit, CircuitBuilder, CircuitError, CircuitId};
use crate::privacy::onion::{self, OnionError};
use crate::relay::client::{RelayConnector, TcpDirectoryClient, TcpRelayConnector};
use crate::relay::protocol::{Cell, CellKind, CellReply, ErrorKind, ExitRequest, ProtocolError, Response};
use crate::relay::transport::TransportError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use control::ProxyControl;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Not connected")]
    NotConnected,
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    #[error(transparent)]
    Onion(#[from] OnionError),
    #[error("Exit request encoding failed: {0}")]
    Payload(#[from] ProtocolError),
    #[error("Cell delivery failed: {0}")]
    Delivery(#[source] TransportError),
    #[error("Directory unreachable: {0}")]
    Bootstrap(#[source] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

impl ProxyError {
    pub fn to_response(&self) -> Response {
        let kind = match self {
            ProxyError::NotConnected => ErrorKind::NotConnected,
            ProxyError::Circuit(CircuitError::Trust(_)) => ErrorKind::Trust,
            ProxyError::Circuit(CircuitError::Directory(_)) | ProxyError::Circuit(CircuitError::EmptyNodeSet) => {
                ErrorKind::Directory
            }
            ProxyError::Circuit(CircuitError::KeyWrap { .. }) => ErrorKind::KeyRecovery,
            ProxyError::Circuit(CircuitError::KeyExchange {
                source: TransportError::Remote { kind, .. },
                ..
            }) => *kind,
            ProxyError::Delivery(TransportError::Remote { kind, message }) => {
                return Response::error(*kind, message.clone())
            }
            ProxyError::Onion(_) | ProxyError::Payload(_) => ErrorKind::Decode,
            _ => ErrorKind::Transport,
        };
        Response::error(kind, self.to_string())
    }
}

/// Client session: circuit ownership, renewal and message injection
pub struct OnionProxy {
    builder: CircuitBuilder,
    connector: Arc<dyn RelayConnector>,
    chat_server: String,
    renewal_interval: Duration,
    current: RwLock<Option<Arc<Circuit>>>,
    username: RwLock<Option<String>>,
    renewal_scheduled: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl OnionProxy {
    pub fn new(
        builder: CircuitBuilder,
        connector: Arc<dyn RelayConnector>,
        chat_server: impl Into<String>,
        renewal_interval: Duration,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            builder,
            connector,
            chat_server: chat_server.into(),
            renewal_interval,
            current: RwLock::new(None),
            username: RwLock::new(None),
            renewal_scheduled: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Wire a proxy to the configured directory over TCP. An unreachable
    /// directory or a missing trust anchor fails here.
    pub async fn from_config(config: &ProxyConfig, network: &NetworkConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        network.validate()?;

        let verifier = TrustVerifier::new(config.trusted_key()?);
        let options = network.call_options();
        let directory = TcpDirectoryClient::connect(config.directory_addr.clone(), options)
            .await
            .map_err(ProxyError::Bootstrap)?;
        let connector: Arc<dyn RelayConnector> = Arc::new(TcpRelayConnector::new(options));

        let builder = CircuitBuilder::new(Arc::new(directory), Arc::clone(&connector), verifier);
        Ok(Self::new(
            builder,
            connector,
            config.chat_server_addr.clone(),
            config.renewal_interval(),
        ))
    }

    pub fn current_circuit(&self) -> Option<Arc<Circuit>> {
        self.current.read().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    pub fn chat_server(&self) -> &str {
        &self.chat_server
    }

    /// Build the first circuit, register `username` with the chat server
    /// through it and schedule periodic renewal.
    pub async fn connect(self: &Arc<Self>, username: &str) -> Result<CircuitId, ProxyError> {
        let circuit_id = self.renew_circuit().await?;

        let circuit = self.snapshot()?;
        let request = ExitRequest::RegisterUser {
            chat_server: self.chat_server.clone(),
            username: username.to_string(),
        };
        expect_ack(self.dispatch(circuit, CellKind::Chat, &request).await?)?;

        *self.username.write() = Some(username.to_string());
        info!("Connected as {} on circuit {}", username, circuit_id);

        self.schedule_renewal();
        Ok(circuit_id)
    }

    /// Build a new circuit and make it current. On failure the previous
    /// circuit stays in service.
    pub async fn renew_circuit(&self) -> Result<CircuitId, ProxyError> {
        let circuit = self.builder.build().await?;
        let circuit_id = circuit.id();

        let previous = self.current.write().replace(Arc::new(circuit));
        match previous {
            Some(old) => info!("Circuit {} superseded by {}", old.id(), circuit_id),
            None => info!("Circuit {} in service", circuit_id),
        }
        Ok(circuit_id)
    }

    pub async fn send_message(&self, text: &str) -> Result<(), ProxyError> {
        let username = self.username().ok_or(ProxyError::NotConnected)?;
        let circuit = self.snapshot()?;
        let request = ExitRequest::Publish {
            chat_server: self.chat_server.clone(),
            username,
            text: text.to_string(),
        };
        expect_ack(self.dispatch(circuit, CellKind::Chat, &request).await?)
    }

    pub async fn poll_messages(&self, last_message_id: u64) -> Result<Vec<String>, ProxyError> {
        if self.username.read().is_none() {
            return Err(ProxyError::NotConnected);
        }
        let circuit = self.snapshot()?;
        let request = ExitRequest::Poll {
            chat_server: self.chat_server.clone(),
            last_message_id,
        };
        match self.dispatch(circuit, CellKind::Poll, &request).await? {
            CellReply::Messages(messages) => Ok(messages),
            CellReply::Ack => Err(ProxyError::UnexpectedReply("Ack")),
        }
    }

    /// Stop the renewal task
    pub fn shutdown(&self) {
        if self.shutdown.send(()).is_ok() {
            info!("Proxy shutting down");
        }
    }

    fn snapshot(&self) -> Result<Arc<Circuit>, ProxyError> {
        self.current_circuit().ok_or(ProxyError::NotConnected)
    }

    /// Layer `request` for `circuit` and inject it at the guard
    async fn dispatch(
        &self,
        circuit: Arc<Circuit>,
        kind: CellKind,
        request: &ExitRequest,
    ) -> Result<CellReply, ProxyError> {
        let ciphertext = onion::encrypt(&request.to_bytes()?, &circuit)?;
        let cell = Cell {
            circuit_id: circuit.id(),
            ciphertext,
        };

        let guard = circuit.guard().descriptor.address.as_str();
        debug!("Circuit {}: injecting {:?} cell at {}", circuit.id(), kind, guard);
        self.connector
            .deliver_cell(guard, kind, cell)
            .await
            .map_err(ProxyError::Delivery)
    }

    fn schedule_renewal(self: &Arc<Self>) {
        if self.renewal_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let proxy = Arc::downgrade(self);
        let period = self.renewal_interval;
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(run_renewal(proxy, period, shutdown));
        info!("Circuit renewal every {:?}", period);
    }
}

async fn run_renewal(proxy: Weak<OnionProxy>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Circuit renewal stopping");
                break;
            }
            _ = interval.tick() => {
                let proxy = match proxy.upgrade() {
                    Some(proxy) => proxy,
                    None => break,
                };
                if let Err(e) = proxy.renew_circuit().await {
                    warn!("Circuit renewal failed, keeping current circuit: {}", e);
                }
            }
        }
    }
}

fn expect_ack(reply: CellReply) -> Result<(), ProxyError> {
    match reply {
        CellReply::Ack => Ok(()),
        CellReply::Messages(_) => Err(ProxyError::UnexpectedReply("Messages")),
    }
}

// ============================================================================
// TESTS
// ============================================================================
