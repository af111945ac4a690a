//! Relay Server: binds, registers with the directory and serves cells

use super::client::{DirectoryClient, TcpDirectoryClient, TcpExitSink, TcpRelayConnector};
use super::engine::RelayEngine;
use super::heartbeat::HeartbeatScheduler;
use super::transport::{self, TransportError};
use crate::config::{ConfigError, NetworkConfig, RelayConfig};
use crate::crypto::keys::RelayKeyPair;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// Relay server error types. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum RelayServerError {
    #[error("Could not listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("Directory unreachable: {0}")]
    Directory(#[source] TransportError),
    #[error("Registration with directory failed: {0}")]
    Registration(#[source] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A bound relay process
pub struct RelayServer {
    listener: TcpListener,
    engine: Arc<RelayEngine>,
    directory: Arc<dyn DirectoryClient>,
    advertised_addr: String,
    liveness_window: Duration,
    max_frame_len: usize,
}

impl RelayServer {
    /// Bind the listen address, generate a fresh identity and check the
    /// directory is reachable.
    pub async fn bind(config: &RelayConfig, network: &NetworkConfig) -> Result<Self, RelayServerError> {
        config.validate()?;
        network.validate()?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| RelayServerError::Bind {
                address: config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RelayServerError::Bind {
            address: config.listen_addr.clone(),
            source,
        })?;
        let advertised_addr = config
            .advertised_addr
            .clone()
            .unwrap_or_else(|| local_addr.to_string());

        let options = network.call_options();
        let directory = TcpDirectoryClient::connect(config.directory_addr.clone(), options)
            .await
            .map_err(RelayServerError::Directory)?;

        let engine = RelayEngine::new(
            RelayKeyPair::generate(),
            Arc::new(TcpRelayConnector::new(options)),
            Arc::new(TcpExitSink::new(options)),
            config.max_outbound_calls,
        );

        Ok(Self::with_parts(
            listener,
            Arc::new(engine),
            Arc::new(directory),
            advertised_addr,
            config.liveness_window(),
            network.max_frame_len,
        ))
    }

    pub fn with_parts(
        listener: TcpListener,
        engine: Arc<RelayEngine>,
        directory: Arc<dyn DirectoryClient>,
        advertised_addr: String,
        liveness_window: Duration,
        max_frame_len: usize,
    ) -> Self {
        Self {
            listener,
            engine,
            directory,
            advertised_addr,
            liveness_window,
            max_frame_len,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn advertised_addr(&self) -> &str {
        &self.advertised_addr
    }

    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    /// Publish this relay's descriptor to the directory
    pub async fn register(&self) -> Result<(), RelayServerError> {
        let descriptor = self.engine.identity().descriptor(self.advertised_addr.clone());
        self.directory
            .register_node(descriptor)
            .await
            .map_err(RelayServerError::Registration)?;
        info!(
            "Relay {} registered (key {})",
            self.advertised_addr,
            self.engine.identity().public_key_hex()
        );
        Ok(())
    }

    /// Start the heartbeat and serve cells until `shutdown` fires
    pub async fn serve(self, shutdown: broadcast::Sender<()>) {
        let heartbeat = HeartbeatScheduler::new(
            Arc::clone(&self.directory),
            self.advertised_addr.clone(),
            self.liveness_window,
        );
        tokio::spawn(heartbeat.run(shutdown.subscribe()));

        transport::serve(
            self.listener,
            self.engine,
            self.max_frame_len,
            shutdown.subscribe(),
        )
        .await;
    }

    /// Register, then serve. Registration failure is returned before any
    /// cell is accepted.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<(), RelayServerError> {
        self.register().await?;
        self.serve(shutdown).await;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
