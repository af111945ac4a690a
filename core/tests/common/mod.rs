//! In-process shallot network for integration tests
//!
//! Directory, chat server and relays all listen on 127.0.0.1 with
//! OS-assigned ports and talk to each other over real TCP.

#![allow(dead_code)]

use shallot_core::config::{NetworkConfig, ProxyConfig, RelayConfig};
use shallot_core::crypto::DirectoryKeyPair;
use shallot_core::relay::transport::{self, MAX_FRAME_LEN};
use shallot_core::{ChatRoom, DirectoryService, OnionProxy, RelayEngine, RelayServer, RequestHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const CIRCUIT_LENGTH: usize = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serve `handler` on a fresh local port until `shutdown` fires
pub async fn spawn_handler<H: RequestHandler>(handler: Arc<H>, shutdown: &broadcast::Sender<()>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(transport::serve(listener, handler, MAX_FRAME_LEN, shutdown.subscribe()));
    address
}

pub struct TestRelay {
    pub address: String,
    pub engine: Arc<RelayEngine>,
    pub shutdown: broadcast::Sender<()>,
}

impl TestRelay {
    /// Stop accepting connections; the port then refuses
    pub fn kill(&self) {
        let _ = self.shutdown.send(());
    }
}

pub struct TestNetwork {
    pub directory: Arc<DirectoryService>,
    pub directory_addr: String,
    pub directory_shutdown: broadcast::Sender<()>,
    pub chat_addr: String,
    pub chat_shutdown: broadcast::Sender<()>,
    pub relays: Vec<TestRelay>,
}

impl TestNetwork {
    pub async fn start(relay_count: usize) -> Self {
        Self::start_with_chat(relay_count, Arc::new(ChatRoom::new())).await
    }

    pub async fn start_with_chat<H: RequestHandler>(relay_count: usize, chat: Arc<H>) -> Self {
        init_tracing();

        let directory = Arc::new(DirectoryService::new(
            DirectoryKeyPair::generate(),
            CIRCUIT_LENGTH,
            Duration::from_secs(5),
        ));
        let (directory_shutdown, _) = broadcast::channel(1);
        let directory_addr = spawn_handler(Arc::clone(&directory), &directory_shutdown).await;

        let (chat_shutdown, _) = broadcast::channel(1);
        let chat_addr = spawn_handler(chat, &chat_shutdown).await;

        let mut relays = Vec::with_capacity(relay_count);
        for _ in 0..relay_count {
            relays.push(Self::start_relay(&directory_addr).await);
        }

        Self {
            directory,
            directory_addr,
            directory_shutdown,
            chat_addr,
            chat_shutdown,
            relays,
        }
    }

    pub async fn start_relay(directory_addr: &str) -> TestRelay {
        let config = RelayConfig {
            listen_addr: "127.0.0.1:0".into(),
            directory_addr: directory_addr.to_string(),
            ..RelayConfig::default()
        };
        let server = RelayServer::bind(&config, &NetworkConfig::default())
            .await
            .unwrap();
        server.register().await.unwrap();

        let (shutdown, _) = broadcast::channel(1);
        let relay = TestRelay {
            address: server.advertised_addr().to_string(),
            engine: Arc::clone(server.engine()),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(server.serve(shutdown));
        relay
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: "127.0.0.1:0".into(),
            directory_addr: self.directory_addr.clone(),
            chat_server_addr: self.chat_addr.clone(),
            trusted_directory_key: Some(self.directory.public_key_hex()),
            ..ProxyConfig::default()
        }
    }

    pub async fn proxy(&self) -> Arc<OnionProxy> {
        self.proxy_with(self.proxy_config()).await
    }

    pub async fn proxy_with(&self, config: ProxyConfig) -> Arc<OnionProxy> {
        Arc::new(
            OnionProxy::from_config(&config, &NetworkConfig::default())
                .await
                .unwrap(),
        )
    }

    pub fn relay(&self, address: &str) -> &TestRelay {
        self.relays
            .iter()
            .find(|relay| relay.address == address)
            .unwrap()
    }

    pub fn stop(&self) {
        let _ = self.directory_shutdown.send(());
        let _ = self.chat_shutdown.send(());
        for relay in &self.relays {
            relay.kill();
        }
    }
}
