//! Outbound calls: directory, next-hop relays and the exit sink
//!
//! Each collaborator sits behind a trait so circuit building and cell
//! relaying can be exercised without sockets. The `Tcp*` implementations
//! open a fresh connection per call through [`transport::call`].

use super::protocol::{Cell, CellKind, CellReply, CircuitInfo, NodeDescriptor, NodeSet, Request, Response};
use super::transport::{self, CallOptions, TransportError};
use async_trait::async_trait;

/// Directory service calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch the current signed node set
    async fn get_nodes(&self) -> Result<NodeSet, TransportError>;
    /// Announce a relay
    async fn register_node(&self, descriptor: NodeDescriptor) -> Result<(), TransportError>;
    /// Liveness ping for a registered relay
    async fn keep_alive(&self, address: &str) -> Result<(), TransportError>;
}

/// Calls into relays: key exchange and cell delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn send_circuit_info(&self, address: &str, info: CircuitInfo) -> Result<(), TransportError>;
    async fn deliver_cell(
        &self,
        address: &str,
        kind: CellKind,
        cell: Cell,
    ) -> Result<CellReply, TransportError>;
}

/// Chat backend reached from exit hops
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExitSink: Send + Sync {
    async fn publish_message(
        &self,
        chat_server: &str,
        username: &str,
        text: &str,
    ) -> Result<(), TransportError>;
    async fn get_new_messages(
        &self,
        chat_server: &str,
        last_message_id: u64,
    ) -> Result<Vec<String>, TransportError>;
    async fn register_user_name(&self, chat_server: &str, username: &str) -> Result<(), TransportError>;
}

fn expect_ack(response: Response) -> Result<(), TransportError> {
    match transport::into_result(response)? {
        Response::Ack => Ok(()),
        other => Err(TransportError::UnexpectedResponse(other.message_type())),
    }
}

fn expect_messages(response: Response) -> Result<Vec<String>, TransportError> {
    match transport::into_result(response)? {
        Response::Messages(messages) => Ok(messages),
        other => Err(TransportError::UnexpectedResponse(other.message_type())),
    }
}

/// Directory client over TCP
#[derive(Debug, Clone)]
pub struct TcpDirectoryClient {
    address: String,
    options: CallOptions,
}

impl TcpDirectoryClient {
    /// Create a client without checking reachability
    pub fn new(address: impl Into<String>, options: CallOptions) -> Self {
        Self {
            address: address.into(),
            options,
        }
    }

    /// Create a client after checking the directory accepts connections.
    /// Used at process bootstrap, where an unreachable directory is fatal.
    pub async fn connect(address: impl Into<String>, options: CallOptions) -> Result<Self, TransportError> {
        let client = Self::new(address, options);
        transport::probe(&client.address, &client.options).await?;
        Ok(client)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl DirectoryClient for TcpDirectoryClient {
    async fn get_nodes(&self) -> Result<NodeSet, TransportError> {
        let response = transport::call(&self.address, &Request::GetNodes, &self.options).await?;
        match transport::into_result(response)? {
            Response::Nodes(node_set) => Ok(node_set),
            other => Err(TransportError::UnexpectedResponse(other.message_type())),
        }
    }

    async fn register_node(&self, descriptor: NodeDescriptor) -> Result<(), TransportError> {
        let request = Request::RegisterNode(descriptor);
        expect_ack(transport::call(&self.address, &request, &self.options).await?)
    }

    async fn keep_alive(&self, address: &str) -> Result<(), TransportError> {
        let request = Request::KeepAlive {
            address: address.to_string(),
        };
        expect_ack(transport::call(&self.address, &request, &self.options).await?)
    }
}

/// Relay connector over TCP
#[derive(Debug, Clone, Default)]
pub struct TcpRelayConnector {
    options: CallOptions,
}

impl TcpRelayConnector {
    pub fn new(options: CallOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RelayConnector for TcpRelayConnector {
    async fn send_circuit_info(&self, address: &str, info: CircuitInfo) -> Result<(), TransportError> {
        let request = Request::SendCircuitInfo(info);
        expect_ack(transport::call(address, &request, &self.options).await?)
    }

    async fn deliver_cell(
        &self,
        address: &str,
        kind: CellKind,
        cell: Cell,
    ) -> Result<CellReply, TransportError> {
        let request = kind.into_request(cell);
        match transport::into_result(transport::call(address, &request, &self.options).await?)? {
            Response::Ack => Ok(CellReply::Ack),
            Response::Messages(messages) => Ok(CellReply::Messages(messages)),
            other => Err(TransportError::UnexpectedResponse(other.message_type())),
        }
    }
}

/// Exit sink over TCP, dialing whichever chat server the exit layer names
#[derive(Debug, Clone, Default)]
pub struct TcpExitSink {
    options: CallOptions,
}

impl TcpExitSink {
    pub fn new(options: CallOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ExitSink for TcpExitSink {
    async fn publish_message(
        &self,
        chat_server: &str,
        username: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let request = Request::PublishMessage {
            username: username.to_string(),
            text: text.to_string(),
        };
        expect_ack(transport::call(chat_server, &request, &self.options).await?)
    }

    async fn get_new_messages(
        &self,
        chat_server: &str,
        last_message_id: u64,
    ) -> Result<Vec<String>, TransportError> {
        let request = Request::GetNewMessages { last_message_id };
        expect_messages(transport::call(chat_server, &request, &self.options).await?)
    }

    async fn register_user_name(&self, chat_server: &str, username: &str) -> Result<(), TransportError> {
        let request = Request::RegisterUserName {
            username: username.to_string(),
        };
        expect_ack(transport::call(chat_server, &request, &self.options).await?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::circuit::CircuitId;
    use crate::relay::protocol::ErrorKind;
    use tokio::net::TcpListener;

    /// One-shot server answering the first request with `response`
    async fn answer_once(response: Response) -> (String, tokio::task::JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = transport::read_frame(&mut stream, transport::MAX_FRAME_LEN)
                .await
                .unwrap()
                .unwrap();
            let request = Request::from_bytes(&frame).unwrap();
            transport::write_frame(&mut stream, &response.to_bytes().unwrap())
                .await
                .unwrap();
            request
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_keep_alive_sends_address() {
        let (addr, server) = answer_once(Response::Ack).await;
        let client = TcpDirectoryClient::new(addr, CallOptions::default());

        client.keep_alive("10.0.0.1:9000").await.unwrap();

        match server.await.unwrap() {
            Request::KeepAlive { address } => assert_eq!(address, "10.0.0.1:9000"),
            other => panic!("unexpected request {}", other.message_type()),
        }
    }

    #[tokio::test]
    async fn test_deliver_poll_cell_returns_messages() {
        let (addr, server) = answer_once(Response::Messages(vec!["bob: yo".into()])).await;
        let connector = TcpRelayConnector::default();
        let cell = Cell {
            circuit_id: CircuitId::new(11),
            ciphertext: vec![1; 32],
        };

        let reply = connector.deliver_cell(&addr, CellKind::Poll, cell).await.unwrap();
        assert_eq!(reply, CellReply::Messages(vec!["bob: yo".into()]));
        assert!(matches!(server.await.unwrap(), Request::DeliverPollCell(_)));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let (addr, _server) =
            answer_once(Response::error(ErrorKind::UnknownCircuit, "circuit 11")).await;
        let connector = TcpRelayConnector::default();
        let cell = Cell {
            circuit_id: CircuitId::new(11),
            ciphertext: vec![1; 32],
        };

        let result = connector.deliver_cell(&addr, CellKind::Chat, cell).await;
        assert!(matches!(
            result,
            Err(TransportError::Remote { kind: ErrorKind::UnknownCircuit, .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_response_rejected() {
        let (addr, _server) = answer_once(Response::Messages(vec![])).await;
        let sink = TcpExitSink::default();

        let result = sink.register_user_name(&addr, "alice").await;
        assert!(matches!(result, Err(TransportError::UnexpectedResponse("Messages"))));
    }

    #[tokio::test]
    async fn test_directory_connect_probe_fails_when_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpDirectoryClient::connect(addr, CallOptions::default()).await;
        assert!(result.is_err());
    }
}
