//! Wire protocol: requests, responses and the shapes they carry
//!
//! Every call is one bincode-encoded [`Request`] answered by one [`Response`].
//! The same enums serve the directory, relays, the chat exit sink and the
//! proxy's local control surface.

use crate::privacy::circuit::CircuitId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A relay as published by the directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Address other nodes dial to reach this relay
    pub address: String,
    /// X25519 public key circuit keys are wrapped for
    pub public_key: [u8; 32],
}

/// Signed, ordered node list served by the directory. Guard first, exit last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    pub descriptors: Vec<NodeDescriptor>,
    /// Ed25519 signature over `digest`
    pub signature: Vec<u8>,
    /// Ed25519 key that produced `signature`
    pub signer_public_key: [u8; 32],
    /// SHA-256 of the encoded descriptors
    pub digest: [u8; 32],
}

/// The only datum exchanged between adjacent relays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub circuit_id: CircuitId,
    pub ciphertext: Vec<u8>,
}

/// Key exchange payload sent from the proxy to each hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub circuit_id: CircuitId,
    pub wrapped_symmetric_key: Vec<u8>,
}

/// Which cell call a cell travels under. Preserved hop to hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    /// Fire-and-acknowledge delivery
    Chat,
    /// Delivery whose reply carries a message list back
    Poll,
}

impl CellKind {
    pub fn into_request(self, cell: Cell) -> Request {
        match self {
            CellKind::Chat => Request::DeliverChatCell(cell),
            CellKind::Poll => Request::DeliverPollCell(cell),
        }
    }
}

/// Reply travelling back along a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellReply {
    Ack,
    Messages(Vec<String>),
}

impl From<CellReply> for Response {
    fn from(reply: CellReply) -> Self {
        match reply {
            CellReply::Ack => Response::Ack,
            CellReply::Messages(messages) => Response::Messages(messages),
        }
    }
}

/// Application request carried in the innermost onion layer.
///
/// The chat server address lives here so that only the exit hop learns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitRequest {
    Publish {
        chat_server: String,
        username: String,
        text: String,
    },
    Poll {
        chat_server: String,
        last_message_id: u64,
    },
    RegisterUser {
        chat_server: String,
        username: String,
    },
}

impl ExitRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Failure categories reported across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownCircuit,
    Decode,
    KeyRecovery,
    Transport,
    ExitSink,
    Trust,
    Directory,
    NotConnected,
    Unsupported,
}

/// A request to any node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // Directory
    GetNodes,
    RegisterNode(NodeDescriptor),
    KeepAlive { address: String },

    // Relay
    SendCircuitInfo(CircuitInfo),
    DeliverChatCell(Cell),
    DeliverPollCell(Cell),

    // Exit sink (chat server)
    PublishMessage { username: String, text: String },
    GetNewMessages { last_message_id: u64 },
    RegisterUserName { username: String },

    // Proxy control surface
    Connect { username: String },
    SendMessage { text: String },
    PollMessages { last_message_id: u64 },
    NewCircuit,
}

/// A response to a [`Request`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Nodes(NodeSet),
    Messages(Vec<String>),
    Error { kind: ErrorKind, message: String },
}

/// Protocol serialization errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Request {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Get a human-readable description of the request type
    pub fn message_type(&self) -> &'static str {
        match self {
            Request::GetNodes => "GetNodes",
            Request::RegisterNode(_) => "RegisterNode",
            Request::KeepAlive { .. } => "KeepAlive",
            Request::SendCircuitInfo(_) => "SendCircuitInfo",
            Request::DeliverChatCell(_) => "DeliverChatCell",
            Request::DeliverPollCell(_) => "DeliverPollCell",
            Request::PublishMessage { .. } => "PublishMessage",
            Request::GetNewMessages { .. } => "GetNewMessages",
            Request::RegisterUserName { .. } => "RegisterUserName",
            Request::Connect { .. } => "Connect",
            Request::SendMessage { .. } => "SendMessage",
            Request::PollMessages { .. } => "PollMessages",
            Request::NewCircuit => "NewCircuit",
        }
    }
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(request: &Request) -> Self {
        Response::error(
            ErrorKind::Unsupported,
            format!("{} is not served here", request.message_type()),
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Get a human-readable description of the response type
    pub fn message_type(&self) -> &'static str {
        match self {
            Response::Ack => "Ack",
            Response::Nodes(_) => "Nodes",
            Response::Messages(_) => "Messages",
            Response::Error { .. } => "Error",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_kind_selects_request() {
        let cell = Cell {
            circuit_id: CircuitId::new(7),
            ciphertext: vec![1, 2, 3],
        };

        assert!(matches!(
            CellKind::Chat.into_request(cell.clone()),
            Request::DeliverChatCell(_)
        ));
        assert!(matches!(
            CellKind::Poll.into_request(cell),
            Request::DeliverPollCell(_)
        ));
    }

    #[test]
    fn test_request_message_types() {
        assert_eq!(Request::GetNodes.message_type(), "GetNodes");
        assert_eq!(Request::NewCircuit.message_type(), "NewCircuit");
        assert_eq!(
            Request::KeepAlive {
                address: "a".into()
            }
            .message_type(),
            "KeepAlive"
        );
    }

    #[test]
    fn test_cell_request_encoding() {
        let request = Request::DeliverPollCell(Cell {
            circuit_id: CircuitId::new(0xdead_beef),
            ciphertext: vec![9; 40],
        });

        let decoded = Request::from_bytes(&request.to_bytes().unwrap()).unwrap();
        match decoded {
            Request::DeliverPollCell(cell) => {
                assert_eq!(cell.circuit_id, CircuitId::new(0xdead_beef));
                assert_eq!(cell.ciphertext, vec![9; 40]);
            }
            other => panic!("unexpected request {}", other.message_type()),
        }
    }

    #[test]
    fn test_error_response_keeps_kind() {
        let response = Response::error(ErrorKind::UnknownCircuit, "circuit 5");
        let decoded = Response::from_bytes(&response.to_bytes().unwrap()).unwrap();
        match decoded {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::UnknownCircuit);
                assert_eq!(message, "circuit 5");
            }
            other => panic!("unexpected response {}", other.message_type()),
        }
    }

    #[test]
    fn test_unsupported_names_request() {
        let response = Response::unsupported(&Request::GetNodes);
        assert!(matches!(
            response,
            Response::Error { kind: ErrorKind::Unsupported, ref message } if message.contains("GetNodes")
        ));
    }

    #[test]
    fn test_garbage_request_rejected() {
        assert!(Request::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_cell_reply_into_response() {
        assert!(matches!(Response::from(CellReply::Ack), Response::Ack));
        match Response::from(CellReply::Messages(vec!["a: hi".into()])) {
            Response::Messages(messages) => assert_eq!(messages, vec!["a: hi".to_string()]),
            other => panic!("unexpected response {}", other.message_type()),
        }
    }
}
