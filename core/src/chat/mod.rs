//! Development chat server used as the exit sink
//!
//! A single shared room. Senders register a username first; every published
//! message is stored as `"username: text"` under the next id, starting at 1.

use crate::relay::protocol::{ErrorKind, Request, Response};
use crate::relay::transport::RequestHandler;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Username must not be empty")]
    EmptyUsername,
    #[error("User {0} is not registered")]
    UnregisteredUser(String),
}

#[derive(Default)]
pub struct ChatRoom {
    users: RwLock<HashSet<String>>,
    messages: RwLock<Vec<String>>,
}

impl ChatRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an existing name again is accepted
    pub fn register_user(&self, username: &str) -> Result<(), ChatError> {
        if username.trim().is_empty() {
            return Err(ChatError::EmptyUsername);
        }
        if self.users.write().insert(username.to_string()) {
            info!("User {} joined", username);
        }
        Ok(())
    }

    /// Store a message and return its id
    pub fn publish(&self, username: &str, text: &str) -> Result<u64, ChatError> {
        if !self.users.read().contains(username) {
            return Err(ChatError::UnregisteredUser(username.to_string()));
        }
        let mut messages = self.messages.write();
        messages.push(format!("{}: {}", username, text));
        let id = messages.len() as u64;
        debug!("Message {} stored", id);
        Ok(id)
    }

    /// Messages with an id greater than `last_message_id`, oldest first
    pub fn messages_since(&self, last_message_id: u64) -> Vec<String> {
        let messages = self.messages.read();
        let start = usize::try_from(last_message_id)
            .unwrap_or(usize::MAX)
            .min(messages.len());
        messages[start..].to_vec()
    }

    pub fn message_count(&self) -> u64 {
        self.messages.read().len() as u64
    }
}

#[async_trait]
impl RequestHandler for ChatRoom {
    async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::RegisterUserName { username } => self.register_user(&username).map(|_| Response::Ack),
            Request::PublishMessage { username, text } => {
                self.publish(&username, &text).map(|_| Response::Ack)
            }
            Request::GetNewMessages { last_message_id } => {
                Ok(Response::Messages(self.messages_since(last_message_id)))
            }
            other => return Response::unsupported(&other),
        };
        result.unwrap_or_else(|e| Response::error(ErrorKind::ExitSink, e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let room = ChatRoom::new();
        room.register_user("alice").unwrap();

        assert_eq!(room.publish("alice", "hello").unwrap(), 1);
        assert_eq!(room.publish("alice", "again").unwrap(), 2);
        assert_eq!(room.messages_since(0), vec!["alice: hello", "alice: again"]);
        assert_eq!(room.messages_since(1), vec!["alice: again"]);
        assert!(room.messages_since(2).is_empty());
        assert!(room.messages_since(99).is_empty());
    }

    #[test]
    fn test_unregistered_sender_rejected() {
        let room = ChatRoom::new();
        assert_eq!(
            room.publish("mallory", "hi"),
            Err(ChatError::UnregisteredUser("mallory".into()))
        );
        assert_eq!(room.message_count(), 0);
    }

    #[test]
    fn test_empty_username_rejected() {
        let room = ChatRoom::new();
        assert_eq!(room.register_user(" "), Err(ChatError::EmptyUsername));
    }

    #[tokio::test]
    async fn test_exit_sink_requests() {
        let room = ChatRoom::new();

        let response = room
            .handle(Request::PublishMessage {
                username: "bob".into(),
                text: "early".into(),
            })
            .await;
        assert!(matches!(response, Response::Error { kind: ErrorKind::ExitSink, .. }));

        assert!(matches!(
            room.handle(Request::RegisterUserName { username: "bob".into() }).await,
            Response::Ack
        ));
        assert!(matches!(
            room.handle(Request::PublishMessage {
                username: "bob".into(),
                text: "yo".into(),
            })
            .await,
            Response::Ack
        ));

        match room.handle(Request::GetNewMessages { last_message_id: 0 }).await {
            Response::Messages(messages) => assert_eq!(messages, vec!["bob: yo".to_string()]),
            other => panic!("unexpected response {}", other.message_type()),
        }
    }
}
