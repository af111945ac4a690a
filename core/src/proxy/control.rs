//! Local control surface of a running proxy
//!
//! Lets a client process (or the CLI) drive the proxy over the same framed
//! transport every other role uses.

use super::OnionProxy;
use crate::relay::protocol::{Request, Response};
use crate::relay::transport::RequestHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct ProxyControl {
    proxy: Arc<OnionProxy>,
}

impl ProxyControl {
    pub fn new(proxy: Arc<OnionProxy>) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &Arc<OnionProxy> {
        &self.proxy
    }
}

#[async_trait]
impl RequestHandler for ProxyControl {
    async fn handle(&self, request: Request) -> Response {
        let message_type = request.message_type();
        let result = match request {
            Request::Connect { username } => self.proxy.connect(&username).await.map(|_| Response::Ack),
            Request::SendMessage { text } => self.proxy.send_message(&text).await.map(|_| Response::Ack),
            Request::PollMessages { last_message_id } => self
                .proxy
                .poll_messages(last_message_id)
                .await
                .map(Response::Messages),
            Request::NewCircuit => self.proxy.renew_circuit().await.map(|_| Response::Ack),
            other => return Response::unsupported(&other),
        };

        result.unwrap_or_else(|e| {
            warn!("{} failed: {}", message_type, e);
            e.to_response()
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
