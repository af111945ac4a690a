//! Framed request/response transport over TCP
//!
//! Frames are a big-endian `u32` length followed by a bincode payload. A
//! caller opens a fresh connection per call, writes one [`Request`] and
//! blocks until the [`Response`] arrives or the call timeout expires.
//! Servers handle every accepted connection on its own task.

use super::protocol::{ErrorKind, Request, Response};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default upper bound for a single frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Transport error types
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },
    #[error("Call to {0} timed out")]
    Timeout(String),
    #[error("Invalid frame length: {0}")]
    InvalidFrame(usize),
    #[error("Connection closed before a response arrived")]
    ConnectionClosed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Remote error ({kind:?}): {message}")]
    Remote { kind: ErrorKind, message: String },
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

/// Per-call limits applied to every outbound call
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Anything that answers requests: relays, the directory, the chat room and
/// the proxy control surface.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::InvalidFrame(payload.len()))?;
    stream.write_u32(len).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` means the peer closed the
/// connection cleanly between frames.
pub async fn read_frame<R>(stream: &mut R, max_frame_len: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len == 0 || len > max_frame_len {
        return Err(TransportError::InvalidFrame(len));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Dial `address`, send `request` and wait for its response.
///
/// The whole exchange (connect, write, read) is bounded by `options.timeout`.
/// A [`Response::Error`] is returned as a value; see [`into_result`].
pub async fn call(
    address: &str,
    request: &Request,
    options: &CallOptions,
) -> Result<Response, TransportError> {
    let payload = request
        .to_bytes()
        .map_err(|e| TransportError::Serialization(e.to_string()))?;

    let exchange = async {
        let dial_addr = address.strip_prefix("tcp://").unwrap_or(address);
        let mut stream =
            TcpStream::connect(dial_addr)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        write_frame(&mut stream, &payload).await?;
        let frame = read_frame(&mut stream, options.max_frame_len)
            .await?
            .ok_or(TransportError::ConnectionClosed)?;

        Response::from_bytes(&frame).map_err(|e| TransportError::Serialization(e.to_string()))
    };

    match tokio::time::timeout(options.timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(address.to_string())),
    }
}

/// Turn a remote error response into [`TransportError::Remote`]
pub fn into_result(response: Response) -> Result<Response, TransportError> {
    match response {
        Response::Error { kind, message } => Err(TransportError::Remote { kind, message }),
        other => Ok(other),
    }
}

/// Probe that `address` accepts TCP connections within the call timeout
pub async fn probe(address: &str, options: &CallOptions) -> Result<(), TransportError> {
    let dial_addr = address.strip_prefix("tcp://").unwrap_or(address);
    match tokio::time::timeout(options.timeout, TcpStream::connect(dial_addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed {
            address: address.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(TransportError::Timeout(address.to_string())),
    }
}

/// Accept connections until `shutdown` fires, serving each on its own task.
pub async fn serve<H>(
    listener: TcpListener,
    handler: Arc<H>,
    max_frame_len: usize,
    mut shutdown: broadcast::Receiver<()>,
) where
    H: RequestHandler + ?Sized,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Serving requests on {}", addr);
    }

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, max_frame_len).await {
                                debug!("Connection from {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
        }
    }
}

async fn serve_connection<H>(
    mut stream: TcpStream,
    handler: Arc<H>,
    max_frame_len: usize,
) -> Result<(), TransportError>
where
    H: RequestHandler + ?Sized,
{
    while let Some(frame) = read_frame(&mut stream, max_frame_len).await? {
        let response = match Request::from_bytes(&frame) {
            Ok(request) => {
                debug!("Handling {}", request.message_type());
                handler.handle(request).await
            }
            Err(e) => Response::error(ErrorKind::Decode, e.to_string()),
        };

        let payload = response
            .to_bytes()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        write_frame(&mut stream, &payload).await?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
