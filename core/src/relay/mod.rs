//! Relay network protocol
//!
//! Wire types and framed transport shared by every role, plus the relay
//! process itself: circuit key table, per-cell routing engine, heartbeat
//! and server.

pub mod circuit_keys;
pub mod client;
pub mod engine;
pub mod heartbeat;
pub mod protocol;
pub mod server;
pub mod transport;

pub use circuit_keys::CircuitKeyRecord;
pub use client::{
    DirectoryClient, ExitSink, RelayConnector, TcpDirectoryClient, TcpExitSink, TcpRelayConnector,
};
pub use engine::{RelayEngine, RelayError};
pub use heartbeat::HeartbeatScheduler;
pub use protocol::{
    Cell, CellKind, CellReply, CircuitInfo, ErrorKind, ExitRequest, NodeDescriptor, NodeSet, Request,
    Response,
};
pub use server::{RelayServer, RelayServerError};
pub use transport::{CallOptions, RequestHandler, TransportError};
