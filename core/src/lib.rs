// Shallot Core: onion-routed relay overlay
//
// A proxy builds a multi-hop circuit through relays chosen by a trusted
// directory and tunnels chat traffic through it. Each relay peels exactly
// one layer and learns only its neighbours.

pub mod chat;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod privacy;
pub mod proxy;
pub mod relay;

use thiserror::Error;

pub use chat::{ChatError, ChatRoom};
pub use config::{ConfigError, ShallotConfig};
pub use crypto::{DirectoryKeyPair, KeyError, KeyExchangeError, RelayKeyPair, SymmetricKey, TrustError};
pub use directory::{DirectoryError, DirectoryService};
pub use privacy::{Circuit, CircuitBuilder, CircuitError, CircuitId, OnionError, OnionLayer};
pub use proxy::{OnionProxy, ProxyControl, ProxyError};
pub use relay::{
    RelayEngine, RelayError, RelayServer, RelayServerError, RequestHandler, TransportError,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Any error a shallot component can return
#[derive(Debug, Error)]
pub enum ShallotError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),
    #[error(transparent)]
    Trust(#[from] TrustError),
    #[error(transparent)]
    Onion(#[from] OnionError),
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    RelayServer(#[from] RelayServerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ShallotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_convert_into_shallot_error() {
        let err: ShallotError = ProxyError::NotConnected.into();
        assert!(matches!(err, ShallotError::Proxy(ProxyError::NotConnected)));
        assert_eq!(err.to_string(), "Not connected");

        let err: ShallotError = ChatError::EmptyUsername.into();
        assert!(matches!(err, ShallotError::Chat(_)));
    }
}
