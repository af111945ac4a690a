// Configuration sections for every shallot role
//
// Each section is plain serde data with defaults that form a working local
// deployment on 127.0.0.1. `validate()` catches values that would make a
// role misbehave at runtime (zero periods, empty addresses, bad keys).

use crate::crypto::keys::{parse_verifying_key, DirectoryKeyPair, KeyError};
use crate::relay::transport::{CallOptions, MAX_FRAME_LEN};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DIRECTORY_ADDR: &str = "127.0.0.1:9000";
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:9001";
pub const DEFAULT_CHAT_ADDR: &str = "127.0.0.1:7000";
pub const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid key in configuration: {0}")]
    Key(#[from] KeyError),
    #[error("No trusted directory key configured")]
    MissingTrustedKey,
}

fn require_addr(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_nonzero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{} must be greater than zero", field)));
    }
    Ok(())
}

/// Limits applied to every outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,
    /// Largest accepted frame in bytes
    pub max_frame_len: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl NetworkConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            timeout: self.call_timeout(),
            max_frame_len: self.max_frame_len,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("network.call_timeout_ms", self.call_timeout_ms)?;
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(ConfigError::Invalid(
                "network.max_frame_len must fit a u32 frame header".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    /// Address published to the directory, when it differs from `listen_addr`
    pub advertised_addr: Option<String>,
    pub directory_addr: String,
    pub liveness_window_ms: u64,
    pub max_outbound_calls: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_RELAY_ADDR.to_string(),
            advertised_addr: None,
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            liveness_window_ms: 1000,
            max_outbound_calls: 64,
        }
    }
}

impl RelayConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_addr("relay.listen_addr", &self.listen_addr)?;
        require_addr("relay.directory_addr", &self.directory_addr)?;
        if let Some(advertised) = &self.advertised_addr {
            require_addr("relay.advertised_addr", advertised)?;
        }
        require_nonzero("relay.liveness_window_ms", self.liveness_window_ms)?;
        require_nonzero("relay.max_outbound_calls", self.max_outbound_calls as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub directory_addr: String,
    pub chat_server_addr: String,
    /// Hex Ed25519 public key the node set must be signed with
    pub trusted_directory_key: Option<String>,
    pub renewal_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_PROXY_ADDR.to_string(),
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            chat_server_addr: DEFAULT_CHAT_ADDR.to_string(),
            trusted_directory_key: None,
            renewal_interval_secs: 120,
        }
    }
}

impl ProxyConfig {
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn trusted_key(&self) -> Result<VerifyingKey, ConfigError> {
        let hex_key = self
            .trusted_directory_key
            .as_deref()
            .ok_or(ConfigError::MissingTrustedKey)?;
        Ok(parse_verifying_key(hex_key)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_addr("proxy.listen_addr", &self.listen_addr)?;
        require_addr("proxy.directory_addr", &self.directory_addr)?;
        require_addr("proxy.chat_server_addr", &self.chat_server_addr)?;
        require_nonzero("proxy.renewal_interval_secs", self.renewal_interval_secs)?;
        if self.trusted_directory_key.is_some() {
            self.trusted_key()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub listen_addr: String,
    /// Hex Ed25519 signing key; a fresh one is generated when absent
    pub signing_key: Option<String>,
    /// Number of relays handed out per node set
    pub circuit_length: usize,
    pub liveness_window_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            signing_key: None,
            circuit_length: 3,
            liveness_window_ms: 1000,
        }
    }
}

impl DirectoryConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Load the configured signing key or generate an ephemeral one
    pub fn signing_keypair(&self) -> Result<DirectoryKeyPair, ConfigError> {
        match self.signing_key.as_deref() {
            Some(secret_hex) => Ok(DirectoryKeyPair::from_hex(secret_hex)?),
            None => Ok(DirectoryKeyPair::generate()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_addr("directory.listen_addr", &self.listen_addr)?;
        require_nonzero("directory.circuit_length", self.circuit_length as u64)?;
        require_nonzero("directory.liveness_window_ms", self.liveness_window_ms)?;
        if let Some(secret_hex) = &self.signing_key {
            DirectoryKeyPair::from_hex(secret_hex)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub listen_addr: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_CHAT_ADDR.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_addr("chat.listen_addr", &self.listen_addr)
    }
}

/// Every section in one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShallotConfig {
    pub network: NetworkConfig,
    pub relay: RelayConfig,
    pub proxy: ProxyConfig,
    pub directory: DirectoryConfig,
    pub chat: ChatConfig,
}

impl ShallotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.relay.validate()?;
        self.proxy.validate()?;
        self.directory.validate()?;
        self.chat.validate()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        ShallotConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_durations() {
        let config = ShallotConfig::default();
        assert_eq!(config.network.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.relay.liveness_window(), Duration::from_secs(1));
        assert_eq!(config.proxy.renewal_interval(), Duration::from_secs(120));
        assert_eq!(config.network.call_options().max_frame_len, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ShallotConfig =
            serde_json::from_str(r#"{"relay": {"listen_addr": "0.0.0.0:9100"}}"#).unwrap();

        assert_eq!(config.relay.listen_addr, "0.0.0.0:9100");
        assert_eq!(config.relay.directory_addr, DEFAULT_DIRECTORY_ADDR);
        assert_eq!(config.directory.circuit_length, 3);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = ShallotConfig::default();
        config.network.call_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_address_rejected() {
        let mut config = ShallotConfig::default();
        config.proxy.chat_server_addr = "  ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("chat_server_addr")));
    }

    #[test]
    fn test_trusted_key_parsing() {
        let directory = DirectoryKeyPair::generate();
        let mut proxy = ProxyConfig::default();
        assert!(matches!(proxy.trusted_key(), Err(ConfigError::MissingTrustedKey)));

        proxy.trusted_directory_key = Some(directory.public_key_hex());
        assert_eq!(proxy.trusted_key().unwrap(), directory.verifying_key());

        proxy.trusted_directory_key = Some("not hex".into());
        assert!(matches!(proxy.validate(), Err(ConfigError::Key(_))));
    }

    #[test]
    fn test_directory_signing_key_round_trip() {
        let keypair = DirectoryKeyPair::generate();
        let config = DirectoryConfig {
            signing_key: Some(keypair.secret_hex().to_string()),
            ..DirectoryConfig::default()
        };

        config.validate().unwrap();
        assert_eq!(
            config.signing_keypair().unwrap().verifying_key(),
            keypair.verifying_key()
        );
    }
}
