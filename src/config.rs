//! Peer configuration
//!
//! Configuration is plain data: construct it in code, or load/save it as
//! JSON or TOML by file extension.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::link::MacAddr;
use crate::{EspNowError, Result};

/// Configuration for an [`crate::peer::EspNowPeer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Monitor-mode interface name (informational; the capture layer opens it)
    pub interface: String,
    /// Logical address used in protocol fields; defaults to the hardware
    /// address reported by the capture layer
    pub local_addr: Option<MacAddr>,
    /// Accept frames addressed to the broadcast address
    pub accept_broadcast: bool,
    /// Accept data frames regardless of destination address
    pub accept_all: bool,
    /// Primary pre-shared secret (PMK), exactly 16 bytes, enables decryption
    pub primary_key: Option<String>,
    /// Local pre-shared secret (LMK), exactly 16 bytes, enables decryption
    pub local_key: Option<String>,
    /// Wait for delivery confirmation on unicast sends by default
    pub block: bool,
    /// Also wait for confirmations on broadcast sends
    pub block_broadcast: bool,
    /// Confirmation wait window in milliseconds
    pub confirm_timeout_ms: u64,
    /// Pause between messages of a batch send, in milliseconds
    pub inter_frame_delay_ms: u64,
    /// Surface received confirmations through the generic callback
    pub surface_confirmations: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            local_addr: None,
            accept_broadcast: true,
            accept_all: false,
            primary_key: None,
            local_key: None,
            block: false,
            block_broadcast: false,
            confirm_timeout_ms: crate::delivery::DEFAULT_CONFIRM_TIMEOUT.as_millis() as u64,
            inter_frame_delay_ms: 0,
            surface_confirmations: false,
        }
    }
}

impl PeerConfig {
    /// Whether the peer is configured for encrypted traffic
    pub fn encryption_requested(&self) -> bool {
        self.primary_key.is_some() || self.local_key.is_some()
    }

    /// Confirmation wait window
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Pause between batch messages
    pub fn inter_frame_delay(&self) -> Duration {
        Duration::from_millis(self.inter_frame_delay_ms)
    }

    /// Load configuration from a JSON or TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| EspNowError::Config(format!("invalid JSON config: {e}"))),
            Some("toml") => toml::from_str(&content)
                .map_err(|e| EspNowError::Config(format!("invalid TOML config: {e}"))),
            _ => Err(EspNowError::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Save configuration to a JSON or TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)
                .map_err(|e| EspNowError::Config(format!("serialize failed: {e}")))?,
            Some("toml") => toml::to_string_pretty(self)
                .map_err(|e| EspNowError::Config(format!("serialize failed: {e}")))?,
            _ => {
                return Err(EspNowError::Config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert!(config.accept_broadcast);
        assert!(!config.accept_all);
        assert!(!config.encryption_requested());
        assert_eq!(config.confirm_timeout(), Duration::from_millis(25));
    }

    #[test]
    fn test_partial_json() {
        let config: PeerConfig = serde_json::from_str(
            r#"{"interface": "wlp1s0", "accept_all": true, "local_addr": "48:55:19:00:00:55"}"#,
        )
        .unwrap();
        assert_eq!(config.interface, "wlp1s0");
        assert!(config.accept_all);
        assert!(config.accept_broadcast);
        assert_eq!(
            config.local_addr,
            Some("48:55:19:00:00:55".parse().unwrap())
        );
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PeerConfig::default();
        config.primary_key = Some("0u4hgz7pgct3gnv8".to_string());
        config.confirm_timeout_ms = 50;

        let toml_text = toml::to_string_pretty(&config).unwrap();
        let back: PeerConfig = toml::from_str(&toml_text).unwrap();
        assert_eq!(back.primary_key.as_deref(), Some("0u4hgz7pgct3gnv8"));
        assert_eq!(back.confirm_timeout_ms, 50);
        assert!(back.encryption_requested());
    }
}
