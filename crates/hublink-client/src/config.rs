//! Client configuration.
//!
//! [`HubConfig`] holds the credentials issued for this client and is read
//! once from a JSON file. [`ClientOptions`] holds the runtime tunables and
//! defaults to the values the hub expects.

use std::{path::Path, time::Duration};

use hublink_proto::{MAX_PAYLOAD_SIZE, redacted};
use serde::Deserialize;

use crate::error::ClientError;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gsc-services.json";

/// Protocol version announced to the hub.
pub const PROTOCOL_VERSION: &str = "2.2.0";

/// Hub location and client credentials.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Control-plane base URL (e.g. `https://hub.example.com`).
    pub host: String,
    /// Stable client ID.
    pub id: String,
    /// Client secret token.
    pub token: String,
}

impl HubConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ClientError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json(&data)
    }

    /// Parse the configuration from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_slice(data)
            .map_err(|e| ClientError::Config { reason: format!("malformed config: {e}") })?;
        if config.host.is_empty() {
            return Err(ClientError::Config { reason: "host is empty".to_string() });
        }
        Ok(config)
    }
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("host", &self.host)
            .field("id", &self.id)
            .field("token", &redacted(self.token.len()))
            .finish()
    }
}

/// Runtime tunables.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Delay between heartbeat ticks (ping or reconnect attempt).
    pub heartbeat_interval: Duration,
    /// Timeout applied to each control-plane request.
    pub request_timeout: Duration,
    /// Largest frame payload accepted or sent.
    pub max_frame_size: usize,
    /// Protocol version announced to the hub.
    pub version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            max_frame_size: MAX_PAYLOAD_SIZE,
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}
