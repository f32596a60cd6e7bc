//! Configuration types for the mesh call

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a [`MeshCall`](crate::MeshCall)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub relay_url: String,

    /// Base URL of the participant lookup service (http:// or https://)
    pub lookup_url: String,

    /// Tenant and participant context for this call
    pub identity: CallIdentity,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Negotiation and supervision tunables
    pub options: NegotiationOptions,
}

/// Who is joining which conversation
///
/// Passed explicitly into the orchestrator; nothing reads tenant context from
/// globals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallIdentity {
    /// Store (tenant) the conversation belongs to
    pub store_id: String,

    /// Conversation whose participants form the mesh
    pub conversation_id: String,

    /// Local user
    pub user_id: String,

    /// Local device; offers from this device are never dialled
    pub device_id: String,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URLs (turn:// or turns://)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Negotiation and lifecycle tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationOptions {
    /// Budget for a connection to reach `connected` (default: 15000ms)
    pub connect_timeout_ms: u64,

    /// Delay between attempts to apply an early ICE candidate (default: 1000ms)
    pub candidate_retry_ms: u64,

    /// Pre-negotiated id of the command data channel (default: 0)
    pub command_channel_id: u16,

    /// Pre-negotiated id of the negotiation data channel (default: 2)
    pub negotiation_channel_id: u16,

    /// Request timeout for the participant lookup (default: 10000ms)
    pub lookup_timeout_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080".to_string(),
            lookup_url: "http://localhost:8081".to_string(),
            identity: CallIdentity::default(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            options: NegotiationOptions::default(),
        }
    }
}

impl Default for NegotiationOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            candidate_retry_ms: 1_000,
            command_channel_id: 0,
            negotiation_channel_id: 2,
            lookup_timeout_ms: 10_000,
        }
    }
}

impl NegotiationOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn candidate_retry_interval(&self) -> Duration {
        Duration::from_millis(self.candidate_retry_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl MeshConfig {
    /// Load a configuration from a YAML file
    ///
    /// Missing fields fall back to their defaults. The result is not
    /// validated; call [`MeshConfig::validate`] once CLI overrides have been
    /// applied.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|e| {
            crate::Error::InvalidConfig(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a WebSocket URL
    /// - `lookup_url` is not an HTTP URL
    /// - any identity field is empty
    /// - an ICE server URL has the wrong scheme
    /// - a timeout or retry interval is zero
    /// - both data channels share an id
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if !self.lookup_url.starts_with("http://") && !self.lookup_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "lookup_url must start with http:// or https://, got {}",
                self.lookup_url
            )));
        }

        let identity = &self.identity;
        for (field, value) in [
            ("store_id", &identity.store_id),
            ("conversation_id", &identity.conversation_id),
            ("user_id", &identity.user_id),
            ("device_id", &identity.device_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("identity.{} is empty", field)));
            }
        }

        if let Some(url) = self.stun_servers.iter().find(|u| !u.starts_with("stun:")) {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun:, got {}",
                url
            )));
        }

        for turn in &self.turn_servers {
            if turn.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "TURN server entry has no urls".to_string(),
                ));
            }
            if let Some(url) = turn
                .urls
                .iter()
                .find(|u| !u.starts_with("turn:") && !u.starts_with("turns:"))
            {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    url
                )));
            }
        }

        let options = &self.options;
        if options.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if options.candidate_retry_ms == 0 {
            return Err(Error::InvalidConfig(
                "candidate_retry_ms must be greater than 0".to_string(),
            ));
        }
        if options.lookup_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "lookup_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if options.command_channel_id == options.negotiation_channel_id {
            return Err(Error::InvalidConfig(format!(
                "command and negotiation channels must use different ids, both are {}",
                options.command_channel_id
            )));
        }

        Ok(())
    }

    /// Set the call identity
    ///
    /// Useful for chaining after `Default::default()`.
    pub fn with_identity(mut self, identity: CallIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }
}
