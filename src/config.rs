//! Sender configuration

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};

/// Message namespace of the relay channel (synced with the cast receiver)
pub const MESSAGE_NAMESPACE: &str = "urn:x-cast:ch.gorrion.pacc";

/// Receiver application id
pub const APPLICATION_ID: &str = "BBD69F9A";

/// Marker contained in the label of the capture source
pub const PACC_SOURCE_NAME: &str = "PACC";

// Verbose logging in debug builds only
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Relay namespace used for all signaling messages
    pub namespace: String,

    /// Receiver application id, handed to the relay transport
    pub application_id: String,

    /// Capture devices whose label contains this marker are used
    pub source_marker: String,

    /// STUN/TURN servers; the receiver is normally on the same LAN so none are needed
    pub ice_servers: Vec<ServerConfig>,

    /// `tracing` filter directive, e.g. `info,webrtc=warn`
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: MESSAGE_NAMESPACE.into(),
            application_id: APPLICATION_ID.into(),
            source_marker: PACC_SOURCE_NAME.into(),
            ice_servers: Vec::new(),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl Config {
    /// Parses a JSON document; missing fields fall back to defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        for server in &mut config.ice_servers {
            server.url = add_ice_url_scheme(server);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace cannot be empty".into()));
        }
        if self.source_marker.is_empty() {
            return Err(Error::Config("source marker cannot be empty".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!("server {}: url cannot be empty", server.id)));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::Config(format!(
                    "server {}: TURN servers require username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}
