//! Room Signaling Hub configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing is required, so a bare `signaling-hub` invocation
//! starts a usable development instance.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default signaling bind address (WebSocket + collaborator API).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health/metrics endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default retained chat entries per room.
pub const DEFAULT_MAX_CHAT_HISTORY: usize = 1000;

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 64;

/// Default hub instance ID prefix.
pub const DEFAULT_HUB_ID_PREFIX: &str = "hub";

/// Room Signaling Hub configuration.
#[derive(Clone)]
pub struct Config {
    /// Signaling server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this hub instance.
    pub hub_id: String,

    /// Retained chat entries per room; the oldest entry is evicted when
    /// the cap is exceeded. The full retained window is replayed to every
    /// new joiner (default: 1000).
    pub max_chat_history: usize,

    /// Per-connection outbound queue depth. A connection that cannot
    /// drain its queue has further deliveries dropped rather than
    /// stalling room broadcasts (default: 64).
    pub outbound_queue_size: usize,

    /// When true, a non-host attempting a host-gated action receives a
    /// targeted `action_denied` event; the default preserves the silent
    /// drop (default: false).
    pub notify_denied_actions: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("hub_id", &self.hub_id)
            .field("max_chat_history", &self.max_chat_history)
            .field("outbound_queue_size", &self.outbound_queue_size)
            .field("notify_denied_actions", &self.notify_denied_actions)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a set variable fails to
    /// parse; unset variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a set variable fails to
    /// parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("HUB_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("HUB_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_chat_history =
            parse_var(vars, "HUB_MAX_CHAT_HISTORY", DEFAULT_MAX_CHAT_HISTORY)?;

        let outbound_queue_size =
            parse_var(vars, "HUB_OUTBOUND_QUEUE_SIZE", DEFAULT_OUTBOUND_QUEUE_SIZE)?;
        if outbound_queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                var: "HUB_OUTBOUND_QUEUE_SIZE".to_string(),
                value: "0".to_string(),
            });
        }

        let notify_denied_actions = parse_bool(vars, "HUB_NOTIFY_DENIED_ACTIONS", false)?;

        // Generate hub instance ID
        let hub_id = vars.get("HUB_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_HUB_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            hub_id,
            max_chat_history,
            outbound_queue_size,
            notify_denied_actions,
        })
    }
}

/// Parse a numeric variable, defaulting when unset.
fn parse_var(
    vars: &HashMap<String, String>,
    var: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match vars.get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.clone(),
        }),
    }
}

/// Parse a boolean variable ("true"/"false"/"1"/"0"), defaulting when unset.
fn parse_bool(
    vars: &HashMap<String, String>,
    var: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(var).map(String::as_str) {
        None => Ok(default),
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(raw) => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.to_string(),
        }),
    }
}
