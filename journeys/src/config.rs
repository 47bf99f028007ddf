//! Journeys service configuration.

use journey_relay_runtime::config::{ConfigError, RelayConfig};

/// Service name used for defaults such as the consumer group.
pub const SERVICE: &str = "journeys";

/// Everything the journeys binary reads at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store, broker, loop and metrics settings.
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            relay: RelayConfig::from_env(SERVICE)?,
        })
    }
}
