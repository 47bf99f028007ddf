//! Notifications service configuration.

use crate::presence::DEFAULT_PRESENCE_TTL;
use journey_relay_runtime::config::{ConfigError, RelayConfig, env_or};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Service name used for defaults such as the consumer group.
pub const SERVICE: &str = "notifications";

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Relay host (`SMTP_HOST`)
    pub host: String,
    /// Relay port (`SMTP_PORT`)
    pub port: u16,
    /// Login (`SMTP_USERNAME`)
    pub username: String,
    /// Password (`SMTP_PASSWORD`)
    pub password: String,
}

/// Offline fallback settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP relay; `None` logs messages to the console instead.
    pub smtp: Option<SmtpConfig>,
    /// Sender (`EMAIL_FROM`)
    pub from: String,
}

/// Everything the notifications binary reads at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store, broker, loop and metrics settings.
    pub relay: RelayConfig,
    /// Presence store (`REDIS_URL`)
    pub redis_url: String,
    /// Presence marker lifetime (`PRESENCE_TTL_SECS`)
    pub presence_ttl: Duration,
    /// Live WebSocket listener (`LIVE_ADDR`)
    pub live_addr: SocketAddr,
    /// Offline fallback.
    pub email: EmailConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: env_or("SMTP_PORT", 587)?,
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Self {
            relay: RelayConfig::from_env(SERVICE)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            presence_ttl: Duration::from_secs(env_or(
                "PRESENCE_TTL_SECS",
                DEFAULT_PRESENCE_TTL.as_secs(),
            )?),
            live_addr: env_or("LIVE_ADDR", SocketAddr::from(([0, 0, 0, 0], 8081)))?,
            email: EmailConfig {
                smtp,
                from: env::var("EMAIL_FROM")
                    .unwrap_or_else(|_| "Journeys <noreply@journeys.local>".to_string()),
            },
        })
    }
}
