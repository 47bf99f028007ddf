//! Rewards service configuration.

use crate::engine::{DEFAULT_DAILY_GOAL, MIN_DAILY_GOAL};
use journey_relay_core::types::Distance;
use journey_relay_runtime::config::{ConfigError, RelayConfig, env_or};

/// Service name used for defaults such as the consumer group.
pub const SERVICE: &str = "rewards";

/// Everything the rewards binary reads at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store, broker, loop and metrics settings.
    pub relay: RelayConfig,
    /// Distance that earns the daily goal (`DAILY_GOAL_KM`).
    pub daily_goal: Distance,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable variable or a daily
    /// goal below the minimum.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            relay: RelayConfig::from_env(SERVICE)?,
            daily_goal: validate_daily_goal(env_or("DAILY_GOAL_KM", DEFAULT_DAILY_GOAL)?)?,
        })
    }
}

/// Reject goals under [`MIN_DAILY_GOAL`].
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming `DAILY_GOAL_KM`.
pub fn validate_daily_goal(goal: Distance) -> Result<Distance, ConfigError> {
    if goal < MIN_DAILY_GOAL {
        return Err(ConfigError::Invalid {
            key: "DAILY_GOAL_KM".to_string(),
            value: goal.to_string(),
            reason: format!("must be at least {MIN_DAILY_GOAL}"),
        });
    }
    Ok(goal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;

    #[test]
    fn goal_at_or_above_minimum_is_accepted() {
        assert_eq!(validate_daily_goal(DEFAULT_DAILY_GOAL), Ok(DEFAULT_DAILY_GOAL));
        let higher = Distance::from_hundredths(2550);
        assert_eq!(validate_daily_goal(higher), Ok(higher));
    }

    #[test]
    fn goal_below_minimum_is_rejected() {
        let err = validate_daily_goal(Distance::from_hundredths(1999)).unwrap_err();
        assert!(err.to_string().contains("DAILY_GOAL_KM"));
        assert!(err.to_string().contains("20.00"));
    }
}
