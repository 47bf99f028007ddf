//! # Journey Relay Rewards
//!
//! The rewards service: consumes journey distance events through an
//! inbox-guarded consumer and grants each user's daily distance goal at most
//! once per day.
//!
//! - [`engine::RewardEngine`]: per-`(user, day)` totals and the grant rule
//! - [`processor::RewardProcessor`]: routes broker deliveries into the engine
//! - [`config::Config`]: environment configuration of the binary
//!
//! A grant is announced as `JourneyDailyGoalAchieved` through the service's own
//! outbox, which the journeys and notifications services consume.

pub mod config;
pub mod engine;
pub mod processor;

pub use engine::{DEFAULT_DAILY_GOAL, MIN_DAILY_GOAL, RewardEngine, Sighting};
pub use processor::RewardProcessor;
