//! # Journey Relay Journeys
//!
//! The originating service. Journey commands mutate the [`Journey`] aggregate
//! and append the envelopes it raises to the outbox in the same transaction;
//! the service's publisher drains them to the broker.
//!
//! ```text
//! command ──► JourneyService ──► JourneyLedger + OutboxWriter ──► commit
//!                                                                   │
//!                            OutboxPublisher ◄─────── outbox ◄──────┘
//! ```
//!
//! The service also consumes `JourneyDailyGoalAchieved` from the rewards
//! service ([`GoalAchievedProcessor`]) to flag the journey that earned the
//! goal.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod processor;
pub mod service;

pub use aggregate::Journey;
pub use error::{JourneyError, Result};
pub use processor::{GoalAchievedProcessor, GoalMarked};
pub use service::JourneyService;
