//! # Journey Relay Core
//!
//! Shared vocabulary of the journey services: the event envelope and its closed
//! set of events, fixed-point distances, and the ports through which services
//! reach their store and the broker.
//!
//! ## Delivery backbone
//!
//! ```text
//! mutation ──► OutboxWriter (same tx) ──► outbox table
//!                                            │
//!                                   OutboxPublisher (confirmed publish)
//!                                            │
//!                                         broker
//!                                            │
//!                      InboxConsumer (inbox row + handler, same tx)
//!                                            │
//!                         reward engine / notification processor
//! ```
//!
//! Delivery is at-least-once; effects are exactly-once because every consumer
//! records the envelope id in its inbox inside the handler's transaction.

pub mod dead_letter;
pub mod envelope;
pub mod event_bus;
pub mod inbox;
pub mod ledger;
pub mod outbox;
pub mod store;
pub mod types;

pub use envelope::{DecodeError, EventEnvelope, EventType, JourneyEvent};
pub use types::{Distance, EventId, JourneyId, PublicLinkId, UserId};

/// Environment traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
