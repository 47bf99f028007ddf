//! # Journey Relay Testing
//!
//! In-memory stand-ins for the store, the broker and the clock, so services can
//! be exercised end to end without `PostgreSQL` or Redpanda.
//!
//! - [`InMemoryStore`]: every ledger port, with transactional staging
//! - [`InMemoryEventBus`]: routing-key fan-out with ack/nack and redelivery
//! - [`RecordingDeadLetterSink`]: keeps dead letters for assertions
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use journey_relay_testing::{InMemoryStore, test_clock};
//!
//! #[tokio::test]
//! async fn applies_once() {
//!     let store = InMemoryStore::new();
//!     let consumer = InboxConsumer::new(Arc::new(store.clone()), processor, bus, dlq, Arc::new(test_clock()), config);
//!     consumer.handle_delivery(delivery).await;
//!     assert_eq!(store.snapshot().await.inbox.len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use journey_relay_core::environment::Clock;

mod dead_letter;
mod event_bus;
mod store;

pub use dead_letter::RecordingDeadLetterSink;
pub use event_bus::InMemoryEventBus;
pub use store::{InMemoryClaim, InMemoryState, InMemoryStore, InMemoryTx};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use super::{InMemoryEventBus, InMemoryStore, RecordingDeadLetterSink};

    /// Clock that always returns the same instant.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock frozen at 2025-01-01T00:00:00Z.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use mocks::{FixedClock, test_clock};

/// Install a test-friendly tracing subscriber once; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_does_not_move() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}
