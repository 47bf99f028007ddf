//! `PostgreSQL` implementation of the Journey Relay store ports.
//!
//! # Overview
//!
//! [`PgStore`] hands out [`PgTx`] transactions. Every ledger port from
//! `journey-relay-core` is implemented on [`PgTx`], so an inbox row, the
//! handler's writes and any outbox rows it appends commit or roll back
//! together.
//!
//! ```text
//! ┌──────────── one PgTx ─────────────┐
//! │ inbox_messages   (dedup insert)   │
//! │ daily_distance_totals FOR UPDATE  │
//! │ journey_facts / journeys / ...    │
//! │ outbox_messages  (append)         │
//! └───────────────────────────────────┘
//! ```
//!
//! Serialization failures, deadlocks and unique violations are reported as
//! [`StoreError::Conflict`] so the consumer can retry the whole transaction.
//!
//! # Example
//!
//! ```no_run
//! use journey_relay_postgres::PgStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgStore::connect("postgres://localhost/rewards", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use journey_relay_core::store::StoreError;

pub mod dead_letter_queue;
mod ledgers;
pub mod outbox;
mod store;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedEvent};
pub use outbox::PgClaim;
pub use store::{PgStore, PgTx};

/// SQLSTATE codes that mean "another transaction got there first".
const CONFLICT_CODES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "23505", // unique_violation
];

/// Map a driver error onto [`StoreError`].
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code();
        if code.as_deref().is_some_and(|c| CONFLICT_CODES.contains(&c)) {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(err.to_string())
}

/// Map a row decoding error onto [`StoreError`].
pub(crate) fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_conflicts() {
        let err = store_error(sqlx::Error::PoolTimedOut);
        assert!(!err.is_conflict());
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn decode_failures_are_serialization_errors() {
        let err = decode_error(sqlx::Error::ColumnNotFound("total_hundredths".to_string()));
        assert!(matches!(err, StoreError::Serialization(msg) if msg.contains("total_hundredths")));
    }
}
