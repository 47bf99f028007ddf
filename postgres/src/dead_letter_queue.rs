//! Dead Letter Queue (DLQ) for messages a consumer gave up on.
//!
//! Keeps the original broker message next to the failure so an operator can
//! investigate and either replay or discard it. Entries move through
//! `pending → processing → resolved | discarded`.

use crate::{decode_error, store_error};
use chrono::{DateTime, Utc};
use journey_relay_core::dead_letter::{DeadLetter, DeadLetterSink};
use journey_relay_core::event_bus::BrokerMessage;
use journey_relay_core::store::StoreError;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Status of a failed message in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for investigation
    Pending,
    /// Someone is working on it
    Processing,
    /// Replayed or otherwise fixed
    Resolved,
    /// Permanently given up on
    Discarded,
}

impl DLQStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::Serialization(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// Entry id
    pub id: i64,
    /// Consumer that gave up
    pub consumer: String,
    /// The original broker message
    pub message: BrokerMessage,
    /// Last error
    pub error_message: String,
    /// Deliveries made before giving up
    pub attempts: i32,
    /// When the message was first parked
    pub first_failed_at: DateTime<Utc>,
    /// When the message was last parked (a replayed message can fail again)
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: DLQStatus,
    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Resolution notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based Dead Letter Queue (`failed_events` table).
///
/// # Example
///
/// ```no_run
/// use journey_relay_postgres::{DLQStatus, DeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// if let Some(entry) = pending.first() {
///     dlq.update_status(entry.id, DLQStatus::Processing).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a DLQ over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a message. Returns the entry id.
    ///
    /// Parking the same message for the same consumer again refreshes the
    /// existing entry and puts it back to `pending`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64, StoreError> {
        let attempts = i32::try_from(letter.attempts).unwrap_or(i32::MAX);
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_events (
                consumer, message_id, routing_key, partition_key, body, error_message, attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (consumer, message_id) DO UPDATE
            SET error_message = EXCLUDED.error_message,
                attempts = failed_events.attempts + EXCLUDED.attempts,
                last_failed_at = NOW(),
                status = 'pending',
                resolved_at = NULL,
                resolved_by = NULL,
                resolution_notes = NULL
            RETURNING id
            ",
        )
        .bind(&letter.consumer)
        .bind(&letter.message.id)
        .bind(&letter.message.routing_key)
        .bind(&letter.message.partition_key)
        .bind(&letter.message.body)
        .bind(&letter.error)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::warn!(
            dlq_id = id,
            consumer = %letter.consumer,
            message_id = %letter.message.id,
            event_type = %letter.message.routing_key,
            attempts = letter.attempts,
            error = %letter.error,
            "Message added to Dead Letter Queue"
        );

        Ok(id)
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedEvent>, StoreError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// Entries in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedEvent>, StoreError> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(
            r"
            SELECT
                id, consumer, message_id, routing_key, partition_key, body, error_message, attempts,
                first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_events
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(Self::row_to_failed_event).collect()
    }

    /// One entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails or the entry does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedEvent, StoreError> {
        let row = sqlx::query(
            r"
            SELECT
                id, consumer, message_id, routing_key, partition_key, body, error_message, attempts,
                first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_events
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Self::row_to_failed_event(&row)
    }

    /// Move an entry to `status`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE failed_events SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");
        Ok(())
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
        metrics::counter!("relay_dlq_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");
        metrics::counter!("relay_dlq_discarded_total").increment(1);
        Ok(())
    }

    /// Number of pending entries, for health checks.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(count)
    }

    fn row_to_failed_event(row: &sqlx::postgres::PgRow) -> Result<FailedEvent, StoreError> {
        let status: String = row.try_get("status").map_err(decode_error)?;

        Ok(FailedEvent {
            id: row.try_get("id").map_err(decode_error)?,
            consumer: row.try_get("consumer").map_err(decode_error)?,
            message: BrokerMessage {
                id: row.try_get("message_id").map_err(decode_error)?,
                routing_key: row.try_get("routing_key").map_err(decode_error)?,
                partition_key: row.try_get("partition_key").map_err(decode_error)?,
                body: row.try_get("body").map_err(decode_error)?,
            },
            error_message: row.try_get("error_message").map_err(decode_error)?,
            attempts: row.try_get("attempts").map_err(decode_error)?,
            first_failed_at: row.try_get("first_failed_at").map_err(decode_error)?,
            last_failed_at: row.try_get("last_failed_at").map_err(decode_error)?,
            status: DLQStatus::parse(&status)?,
            resolved_at: row.try_get("resolved_at").map_err(decode_error)?,
            resolved_by: row.try_get("resolved_by").map_err(decode_error)?,
            resolution_notes: row.try_get("resolution_notes").map_err(decode_error)?,
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn dead_letter(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move { self.add_entry(&letter).await.map(|_| ()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[
            DLQStatus::Pending,
            DLQStatus::Processing,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(DLQStatus::parse("retrying").is_err());
    }
}
