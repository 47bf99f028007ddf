//! Publisher-side outbox access.
//!
//! A claim is a transaction holding row locks on the claimed rows
//! (`FOR UPDATE SKIP LOCKED`), so publisher instances running side by side
//! never pick the same row. Dropping a claim rolls back and frees the rows.

use crate::store::PgStore;
use crate::{decode_error, store_error};
use chrono::{DateTime, Utc};
use journey_relay_core::outbox::{OutboxClaim, OutboxRecord, OutboxStore};
use journey_relay_core::store::StoreError;
use journey_relay_core::types::EventId;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

/// Outbox rows locked by one publisher tick.
pub struct PgClaim {
    tx: Transaction<'static, Postgres>,
    records: Vec<OutboxRecord>,
}

fn row_to_record(row: &PgRow) -> Result<OutboxRecord, StoreError> {
    Ok(OutboxRecord {
        id: EventId::from_uuid(row.try_get("id").map_err(decode_error)?),
        event_type: row.try_get("event_type").map_err(decode_error)?,
        partition_key: row.try_get("partition_key").map_err(decode_error)?,
        payload: row.try_get("payload").map_err(decode_error)?,
        occurred_at: row.try_get("occurred_at").map_err(decode_error)?,
        processed: row.try_get("processed").map_err(decode_error)?,
    })
}

impl OutboxClaim for PgClaim {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn mark_processed(mut self, ids: &[EventId]) -> Result<(), StoreError> {
        if !ids.is_empty() {
            let ids: Vec<Uuid> = ids.iter().map(EventId::as_uuid).collect();
            sqlx::query(
                r"
                UPDATE outbox_messages
                SET processed = TRUE, processed_at = NOW()
                WHERE id = ANY($1)
                ",
            )
            .bind(ids)
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        }

        self.tx.commit().await.map_err(store_error)
    }
}

impl OutboxStore for PgStore {
    type Claim = PgClaim;

    async fn claim_unprocessed(&self, limit: usize) -> Result<PgClaim, StoreError> {
        let mut tx = self.pool().begin().await.map_err(store_error)?;

        #[allow(clippy::cast_possible_wrap)] // Batch sizes are small
        let rows = sqlx::query(
            r"
            SELECT id, event_type, partition_key, payload::text AS payload, occurred_at, processed
            FROM outbox_messages
            WHERE NOT processed
            ORDER BY occurred_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error)?;

        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
        Ok(PgClaim { tx, records })
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM outbox_messages
            WHERE processed AND occurred_at < $1
            ",
        )
        .bind(older_than)
        .execute(self.pool())
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected())
    }
}
