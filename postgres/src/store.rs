//! Connection pool, transactions, and the inbox and outbox writes.

use crate::store_error;
use journey_relay_core::inbox::{InboxLedger, InboxRecord};
use journey_relay_core::outbox::{OutboxLedger, OutboxRecord};
use journey_relay_core::store::{StoreError, TransactionalStore, UnitOfWork};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

/// `PostgreSQL`-backed store shared by every service.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

impl TransactionalStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(PgTx { tx })
    }
}

/// An open `PostgreSQL` transaction; dropping it rolls back.
pub struct PgTx {
    pub(crate) tx: Transaction<'static, Postgres>,
}

impl UnitOfWork for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }
}

impl InboxLedger for PgTx {
    async fn record_inbox(&mut self, record: &InboxRecord) -> Result<bool, StoreError> {
        // A concurrent insert of the same id blocks here until the other
        // transaction ends, then reports zero rows.
        let result = sqlx::query(
            r"
            INSERT INTO inbox_messages (id, event_type, occurred_at, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(record.id.as_uuid())
        .bind(&record.event_type)
        .bind(record.occurred_at)
        .bind(record.processed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }
}

impl OutboxLedger for PgTx {
    async fn append_outbox(&mut self, records: &[OutboxRecord]) -> Result<(), StoreError> {
        for record in records {
            sqlx::query(
                r"
                INSERT INTO outbox_messages (
                    id, event_type, partition_key, payload, occurred_at, processed
                ) VALUES ($1, $2, $3, $4::jsonb, $5, $6)
                ",
            )
            .bind(record.id.as_uuid())
            .bind(&record.event_type)
            .bind(&record.partition_key)
            .bind(&record.payload)
            .bind(record.occurred_at)
            .bind(record.processed)
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        }

        tracing::debug!(count = records.len(), "Appended outbox records");
        Ok(())
    }
}
