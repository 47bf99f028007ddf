//! Outbox records, the outbox writer and the publisher-side claim port.
//!
//! A service announces a state change by appending an [`OutboxRecord`] inside
//! the same transaction as the change itself. The publisher later claims
//! unprocessed rows, pushes them to the broker and flips `processed` for the
//! rows the broker confirmed.

use crate::envelope::{EncodeError, EventEnvelope};
use crate::event_bus::BrokerMessage;
use crate::store::StoreError;
use crate::types::EventId;
use chrono::{DateTime, Utc};
use std::future::Future;

/// A pending announcement, persisted next to the state change it describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Envelope id.
    pub id: EventId,
    /// Event type name; the routing key.
    pub event_type: String,
    /// Id of the journey the event is about; the broker ordering key.
    pub partition_key: String,
    /// JSON text of the wire envelope.
    pub payload: String,
    /// When the change happened; publish order.
    pub occurred_at: DateTime<Utc>,
    /// Set once the broker has confirmed the publish.
    pub processed: bool,
}

impl OutboxRecord {
    /// Serialize an envelope into an unprocessed record.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the payload cannot be serialized.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, EncodeError> {
        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type().as_str().to_string(),
            partition_key: envelope.event.journey_id().to_string(),
            payload: envelope.to_json()?,
            occurred_at: envelope.occurred_at,
            processed: false,
        })
    }

    /// The broker message for this record.
    #[must_use]
    pub fn to_message(&self) -> BrokerMessage {
        BrokerMessage {
            id: self.id.to_string(),
            routing_key: self.event_type.clone(),
            partition_key: self.partition_key.clone(),
            body: self.payload.clone().into_bytes(),
        }
    }
}

impl From<EncodeError> for StoreError {
    fn from(err: EncodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Outbox writes, implemented on a transaction.
pub trait OutboxLedger: Send {
    /// Append records to the outbox.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn append_outbox(
        &mut self,
        records: &[OutboxRecord],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Something that collects envelopes while it is being mutated.
pub trait PendingEvents {
    /// Envelopes raised since the last commit.
    fn pending_events(&self) -> &[EventEnvelope];

    /// Forget the pending envelopes once they are durable.
    fn clear_pending_events(&mut self);
}

/// Persists pending envelopes inside the caller's transaction.
///
/// Never touches the network: publishing is the publisher's job.
pub struct OutboxWriter;

impl OutboxWriter {
    /// Append every pending envelope of `sources` to the outbox of `tx`, then
    /// clear the sources' pending lists. Returns the number of records written.
    ///
    /// If this returns an error nothing is cleared, and the caller's
    /// transaction must be abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if an envelope cannot be encoded,
    /// or the ledger's error if the append fails.
    pub async fn commit<L, S>(tx: &mut L, sources: &mut [&mut S]) -> Result<usize, StoreError>
    where
        L: OutboxLedger,
        S: PendingEvents + ?Sized,
    {
        let records = sources
            .iter()
            .flat_map(|source| source.pending_events())
            .map(OutboxRecord::from_envelope)
            .collect::<Result<Vec<_>, _>>()?;

        if !records.is_empty() {
            tx.append_outbox(&records).await?;
        }

        for source in sources.iter_mut() {
            source.clear_pending_events();
        }

        Ok(records.len())
    }
}

/// Rows claimed by one publisher tick.
///
/// Dropping the claim without marking anything releases the rows.
pub trait OutboxClaim: Send + Sized {
    /// Claimed rows, oldest first.
    fn records(&self) -> &[OutboxRecord];

    /// Flip `processed` for the given ids and commit the claim.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update or the commit fails.
    fn mark_processed(self, ids: &[EventId]) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Publisher-side access to the outbox table.
pub trait OutboxStore: Send + Sync {
    /// The claim type.
    type Claim: OutboxClaim;

    /// Claim up to `limit` unprocessed rows ordered by `occurred_at`.
    ///
    /// Rows claimed by a concurrent publisher are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    fn claim_unprocessed(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Self::Claim, StoreError>> + Send;

    /// Delete processed rows older than `older_than`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the delete fails.
    fn purge_processed(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::envelope::{JourneyEvent, JourneyUnfavorited};
    use crate::types::{JourneyId, UserId};

    #[derive(Default)]
    struct VecLedger(Vec<OutboxRecord>);

    impl OutboxLedger for VecLedger {
        async fn append_outbox(&mut self, records: &[OutboxRecord]) -> Result<(), StoreError> {
            self.0.extend_from_slice(records);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Source(Vec<EventEnvelope>);

    impl PendingEvents for Source {
        fn pending_events(&self) -> &[EventEnvelope] {
            &self.0
        }

        fn clear_pending_events(&mut self) {
            self.0.clear();
        }
    }

    fn unfavorited() -> EventEnvelope {
        EventEnvelope::new(
            JourneyEvent::Unfavorited(JourneyUnfavorited {
                journey_id: JourneyId::new(),
                user_id: UserId::new(),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn commit_appends_every_pending_event_and_clears() {
        let mut first = Source(vec![unfavorited(), unfavorited()]);
        let mut second = Source(vec![unfavorited()]);
        let ids: Vec<_> = first.0.iter().chain(&second.0).map(|e| e.id).collect();
        let mut ledger = VecLedger::default();

        let written = OutboxWriter::commit(&mut ledger, &mut [&mut first, &mut second])
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(ledger.0.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
        assert!(ledger.0.iter().all(|r| !r.processed && r.event_type == "JourneyUnfavorited"));
        assert!(first.0.is_empty() && second.0.is_empty());
    }

    #[tokio::test]
    async fn commit_with_nothing_pending_writes_nothing() {
        let mut source = Source::default();
        let mut ledger = VecLedger::default();

        let written = OutboxWriter::commit(&mut ledger, &mut [&mut source]).await.unwrap();

        assert_eq!(written, 0);
        assert!(ledger.0.is_empty());
    }

    #[test]
    fn record_becomes_message_ordered_by_journey() {
        let envelope = unfavorited();
        let message = OutboxRecord::from_envelope(&envelope).unwrap().to_message();

        assert_eq!(message.id, envelope.id.to_string());
        assert_eq!(message.routing_key, "JourneyUnfavorited");
        assert_eq!(message.partition_key, envelope.event.journey_id().to_string());
        assert_eq!(EventEnvelope::from_json(&message.body).unwrap(), envelope);
    }
}
