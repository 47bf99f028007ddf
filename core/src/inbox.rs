//! Inbox records: the de-duplication ledger of a consuming service.

use crate::envelope::EventEnvelope;
use crate::store::StoreError;
use crate::types::EventId;
use chrono::{DateTime, Utc};
use std::future::Future;

/// Proof that a consumer has applied an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboxRecord {
    /// Envelope id.
    pub id: EventId,
    /// Event type name, kept as text so unknown types can be recorded too.
    pub event_type: String,
    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
    /// When this consumer applied it.
    pub processed_at: DateTime<Utc>,
}

impl InboxRecord {
    /// Record for a decoded envelope.
    #[must_use]
    pub fn for_envelope(envelope: &EventEnvelope, processed_at: DateTime<Utc>) -> Self {
        Self {
            id: envelope.id,
            event_type: envelope.event_type().as_str().to_string(),
            occurred_at: envelope.occurred_at,
            processed_at,
        }
    }
}

/// Inbox writes, implemented on a transaction.
pub trait InboxLedger: Send {
    /// Insert the record unless its id is already present.
    ///
    /// Returns `true` when the row was inserted, `false` when the event had
    /// already been applied. The check and the insert are one atomic step.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn record_inbox(
        &mut self,
        record: &InboxRecord,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
