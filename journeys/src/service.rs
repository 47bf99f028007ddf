//! Command side of the journeys service.
//!
//! Every command runs in one transaction: load the journey, apply the command
//! to the aggregate, write the record, append the raised envelopes to the
//! outbox, commit. A refused command rolls the transaction back, so neither the
//! record nor the outbox changes.

use crate::aggregate::Journey;
use crate::error::{JourneyError, Result};
use chrono::{DateTime, Utc};
use journey_relay_core::environment::Clock;
use journey_relay_core::ledger::{JourneyLedger, JourneyRecord};
use journey_relay_core::outbox::{OutboxLedger, OutboxWriter};
use journey_relay_core::store::{TransactionalStore, UnitOfWork};
use journey_relay_core::types::{Distance, JourneyId, PublicLinkId, UserId};
use metrics::counter;
use std::sync::Arc;

/// Executes journey commands against a transactional store.
pub struct JourneyService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for JourneyService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> JourneyService<S>
where
    S: TransactionalStore,
    S::Tx: JourneyLedger + OutboxLedger,
{
    /// Create a service over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read a journey.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`] or a store failure.
    pub async fn get(&self, journey_id: JourneyId) -> Result<JourneyRecord> {
        let mut tx = self.store.begin().await?;
        tx.load_journey(journey_id)
            .await?
            .ok_or(JourneyError::NotFound(journey_id))
    }

    /// Log a new journey for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::InvalidDistance`] or a store failure.
    pub async fn create(
        &self,
        user_id: UserId,
        start_time: DateTime<Utc>,
        distance: Distance,
    ) -> Result<JourneyRecord> {
        let mut journey =
            Journey::create(JourneyId::new(), user_id, start_time, distance, self.clock.now())?;

        let mut tx = self.store.begin().await?;
        tx.save_journey(journey.record()).await?;
        let written = OutboxWriter::commit(&mut tx, &mut [&mut journey]).await?;
        tx.commit().await?;
        record_raised("create", written);

        tracing::info!(
            journey_id = %journey.id(),
            user_id = %user_id,
            distance = %distance,
            "Journey created"
        );
        Ok(journey.record().clone())
    }

    /// Change a journey's start time and distance.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`], [`JourneyError::NotOwner`],
    /// [`JourneyError::InvalidDistance`] or a store failure.
    pub async fn update(
        &self,
        actor: UserId,
        journey_id: JourneyId,
        start_time: DateTime<Utc>,
        distance: Distance,
    ) -> Result<JourneyRecord> {
        self.execute("update", journey_id, |journey, now| {
            journey.update(actor, start_time, distance, now)?;
            Ok(journey.record().clone())
        })
        .await
    }

    /// Delete a journey.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`], [`JourneyError::NotOwner`] or a
    /// store failure.
    pub async fn delete(&self, actor: UserId, journey_id: JourneyId) -> Result<()> {
        self.execute("delete", journey_id, |journey, now| journey.delete(actor, now))
            .await
    }

    /// Add `user_id` to the journey's favoriters.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`] or a store failure.
    pub async fn favorite(&self, user_id: UserId, journey_id: JourneyId) -> Result<()> {
        self.execute("favorite", journey_id, |journey, now| {
            journey.favorite(user_id, now);
            Ok(())
        })
        .await
    }

    /// Remove `user_id` from the journey's favoriters.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`] or a store failure.
    pub async fn unfavorite(&self, user_id: UserId, journey_id: JourneyId) -> Result<()> {
        self.execute("unfavorite", journey_id, |journey, now| {
            journey.unfavorite(user_id, now);
            Ok(())
        })
        .await
    }

    /// Share a journey with `friend`.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`], [`JourneyError::NotOwner`],
    /// [`JourneyError::ShareWithOwner`] or a store failure.
    pub async fn share_with_user(
        &self,
        actor: UserId,
        journey_id: JourneyId,
        friend: UserId,
    ) -> Result<()> {
        self.execute("share_with_user", journey_id, |journey, now| {
            journey.share_with_user(actor, friend, now)
        })
        .await
    }

    /// Publish a journey under a public link.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`], [`JourneyError::NotOwner`] or a
    /// store failure.
    pub async fn share_public_link(
        &self,
        actor: UserId,
        journey_id: JourneyId,
    ) -> Result<PublicLinkId> {
        self.execute("share_public_link", journey_id, |journey, now| {
            journey.share_public_link(actor, now)
        })
        .await
    }

    /// Revoke a direct share.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`], [`JourneyError::NotOwner`] or a
    /// store failure.
    pub async fn unshare_user(
        &self,
        actor: UserId,
        journey_id: JourneyId,
        friend: UserId,
    ) -> Result<()> {
        self.execute("unshare_user", journey_id, |journey, now| {
            journey.unshare_user(actor, friend, now)
        })
        .await
    }

    /// Revoke the public link.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotFound`], [`JourneyError::NotOwner`] or a
    /// store failure.
    pub async fn revoke_public_link(&self, actor: UserId, journey_id: JourneyId) -> Result<()> {
        self.execute("revoke_public_link", journey_id, |journey, now| {
            journey.revoke_public_link(actor, now)
        })
        .await
    }

    async fn execute<T, F>(
        &self,
        command_name: &'static str,
        journey_id: JourneyId,
        command: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Journey, DateTime<Utc>) -> Result<T> + Send,
        T: Send,
    {
        let mut tx = self.store.begin().await?;
        let record = tx
            .load_journey(journey_id)
            .await?
            .ok_or(JourneyError::NotFound(journey_id))?;

        let mut journey = Journey::from_record(record);
        let value = command(&mut journey, self.clock.now())?;

        if journey.is_deleted() {
            tx.delete_journey(journey_id).await?;
        } else {
            tx.save_journey(journey.record()).await?;
        }
        let written = OutboxWriter::commit(&mut tx, &mut [&mut journey]).await?;
        tx.commit().await?;
        record_raised(command_name, written);

        tracing::debug!(
            journey_id = %journey_id,
            command = command_name,
            events = written,
            "Journey command committed"
        );
        Ok(value)
    }
}

fn record_raised(command: &'static str, written: usize) {
    if written > 0 {
        counter!("journeys_events_raised_total", "command" => command)
            .increment(u64::try_from(written).unwrap_or(u64::MAX));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use journey_relay_core::store::StoreError;
    use journey_relay_testing::{InMemoryStore, test_clock};

    fn service(store: &InMemoryStore) -> JourneyService<InMemoryStore> {
        JourneyService::new(Arc::new(store.clone()), Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn create_stores_record_and_outbox_row_together() {
        let store = InMemoryStore::new();
        let owner = UserId::new();

        let record = service(&store)
            .create(owner, Utc::now(), Distance::from_km(3))
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.journeys[&record.id], record);
        assert_eq!(state.outbox.len(), 1);
        assert_eq!(state.outbox[0].event_type, "JourneyCreated");
    }

    #[tokio::test]
    async fn missing_journey_is_not_found() {
        let store = InMemoryStore::new();
        let id = JourneyId::new();

        let err = service(&store).favorite(UserId::new(), id).await.unwrap_err();

        assert_eq!(err, JourneyError::NotFound(id));
        assert!(store.snapshot().await.outbox.is_empty());
    }

    #[tokio::test]
    async fn refused_command_leaves_no_outbox_row() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let record = service.create(UserId::new(), Utc::now(), Distance::from_km(3)).await.unwrap();

        let err = service.delete(UserId::new(), record.id).await.unwrap_err();

        assert!(matches!(err, JourneyError::NotOwner { .. }));
        let state = store.snapshot().await;
        assert!(state.journeys.contains_key(&record.id));
        assert_eq!(state.outbox.len(), 1);
    }

    #[tokio::test]
    async fn commit_conflict_is_reported_as_retryable() {
        let store = InMemoryStore::new();
        let service = service(&store);
        store.inject_conflicts(1);

        let err = service.create(UserId::new(), Utc::now(), Distance::from_km(1)).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(matches!(err, JourneyError::Store(StoreError::Conflict(_))));
        let state = store.snapshot().await;
        assert!(state.journeys.is_empty());
        assert!(state.outbox.is_empty());
    }
}
