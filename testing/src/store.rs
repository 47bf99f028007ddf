//! In-memory transactional store.
//!
//! A transaction holds the store's lock for its whole lifetime and works on a
//! private copy of the state, written back on commit. Transactions are
//! therefore fully serialized, and dropping one discards its writes.

use chrono::{DateTime, NaiveDate, Utc};
use journey_relay_core::inbox::{InboxLedger, InboxRecord};
use journey_relay_core::ledger::{
    DailyAggregate, JourneyFact, JourneyLedger, JourneyRecord, RecipientLedger, RewardLedger,
};
use journey_relay_core::outbox::{OutboxClaim, OutboxLedger, OutboxRecord, OutboxStore};
use journey_relay_core::store::{StoreError, TransactionalStore, UnitOfWork};
use journey_relay_core::types::{EventId, JourneyId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Everything the in-memory store holds.
#[derive(Clone, Debug, Default)]
pub struct InMemoryState {
    /// Outbox rows in insertion order
    pub outbox: Vec<OutboxRecord>,
    /// Inbox rows by envelope id
    pub inbox: BTreeMap<EventId, InboxRecord>,
    /// Reward engine journey mirror
    pub journey_facts: HashMap<JourneyId, JourneyFact>,
    /// Daily aggregates by `(user, day)`
    pub daily_totals: BTreeMap<(UserId, NaiveDate), DailyAggregate>,
    /// Favorite mirror: `(journey, user) -> owner`
    pub favorites: BTreeMap<(JourneyId, UserId), UserId>,
    /// Direct-share mirror: `(journey, shared_with) -> owner`
    pub shares: BTreeMap<(JourneyId, UserId), UserId>,
    /// Journeys of the originating service
    pub journeys: HashMap<JourneyId, JourneyRecord>,
}

impl InMemoryState {
    /// Outbox rows not yet published.
    #[must_use]
    pub fn pending_outbox(&self) -> Vec<&OutboxRecord> {
        self.outbox.iter().filter(|r| !r.processed).collect()
    }
}

/// Shared in-memory store; clones see the same data.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    conflicts: Arc<AtomicU32>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> InMemoryState {
        self.state.lock().await.clone()
    }

    /// Mutate the committed state directly.
    pub async fn seed(&self, f: impl FnOnce(&mut InMemoryState)) {
        f(&mut *self.state.lock().await);
    }

    /// Make the next `n` commits fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }
}

impl TransactionalStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTx {
            guard,
            staged,
            conflicts: Arc::clone(&self.conflicts),
        })
    }
}

/// An open in-memory transaction.
pub struct InMemoryTx {
    guard: OwnedMutexGuard<InMemoryState>,
    staged: InMemoryState,
    conflicts: Arc<AtomicU32>,
}

impl InMemoryTx {
    /// The state as this transaction currently sees it.
    #[must_use]
    pub const fn staged(&self) -> &InMemoryState {
        &self.staged
    }
}

impl UnitOfWork for InMemoryTx {
    async fn commit(mut self) -> Result<(), StoreError> {
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}

impl InboxLedger for InMemoryTx {
    async fn record_inbox(&mut self, record: &InboxRecord) -> Result<bool, StoreError> {
        if self.staged.inbox.contains_key(&record.id) {
            return Ok(false);
        }
        self.staged.inbox.insert(record.id, record.clone());
        Ok(true)
    }
}

impl OutboxLedger for InMemoryTx {
    async fn append_outbox(&mut self, records: &[OutboxRecord]) -> Result<(), StoreError> {
        if records
            .iter()
            .any(|r| self.staged.outbox.iter().any(|existing| existing.id == r.id))
        {
            return Err(StoreError::Conflict("duplicate outbox id".to_string()));
        }
        self.staged.outbox.extend_from_slice(records);
        Ok(())
    }
}

impl RewardLedger for InMemoryTx {
    async fn journey_fact(&mut self, journey_id: JourneyId) -> Result<Option<JourneyFact>, StoreError> {
        Ok(self.staged.journey_facts.get(&journey_id).cloned())
    }

    async fn save_journey_fact(&mut self, fact: &JourneyFact) -> Result<(), StoreError> {
        self.staged.journey_facts.insert(fact.journey_id, fact.clone());
        Ok(())
    }

    async fn lock_daily_total(
        &mut self,
        user_id: UserId,
        day: NaiveDate,
    ) -> Result<DailyAggregate, StoreError> {
        Ok(self
            .staged
            .daily_totals
            .entry((user_id, day))
            .or_insert_with(|| DailyAggregate::untouched(user_id, day))
            .clone())
    }

    async fn save_daily_total(&mut self, aggregate: &DailyAggregate) -> Result<(), StoreError> {
        self.staged
            .daily_totals
            .insert((aggregate.user_id, aggregate.day), aggregate.clone());
        Ok(())
    }
}

impl RecipientLedger for InMemoryTx {
    async fn upsert_favorite(
        &mut self,
        journey_id: JourneyId,
        user_id: UserId,
        owner_id: UserId,
    ) -> Result<(), StoreError> {
        self.staged.favorites.insert((journey_id, user_id), owner_id);
        Ok(())
    }

    async fn remove_favorite(&mut self, journey_id: JourneyId, user_id: UserId) -> Result<(), StoreError> {
        self.staged.favorites.remove(&(journey_id, user_id));
        Ok(())
    }

    async fn upsert_share(
        &mut self,
        journey_id: JourneyId,
        owner_id: UserId,
        shared_with: UserId,
    ) -> Result<(), StoreError> {
        self.staged.shares.insert((journey_id, shared_with), owner_id);
        Ok(())
    }

    async fn remove_share(&mut self, journey_id: JourneyId, shared_with: UserId) -> Result<(), StoreError> {
        self.staged.shares.remove(&(journey_id, shared_with));
        Ok(())
    }

    async fn favoriters(&mut self, journey_id: JourneyId) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .staged
            .favorites
            .keys()
            .filter(|(journey, _)| *journey == journey_id)
            .map(|(_, user)| *user)
            .collect())
    }

    async fn purge_journey(&mut self, journey_id: JourneyId) -> Result<(), StoreError> {
        self.staged.favorites.retain(|(journey, _), _| *journey != journey_id);
        self.staged.shares.retain(|(journey, _), _| *journey != journey_id);
        Ok(())
    }
}

impl JourneyLedger for InMemoryTx {
    async fn load_journey(&mut self, journey_id: JourneyId) -> Result<Option<JourneyRecord>, StoreError> {
        Ok(self.staged.journeys.get(&journey_id).cloned())
    }

    async fn save_journey(&mut self, journey: &JourneyRecord) -> Result<(), StoreError> {
        self.staged.journeys.insert(journey.id, journey.clone());
        Ok(())
    }

    async fn delete_journey(&mut self, journey_id: JourneyId) -> Result<(), StoreError> {
        self.staged.journeys.remove(&journey_id);
        Ok(())
    }
}

/// Outbox rows claimed from an [`InMemoryStore`]; holds the store lock.
pub struct InMemoryClaim {
    guard: OwnedMutexGuard<InMemoryState>,
    records: Vec<OutboxRecord>,
}

impl OutboxClaim for InMemoryClaim {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn mark_processed(mut self, ids: &[EventId]) -> Result<(), StoreError> {
        for record in self.guard.outbox.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.processed = true;
        }
        Ok(())
    }
}

impl OutboxStore for InMemoryStore {
    type Claim = InMemoryClaim;

    async fn claim_unprocessed(&self, limit: usize) -> Result<InMemoryClaim, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let mut records: Vec<OutboxRecord> =
            guard.outbox.iter().filter(|r| !r.processed).cloned().collect();
        records.sort_by_key(|r| r.occurred_at);
        records.truncate(limit);
        Ok(InMemoryClaim { guard, records })
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.outbox.len();
        state.outbox.retain(|r| !r.processed || r.occurred_at >= older_than);
        Ok(u64::try_from(before - state.outbox.len()).unwrap_or(u64::MAX))
    }
}
