//! Daily distance reward engine.
//!
//! Keeps one running total per `(user, day)` from the stream of journey
//! distance events and grants the daily goal on the first strict upward
//! crossing of the threshold:
//!
//! ```text
//! Untouched ──► BelowThreshold ⇄ BelowThreshold ──► Granted (terminal for the day)
//! ```
//!
//! Everything happens inside the caller's transaction: the journey fact, the
//! locked aggregate, and the goal envelope appended to the outbox. Duplicate
//! deliveries are stopped by the inbox before they reach the engine.
//!
//! Events about one journey normally arrive in the order they happened. When
//! they do not, the journey fact decides: it remembers the newest applied
//! `occurred_at` and stays behind as a tombstone after a delete.

use chrono::{DateTime, NaiveDate, Utc};
use journey_relay_core::envelope::{DailyGoalAchieved, EventEnvelope, JourneyDistance};
use journey_relay_core::environment::Clock;
use journey_relay_core::ledger::{JourneyFact, RewardLedger};
use journey_relay_core::outbox::{OutboxLedger, OutboxWriter, PendingEvents};
use journey_relay_core::store::StoreError;
use journey_relay_core::types::{Distance, JourneyId, UserId, day_of};
use metrics::counter;
use std::sync::Arc;

/// Daily goal used when none is configured.
pub const DEFAULT_DAILY_GOAL: Distance = Distance::from_km(20);

/// Lowest daily goal the service accepts.
pub const MIN_DAILY_GOAL: Distance = Distance::from_km(20);

/// A change to one `(user, day)` bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BucketDelta {
    user_id: UserId,
    day: NaiveDate,
    delta: Distance,
}

/// Which event carried a distance to [`RewardEngine::record_distance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sighting {
    /// `JourneyCreated`: always the first event of a journey.
    Created,
    /// `JourneyUpdated`.
    Updated,
}

impl Sighting {
    /// The event type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "JourneyCreated",
            Self::Updated => "JourneyUpdated",
        }
    }
}

/// Why a change must not be applied on top of `fact`, if it must not.
fn stale_reason(
    fact: &JourneyFact,
    sighting: Sighting,
    occurred_at: DateTime<Utc>,
) -> Option<&'static str> {
    if fact.deleted {
        Some("journey deleted")
    } else if sighting == Sighting::Created {
        Some("journey already seen")
    } else if occurred_at < fact.last_occurred_at {
        Some("newer change already applied")
    } else {
        None
    }
}

fn ignore_stale(journey_id: JourneyId, event_type: &'static str, reason: &'static str) {
    counter!("rewards_stale_events_total", "event_type" => event_type).increment(1);
    tracing::debug!(%journey_id, event_type, reason, "Ignoring out-of-order journey event");
}

/// Goal envelopes raised while applying one event.
#[derive(Debug, Default)]
struct GoalEvents(Vec<EventEnvelope>);

impl PendingEvents for GoalEvents {
    fn pending_events(&self) -> &[EventEnvelope] {
        &self.0
    }

    fn clear_pending_events(&mut self) {
        self.0.clear();
    }
}

/// Per-user daily distance aggregator.
#[derive(Clone)]
pub struct RewardEngine {
    daily_goal: Distance,
    clock: Arc<dyn Clock>,
}

impl RewardEngine {
    /// Create an engine granting at `daily_goal`.
    #[must_use]
    pub fn new(daily_goal: Distance, clock: Arc<dyn Clock>) -> Self {
        Self { daily_goal, clock }
    }

    /// The threshold.
    #[must_use]
    pub const fn daily_goal(&self) -> Distance {
        self.daily_goal
    }

    /// `true` when `total` is at or above the goal.
    #[must_use]
    pub fn reached(&self, total: Distance) -> bool {
        total >= self.daily_goal
    }

    /// Apply a `JourneyCreated` or `JourneyUpdated` payload that occurred at
    /// `occurred_at`.
    ///
    /// Returns the grant if this change crossed the goal. Changes that lost a
    /// race against newer history are ignored: a create for a journey already
    /// seen, an update older than the last applied event, and anything for a
    /// deleted journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if a ledger read or write fails; the caller's
    /// transaction must then be abandoned.
    pub async fn record_distance<Tx>(
        &self,
        tx: &mut Tx,
        journey: &JourneyDistance,
        sighting: Sighting,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<DailyGoalAchieved>, StoreError>
    where
        Tx: RewardLedger + OutboxLedger,
    {
        let day = day_of(journey.start_time);
        let previous = tx.journey_fact(journey.journey_id).await?;
        if let Some(reason) = previous
            .as_ref()
            .and_then(|fact| stale_reason(fact, sighting, occurred_at))
        {
            ignore_stale(journey.journey_id, sighting.as_str(), reason);
            return Ok(None);
        }

        let deltas = match previous {
            None => vec![BucketDelta {
                user_id: journey.user_id,
                day,
                delta: journey.distance_km,
            }],
            Some(previous) if previous.user_id == journey.user_id && previous.day == day => {
                vec![BucketDelta {
                    user_id: journey.user_id,
                    day,
                    delta: journey.distance_km - previous.distance,
                }]
            },
            Some(previous) => {
                tracing::debug!(
                    journey_id = %journey.journey_id,
                    from_day = %previous.day,
                    to_day = %day,
                    "Journey moved between buckets"
                );
                vec![
                    BucketDelta {
                        user_id: previous.user_id,
                        day: previous.day,
                        delta: -previous.distance,
                    },
                    BucketDelta {
                        user_id: journey.user_id,
                        day,
                        delta: journey.distance_km,
                    },
                ]
            },
        };

        tx.save_journey_fact(&JourneyFact {
            journey_id: journey.journey_id,
            user_id: journey.user_id,
            day,
            distance: journey.distance_km,
            last_occurred_at: occurred_at,
            deleted: false,
        })
        .await?;

        self.apply_deltas(tx, journey.journey_id, deltas).await
    }

    /// Apply a `JourneyDeleted` payload that occurred at `occurred_at`.
    ///
    /// Subtracts the journey's last known contribution and leaves a
    /// tombstone behind, so a create or update delivered after the delete
    /// is ignored. A grant already made for that day stays in place.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if a ledger read or write fails.
    pub async fn remove_journey<Tx>(
        &self,
        tx: &mut Tx,
        journey: &JourneyDistance,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError>
    where
        Tx: RewardLedger + OutboxLedger,
    {
        let previous = tx.journey_fact(journey.journey_id).await?;
        if previous.as_ref().is_some_and(|fact| fact.deleted) {
            ignore_stale(journey.journey_id, "JourneyDeleted", "already deleted");
            return Ok(());
        }

        let tombstone = JourneyFact {
            journey_id: journey.journey_id,
            user_id: previous.as_ref().map_or(journey.user_id, |fact| fact.user_id),
            day: previous.as_ref().map_or_else(|| day_of(journey.start_time), |fact| fact.day),
            distance: Distance::ZERO,
            last_occurred_at: previous
                .as_ref()
                .map_or(occurred_at, |fact| fact.last_occurred_at.max(occurred_at)),
            deleted: true,
        };
        tx.save_journey_fact(&tombstone).await?;

        let Some(previous) = previous else {
            tracing::debug!(
                journey_id = %journey.journey_id,
                "Deleted journey was never counted, nothing to subtract"
            );
            return Ok(());
        };

        self.apply_deltas(
            tx,
            journey.journey_id,
            vec![BucketDelta {
                user_id: previous.user_id,
                day: previous.day,
                delta: -previous.distance,
            }],
        )
        .await?;
        Ok(())
    }

    /// Lock buckets in `(user, day)` order so two engines moving journeys in
    /// opposite directions cannot wait on each other.
    async fn apply_deltas<Tx>(
        &self,
        tx: &mut Tx,
        journey_id: JourneyId,
        mut deltas: Vec<BucketDelta>,
    ) -> Result<Option<DailyGoalAchieved>, StoreError>
    where
        Tx: RewardLedger + OutboxLedger,
    {
        deltas.sort_by_key(|d| (d.user_id, d.day));

        let mut grant = None;
        for d in deltas {
            if let Some(goal) = self.apply_delta(tx, d.user_id, d.day, d.delta, journey_id).await? {
                grant = Some(goal);
            }
        }
        Ok(grant)
    }

    /// Add `delta` to the `(user, day)` total under its row lock.
    ///
    /// A grant fires only when the bucket was not yet granted, the total
    /// before was under the goal and the total after is at or above it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lock, the save or the outbox append fails.
    pub async fn apply_delta<Tx>(
        &self,
        tx: &mut Tx,
        user_id: UserId,
        day: NaiveDate,
        delta: Distance,
        journey_id: JourneyId,
    ) -> Result<Option<DailyGoalAchieved>, StoreError>
    where
        Tx: RewardLedger + OutboxLedger,
    {
        let mut aggregate = tx.lock_daily_total(user_id, day).await?;
        let before = aggregate.total;
        let after = (before + delta).clamp_at_zero();
        aggregate.total = after;

        let crossed = !aggregate.reward_granted && !self.reached(before) && self.reached(after);
        let grant = crossed.then(|| DailyGoalAchieved {
            journey_id,
            user_id,
            date: day,
            total_distance_km: after,
        });
        if grant.is_some() {
            aggregate.reward_granted = true;
            aggregate.triggering_journey_id = Some(journey_id);
        }

        tx.save_daily_total(&aggregate).await?;

        tracing::debug!(
            user_id = %user_id,
            day = %day,
            before = %before,
            after = %after,
            granted = aggregate.reward_granted,
            "Daily total updated"
        );

        if let Some(goal) = &grant {
            let mut events = GoalEvents(vec![EventEnvelope::daily_goal(
                goal.clone(),
                self.clock.now(),
            )]);
            OutboxWriter::commit(tx, &mut [&mut events]).await?;
            tracing::info!(
                user_id = %user_id,
                day = %day,
                journey_id = %journey_id,
                total = %after,
                "Daily goal reached"
            );
        }

        Ok(grant)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::TimeZone;
    use journey_relay_core::envelope::{EventType, JourneyEvent};
    use journey_relay_core::store::{TransactionalStore, UnitOfWork};
    use journey_relay_testing::{InMemoryStore, test_clock};

    fn engine() -> RewardEngine {
        RewardEngine::new(DEFAULT_DAILY_GOAL, Arc::new(test_clock()))
    }

    fn journey(user_id: UserId, hour: u32, hundredths: i64) -> JourneyDistance {
        JourneyDistance {
            journey_id: JourneyId::new(),
            user_id,
            start_time: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
            distance_km: Distance::from_hundredths(hundredths),
        }
    }

    /// When an event happened: minutes after noon on the journey's day.
    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap()
    }

    async fn record_at(
        store: &InMemoryStore,
        j: &JourneyDistance,
        sighting: Sighting,
        occurred_at: DateTime<Utc>,
    ) -> Option<DailyGoalAchieved> {
        let mut tx = store.begin().await.unwrap();
        let grant = engine().record_distance(&mut tx, j, sighting, occurred_at).await.unwrap();
        tx.commit().await.unwrap();
        grant
    }

    async fn record(store: &InMemoryStore, j: &JourneyDistance) -> Option<DailyGoalAchieved> {
        record_at(store, j, Sighting::Created, at(0)).await
    }

    async fn remove_at(store: &InMemoryStore, j: &JourneyDistance, occurred_at: DateTime<Utc>) {
        let mut tx = store.begin().await.unwrap();
        engine().remove_journey(&mut tx, j, occurred_at).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn granted_for(hundredths: i64) -> bool {
        let store = InMemoryStore::new();
        record(&store, &journey(UserId::new(), 9, hundredths)).await.is_some()
    }

    #[tokio::test]
    async fn goal_boundary_is_inclusive() {
        assert!(!granted_for(1999).await);
        assert!(granted_for(2000).await);
        assert!(granted_for(2001).await);
    }

    #[tokio::test]
    async fn grant_writes_one_goal_event_to_the_outbox() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let j = journey(user, 9, 2500);

        let goal = record(&store, &j).await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.outbox.len(), 1);
        assert_eq!(state.outbox[0].event_type, EventType::JourneyDailyGoalAchieved.as_str());
        let envelope = EventEnvelope::from_json(state.outbox[0].payload.as_bytes()).unwrap();
        assert_eq!(envelope.event, JourneyEvent::DailyGoalAchieved(goal.clone()));
        assert_eq!(goal.total_distance_km, Distance::from_hundredths(2500));
        assert_eq!(goal.journey_id, j.journey_id);
    }

    #[tokio::test]
    async fn same_bucket_update_applies_the_difference() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut j = journey(user, 9, 1200);
        record(&store, &j).await;

        j.distance_km = Distance::from_hundredths(800);
        record_at(&store, &j, Sighting::Updated, at(5)).await;

        let state = store.snapshot().await;
        let day = day_of(j.start_time);
        assert_eq!(state.daily_totals[&(user, day)].total, Distance::from_hundredths(800));
        let fact = &state.journey_facts[&j.journey_id];
        assert_eq!(fact.distance, Distance::from_hundredths(800));
        assert_eq!(fact.last_occurred_at, at(5));
    }

    #[tokio::test]
    async fn moved_journey_leaves_its_old_day() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut j = journey(user, 23, 1500);
        let old_day = day_of(j.start_time);
        record(&store, &j).await;

        j.start_time = Utc.with_ymd_and_hms(2025, 3, 2, 0, 30, 0).unwrap();
        record_at(&store, &j, Sighting::Updated, at(5)).await;

        let state = store.snapshot().await;
        let new_day = day_of(j.start_time);
        assert_eq!(state.daily_totals[&(user, old_day)].total, Distance::ZERO);
        assert_eq!(state.daily_totals[&(user, new_day)].total, Distance::from_hundredths(1500));
        assert_eq!(state.journey_facts[&j.journey_id].day, new_day);
    }

    #[tokio::test]
    async fn update_older_than_the_applied_one_is_ignored() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut j = journey(user, 9, 1200);
        record(&store, &j).await;

        j.distance_km = Distance::from_hundredths(800);
        record_at(&store, &j, Sighting::Updated, at(10)).await;
        j.distance_km = Distance::from_hundredths(2500);
        let grant = record_at(&store, &j, Sighting::Updated, at(5)).await;

        assert_eq!(grant, None);
        let state = store.snapshot().await;
        let day = day_of(j.start_time);
        assert_eq!(state.daily_totals[&(user, day)].total, Distance::from_hundredths(800));
        assert_eq!(state.journey_facts[&j.journey_id].last_occurred_at, at(10));
        assert!(state.outbox.is_empty());
    }

    #[tokio::test]
    async fn create_arriving_after_an_update_is_ignored() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut j = journey(user, 9, 2500);
        let updated = record_at(&store, &j, Sighting::Updated, at(10)).await;

        j.distance_km = Distance::from_hundredths(1000);
        let created = record_at(&store, &j, Sighting::Created, at(0)).await;

        assert!(updated.is_some());
        assert_eq!(created, None);
        let state = store.snapshot().await;
        let day = day_of(j.start_time);
        assert_eq!(state.daily_totals[&(user, day)].total, Distance::from_hundredths(2500));
        assert_eq!(state.journey_facts[&j.journey_id].distance, Distance::from_hundredths(2500));
    }

    #[tokio::test]
    async fn delete_leaves_a_tombstone_that_outlives_later_updates() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut j = journey(user, 9, 1200);
        record(&store, &j).await;
        remove_at(&store, &j, at(10)).await;

        j.distance_km = Distance::from_hundredths(3000);
        let grant = record_at(&store, &j, Sighting::Updated, at(20)).await;

        assert_eq!(grant, None);
        let state = store.snapshot().await;
        let day = day_of(j.start_time);
        assert_eq!(state.daily_totals[&(user, day)].total, Distance::ZERO);
        let fact = &state.journey_facts[&j.journey_id];
        assert!(fact.deleted);
        assert_eq!(fact.distance, Distance::ZERO);
        assert_eq!(fact.last_occurred_at, at(10));
    }

    #[tokio::test]
    async fn delete_of_unseen_journey_only_leaves_a_tombstone() {
        let store = InMemoryStore::new();
        let j = journey(UserId::new(), 9, 1000);

        remove_at(&store, &j, at(10)).await;

        let state = store.snapshot().await;
        assert!(state.daily_totals.is_empty());
        let fact = &state.journey_facts[&j.journey_id];
        assert!(fact.deleted);
        assert_eq!(fact.day, day_of(j.start_time));
        assert_eq!(fact.distance, Distance::ZERO);
    }

    #[tokio::test]
    async fn total_never_goes_below_zero() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let mut tx = store.begin().await.unwrap();
        engine()
            .apply_delta(&mut tx, user, day, Distance::from_km(-5), JourneyId::new())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.snapshot().await.daily_totals[&(user, day)].total, Distance::ZERO);
    }

    #[test]
    fn staleness_follows_tombstone_then_sighting_then_time() {
        let fact = JourneyFact {
            journey_id: JourneyId::new(),
            user_id: UserId::new(),
            day: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            distance: Distance::from_km(3),
            last_occurred_at: at(10),
            deleted: false,
        };

        assert_eq!(stale_reason(&fact, Sighting::Updated, at(10)), None);
        assert_eq!(stale_reason(&fact, Sighting::Updated, at(11)), None);
        assert!(stale_reason(&fact, Sighting::Updated, at(9)).is_some());
        assert!(stale_reason(&fact, Sighting::Created, at(11)).is_some());

        let tombstone = JourneyFact { deleted: true, ..fact };
        assert!(stale_reason(&tombstone, Sighting::Updated, at(30)).is_some());
    }
}
