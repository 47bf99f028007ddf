//! Per-service ledger ports, implemented on a store's transaction type.
//!
//! - [`RewardLedger`]: mirrored journey facts and daily aggregates (rewards)
//! - [`RecipientLedger`]: favourite and direct-share mirrors (notifications)
//! - [`JourneyLedger`]: journeys themselves (the originating service)

use crate::store::StoreError;
use crate::types::{Distance, JourneyId, PublicLinkId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::future::Future;

/// The reward service's last known view of a journey.
///
/// A deleted journey keeps its fact as a tombstone with a zero contribution,
/// so creates and updates arriving after the delete are recognised as stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JourneyFact {
    /// The journey.
    pub journey_id: JourneyId,
    /// Owner at the time of the last sighting.
    pub user_id: UserId,
    /// Bucket the contribution currently counts towards.
    pub day: NaiveDate,
    /// Current contribution.
    pub distance: Distance,
    /// `occurred_at` of the newest event applied to this fact.
    pub last_occurred_at: DateTime<Utc>,
    /// The journey was deleted; nothing counts for it any more.
    pub deleted: bool,
}

/// Running distance total for one user on one day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DailyAggregate {
    /// The user.
    pub user_id: UserId,
    /// The calendar day.
    pub day: NaiveDate,
    /// Sum of contributions, never below zero.
    pub total: Distance,
    /// Flips to `true` at most once.
    pub reward_granted: bool,
    /// Journey whose change triggered the grant; fixed once set.
    pub triggering_journey_id: Option<JourneyId>,
}

impl DailyAggregate {
    /// A bucket nobody has touched yet.
    #[must_use]
    pub const fn untouched(user_id: UserId, day: NaiveDate) -> Self {
        Self {
            user_id,
            day,
            total: Distance::ZERO,
            reward_granted: false,
            triggering_journey_id: None,
        }
    }
}

/// Reward engine storage.
pub trait RewardLedger: Send {
    /// Last known fact for a journey, held exclusively until the transaction
    /// ends even when no fact exists yet.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn journey_fact(
        &mut self,
        journey_id: JourneyId,
    ) -> impl Future<Output = Result<Option<JourneyFact>, StoreError>> + Send;

    /// Insert or replace a journey fact.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn save_journey_fact(
        &mut self,
        fact: &JourneyFact,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Load or create the aggregate for `(user, day)` and hold it exclusively
    /// until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if acquiring the lock deadlocked.
    fn lock_daily_total(
        &mut self,
        user_id: UserId,
        day: NaiveDate,
    ) -> impl Future<Output = Result<DailyAggregate, StoreError>> + Send;

    /// Persist an aggregate previously obtained from [`Self::lock_daily_total`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn save_daily_total(
        &mut self,
        aggregate: &DailyAggregate,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Relationship mirrors kept by the notification service.
pub trait RecipientLedger: Send {
    /// Remember that `user_id` favorited the journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn upsert_favorite(
        &mut self,
        journey_id: JourneyId,
        user_id: UserId,
        owner_id: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Forget a favorite.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn remove_favorite(
        &mut self,
        journey_id: JourneyId,
        user_id: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remember a direct share.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn upsert_share(
        &mut self,
        journey_id: JourneyId,
        owner_id: UserId,
        shared_with: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Forget a direct share.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn remove_share(
        &mut self,
        journey_id: JourneyId,
        shared_with: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Users who currently favorite the journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn favoriters(
        &mut self,
        journey_id: JourneyId,
    ) -> impl Future<Output = Result<Vec<UserId>, StoreError>> + Send;

    /// Drop every favorite and share of a deleted journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn purge_journey(
        &mut self,
        journey_id: JourneyId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A journey as the originating service stores it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JourneyRecord {
    /// The journey.
    pub id: JourneyId,
    /// Owner.
    pub user_id: UserId,
    /// Start of the journey (UTC).
    pub start_time: DateTime<Utc>,
    /// Distance travelled.
    pub distance: Distance,
    /// Set when this journey triggered its owner's daily goal.
    pub is_daily_goal_achieved: bool,
    /// Users who favorited it.
    pub favorited_by: BTreeSet<UserId>,
    /// Users it is shared with directly.
    pub shared_with: BTreeSet<UserId>,
    /// Active public link, if any.
    pub public_link_id: Option<PublicLinkId>,
}

/// Journey storage for the originating service.
pub trait JourneyLedger: Send {
    /// Load a journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn load_journey(
        &mut self,
        journey_id: JourneyId,
    ) -> impl Future<Output = Result<Option<JourneyRecord>, StoreError>> + Send;

    /// Insert or replace a journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn save_journey(
        &mut self,
        journey: &JourneyRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a journey.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn delete_journey(
        &mut self,
        journey_id: JourneyId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
