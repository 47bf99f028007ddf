//! The journey aggregate.
//!
//! Commands validate against the current [`JourneyRecord`], mutate it, and
//! raise one envelope per meaningful state change. Commands that change
//! nothing (favoriting twice, revoking a link that does not exist) raise
//! nothing. The raised envelopes stay pending until
//! [`OutboxWriter::commit`](journey_relay_core::outbox::OutboxWriter::commit)
//! persists them next to the record.

use crate::error::{JourneyError, Result};
use chrono::{DateTime, Utc};
use journey_relay_core::envelope::{
    EventEnvelope, JourneyDistance, JourneyEvent, JourneyFavorited, JourneyShared,
    JourneyUnfavorited, JourneyUnshared,
};
use journey_relay_core::ledger::JourneyRecord;
use journey_relay_core::outbox::PendingEvents;
use journey_relay_core::types::{Distance, JourneyId, PublicLinkId, UserId};
use std::collections::BTreeSet;

/// A journey plus the envelopes raised since it was loaded.
#[derive(Clone, Debug)]
pub struct Journey {
    record: JourneyRecord,
    deleted: bool,
    pending: Vec<EventEnvelope>,
}

impl Journey {
    /// Record a new journey and raise `JourneyCreated`.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::InvalidDistance`] for a negative distance.
    pub fn create(
        id: JourneyId,
        user_id: UserId,
        start_time: DateTime<Utc>,
        distance: Distance,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        validate_distance(distance)?;

        let mut journey = Self::from_record(JourneyRecord {
            id,
            user_id,
            start_time,
            distance,
            is_daily_goal_achieved: false,
            favorited_by: BTreeSet::new(),
            shared_with: BTreeSet::new(),
            public_link_id: None,
        });
        let payload = journey.distance_payload();
        journey.raise(JourneyEvent::Created(payload), now);
        Ok(journey)
    }

    /// Wrap a stored record; nothing is pending.
    #[must_use]
    pub const fn from_record(record: JourneyRecord) -> Self {
        Self {
            record,
            deleted: false,
            pending: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn record(&self) -> &JourneyRecord {
        &self.record
    }

    /// Journey id.
    #[must_use]
    pub const fn id(&self) -> JourneyId {
        self.record.id
    }

    /// `true` once [`Self::delete`] succeeded.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Change start time and/or distance. Raises `JourneyUpdated` only if
    /// either value changed.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotOwner`] unless `actor` owns the journey, or
    /// [`JourneyError::InvalidDistance`] for a negative distance.
    pub fn update(
        &mut self,
        actor: UserId,
        start_time: DateTime<Utc>,
        distance: Distance,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_owner(actor)?;
        validate_distance(distance)?;

        if self.record.start_time == start_time && self.record.distance == distance {
            return Ok(());
        }

        self.record.start_time = start_time;
        self.record.distance = distance;
        let payload = self.distance_payload();
        self.raise(JourneyEvent::Updated(payload), now);
        Ok(())
    }

    /// Delete the journey. `JourneyDeleted` carries the values as last stored so
    /// consumers can subtract them.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotOwner`] unless `actor` owns the journey.
    pub fn delete(&mut self, actor: UserId, now: DateTime<Utc>) -> Result<()> {
        self.require_owner(actor)?;

        self.deleted = true;
        let payload = self.distance_payload();
        self.raise(JourneyEvent::Deleted(payload), now);
        Ok(())
    }

    /// Add `user` to the favoriters.
    pub fn favorite(&mut self, user_id: UserId, now: DateTime<Utc>) {
        if self.record.favorited_by.insert(user_id) {
            self.raise(
                JourneyEvent::Favorited(JourneyFavorited {
                    journey_id: self.record.id,
                    user_id,
                    journey_owner_id: self.record.user_id,
                }),
                now,
            );
        }
    }

    /// Remove `user` from the favoriters.
    pub fn unfavorite(&mut self, user_id: UserId, now: DateTime<Utc>) {
        if self.record.favorited_by.remove(&user_id) {
            self.raise(
                JourneyEvent::Unfavorited(JourneyUnfavorited {
                    journey_id: self.record.id,
                    user_id,
                }),
                now,
            );
        }
    }

    /// Share directly with `friend`.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotOwner`] unless `actor` owns the journey, or
    /// [`JourneyError::ShareWithOwner`] when `friend` is the owner.
    pub fn share_with_user(
        &mut self,
        actor: UserId,
        friend: UserId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_owner(actor)?;
        if friend == self.record.user_id {
            return Err(JourneyError::ShareWithOwner(self.record.id));
        }

        if self.record.shared_with.insert(friend) {
            self.raise(
                JourneyEvent::Shared(JourneyShared {
                    owner_user_id: self.record.user_id,
                    journey_id: self.record.id,
                    actor_user_id: actor,
                    shared_with_user_id: Some(friend),
                    public_link_id: None,
                }),
                now,
            );
        }
        Ok(())
    }

    /// Create a public link, or return the active one.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotOwner`] unless `actor` owns the journey.
    pub fn share_public_link(&mut self, actor: UserId, now: DateTime<Utc>) -> Result<PublicLinkId> {
        self.require_owner(actor)?;
        if let Some(link) = self.record.public_link_id {
            return Ok(link);
        }

        let link = PublicLinkId::new();
        self.record.public_link_id = Some(link);
        self.raise(
            JourneyEvent::Shared(JourneyShared {
                owner_user_id: self.record.user_id,
                journey_id: self.record.id,
                actor_user_id: actor,
                shared_with_user_id: None,
                public_link_id: Some(link),
            }),
            now,
        );
        Ok(link)
    }

    /// Revoke the direct share with `friend`.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotOwner`] unless `actor` owns the journey.
    pub fn unshare_user(&mut self, actor: UserId, friend: UserId, now: DateTime<Utc>) -> Result<()> {
        self.require_owner(actor)?;

        if self.record.shared_with.remove(&friend) {
            self.raise(
                JourneyEvent::Unshared(JourneyUnshared {
                    journey_id: self.record.id,
                    revoked_by_user_id: actor,
                    public_link_id: None,
                    unshared_from_user_id: Some(friend),
                }),
                now,
            );
        }
        Ok(())
    }

    /// Revoke the active public link, if any.
    ///
    /// # Errors
    ///
    /// Returns [`JourneyError::NotOwner`] unless `actor` owns the journey.
    pub fn revoke_public_link(&mut self, actor: UserId, now: DateTime<Utc>) -> Result<()> {
        self.require_owner(actor)?;

        if let Some(link) = self.record.public_link_id.take() {
            self.raise(
                JourneyEvent::Unshared(JourneyUnshared {
                    journey_id: self.record.id,
                    revoked_by_user_id: actor,
                    public_link_id: Some(link),
                    unshared_from_user_id: None,
                }),
                now,
            );
        }
        Ok(())
    }

    /// Flag this journey as the one that earned its owner's daily goal.
    /// Returns `false` if it already was. Raises nothing: the flag is a
    /// projection of the rewards service's decision.
    pub fn mark_daily_goal_achieved(&mut self) -> bool {
        !std::mem::replace(&mut self.record.is_daily_goal_achieved, true)
    }

    fn require_owner(&self, actor: UserId) -> Result<()> {
        if actor == self.record.user_id {
            Ok(())
        } else {
            Err(JourneyError::NotOwner {
                journey_id: self.record.id,
                user_id: actor,
            })
        }
    }

    fn distance_payload(&self) -> JourneyDistance {
        JourneyDistance {
            journey_id: self.record.id,
            user_id: self.record.user_id,
            start_time: self.record.start_time,
            distance_km: self.record.distance,
        }
    }

    fn raise(&mut self, event: JourneyEvent, now: DateTime<Utc>) {
        self.pending.push(EventEnvelope::new(event, now));
    }
}

impl PendingEvents for Journey {
    fn pending_events(&self) -> &[EventEnvelope] {
        &self.pending
    }

    fn clear_pending_events(&mut self) {
        self.pending.clear();
    }
}

fn validate_distance(distance: Distance) -> Result<()> {
    if distance.is_negative() {
        return Err(JourneyError::InvalidDistance(distance));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use journey_relay_core::envelope::EventType;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn journey(owner: UserId) -> Journey {
        let mut journey =
            Journey::create(JourneyId::new(), owner, now(), Distance::from_km(5), now()).unwrap();
        journey.clear_pending_events();
        journey
    }

    fn types(journey: &Journey) -> Vec<EventType> {
        journey.pending_events().iter().map(EventEnvelope::event_type).collect()
    }

    #[test]
    fn create_raises_created_with_the_distance() {
        let owner = UserId::new();
        let journey =
            Journey::create(JourneyId::new(), owner, now(), Distance::from_hundredths(2001), now())
                .unwrap();

        let [envelope] = journey.pending_events() else {
            panic!("expected one envelope");
        };
        let JourneyEvent::Created(payload) = &envelope.event else {
            panic!("expected JourneyCreated");
        };
        assert_eq!(payload.user_id, owner);
        assert_eq!(payload.distance_km, Distance::from_hundredths(2001));
        assert_eq!(envelope.occurred_at, now());
    }

    #[test]
    fn negative_distance_is_refused() {
        let result = Journey::create(
            JourneyId::new(),
            UserId::new(),
            now(),
            Distance::from_hundredths(-1),
            now(),
        );
        assert!(matches!(result, Err(JourneyError::InvalidDistance(_))));
    }

    #[test]
    fn update_without_change_raises_nothing() {
        let owner = UserId::new();
        let mut journey = journey(owner);

        journey.update(owner, now(), Distance::from_km(5), now()).unwrap();
        assert!(journey.pending_events().is_empty());

        journey
            .update(owner, now() + TimeDelta::days(1), Distance::from_km(5), now())
            .unwrap();
        assert_eq!(types(&journey), vec![EventType::JourneyUpdated]);
    }

    #[test]
    fn only_the_owner_updates_or_deletes() {
        let owner = UserId::new();
        let stranger = UserId::new();
        let mut journey = journey(owner);

        let err = journey.update(stranger, now(), Distance::from_km(9), now()).unwrap_err();
        assert!(matches!(err, JourneyError::NotOwner { user_id, .. } if user_id == stranger));
        assert!(journey.delete(stranger, now()).is_err());
        assert!(!journey.is_deleted());
        assert!(journey.pending_events().is_empty());
    }

    #[test]
    fn delete_carries_the_last_stored_values() {
        let owner = UserId::new();
        let mut journey = journey(owner);

        journey.delete(owner, now()).unwrap();

        assert!(journey.is_deleted());
        let JourneyEvent::Deleted(payload) = &journey.pending_events()[0].event else {
            panic!("expected JourneyDeleted");
        };
        assert_eq!(payload.distance_km, Distance::from_km(5));
    }

    #[test]
    fn favoriting_twice_raises_once() {
        let owner = UserId::new();
        let fan = UserId::new();
        let mut journey = journey(owner);

        journey.favorite(fan, now());
        journey.favorite(fan, now());
        journey.unfavorite(fan, now());
        journey.unfavorite(fan, now());

        assert_eq!(
            types(&journey),
            vec![EventType::JourneyFavorited, EventType::JourneyUnfavorited]
        );
        let JourneyEvent::Favorited(favorited) = &journey.pending_events()[0].event else {
            panic!("expected JourneyFavorited");
        };
        assert_eq!(favorited.journey_owner_id, owner);
    }

    #[test]
    fn sharing_with_the_owner_is_refused() {
        let owner = UserId::new();
        let mut journey = journey(owner);

        let result = journey.share_with_user(owner, owner, now());
        assert_eq!(result, Err(JourneyError::ShareWithOwner(journey.id())));
    }

    #[test]
    fn direct_share_and_unshare_name_the_friend() {
        let owner = UserId::new();
        let friend = UserId::new();
        let mut journey = journey(owner);

        journey.share_with_user(owner, friend, now()).unwrap();
        journey.share_with_user(owner, friend, now()).unwrap();
        journey.unshare_user(owner, friend, now()).unwrap();

        assert_eq!(types(&journey), vec![EventType::JourneyShared, EventType::JourneyUnshared]);
        let JourneyEvent::Unshared(unshared) = &journey.pending_events()[1].event else {
            panic!("expected JourneyUnshared");
        };
        assert_eq!(unshared.unshared_from_user_id, Some(friend));
        assert_eq!(unshared.public_link_id, None);
    }

    #[test]
    fn public_link_is_reused_until_revoked() {
        let owner = UserId::new();
        let mut journey = journey(owner);

        let first = journey.share_public_link(owner, now()).unwrap();
        let again = journey.share_public_link(owner, now()).unwrap();
        assert_eq!(first, again);

        journey.revoke_public_link(owner, now()).unwrap();
        journey.revoke_public_link(owner, now()).unwrap();
        let fresh = journey.share_public_link(owner, now()).unwrap();
        assert_ne!(fresh, first);

        assert_eq!(
            types(&journey),
            vec![EventType::JourneyShared, EventType::JourneyUnshared, EventType::JourneyShared]
        );
    }

    #[test]
    fn goal_flag_is_set_once_without_events() {
        let mut journey = journey(UserId::new());

        assert!(journey.mark_daily_goal_achieved());
        assert!(!journey.mark_daily_goal_achieved());
        assert!(journey.record().is_daily_goal_achieved);
        assert!(journey.pending_events().is_empty());
    }
}
