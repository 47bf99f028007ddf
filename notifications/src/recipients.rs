//! Recipient resolution.
//!
//! | Event | Recipients |
//! |---|---|
//! | `JourneyUpdated` / `JourneyDeleted` | users who favorited the journey |
//! | `JourneyFavorited` | the owner (unless they favorited it themselves) and the actor |
//! | `JourneyUnfavorited` | the actor |
//! | `JourneyShared` / `JourneyUnshared` | the shared-with user; public links reach nobody |
//! | `JourneyDailyGoalAchieved` | the user who earned it |
//!
//! Favorite and share changes are mirrored into the local ledger in the same
//! pass, so later resolutions never call another service. Owners and
//! direct-share recipients are deliberately not told about edits.

use journey_relay_core::envelope::{EventType, JourneyEvent};
use journey_relay_core::ledger::RecipientLedger;
use journey_relay_core::store::StoreError;
use journey_relay_core::types::{JourneyId, UserId};
use serde::{Deserialize, Serialize};

/// One message for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Who receives it.
    pub recipient: UserId,
    /// What happened.
    pub event_type: EventType,
    /// The journey it is about.
    pub journey_id: JourneyId,
    /// Human-readable text.
    pub message: String,
}

impl Notification {
    fn new(recipient: UserId, event: &JourneyEvent, message: impl Into<String>) -> Self {
        Self {
            recipient,
            event_type: event.event_type(),
            journey_id: event.journey_id(),
            message: message.into(),
        }
    }
}

/// Event types that also go out by e-mail when the recipient is offline.
#[must_use]
pub const fn fallback_eligible(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::JourneyShared
            | EventType::JourneyDailyGoalAchieved
            | EventType::JourneyFavorited
            | EventType::JourneyUpdated
            | EventType::JourneyDeleted
    )
}

/// Mirror relationship changes and work out who hears about `event`.
///
/// For `JourneyDeleted` the favoriters are read before the journey's mirrors
/// are purged.
///
/// # Errors
///
/// Returns a [`StoreError`] if the ledger fails; the caller's transaction
/// must then be abandoned.
pub async fn resolve<Tx>(tx: &mut Tx, event: &JourneyEvent) -> Result<Vec<Notification>, StoreError>
where
    Tx: RecipientLedger,
{
    let notifications = match event {
        JourneyEvent::Created(_) => Vec::new(),
        JourneyEvent::Updated(journey) => tx
            .favoriters(journey.journey_id)
            .await?
            .into_iter()
            .map(|user| Notification::new(user, event, "A journey you favorited was updated"))
            .collect(),
        JourneyEvent::Deleted(journey) => {
            let favoriters = tx.favoriters(journey.journey_id).await?;
            tx.purge_journey(journey.journey_id).await?;
            favoriters
                .into_iter()
                .map(|user| Notification::new(user, event, "A journey you favorited was deleted"))
                .collect()
        },
        JourneyEvent::Favorited(favorite) => {
            tx.upsert_favorite(favorite.journey_id, favorite.user_id, favorite.journey_owner_id)
                .await?;
            let mut notifications = Vec::with_capacity(2);
            if favorite.journey_owner_id != favorite.user_id {
                notifications.push(Notification::new(
                    favorite.journey_owner_id,
                    event,
                    "Someone favorited your journey",
                ));
            }
            notifications.push(Notification::new(
                favorite.user_id,
                event,
                "Journey added to your favorites",
            ));
            notifications
        },
        JourneyEvent::Unfavorited(unfavorite) => {
            tx.remove_favorite(unfavorite.journey_id, unfavorite.user_id).await?;
            vec![Notification::new(
                unfavorite.user_id,
                event,
                "Journey removed from your favorites",
            )]
        },
        JourneyEvent::Shared(share) => match share.shared_with_user_id {
            Some(friend) => {
                tx.upsert_share(share.journey_id, share.owner_user_id, friend).await?;
                vec![Notification::new(friend, event, "A journey was shared with you")]
            },
            None => Vec::new(),
        },
        JourneyEvent::Unshared(unshare) => match unshare.unshared_from_user_id {
            Some(friend) => {
                tx.remove_share(unshare.journey_id, friend).await?;
                vec![Notification::new(friend, event, "A journey is no longer shared with you")]
            },
            None => Vec::new(),
        },
        JourneyEvent::DailyGoalAchieved(goal) => vec![Notification::new(
            goal.user_id,
            event,
            format!(
                "You reached your daily goal on {} with {} km",
                goal.date, goal.total_distance_km
            ),
        )],
    };

    Ok(notifications)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use journey_relay_core::envelope::{
        JourneyDistance, JourneyFavorited, JourneyShared, JourneyUnshared,
    };
    use journey_relay_core::store::TransactionalStore;
    use journey_relay_core::types::{Distance, PublicLinkId};
    use journey_relay_testing::InMemoryStore;

    fn recipients(notifications: &[Notification]) -> Vec<UserId> {
        notifications.iter().map(|n| n.recipient).collect()
    }

    #[test]
    fn unshare_and_unfavorite_never_fall_back() {
        assert!(!fallback_eligible(EventType::JourneyUnshared));
        assert!(!fallback_eligible(EventType::JourneyUnfavorited));
        assert!(!fallback_eligible(EventType::JourneyCreated));
        assert!(fallback_eligible(EventType::JourneyShared));
        assert!(fallback_eligible(EventType::JourneyDailyGoalAchieved));
    }

    #[tokio::test]
    async fn owner_favoriting_own_journey_hears_once() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let owner = UserId::new();
        let event = JourneyEvent::Favorited(JourneyFavorited {
            journey_id: JourneyId::new(),
            user_id: owner,
            journey_owner_id: owner,
        });

        let notifications = resolve(&mut tx, &event).await.unwrap();
        assert_eq!(recipients(&notifications), vec![owner]);
    }

    #[tokio::test]
    async fn favorite_reaches_owner_and_echoes_to_actor() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let (owner, fan) = (UserId::new(), UserId::new());
        let event = JourneyEvent::Favorited(JourneyFavorited {
            journey_id: JourneyId::new(),
            user_id: fan,
            journey_owner_id: owner,
        });

        let notifications = resolve(&mut tx, &event).await.unwrap();
        assert_eq!(recipients(&notifications), vec![owner, fan]);
        assert_eq!(tx.staged().favorites.len(), 1);
    }

    #[tokio::test]
    async fn public_link_changes_reach_nobody() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let journey_id = JourneyId::new();
        let owner = UserId::new();
        let link = PublicLinkId::new();

        let shared = JourneyEvent::Shared(JourneyShared {
            owner_user_id: owner,
            journey_id,
            actor_user_id: owner,
            shared_with_user_id: None,
            public_link_id: Some(link),
        });
        let unshared = JourneyEvent::Unshared(JourneyUnshared {
            journey_id,
            revoked_by_user_id: owner,
            public_link_id: Some(link),
            unshared_from_user_id: None,
        });

        assert!(resolve(&mut tx, &shared).await.unwrap().is_empty());
        assert!(resolve(&mut tx, &unshared).await.unwrap().is_empty());
        assert!(tx.staged().shares.is_empty());
    }

    #[tokio::test]
    async fn deleted_journey_notifies_favoriters_then_forgets_them() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let (journey_id, owner, fan, friend) =
            (JourneyId::new(), UserId::new(), UserId::new(), UserId::new());
        tx.upsert_favorite(journey_id, fan, owner).await.unwrap();
        tx.upsert_share(journey_id, owner, friend).await.unwrap();

        let event = JourneyEvent::Deleted(JourneyDistance {
            journey_id,
            user_id: owner,
            start_time: Utc::now(),
            distance_km: Distance::from_km(3),
        });
        let notifications = resolve(&mut tx, &event).await.unwrap();

        assert_eq!(recipients(&notifications), vec![fan]);
        assert!(tx.staged().favorites.is_empty());
        assert!(tx.staged().shares.is_empty());
    }
}
