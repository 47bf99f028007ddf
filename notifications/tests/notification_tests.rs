//! Notification fan-out end to end: broker delivery, inbox guard, recipient
//! resolution, dispatch policy. Runs against the in-memory store and mock
//! delivery ports.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::{NaiveDate, Utc};
use journey_relay_core::envelope::{
    DailyGoalAchieved, EventEnvelope, EventType, JourneyDistance, JourneyEvent, JourneyFavorited,
    JourneyShared, JourneyUnshared,
};
use journey_relay_core::event_bus::{Acknowledgement, Delivery};
use journey_relay_core::outbox::OutboxRecord;
use journey_relay_core::types::{Distance, JourneyId, UserId};
use journey_relay_notifications::mocks::{
    InMemoryContacts, RecordingLivePush, RecordingNotifier, StaticPresence,
};
use journey_relay_notifications::{Dispatcher, NotificationProcessor};
use journey_relay_runtime::config::ConsumerConfig;
use journey_relay_runtime::consumer::{Handled, InboxConsumer};
use journey_relay_testing::{InMemoryEventBus, InMemoryStore, RecordingDeadLetterSink, test_clock};
use std::sync::Arc;
use std::time::Duration;

type Processor =
    NotificationProcessor<RecordingLivePush, StaticPresence, InMemoryContacts, RecordingNotifier>;

struct Harness {
    store: InMemoryStore,
    live: RecordingLivePush,
    presence: StaticPresence,
    contacts: InMemoryContacts,
    mail: RecordingNotifier,
    consumer: InboxConsumer<InMemoryStore, Processor>,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let (live, presence, contacts, mail) = (
        RecordingLivePush::new(),
        StaticPresence::new(),
        InMemoryContacts::new(),
        RecordingNotifier::new(),
    );
    let dispatcher = Dispatcher::new(live.clone(), presence.clone(), contacts.clone(), mail.clone());
    let consumer = InboxConsumer::new(
        Arc::new(store.clone()),
        NotificationProcessor::new(dispatcher),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(RecordingDeadLetterSink::new()),
        Arc::new(test_clock()),
        ConsumerConfig {
            max_deliveries: 5,
            redelivery_delay: Duration::ZERO,
            reconnect_delay: Duration::from_millis(10),
        },
    );

    Harness {
        store,
        live,
        presence,
        contacts,
        mail,
        consumer,
    }
}

impl Harness {
    async fn deliver(&self, envelope: &EventEnvelope) -> Handled {
        let message = OutboxRecord::from_envelope(envelope).unwrap().to_message();
        let (delivery, settled) = Delivery::new(message, 1);
        let handled = self.consumer.handle_delivery(delivery).await;
        assert_eq!(settled.await.unwrap(), Acknowledgement::Ack);
        handled
    }

    async fn send(&self, event: JourneyEvent) -> EventEnvelope {
        let envelope = EventEnvelope::new(event, Utc::now());
        assert_eq!(self.deliver(&envelope).await, Handled::Applied);
        envelope
    }

    fn pushed_to(&self) -> Vec<UserId> {
        self.live.pushes().iter().map(|n| n.recipient).collect()
    }

    fn mailed_to(&self) -> Vec<String> {
        self.mail.sent().into_iter().map(|(contact, _)| contact.email).collect()
    }
}

fn favorited(journey_id: JourneyId, fan: UserId, owner: UserId) -> JourneyEvent {
    JourneyEvent::Favorited(JourneyFavorited {
        journey_id,
        user_id: fan,
        journey_owner_id: owner,
    })
}

fn shared(journey_id: JourneyId, owner: UserId, friend: UserId) -> JourneyEvent {
    JourneyEvent::Shared(JourneyShared {
        owner_user_id: owner,
        journey_id,
        actor_user_id: owner,
        shared_with_user_id: Some(friend),
        public_link_id: None,
    })
}

fn updated(journey_id: JourneyId, owner: UserId) -> JourneyEvent {
    JourneyEvent::Updated(JourneyDistance {
        journey_id,
        user_id: owner,
        start_time: Utc::now(),
        distance_km: Distance::from_hundredths(1234),
    })
}

/// Journey with one favoriter and one direct share, before any pushes.
async fn related_journey(h: &Harness) -> (JourneyId, UserId, UserId, UserId) {
    let (journey, owner, fan, friend) =
        (JourneyId::new(), UserId::new(), UserId::new(), UserId::new());
    for user in [owner, fan, friend] {
        h.presence.set_online(user);
    }
    h.send(favorited(journey, fan, owner)).await;
    h.send(shared(journey, owner, friend)).await;
    (journey, owner, fan, friend)
}

#[tokio::test]
async fn update_notifies_only_favoriters() {
    let h = harness();
    let (journey, owner, fan, friend) = related_journey(&h).await;
    let unrelated = UserId::new();
    let before = h.live.pushes().len();

    h.send(updated(journey, owner)).await;

    let all = h.pushed_to();
    let pushes = &all[before..];
    assert_eq!(pushes, &[fan]);
    assert!(!pushes.contains(&friend));
    assert!(!pushes.contains(&owner));
    assert!(!pushes.contains(&unrelated));
}

#[tokio::test]
async fn offline_favoriter_gets_push_and_email() {
    let h = harness();
    let (journey, owner, fan) = (JourneyId::new(), UserId::new(), UserId::new());
    h.presence.set_online(owner);
    h.contacts.insert(fan, "fan@example.com");
    h.send(favorited(journey, fan, owner)).await;
    let mails_before = h.mail.sent().len();

    h.send(updated(journey, owner)).await;

    assert_eq!(h.pushed_to().last(), Some(&fan));
    let mails = h.mailed_to();
    assert_eq!(&mails[mails_before..], &["fan@example.com".to_string()]);
}

#[tokio::test]
async fn online_favoriter_gets_push_only() {
    let h = harness();
    let (journey, owner, fan) = (JourneyId::new(), UserId::new(), UserId::new());
    h.presence.set_online(owner);
    h.presence.set_online(fan);
    h.contacts.insert(fan, "fan@example.com");
    h.send(favorited(journey, fan, owner)).await;

    h.send(updated(journey, owner)).await;

    assert_eq!(h.pushed_to().last(), Some(&fan));
    assert!(h.mail.sent().is_empty());
}

#[tokio::test]
async fn unshare_never_falls_back_to_email() {
    let h = harness();
    let (journey, owner, friend) = (JourneyId::new(), UserId::new(), UserId::new());
    h.contacts.insert(friend, "friend@example.com");

    h.send(shared(journey, owner, friend)).await;
    assert_eq!(h.mailed_to(), vec!["friend@example.com".to_string()]);

    h.send(JourneyEvent::Unshared(JourneyUnshared {
        journey_id: journey,
        revoked_by_user_id: owner,
        public_link_id: None,
        unshared_from_user_id: Some(friend),
    }))
    .await;

    assert_eq!(h.pushed_to(), vec![friend, friend]);
    assert_eq!(h.mail.sent().len(), 1);
    assert!(h.store.snapshot().await.shares.is_empty());
}

#[tokio::test]
async fn presence_outage_counts_as_offline() {
    let h = harness();
    let user = UserId::new();
    h.contacts.insert(user, "me@example.com");
    h.presence.set_failing(true);

    h.send(JourneyEvent::DailyGoalAchieved(DailyGoalAchieved {
        journey_id: JourneyId::new(),
        user_id: user,
        date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        total_distance_km: Distance::from_hundredths(2001),
    }))
    .await;

    assert_eq!(h.pushed_to(), vec![user]);
    let sent = h.mail.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.event_type, EventType::JourneyDailyGoalAchieved);
    assert!(sent[0].1.message.contains("20.01"));
}

#[tokio::test]
async fn delivery_failures_do_not_fail_the_event() {
    let h = harness();
    let (journey, owner, fan) = (JourneyId::new(), UserId::new(), UserId::new());
    h.contacts.insert(owner, "owner@example.com");
    h.live.set_failing(true);
    h.mail.set_failing(true);

    h.send(favorited(journey, fan, owner)).await;

    assert_eq!(h.pushed_to(), vec![owner, fan]);
    let state = h.store.snapshot().await;
    assert_eq!(state.favorites.len(), 1);
    assert_eq!(state.inbox.len(), 1);
}

#[tokio::test]
async fn redelivered_event_is_not_pushed_again() {
    let h = harness();
    let (journey, owner, fan) = (JourneyId::new(), UserId::new(), UserId::new());

    let envelope = h.send(favorited(journey, fan, owner)).await;
    assert_eq!(h.deliver(&envelope).await, Handled::Duplicate);

    assert_eq!(h.pushed_to(), vec![owner, fan]);
}

#[tokio::test]
async fn deleted_journey_notifies_favoriters_and_drops_mirrors() {
    let h = harness();
    let (journey, owner, fan, _) = related_journey(&h).await;
    let before = h.live.pushes().len();

    h.send(JourneyEvent::Deleted(JourneyDistance {
        journey_id: journey,
        user_id: owner,
        start_time: Utc::now(),
        distance_km: Distance::from_km(4),
    }))
    .await;

    assert_eq!(&h.pushed_to()[before..], &[fan]);
    let state = h.store.snapshot().await;
    assert!(state.favorites.is_empty());
    assert!(state.shares.is_empty());

    h.send(updated(journey, owner)).await;
    assert_eq!(h.live.pushes().len(), before + 1);
}
