//! Outbox publisher behaviour against the in-memory store and broker.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::{TimeDelta, Utc};
use journey_relay_core::envelope::{EventEnvelope, JourneyEvent, JourneyUnfavorited};
use journey_relay_core::outbox::{OutboxLedger, OutboxRecord, OutboxWriter, PendingEvents};
use journey_relay_core::store::{TransactionalStore, UnitOfWork};
use journey_relay_core::types::{JourneyId, UserId};
use journey_relay_runtime::config::PublisherConfig;
use journey_relay_runtime::publisher::{OutboxPublisher, PublishError, PublishReport};
use journey_relay_testing::{InMemoryEventBus, InMemoryStore, test_clock};
use std::sync::Arc;
use std::time::Duration;

struct Pending(Vec<EventEnvelope>);

impl PendingEvents for Pending {
    fn pending_events(&self) -> &[EventEnvelope] {
        &self.0
    }

    fn clear_pending_events(&mut self) {
        self.0.clear();
    }
}

fn unfavorited(minutes_ago: i64) -> EventEnvelope {
    EventEnvelope::new(
        JourneyEvent::Unfavorited(JourneyUnfavorited {
            journey_id: JourneyId::new(),
            user_id: UserId::new(),
        }),
        Utc::now() - TimeDelta::minutes(minutes_ago),
    )
}

async fn write_outbox(store: &InMemoryStore, envelopes: Vec<EventEnvelope>) {
    let mut pending = Pending(envelopes);
    let mut tx = store.begin().await.unwrap();
    OutboxWriter::commit(&mut tx, &mut [&mut pending]).await.unwrap();
    tx.commit().await.unwrap();
}

fn publisher(store: &InMemoryStore, bus: &InMemoryEventBus, batch_size: usize) -> OutboxPublisher<InMemoryStore> {
    OutboxPublisher::new(
        "test",
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        Arc::new(test_clock()),
        PublisherConfig {
            batch_size,
            poll_interval: Duration::from_millis(5),
            retry_delay: Duration::from_millis(5),
            ..PublisherConfig::default()
        },
    )
}

#[tokio::test]
async fn publishes_oldest_first_and_marks_processed() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let newer = unfavorited(1);
    let older = unfavorited(10);
    write_outbox(&store, vec![newer.clone(), older.clone()]).await;

    let report = publisher(&store, &bus, 100).publish_pending().await.unwrap();

    assert_eq!(report, PublishReport { claimed: 2, published: 2 });
    let ids: Vec<_> = bus.published().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![older.id.to_string(), newer.id.to_string()]);
    assert!(store.snapshot().await.pending_outbox().is_empty());
}

#[tokio::test]
async fn message_carries_routing_key_and_envelope() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let envelope = unfavorited(0);
    write_outbox(&store, vec![envelope.clone()]).await;

    publisher(&store, &bus, 100).publish_pending().await.unwrap();

    let message = &bus.published()[0];
    assert_eq!(message.routing_key, "JourneyUnfavorited");
    assert_eq!(EventEnvelope::from_json(&message.body).unwrap(), envelope);
}

#[tokio::test]
async fn unconfirmed_publish_keeps_the_rest_of_the_batch_pending() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let (first, second, third) = (unfavorited(3), unfavorited(2), unfavorited(1));
    write_outbox(&store, vec![first.clone(), second.clone(), third.clone()]).await;
    bus.reject_message(second.id.to_string());

    let publisher = publisher(&store, &bus, 100);
    let err = publisher.publish_pending().await.unwrap_err();

    assert!(matches!(err, PublishError::Broker { published: 1, .. }));
    let pending: Vec<_> = store.snapshot().await.pending_outbox().iter().map(|r| r.id).collect();
    assert_eq!(pending, vec![second.id, third.id]);

    bus.accept_message(&second.id.to_string());
    let report = publisher.publish_pending().await.unwrap();
    assert_eq!(report, PublishReport { claimed: 2, published: 2 });
    assert!(store.snapshot().await.pending_outbox().is_empty());
    assert_eq!(bus.published().first().map(|m| m.id.clone()), Some(first.id.to_string()));
}

#[tokio::test]
async fn broker_outage_marks_nothing() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    write_outbox(&store, vec![unfavorited(0)]).await;
    bus.fail_next_publishes(1);

    let publisher = publisher(&store, &bus, 100);
    assert!(publisher.publish_pending().await.is_err());
    assert_eq!(store.snapshot().await.pending_outbox().len(), 1);

    assert_eq!(publisher.publish_pending().await.unwrap().published, 1);
}

#[tokio::test]
async fn batch_size_limits_one_tick() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    write_outbox(&store, (0..5).map(unfavorited).collect()).await;

    let report = publisher(&store, &bus, 2).publish_pending().await.unwrap();

    assert_eq!(report, PublishReport { claimed: 2, published: 2 });
    assert_eq!(store.snapshot().await.pending_outbox().len(), 3);
}

#[tokio::test]
async fn purge_removes_only_old_processed_rows() {
    let store = InMemoryStore::new();
    let clock_now = {
        use journey_relay_core::environment::Clock;
        test_clock().now()
    };
    let mut tx = store.begin().await.unwrap();
    let old = OutboxRecord {
        occurred_at: clock_now - TimeDelta::days(30),
        processed: true,
        ..OutboxRecord::from_envelope(&unfavorited(0)).unwrap()
    };
    let old_pending = OutboxRecord {
        occurred_at: clock_now - TimeDelta::days(30),
        ..OutboxRecord::from_envelope(&unfavorited(0)).unwrap()
    };
    let recent = OutboxRecord {
        occurred_at: clock_now - TimeDelta::days(1),
        processed: true,
        ..OutboxRecord::from_envelope(&unfavorited(0)).unwrap()
    };
    tx.append_outbox(&[old, old_pending.clone(), recent.clone()]).await.unwrap();
    tx.commit().await.unwrap();

    let removed = publisher(&store, &InMemoryEventBus::new(), 100)
        .purge_expired()
        .await
        .unwrap();

    assert_eq!(removed, 1);
    let ids: Vec<_> = store.snapshot().await.outbox.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![old_pending.id, recent.id]);
}

#[tokio::test]
async fn run_drains_outbox_until_shutdown() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    write_outbox(&store, vec![unfavorited(2), unfavorited(1)]).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(publisher(&store, &bus, 100).run(shutdown_rx));

    for _ in 0..200 {
        if bus.published().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("publisher should stop on shutdown")
        .unwrap();

    assert_eq!(bus.published().len(), 2);
    assert!(store.snapshot().await.pending_outbox().is_empty());
}
