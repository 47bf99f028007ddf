//! Integration tests for [`RedpandaEventBus`] against a real Kafka-compatible broker.
//!
//! # Running These Tests
//!
//! Ignored by default: they need Docker (testcontainers) and take a while to
//! bring the broker up.
//!
//! ```bash
//! cargo test -p journey-relay-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use journey_relay_core::event_bus::{BrokerMessage, DeliveryStream, EventBus};
use journey_relay_redpanda::RedpandaEventBus;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn message(id: &str, routing_key: &str) -> BrokerMessage {
    journey_message(id, routing_key, "j-1")
}

fn journey_message(id: &str, routing_key: &str, journey: &str) -> BrokerMessage {
    BrokerMessage {
        id: id.to_string(),
        routing_key: routing_key.to_string(),
        partition_key: journey.to_string(),
        body: format!("{{\"id\":\"{id}\"}}").into_bytes(),
    }
}

async fn start_broker() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn event_bus(brokers: &str, group: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .topic("it-journey-events")
        .consumer_group(group)
        .build()
        .expect("Failed to create event bus")
}

/// Publish until the broker confirms; the first publishes also create the topic.
async fn publish_when_ready(bus: &RedpandaEventBus, message: &BrokerMessage) {
    for attempt in 1..=60 {
        if bus.publish(message).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "broker never confirmed {}", message.id);
    }
}

async fn next_message(stream: &mut DeliveryStream) -> journey_relay_core::event_bus::Delivery {
    tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timeout waiting for delivery")
        .expect("stream ended")
        .expect("delivery failed")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn published_message_arrives_with_id_and_routing_key() {
    let (_kafka, brokers) = start_broker().await;
    let bus = event_bus(&brokers, "round-trip");
    let sent = message("m-1", "JourneyCreated");

    publish_when_ready(&bus, &sent).await;
    let mut stream = bus.subscribe(&["JourneyCreated"]).await.expect("Failed to subscribe");

    let delivery = next_message(&mut stream).await;
    assert_eq!(delivery.message(), &sent);
    assert_eq!(delivery.attempt(), 1);
    delivery.ack();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn requeued_message_is_redelivered_before_the_next_one() {
    let (_kafka, brokers) = start_broker().await;
    let bus = event_bus(&brokers, "redelivery");

    publish_when_ready(&bus, &message("m-1", "JourneyUpdated")).await;
    publish_when_ready(&bus, &message("m-2", "JourneyUpdated")).await;
    let mut stream = bus.subscribe(&["JourneyUpdated"]).await.expect("Failed to subscribe");

    let first = next_message(&mut stream).await;
    assert_eq!(first.message().id, "m-1");
    first.nack(true);

    let again = next_message(&mut stream).await;
    assert_eq!(again.message().id, "m-1");
    assert_eq!(again.attempt(), 2);
    again.ack();

    let second = next_message(&mut stream).await;
    assert_eq!(second.message().id, "m-2");
    second.ack();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unacknowledged_message_is_read_again_by_the_group() {
    let (_kafka, brokers) = start_broker().await;
    let bus = event_bus(&brokers, "resume");
    publish_when_ready(&bus, &message("m-1", "JourneyDeleted")).await;

    {
        let mut stream = bus.subscribe(&["JourneyDeleted"]).await.expect("Failed to subscribe");
        let delivery = next_message(&mut stream).await;
        assert_eq!(delivery.message().id, "m-1");
        // Dropped without ack: the offset is not committed
    }
    tokio::time::sleep(Duration::from_secs(8)).await;

    let mut stream = bus.subscribe(&["JourneyDeleted"]).await.expect("Failed to resubscribe");
    let delivery = next_message(&mut stream).await;
    assert_eq!(delivery.message().id, "m-1");
    delivery.ack();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn one_journey_history_arrives_in_publish_order() {
    let (_kafka, brokers) = start_broker().await;
    let bus = event_bus(&brokers, "ordering");
    let history = [
        journey_message("m-1", "JourneyCreated", "j-7"),
        journey_message("m-2", "JourneyUpdated", "j-7"),
        journey_message("m-3", "JourneyUpdated", "j-7"),
        journey_message("m-4", "JourneyDeleted", "j-7"),
    ];

    for message in &history {
        publish_when_ready(&bus, message).await;
    }
    let mut stream = bus
        .subscribe(&["JourneyCreated", "JourneyUpdated", "JourneyDeleted"])
        .await
        .expect("Failed to subscribe");

    for expected in &history {
        let delivery = next_message(&mut stream).await;
        assert_eq!(delivery.message(), expected);
        delivery.ack();
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn subscription_skips_event_types_it_did_not_ask_for() {
    let (_kafka, brokers) = start_broker().await;
    let bus = event_bus(&brokers, "filtering");

    publish_when_ready(&bus, &journey_message("m-1", "JourneyShared", "j-1")).await;
    publish_when_ready(&bus, &journey_message("m-2", "JourneyCreated", "j-1")).await;
    let mut stream = bus.subscribe(&["JourneyCreated"]).await.expect("Failed to subscribe");

    let delivery = next_message(&mut stream).await;
    assert_eq!(delivery.message().id, "m-2");
    delivery.ack();
}
