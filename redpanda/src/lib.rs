//! Redpanda broker binding for Journey Relay.
//!
//! Implements the [`EventBus`] port from `journey-relay-core` on top of rdkafka,
//! so it works against Redpanda or any other Kafka-compatible cluster.
//!
//! # Topology
//!
//! ```text
//!  outbox publisher                               inbox consumer (group = service)
//!  ┌────────────────────┐                        ┌──────────────────────────┐
//!  │ key = journey id   │     journey-events     │ skip other event types   │
//!  │ message-id         │ ─────────────────────► │ one delivery in flight   │
//!  │ event-type         │                        │ ack  → commit offset     │
//!  └────────────────────┘                        │ nack → hand out again    │
//!                                                └──────────────────────────┘
//! ```
//!
//! Every event goes to one shared topic. The record key is the message's
//! partition key (the journey id), so one journey's history lands on one
//! partition and is read back in publish order. The routing key travels in the
//! `event-type` header; a subscription commits past records whose type it did
//! not ask for.
//!
//! A service subscribes once, with every routing key it handles: two
//! subscriptions in one group would split the partitions between them.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - The producer runs with `acks=all` and idempotence enabled; `publish`
//!   resolves once the cluster has confirmed the write
//! - A subscription hands out one [`Delivery`] at a time and waits for it to be
//!   settled before reading the next record
//! - The offset is committed only after `ack` (or a non-requeueing `nack`)
//! - A requeueing `nack` hands the same record out again with `attempt + 1`
//! - If the process stops before the commit, the group re-reads the record
//!
//! # Example
//!
//! ```no_run
//! use journey_relay_core::event_bus::EventBus;
//! use journey_relay_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .topic("journey-events")
//!     .consumer_group("rewards")
//!     .build()?;
//!
//! let mut deliveries = event_bus
//!     .subscribe(&["JourneyCreated", "JourneyUpdated", "JourneyDeleted"])
//!     .await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     println!("{} #{}", delivery.message().id, delivery.attempt());
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use journey_relay_core::event_bus::{
    Acknowledgement, BrokerMessage, Delivery, DeliveryStream, EventBus, EventBusError,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Header carrying the message id.
pub const MESSAGE_ID_HEADER: &str = "message-id";

/// Header carrying the routing key.
pub const EVENT_TYPE_HEADER: &str = "event-type";

/// Topic used when none is configured.
pub const DEFAULT_TOPIC: &str = "journey-events";

/// Redpanda-backed [`EventBus`].
///
/// Holds one idempotent producer for the whole process; every call to
/// [`EventBus::subscribe`] creates its own consumer in the configured group.
///
/// # Example
///
/// ```no_run
/// use journey_relay_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::new("localhost:9092", "notifications")?;
///
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("notifications")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Confirmed-publish producer
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// The shared topic every event goes through
    topic: String,
    /// Bound on the wait for a publish confirmation
    timeout: Duration,
    /// Consumer group shared by every subscription of this service
    consumer_group: String,
    /// Where a new consumer group starts reading
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create an event bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str, consumer_group: &str) -> Result<Self, EventBusError> {
        Self::builder()
            .brokers(brokers)
            .consumer_group(consumer_group)
            .build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// The shared topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn header_value<'a, M: Message>(message: &'a M, name: &str) -> Option<&'a str>
where
    M::Headers: 'a,
{
    message
        .headers()?
        .iter()
        .find(|header| header.key == name)
        .and_then(|header| header.value)
        .and_then(|value| std::str::from_utf8(value).ok())
}

/// Rebuild the [`BrokerMessage`] a record was produced from.
///
/// Falls back to the record's coordinates for the id when the header is
/// missing. A record without an `event-type` header gets an empty routing key
/// and matches no subscription.
fn to_broker_message<M: Message>(message: &M) -> BrokerMessage {
    let id = header_value(message, MESSAGE_ID_HEADER).map_or_else(
        || format!("{}/{}/{}", message.topic(), message.partition(), message.offset()),
        str::to_string,
    );

    BrokerMessage {
        id,
        routing_key: header_value(message, EVENT_TYPE_HEADER)
            .unwrap_or_default()
            .to_string(),
        partition_key: message
            .key()
            .and_then(|key| std::str::from_utf8(key).ok())
            .unwrap_or_default()
            .to_string(),
        body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

/// Builder for a [`RedpandaEventBus`].
///
/// # Example
///
/// ```no_run
/// use journey_relay_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092")
///     .topic("journey-events")
///     .consumer_group("rewards")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// The shared topic every service publishes to and consumes from.
    ///
    /// Default: [`DEFAULT_TOPIC`]
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Bound on the wait for a publish confirmation.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group used by every subscription (one group per consuming service).
    ///
    /// Default: `"journey-relay"`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a group without committed offsets starts: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so a freshly deployed consumer still sees
    /// everything published before it first joined.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the event bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let bus = RedpandaEventBus {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            timeout,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "journey-relay".to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %bus.brokers,
            topic = %bus.topic,
            consumer_group = %bus.consumer_group,
            compression,
            "RedpandaEventBus created"
        );

        Ok(bus)
    }
}

fn commit(consumer: &StreamConsumer, record: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(record, CommitMode::Async) {
        tracing::warn!(
            topic = record.topic(),
            partition = record.partition(),
            offset = record.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let topic = self.topic.as_str();
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: MESSAGE_ID_HEADER,
                    value: Some(message.id.as_str()),
                })
                .insert(Header {
                    key: EVENT_TYPE_HEADER,
                    value: Some(message.routing_key.as_str()),
                });

            let record = FutureRecord::to(topic)
                .key(message.partition_key.as_str())
                .payload(&message.body)
                .headers(headers);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic,
                        partition,
                        offset,
                        message_id = %message.id,
                        partition_key = %message.partition_key,
                        "Message confirmed by broker"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic,
                        message_id = %message.id,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        routing_key: message.routing_key,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        routing_keys: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let routing_keys: Vec<String> = routing_keys.iter().map(|k| (*k).to_string()).collect();
        let topic = self.topic.clone();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    routing_keys: routing_keys.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| EventBusError::SubscriptionFailed {
                    routing_keys: routing_keys.clone(),
                    reason: format!("Failed to subscribe to topic: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                routing_keys = ?routing_keys,
                consumer_group = %consumer_group,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topic"
            );

            // Capacity 1 plus waiting on the settlement keeps one delivery in flight
            let (tx, mut rx) = tokio::sync::mpsc::channel(1);

            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        () = tx.closed() => break,
                        received = consumer.recv() => received,
                    };

                    let record = match received {
                        Ok(record) => record,
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        },
                    };

                    let message = to_broker_message(&record);
                    if !routing_keys.contains(&message.routing_key) {
                        tracing::trace!(
                            message_id = %message.id,
                            routing_key = %message.routing_key,
                            "Skipping event type this subscription did not ask for"
                        );
                        commit(&consumer, &record);
                        continue;
                    }

                    let mut attempt = 1;
                    let settled = loop {
                        let (delivery, decision) = Delivery::new(message.clone(), attempt);
                        if tx.send(Ok(delivery)).await.is_err() {
                            break None;
                        }
                        match decision.await {
                            Ok(Acknowledgement::Ack | Acknowledgement::Nack { requeue: false }) => {
                                break Some(());
                            },
                            Ok(Acknowledgement::Nack { requeue: true }) | Err(_) => {
                                if tx.is_closed() {
                                    break None;
                                }
                                attempt += 1;
                                tracing::debug!(
                                    message_id = %message.id,
                                    attempt,
                                    "Redelivering message"
                                );
                            },
                        }
                    };

                    // Unsettled at shutdown: leave the offset alone so the group re-reads it
                    if settled.is_none() {
                        break;
                    }

                    commit(&consumer, &record);
                }

                tracing::debug!("Consumer task exiting");
            });

            let deliveries = async_stream::stream! {
                while let Some(delivery) = rx.recv().await {
                    yield delivery;
                }
            };

            Ok(Box::pin(deliveries) as DeliveryStream)
        })
    }
}
