//! Broker port used by the outbox publisher and the inbox consumer.
//!
//! Messages are routed by event type name. Publishing resolves only once the
//! broker has confirmed the write; subscribing yields [`Delivery`] values that
//! must be acknowledged (or rejected) one at a time.
//!
//! # Delivery semantics
//!
//! - **At-least-once**: a message may be delivered more than once; consumers
//!   de-duplicate by message id.
//! - **One in flight**: a subscription never hands out a second delivery while
//!   the previous one is unsettled.
//! - **Drop means retry**: a [`Delivery`] dropped without an explicit decision is
//!   treated as `nack(requeue = true)`.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `journey-relay-testing` - for tests
//! - `RedpandaEventBus` in `journey-relay-redpanda` - Kafka-compatible production binding
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut deliveries = event_bus.subscribe(&["JourneyCreated", "JourneyUpdated"]).await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     handle(delivery.message())?;
//!     delivery.ack();
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not confirm a publish
    #[error("Publish failed for routing key '{routing_key}': {reason}")]
    PublishFailed {
        /// The routing key of the rejected message
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to routing keys
    #[error("Subscription failed for {routing_keys:?}: {reason}")]
    SubscriptionFailed {
        /// The routing keys that failed to subscribe
        routing_keys: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroupError(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

/// A message as it travels through the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Message id; equal to the envelope id for messages produced by the outbox.
    pub id: String,
    /// Routing key (the event type name).
    pub routing_key: String,
    /// Ordering key; messages sharing it keep their publish order. The journey
    /// id for journey events.
    pub partition_key: String,
    /// Encoded envelope.
    pub body: Vec<u8>,
}

/// Settlement decision for a [`Delivery`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processed; do not deliver again.
    Ack,
    /// Not processed.
    Nack {
        /// Deliver the message again.
        requeue: bool,
    },
}

/// One delivered message awaiting settlement.
#[derive(Debug)]
pub struct Delivery {
    message: BrokerMessage,
    attempt: u32,
    settle: Option<oneshot::Sender<Acknowledgement>>,
}

impl Delivery {
    /// Create a delivery and the receiver the broker binding waits on.
    #[must_use]
    pub fn new(message: BrokerMessage, attempt: u32) -> (Self, oneshot::Receiver<Acknowledgement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                attempt,
                settle: Some(tx),
            },
            rx,
        )
    }

    /// The delivered message.
    #[must_use]
    pub const fn message(&self) -> &BrokerMessage {
        &self.message
    }

    /// How many times this message has been handed out, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Mark the message processed.
    pub fn ack(mut self) {
        self.settle(Acknowledgement::Ack);
    }

    /// Reject the message, optionally asking for redelivery.
    pub fn nack(mut self, requeue: bool) {
        self.settle(Acknowledgement::Nack { requeue });
    }

    fn settle(&mut self, decision: Acknowledgement) {
        if let Some(tx) = self.settle.take() {
            // The binding may already be gone (shutdown); nothing to report to.
            let _ = tx.send(decision);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.settle(Acknowledgement::Nack { requeue: true });
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for broker bindings.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so services can hold an `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish a message and wait for the broker's confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects the message
    /// or does not confirm it in time.
    fn publish(
        &self,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to a set of routing keys.
    ///
    /// Every subscription made with the same consumer group shares one queue;
    /// each group receives its own copy of every message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        routing_keys: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}
