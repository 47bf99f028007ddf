//! In-memory broker with routing-key fan-out and redelivery.

use async_stream::stream;
use journey_relay_core::event_bus::{
    Acknowledgement, BrokerMessage, Delivery, DeliveryStream, EventBus, EventBusError,
};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug)]
struct Subscription {
    routing_keys: Vec<String>,
    queue: mpsc::UnboundedSender<BrokerMessage>,
}

/// Broker double.
///
/// Every subscription gets its own queue and sees every later message whose
/// routing key it subscribed to. A requeueing nack (or a dropped delivery)
/// hands the same message out again with `attempt + 1` before anything else.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventBus {
    published: Arc<Mutex<Vec<BrokerMessage>>>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    failing_publishes: Arc<AtomicU32>,
    rejected_ids: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryEventBus {
    /// Create a broker with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every confirmed message, in publish order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test infrastructure; a poisoned lock means a test already panicked
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Refuse every publish of the message with this id until accepted again.
    #[allow(clippy::unwrap_used)] // Test infrastructure
    pub fn reject_message(&self, id: impl Into<String>) {
        self.rejected_ids.lock().unwrap().insert(id.into());
    }

    /// Stop refusing a message.
    #[allow(clippy::unwrap_used)] // Test infrastructure
    pub fn accept_message(&self, id: &str) {
        self.rejected_ids.lock().unwrap().remove(id);
    }
}

impl EventBus for InMemoryEventBus {
    #[allow(clippy::unwrap_used)] // Test infrastructure
    fn publish(
        &self,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let message = message.clone();
        Box::pin(async move {
            let rejected = self
                .failing_publishes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
                || self.rejected_ids.lock().unwrap().contains(&message.id);
            if rejected {
                return Err(EventBusError::PublishFailed {
                    routing_key: message.routing_key,
                    reason: "injected failure".to_string(),
                });
            }

            self.subscriptions.lock().unwrap().retain(|subscription| {
                if !subscription.routing_keys.contains(&message.routing_key) {
                    return true;
                }
                subscription.queue.send(message.clone()).is_ok()
            });
            self.published.lock().unwrap().push(message);
            Ok(())
        })
    }

    #[allow(clippy::unwrap_used)] // Test infrastructure
    fn subscribe(
        &self,
        routing_keys: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let routing_keys: Vec<String> = routing_keys.iter().map(|k| (*k).to_string()).collect();
        Box::pin(async move {
            let (queue, mut rx) = mpsc::unbounded_channel();
            self.subscriptions.lock().unwrap().push(Subscription {
                routing_keys,
                queue,
            });

            let deliveries = stream! {
                while let Some(message) = rx.recv().await {
                    let mut attempt = 1;
                    loop {
                        let (delivery, settled) = Delivery::new(message.clone(), attempt);
                        yield Ok(delivery);
                        match settled.await {
                            Ok(Acknowledgement::Ack | Acknowledgement::Nack { requeue: false }) => break,
                            Ok(Acknowledgement::Nack { requeue: true }) | Err(_) => attempt += 1,
                        }
                    }
                }
            };

            Ok(Box::pin(deliveries) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(routing_key: &str) -> BrokerMessage {
        BrokerMessage {
            id: "m-1".to_string(),
            routing_key: routing_key.to_string(),
            partition_key: "j-1".to_string(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn only_subscribed_keys_are_delivered() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["JourneyCreated"]).await.unwrap();

        bus.publish(&message("JourneyShared")).await.unwrap();
        bus.publish(&message("JourneyCreated")).await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().routing_key, "JourneyCreated");
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn requeued_message_comes_back_with_next_attempt() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["JourneyCreated"]).await.unwrap();
        bus.publish(&message("JourneyCreated")).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.attempt(), 1);
        first.nack(true);

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        second.ack();
    }

    #[tokio::test]
    async fn injected_publish_failure_is_not_recorded() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);

        assert!(bus.publish(&message("JourneyCreated")).await.is_err());
        assert!(bus.publish(&message("JourneyCreated")).await.is_ok());
        assert_eq!(bus.published().len(), 1);
    }
}
