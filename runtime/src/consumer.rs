//! Inbox-guarded consumer: applies broker deliveries exactly once.
//!
//! # Per delivery
//!
//! 1. Decode the body into an [`EventEnvelope`].
//!    - Unregistered type: record it in the inbox, acknowledge, warn and count.
//!    - Undecodable: dead-letter and acknowledge.
//! 2. In one transaction: insert the inbox row; if it already existed commit
//!    the empty transaction (duplicate), otherwise run the processor and commit.
//!    Write conflicts restart the transaction under a [`RetryPolicy`].
//! 3. Run the processor's post-commit step, then acknowledge.
//! 4. On failure: dead-letter once `max_deliveries` is reached, otherwise wait
//!    `redelivery_delay` and hand the message back to the broker.
//!
//! The subscription holds at most one unacknowledged delivery, so one consumer
//! applies events strictly one after another.

use crate::config::ConsumerConfig;
use crate::metrics::InboxMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use futures::StreamExt;
use journey_relay_core::dead_letter::{DeadLetter, DeadLetterSink};
use journey_relay_core::envelope::{DecodeError, EventEnvelope, EventType, WireEnvelope};
use journey_relay_core::environment::Clock;
use journey_relay_core::event_bus::{Delivery, EventBus};
use journey_relay_core::inbox::{InboxLedger, InboxRecord};
use journey_relay_core::store::{StoreError, TransactionalStore, UnitOfWork};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors raised while applying an event.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The store failed; conflicts are retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The handler refused the event.
    #[error("Cannot apply {event_type} event: {reason}")]
    Rejected {
        /// Type of the refused event
        event_type: EventType,
        /// Why
        reason: String,
    },
}

impl ProcessError {
    /// `true` for write conflicts that a fresh transaction may not hit again.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

/// A local handler plugged into an [`InboxConsumer`].
///
/// `Tx` is the store's transaction type; the handler reaches its ledgers
/// through it so its writes share the inbox row's transaction.
pub trait InboxProcessor<Tx>: Send + Sync {
    /// Value handed from [`Self::process`] to [`Self::after_commit`].
    type Outcome: Send;

    /// Consumer name used in logs, metrics and dead letters.
    fn name(&self) -> &'static str;

    /// Event types this processor subscribes to.
    fn routing_keys(&self) -> &[EventType];

    /// Apply the event inside the open transaction.
    ///
    /// May run more than once for one delivery when the transaction is retried
    /// after a write conflict; it must not perform external side effects.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`]; the transaction is rolled back.
    fn process(
        &self,
        tx: &mut Tx,
        envelope: &EventEnvelope,
    ) -> impl Future<Output = Result<Self::Outcome, ProcessError>> + Send;

    /// Best-effort work after a successful commit. Never fails the delivery.
    fn after_commit(&self, outcome: Self::Outcome) -> impl Future<Output = ()> + Send {
        drop(outcome);
        async {}
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Applied and acknowledged.
    Applied,
    /// Already applied earlier; acknowledged.
    Duplicate,
    /// Unregistered type; recorded and acknowledged.
    UnknownType,
    /// Parked in the dead-letter queue and acknowledged.
    DeadLettered,
    /// Handed back to the broker.
    Requeued,
}

/// Background task applying deliveries for one processor.
pub struct InboxConsumer<S, P> {
    store: Arc<S>,
    processor: P,
    event_bus: Arc<dyn EventBus>,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
    conflict_retry: RetryPolicy,
}

impl<S, P> InboxConsumer<S, P>
where
    S: TransactionalStore,
    S::Tx: InboxLedger,
    P: InboxProcessor<S::Tx>,
{
    /// Create a consumer.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        processor: P,
        event_bus: Arc<dyn EventBus>,
        dead_letters: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            store,
            processor,
            event_bus,
            dead_letters,
            clock,
            config,
            conflict_retry: RetryPolicy::default(),
        }
    }

    /// Replace the policy used to retry conflicting transactions.
    #[must_use]
    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    /// The processor.
    #[must_use]
    pub const fn processor(&self) -> &P {
        &self.processor
    }

    /// Consume until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// A lost subscription is re-established after `reconnect_delay`, for as
    /// long as the consumer runs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.processor.name();
        let routing_keys: Vec<&str> =
            self.processor.routing_keys().iter().map(|t| t.as_str()).collect();

        tracing::info!(consumer = name, routing_keys = ?routing_keys, "Starting inbox consumer");

        'connection: while !*shutdown.borrow() {
            let mut deliveries = match self.event_bus.subscribe(&routing_keys).await {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(consumer = name, error = %error, "Subscription failed");
                    if self.wait_reconnect(&mut shutdown).await {
                        continue 'connection;
                    }
                    break 'connection;
                },
            };

            loop {
                tokio::select! {
                    next = deliveries.next() => match next {
                        Some(Ok(delivery)) => {
                            self.handle_delivery(delivery).await;
                        }
                        Some(Err(error)) => {
                            tracing::error!(consumer = name, error = %error, "Error receiving delivery");
                        }
                        None => {
                            tracing::warn!(consumer = name, "Subscription closed, reconnecting");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'connection;
                        }
                    }
                }
            }

            if !self.wait_reconnect(&mut shutdown).await {
                break;
            }
        }

        tracing::info!(consumer = name, "Inbox consumer stopped");
    }

    /// Sleep `reconnect_delay`; `false` if shutdown was requested meanwhile.
    async fn wait_reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
            () = tokio::time::sleep(self.config.reconnect_delay) => true,
        }
    }

    /// Decode, apply and settle one delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Handled {
        let name = self.processor.name();

        let wire = match WireEnvelope::parse(&delivery.message().body) {
            Ok(wire) => wire,
            Err(error) => return self.dead_letter(delivery, &error.to_string()).await,
        };

        match wire.decode() {
            Ok(envelope) => self.apply(delivery, &envelope).await,
            Err(DecodeError::UnknownType { id, event_type, occurred_at }) => {
                let record = InboxRecord {
                    id,
                    event_type,
                    occurred_at,
                    processed_at: self.clock.now(),
                };
                self.skip_unknown(delivery, &record).await
            },
            Err(error) => {
                tracing::error!(
                    consumer = name,
                    message_id = %delivery.message().id,
                    error = %error,
                    "Undecodable event"
                );
                self.dead_letter(delivery, &error.to_string()).await
            },
        }
    }

    async fn apply(&self, delivery: Delivery, envelope: &EventEnvelope) -> Handled {
        let name = self.processor.name();
        let event_type = envelope.event_type();

        let result = retry_with_predicate(
            &self.conflict_retry,
            || self.apply_once(envelope),
            ProcessError::is_conflict,
        )
        .await;

        match result {
            Ok(Some(outcome)) => {
                InboxMetrics::record_applied(name, event_type.as_str());
                tracing::debug!(
                    consumer = name,
                    event_id = %envelope.id,
                    event_type = %event_type,
                    "Event applied"
                );
                self.processor.after_commit(outcome).await;
                delivery.ack();
                Handled::Applied
            },
            Ok(None) => {
                InboxMetrics::record_duplicate(name);
                tracing::debug!(
                    consumer = name,
                    event_id = %envelope.id,
                    event_type = %event_type,
                    "Duplicate event ignored"
                );
                delivery.ack();
                Handled::Duplicate
            },
            Err(error) => self.fail(delivery, &error.to_string()).await,
        }
    }

    /// One guarded transaction. `None` means the event was already applied.
    async fn apply_once(&self, envelope: &EventEnvelope) -> Result<Option<P::Outcome>, ProcessError> {
        let mut tx = self.store.begin().await?;
        let record = InboxRecord::for_envelope(envelope, self.clock.now());

        if !tx.record_inbox(&record).await? {
            tx.commit().await?;
            return Ok(None);
        }

        let outcome = self.processor.process(&mut tx, envelope).await?;
        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn skip_unknown(&self, delivery: Delivery, record: &InboxRecord) -> Handled {
        let name = self.processor.name();

        let result = retry_with_predicate(
            &self.conflict_retry,
            || async {
                let mut tx = self.store.begin().await?;
                tx.record_inbox(record).await?;
                tx.commit().await
            },
            StoreError::is_conflict,
        )
        .await;

        match result {
            Ok(()) => {
                InboxMetrics::record_unknown_type(name, &record.event_type);
                tracing::warn!(
                    consumer = name,
                    event_id = %record.id,
                    event_type = %record.event_type,
                    "Unknown event type acknowledged without handling"
                );
                delivery.ack();
                Handled::UnknownType
            },
            Err(error) => self.fail(delivery, &error.to_string()).await,
        }
    }

    /// Dead-letter past the delivery cap, otherwise requeue after a delay.
    async fn fail(&self, delivery: Delivery, error: &str) -> Handled {
        if delivery.attempt() >= self.config.max_deliveries {
            return self.dead_letter(delivery, error).await;
        }

        tracing::warn!(
            consumer = self.processor.name(),
            message_id = %delivery.message().id,
            attempt = delivery.attempt(),
            max_deliveries = self.config.max_deliveries,
            error,
            "Processing failed, requeueing"
        );
        self.requeue(delivery).await
    }

    async fn dead_letter(&self, delivery: Delivery, error: &str) -> Handled {
        let name = self.processor.name();
        let letter = DeadLetter {
            consumer: name.to_string(),
            message: delivery.message().clone(),
            error: error.to_string(),
            attempts: delivery.attempt(),
        };

        match self.dead_letters.dead_letter(letter).await {
            Ok(()) => {
                InboxMetrics::record_dead_lettered(name);
                tracing::error!(
                    consumer = name,
                    message_id = %delivery.message().id,
                    routing_key = %delivery.message().routing_key,
                    attempt = delivery.attempt(),
                    error,
                    "Message moved to dead-letter queue"
                );
                delivery.ack();
                Handled::DeadLettered
            },
            Err(dlq_error) => {
                tracing::error!(
                    consumer = name,
                    message_id = %delivery.message().id,
                    error = %dlq_error,
                    "Dead-letter write failed, keeping message on the broker"
                );
                self.requeue(delivery).await
            },
        }
    }

    async fn requeue(&self, delivery: Delivery) -> Handled {
        InboxMetrics::record_requeued(self.processor.name());
        tokio::time::sleep(self.config.redelivery_delay).await;
        delivery.nack(true);
        Handled::Requeued
    }
}
