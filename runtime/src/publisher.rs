//! Outbox publisher: drains a service's outbox to the broker.
//!
//! Each tick claims up to `batch_size` unprocessed rows (oldest first),
//! publishes them one by one and waits for the broker's confirmation of each.
//! The confirmed prefix is marked processed in a single commit. The first
//! unconfirmed publish ends the tick; the rest of the batch stays pending.
//!
//! If the broker confirmed a message but the commit marking it processed is
//! lost, the message is published again on the next tick. Consumers absorb the
//! duplicate through their inbox.

use crate::config::PublisherConfig;
use crate::metrics::OutboxMetrics;
use chrono::TimeDelta;
use journey_relay_core::environment::Clock;
use journey_relay_core::event_bus::{EventBus, EventBusError};
use journey_relay_core::outbox::{OutboxClaim, OutboxStore};
use journey_relay_core::store::StoreError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Errors raised by a publisher tick.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Claiming or marking rows failed.
    #[error("Outbox store error: {0}")]
    Store(#[from] StoreError),

    /// The broker did not confirm a message; earlier ones were committed.
    #[error("Broker rejected publish after {published} confirmed: {source}")]
    Broker {
        /// Messages confirmed and marked before the failure
        published: usize,
        /// Broker error
        source: EventBusError,
    },
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Rows claimed
    pub claimed: usize,
    /// Rows confirmed and marked processed
    pub published: usize,
}

/// Background task draining one outbox.
pub struct OutboxPublisher<S> {
    service: &'static str,
    store: Arc<S>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: PublisherConfig,
}

impl<S: OutboxStore> OutboxPublisher<S> {
    /// Create a publisher for `service`'s outbox.
    #[must_use]
    pub fn new(
        service: &'static str,
        store: Arc<S>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            service,
            store,
            event_bus,
            clock,
            config,
        }
    }

    /// Run one tick: claim, publish, mark the confirmed prefix.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Store`] if the outbox cannot be read or updated,
    /// or [`PublishError::Broker`] if a publish was not confirmed.
    pub async fn publish_pending(&self) -> Result<PublishReport, PublishError> {
        let claim = self.store.claim_unprocessed(self.config.batch_size).await?;
        let claimed = claim.records().len();
        if claimed == 0 {
            return Ok(PublishReport::default());
        }

        let mut confirmed = Vec::with_capacity(claimed);
        let mut failure = None;

        for record in claim.records() {
            let started = Instant::now();
            match self.event_bus.publish(&record.to_message()).await {
                Ok(()) => {
                    OutboxMetrics::record_published(&record.event_type, started.elapsed());
                    confirmed.push(record.id);
                },
                Err(error) => {
                    OutboxMetrics::record_failure(&record.event_type);
                    tracing::warn!(
                        service = self.service,
                        event_id = %record.id,
                        event_type = %record.event_type,
                        error = %error,
                        "Publish not confirmed, leaving record pending"
                    );
                    failure = Some(error);
                    break;
                },
            }
        }

        let published = confirmed.len();
        if published > 0 {
            claim.mark_processed(&confirmed).await?;
        }

        tracing::debug!(service = self.service, claimed, published, "Outbox tick finished");

        match failure {
            Some(source) => Err(PublishError::Broker { published, source }),
            None => Ok(PublishReport { claimed, published }),
        }
    }

    /// Delete processed rows older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let retention = TimeDelta::from_std(self.config.retention).unwrap_or(TimeDelta::MAX);
        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(retention).unwrap_or(now);
        self.store.purge_processed(cutoff).await
    }

    /// Publish until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// A full batch is followed immediately by another tick; an empty or
    /// partial one sleeps `poll_interval`; a failed one sleeps `retry_delay`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            service = self.service,
            batch_size = self.config.batch_size,
            "Starting outbox publisher"
        );

        let mut last_sweep: Option<Instant> = None;

        while !*shutdown.borrow() {
            let delay = match self.publish_pending().await {
                Ok(report) if report.claimed == self.config.batch_size => Duration::ZERO,
                Ok(_) => self.config.poll_interval,
                Err(error) => {
                    tracing::error!(service = self.service, error = %error, "Outbox tick failed");
                    self.config.retry_delay
                },
            };

            if last_sweep.is_none_or(|at| at.elapsed() >= self.config.retention_sweep_interval) {
                match self.purge_expired().await {
                    Ok(removed) => {
                        tracing::debug!(service = self.service, removed, "Outbox retention sweep");
                    },
                    Err(error) => {
                        tracing::warn!(service = self.service, error = %error, "Outbox retention sweep failed");
                    },
                }
                last_sweep = Some(Instant::now());
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(service = self.service, "Outbox publisher stopped");
    }
}
