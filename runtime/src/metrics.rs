//! Prometheus metrics for the delivery backbone and the services on top of it.
//!
//! # Example
//!
//! ```rust,no_run
//! use journey_relay_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://0.0.0.0:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built or
    /// [`MetricsError::Install`] if another recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .and_then(PrometheusBuilder::build)
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            if let Err(_error) = exporter.await {
                // ExporterError (metrics-exporter-prometheus 0.15) implements neither Debug nor Display.
                tracing::error!(%addr, "Metrics listener stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "relay_outbox_published_total",
        "Outbox records confirmed by the broker"
    );
    describe_counter!(
        "relay_outbox_publish_failures_total",
        "Publish attempts the broker did not confirm"
    );
    describe_histogram!(
        "relay_outbox_publish_duration_seconds",
        "Time from publish to broker confirmation"
    );
    describe_counter!(
        "relay_inbox_applied_total",
        "Events applied by an inbox-guarded consumer"
    );
    describe_counter!(
        "relay_inbox_duplicates_total",
        "Redelivered events absorbed by the inbox"
    );
    describe_counter!(
        "relay_inbox_requeued_total",
        "Deliveries handed back to the broker for another attempt"
    );
    describe_counter!(
        "relay_unknown_event_types_total",
        "Events acknowledged without handling because their type is not registered"
    );
    describe_counter!(
        "relay_dead_lettered_total",
        "Messages moved to the dead-letter queue"
    );
    describe_counter!(
        "relay_dlq_resolved_total",
        "Dead letters marked resolved by an operator"
    );
    describe_counter!(
        "relay_dlq_discarded_total",
        "Dead letters discarded by an operator"
    );
    describe_counter!(
        "rewards_goals_granted_total",
        "Daily distance goals granted"
    );
    describe_counter!(
        "rewards_stale_events_total",
        "Journey events ignored because newer history was already applied"
    );
    describe_counter!(
        "journeys_events_raised_total",
        "Envelopes written to the journeys outbox by command"
    );
    describe_counter!(
        "notifications_live_push_total",
        "Live push attempts by outcome"
    );
    describe_counter!(
        "notifications_fallback_total",
        "Offline fallback messages by outcome"
    );
}

/// Outbox publisher metrics recorder.
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a confirmed publish.
    pub fn record_published(event_type: &str, duration: Duration) {
        counter!("relay_outbox_published_total", "event_type" => event_type.to_string())
            .increment(1);
        histogram!("relay_outbox_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an unconfirmed publish.
    pub fn record_failure(event_type: &str) {
        counter!("relay_outbox_publish_failures_total", "event_type" => event_type.to_string())
            .increment(1);
    }
}

/// Inbox consumer metrics recorder.
pub struct InboxMetrics;

impl InboxMetrics {
    /// Record an applied event.
    pub fn record_applied(consumer: &'static str, event_type: &str) {
        counter!(
            "relay_inbox_applied_total",
            "consumer" => consumer,
            "event_type" => event_type.to_string()
        )
        .increment(1);
    }

    /// Record an absorbed duplicate.
    pub fn record_duplicate(consumer: &'static str) {
        counter!("relay_inbox_duplicates_total", "consumer" => consumer).increment(1);
    }

    /// Record a requeued delivery.
    pub fn record_requeued(consumer: &'static str) {
        counter!("relay_inbox_requeued_total", "consumer" => consumer).increment(1);
    }

    /// Record an unregistered event type.
    pub fn record_unknown_type(consumer: &'static str, event_type: &str) {
        counter!(
            "relay_unknown_event_types_total",
            "consumer" => consumer,
            "event_type" => event_type.to_string()
        )
        .increment(1);
    }

    /// Record a dead-lettered message.
    pub fn record_dead_lettered(consumer: &'static str) {
        counter!("relay_dead_lettered_total", "consumer" => consumer).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        assert!(server.render().is_none());
    }

    #[test]
    fn recorders_are_safe_without_installed_recorder() {
        OutboxMetrics::record_published("JourneyCreated", Duration::from_millis(3));
        OutboxMetrics::record_failure("JourneyCreated");
        InboxMetrics::record_applied("rewards", "JourneyCreated");
        InboxMetrics::record_duplicate("rewards");
        InboxMetrics::record_unknown_type("rewards", "JourneyArchived");
        InboxMetrics::record_dead_lettered("rewards");
    }
}
