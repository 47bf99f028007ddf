//! Rewards service.
//!
//! Runs the outbox publisher for goal events and the inbox consumer feeding the
//! reward engine until Ctrl-C.

use journey_relay_core::environment::{Clock, SystemClock};
use journey_relay_core::event_bus::EventBus;
use journey_relay_postgres::{DeadLetterQueue, PgStore};
use journey_relay_redpanda::RedpandaEventBus;
use journey_relay_rewards::config::{Config, SERVICE};
use journey_relay_rewards::{RewardEngine, RewardProcessor};
use journey_relay_runtime::metrics::MetricsServer;
use journey_relay_runtime::{InboxConsumer, OutboxPublisher};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rewards service");

    let config = Config::from_env()?;
    info!(
        redpanda_brokers = %config.relay.redpanda.brokers,
        consumer_group = %config.relay.redpanda.consumer_group,
        daily_goal = %config.daily_goal,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.relay.metrics_addr);
    metrics.start()?;

    let store = Arc::new(
        PgStore::connect(&config.relay.postgres.url, config.relay.postgres.max_connections)
            .await?,
    );
    store.migrate().await?;
    info!("Database connected and migrated");

    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.relay.redpanda.brokers)
            .topic(&config.relay.redpanda.topic)
            .consumer_group(&config.relay.redpanda.consumer_group)
            .build()?,
    );
    let dead_letters = Arc::new(DeadLetterQueue::new(store.pool().clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let publisher = OutboxPublisher::new(
        SERVICE,
        Arc::clone(&store),
        Arc::clone(&event_bus),
        Arc::clone(&clock),
        config.relay.publisher.clone(),
    );
    let consumer = InboxConsumer::new(
        Arc::clone(&store),
        RewardProcessor::new(RewardEngine::new(config.daily_goal, Arc::clone(&clock))),
        event_bus,
        dead_letters,
        clock,
        config.relay.consumer.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let publisher_task = tokio::spawn(publisher.run(shutdown_rx.clone()));
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));
    info!("Rewards service running");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    publisher_task.await?;
    consumer_task.await?;
    info!("Rewards service stopped");
    Ok(())
}
