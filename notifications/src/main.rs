//! Notifications service.
//!
//! Runs the inbox consumer fanning events out to users and the live WebSocket
//! endpoint until Ctrl-C.

use journey_relay_core::environment::{Clock, SystemClock};
use journey_relay_core::event_bus::EventBus;
use journey_relay_notifications::config::{Config, EmailConfig};
use journey_relay_notifications::{
    ConsoleNotifier, Dispatcher, EmailNotifier, LiveHub, LiveState, NotificationProcessor,
    PgContactDirectory, RedisPresenceStore, SmtpNotifier, live,
};
use journey_relay_postgres::{DeadLetterQueue, PgStore};
use journey_relay_redpanda::RedpandaEventBus;
use journey_relay_runtime::InboxConsumer;
use journey_relay_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn offline_notifier(config: &EmailConfig) -> EmailNotifier {
    match &config.smtp {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "Offline fallback via SMTP");
            EmailNotifier::Smtp(SmtpNotifier::new(
                smtp.host.clone(),
                smtp.port,
                smtp.username.clone(),
                smtp.password.clone(),
                config.from.clone(),
            ))
        },
        None => {
            info!("SMTP_HOST not set, offline fallback logs to the console");
            EmailNotifier::Console(ConsoleNotifier::new())
        },
    }
}

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

    info!("Starting notifications service");

    let config = Config::from_env()?;
    info!(
        redpanda_brokers = %config.relay.redpanda.brokers,
        consumer_group = %config.relay.redpanda.consumer_group,
        live_addr = %config.live_addr,
        presence_ttl_secs = config.presence_ttl.as_secs(),
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

    let presence = RedisPresenceStore::new(&config.redis_url).await?;
    info!("Presence store connected");

    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.relay.redpanda.brokers)
            .topic(&config.relay.redpanda.topic)
            .consumer_group(&config.relay.redpanda.consumer_group)
            .build()?,
    );
    let dead_letters = Arc::new(DeadLetterQueue::new(store.pool().clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let hub = LiveHub::new();
    let dispatcher = Dispatcher::new(
        hub.clone(),
        presence.clone(),
        PgContactDirectory::new(store.pool().clone()),
        offline_notifier(&config.email),
    );
    let consumer = InboxConsumer::new(
        Arc::clone(&store),
        NotificationProcessor::new(dispatcher),
        event_bus,
        dead_letters,
        clock,
        config.relay.consumer.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx.clone()));
    let live_task = tokio::spawn(live::serve(
        config.live_addr,
        LiveState {
            hub,
            presence: Arc::new(presence),
            presence_ttl: config.presence_ttl,
        },
        shutdown_rx,
    ));
    info!("Notifications service running");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    consumer_task.await?;
    if let Err(e) = live_task.await? {
        error!(error = %e, "Live channel stopped with an error");
    }
    info!("Notifications service stopped");
    Ok(())
}
