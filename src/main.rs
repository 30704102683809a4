//! Service binary: wires store, aggregator, bus and consumer together and
//! runs until a termination signal arrives.

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use eventflow::{AppConfig, EventAggregator, EventBus, KafkaEventConsumer, PgStatsStore, StatsStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Starting eventflow aggregation service");

    let config = AppConfig::from_env()?;
    info!("📊 Configuration:");
    info!("   ├─ Brokers: {}", config.kafka.bootstrap_servers);
    info!("   ├─ Topic: {}", config.kafka.topic);
    info!("   ├─ Group: {}", config.kafka.group_id);
    info!(
        "   └─ Flush interval: {}s",
        config.event_processing.flush_interval_seconds
    );

    let store: Arc<dyn StatsStore> = Arc::new(PgStatsStore::connect(&config.postgres).await?);
    store.initialize().await?;

    let aggregator = EventAggregator::new(
        store,
        Duration::from_secs(config.event_processing.flush_interval_seconds),
    );

    let bus = EventBus::new();
    let subscription = bus.subscribe(aggregator.clone());

    let consumer = KafkaEventConsumer::start(&config.kafka, bus.clone())?;
    info!("✅ All components running, waiting for events");

    wait_for_shutdown_signal().await;

    // Shutdown order matters: stop the consumer first so no new events
    // arrive, then complete the bus (which drives the aggregator's final
    // drain and stops its timer), then release the subscription.
    info!("⚠️  Shutting down...");
    consumer.stop().await;
    bus.complete().await;
    subscription.release();

    info!("✅ eventflow stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!("❌ Failed to install SIGTERM handler: {}", err);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for CTRL+C: {}", err);
    }
}
