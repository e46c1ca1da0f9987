//! pulsewatch server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - PULSEWATCH_HOST: Bind address (default: 0.0.0.0)
//! - PULSEWATCH_PORT: Port number (default: 3000)
//! - PULSEWATCH_WINDOW_SECS: Aggregation window in seconds (default: 60)
//! - PULSEWATCH_LOW_THRESHOLD / PULSEWATCH_HIGH_THRESHOLD: Normal band (default: 60 / 100)
//! - PULSEWATCH_SUBSCRIBER_BUFFER: Per-subscriber outbound queue (default: 64)
//! - PULSEWATCH_ALERT_TARGETS: Comma-separated external ids to alert
//! - TELEGRAM_BOT_TOKEN / TELEGRAM_API_BASE: Send alerts via the Telegram Bot API
//! - PULSEWATCH_ALERT_WEBHOOK: Send alerts to a webhook when no Telegram token is set
//! - PULSEWATCH_ALERT_TIMEOUT_SECS: Per-delivery timeout (default: 10)
//! - PULSEWATCH_DATA_DIR: Enable store snapshots in this directory
//! - PULSEWATCH_SNAPSHOT_INTERVAL_SECS: Snapshot interval (default: 300)
//! - RUST_LOG: Log level (default: info)
//!
//! With the `kafka` feature, KAFKA_BROKERS, KAFKA_TOPICS, KAFKA_GROUP_ID and
//! KAFKA_AUTO_OFFSET_RESET configure the telemetry consumer.

use std::str::FromStr;
use std::time::Duration;

use pulsewatch::alerts::AlertChannel;
use pulsewatch::api::{run_server, ServerConfig};
use pulsewatch::pipeline::{Thresholds, HIGH_THRESHOLD, LOW_THRESHOLD};
use pulsewatch::storage::PersistenceConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsewatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults = ServerConfig::default();

    let thresholds = Thresholds::new(
        env_or("PULSEWATCH_LOW_THRESHOLD", LOW_THRESHOLD),
        env_or("PULSEWATCH_HIGH_THRESHOLD", HIGH_THRESHOLD),
    )?;

    // Parse target list: "123,456" format
    let alert_targets: Vec<String> = std::env::var("PULSEWATCH_ALERT_TARGETS")
        .ok()
        .map(|ids| {
            ids.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let alert_channel = AlertChannel::resolve(
        std::env::var("TELEGRAM_BOT_TOKEN").ok(),
        std::env::var("TELEGRAM_API_BASE").ok(),
        std::env::var("PULSEWATCH_ALERT_WEBHOOK").ok(),
    );

    let persistence = std::env::var("PULSEWATCH_DATA_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(|dir| {
            PersistenceConfig::new(dir)
                .with_snapshot_interval(env_or("PULSEWATCH_SNAPSHOT_INTERVAL_SECS", 300))
        });

    let config = ServerConfig {
        host: std::env::var("PULSEWATCH_HOST").unwrap_or(defaults.host),
        port: env_or("PULSEWATCH_PORT", defaults.port),
        window: Duration::from_secs(env_or("PULSEWATCH_WINDOW_SECS", defaults.window.as_secs()).max(1)),
        thresholds,
        subscriber_buffer: env_or("PULSEWATCH_SUBSCRIBER_BUFFER", defaults.subscriber_buffer),
        alert_targets,
        alert_channel,
        alert_timeout: Duration::from_secs(env_or(
            "PULSEWATCH_ALERT_TIMEOUT_SECS",
            defaults.alert_timeout.as_secs(),
        )),
        persistence,
    };

    tracing::info!("pulsewatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Window: {} seconds", config.window.as_secs());
    tracing::info!(
        "  Normal band: {}..={}",
        config.thresholds.low,
        config.thresholds.high
    );
    tracing::info!("  Alert channel: {}", config.alert_channel.name());
    tracing::info!("  Alert targets: {}", config.alert_targets.len());
    match &config.persistence {
        Some(p) => tracing::info!(
            "  Snapshots: {} every {} seconds",
            p.data_dir.display(),
            p.snapshot_interval_secs
        ),
        None => tracing::info!("  Snapshots: DISABLED"),
    }

    run_server(config).await
}
