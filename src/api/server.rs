use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_reading, health_check, ingest_reading, list_aggregates, list_readings, stats, AppState,
};
use crate::alerts::{AlertChannel, AlertDispatcher, InMemoryDirectory, Notifier};
use crate::live::{ws_handler, FanoutBroadcaster, SubscriberRegistry, DEFAULT_BUFFER};
use crate::pipeline::{EventBus, IngestionGateway, Thresholds, WindowedAggregator, DEFAULT_WINDOW};
use crate::queue::{LivenessHandler, TaskConsumer, TaskQueue};
use crate::storage::{PersistenceConfig, ReadingStore, SnapshotManager, SnapshotWorker, StorageEngine};

/// Name of the queue carrying per-reading tasks
pub const TASK_QUEUE: &str = "bpm_tasks";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub window: Duration,
    pub thresholds: Thresholds,
    pub subscriber_buffer: usize,
    /// External ids seeded into the target directory
    pub alert_targets: Vec<String>,
    pub alert_channel: AlertChannel,
    pub alert_timeout: Duration,
    /// Snapshot persistence, disabled when None
    pub persistence: Option<PersistenceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            window: DEFAULT_WINDOW,
            thresholds: Thresholds::default(),
            subscriber_buffer: DEFAULT_BUFFER,
            alert_targets: Vec::new(),
            alert_channel: AlertChannel::Log,
            alert_timeout: crate::alerts::DEFAULT_TIMEOUT,
            persistence: None,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Telemetry
        .route("/reading-data", post(ingest_reading))
        .route("/readings", get(list_readings))
        .route("/readings/:id", get(get_reading))
        .route("/aggregates", get(list_aggregates))
        // Live subscribers
        .route("/ws", get(ws_handler))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server and every background worker
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Storage, restored from the last snapshot when persistence is on
    let snapshots = match &config.persistence {
        Some(persistence) => Some(Arc::new(SnapshotManager::new(persistence.clone())?)),
        None => None,
    };
    let engine = Arc::new(
        snapshots
            .as_ref()
            .map(|m| m.restore())
            .transpose()?
            .flatten()
            .unwrap_or_default(),
    );
    let store: Arc<dyn ReadingStore> = engine.clone();

    let bus = Arc::new(EventBus::default());

    // Task queue bridge. Messages left unacked by the previous run are
    // restored and delivered again.
    let queue = Arc::new(
        snapshots
            .as_ref()
            .map(|m| m.restore_queue(TASK_QUEUE))
            .transpose()?
            .flatten()
            .unwrap_or_else(|| TaskQueue::new(TASK_QUEUE)),
    );
    let mut consumer = TaskConsumer::new(Arc::clone(&queue), Arc::new(LivenessHandler::new()));
    let consumer_handle = consumer.start();

    let gateway = Arc::new(
        IngestionGateway::new(Arc::clone(&store), config.thresholds, Arc::clone(&bus))
            .with_queue(Arc::clone(&queue)),
    );

    // Live subscribers
    let registry = Arc::new(SubscriberRegistry::new(config.subscriber_buffer));
    let mut broadcaster = FanoutBroadcaster::new(Arc::clone(&registry));
    let broadcaster_handle = broadcaster.start(&bus);

    // Alerts
    let notifier = Notifier::new(config.alert_channel.clone(), config.alert_timeout)?;
    let directory = Arc::new(InMemoryDirectory::with_external_ids(config.alert_targets.iter().cloned()));
    tracing::info!(
        channel = notifier.channel().name(),
        targets = directory.len(),
        "Alert dispatch configured"
    );
    let mut dispatcher = AlertDispatcher::new(directory, Arc::new(notifier));
    let dispatcher_handle = dispatcher.start(&bus);

    // Windowed aggregation
    let aggregator = Arc::new(WindowedAggregator::new(
        Arc::clone(&store),
        config.thresholds,
        Arc::clone(&bus),
        config.window,
    ));
    let aggregator_handle = Arc::clone(&aggregator).start();

    // Periodic snapshots
    let snapshot_worker = match (&snapshots, &config.persistence) {
        (Some(manager), Some(persistence)) => {
            let worker = Arc::new(
                SnapshotWorker::new(
                    Arc::clone(&engine),
                    Arc::clone(manager),
                    Duration::from_secs(persistence.snapshot_interval_secs),
                )
                .with_queue(Arc::clone(&queue)),
            );
            let handle = Arc::clone(&worker).start();
            Some((worker, handle))
        }
        _ => None,
    };

    #[cfg(feature = "kafka")]
    let kafka = start_kafka(Arc::clone(&gateway))?;

    let state = Arc::new(AppState {
        store,
        gateway,
        registry,
        queue: Some(Arc::clone(&queue)),
    });

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting pulsewatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping workers...");

    #[cfg(feature = "kafka")]
    if let Some((tx, handle)) = kafka {
        let _ = tx.send(()).await;
        let _ = handle.await;
    }

    aggregator.stop();
    aggregator_handle.abort();
    broadcaster.stop().await;
    dispatcher.stop().await;
    consumer.stop().await;
    queue.close();
    let _ = tokio::join!(broadcaster_handle, dispatcher_handle, consumer_handle);

    // The closed queue still holds everything not acked; the final snapshot
    // carries it into the next run
    match snapshot_worker {
        Some((worker, handle)) => {
            worker.stop();
            handle.abort();
            worker.snapshot_now();
        }
        None => {
            let owed = queue.depth();
            if owed.ready + owed.unacked > 0 {
                tracing::warn!(
                    ready = owed.ready,
                    unacked = owed.unacked,
                    "Persistence disabled, unsettled queue messages are dropped"
                );
            }
        }
    }

    tracing::info!("pulsewatch server stopped");
    Ok(())
}

#[cfg(feature = "kafka")]
fn start_kafka(
    gateway: Arc<IngestionGateway>,
) -> Result<Option<(tokio::sync::mpsc::Sender<()>, tokio::task::JoinHandle<()>)>, rdkafka::error::KafkaError>
{
    use crate::ingest::{KafkaConfig, KafkaConsumer};

    let Some(config) = KafkaConfig::from_env() else {
        tracing::info!("Kafka ingest disabled (KAFKA_TOPICS not set)");
        return Ok(None);
    };

    let consumer = KafkaConsumer::new(config, gateway)?;
    consumer.subscribe()?;
    Ok(Some(consumer.start()))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");

    tracing::info!("Shutdown signal received");
}
