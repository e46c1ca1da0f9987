use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{parse_reading_payload, AggregateResult, Reading, ReadingId, Status};
use crate::live::SubscriberRegistry;
use crate::pipeline::{IngestionGateway, PipelineError};
use crate::queue::{QueueDepth, TaskQueue};
use crate::storage::{ReadingStore, StorageError};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub gateway: Arc<IngestionGateway>,
    pub registry: Arc<SubscriberRegistry>,
    pub queue: Option<Arc<TaskQueue>>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Serialize)]
pub struct IngestResponse {
    pub id: ReadingId,
    pub value: i64,
    pub status: Status,
}

/// Accepts `{"number": n}`, `{"value": n}`, a bare JSON number or a plain
/// text integer.
pub async fn ingest_reading(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let value = parse_reading_payload(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected invalid reading");
        PipelineError::InvalidReading(e)
    })?;

    let ingested = state.gateway.record(value)?;

    Ok(Json(IngestResponse {
        id: ingested.reading.id,
        value: ingested.reading.value,
        status: ingested.status,
    }))
}

// ============================================================================
// Query
// ============================================================================

/// Optional RFC 3339 bounds, `from` inclusive and `to` exclusive
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RangeQuery {
    fn validate(&self) -> Result<(), ApiError> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => Err(ApiError::BadRequest(
                "'from' must not be after 'to'".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Serialize)]
pub struct ReadingsResponse {
    pub readings: Vec<Reading>,
    pub count: usize,
}

pub async fn list_readings(
    State(state): State<Arc<AppState>>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    range.validate()?;
    let readings = state.store.readings_in_range(range.from, range.to)?;

    Ok(Json(ReadingsResponse {
        count: readings.len(),
        readings,
    }))
}

pub async fn get_reading(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Reading>, ApiError> {
    state
        .store
        .get_reading(ReadingId(id))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Reading {} not found", id)))
}

#[derive(Serialize)]
pub struct AggregatesResponse {
    pub aggregates: Vec<AggregateResult>,
    pub count: usize,
}

pub async fn list_aggregates(
    State(state): State<Arc<AppState>>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<AggregatesResponse>, ApiError> {
    range.validate()?;
    let aggregates = state.store.aggregates_in_range(range.from, range.to)?;

    Ok(Json(AggregatesResponse {
        count: aggregates.len(),
        aggregates,
    }))
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub readings: usize,
    pub aggregates: usize,
    pub subscribers: usize,
    pub queue: Option<QueueDepth>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let store = state.store.stats();

    Json(StatsResponse {
        readings: store.readings,
        aggregates: store.aggregates,
        subscribers: state.registry.len(),
        queue: state.queue.as_ref().map(|q| q.depth()),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidReading(e) => ApiError::BadRequest(e.to_string()),
            PipelineError::StoreUnavailable(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
