//! Admin HTTP API.
//!
//! - GET    /health
//! - GET    /metrics
//! - GET    /v1/cache/stats
//! - GET    /v1/cache/events
//! - PUT    /v1/cache/budget
//! - POST   /v1/cache/purge
//! - GET    /v1/cache/{kind}
//! - GET    /v1/cache/{kind}/{id}
//! - POST   /v1/cache/{kind}/{id}   (load through the configured loader)
//! - DELETE /v1/cache/{kind}/{id}

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::cache::entry::{Entity, EntityKind, EntryStatus};
use crate::cache::error::CacheError;
use crate::cache::store::{CacheStats, EntityCache, EntryInfo};
use crate::config::Config;
use crate::loader::EntityLoader;
use crate::server::streaming::events_to_sse_stream;

/// Application state shared across handlers.
pub struct AppState {
    pub cache: EntityCache,
    pub loader: Arc<dyn EntityLoader>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/events", get(cache_events))
        .route("/v1/cache/budget", put(set_budget))
        .route("/v1/cache/purge", post(purge))
        .route("/v1/cache/{kind}", get(list_entries))
        .route(
            "/v1/cache/{kind}/{*id}",
            get(get_entry).post(load_entry).delete(remove_entry),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub loader: LoaderInfo,
}

/// Payload geometry of the configured loader.
#[derive(Debug, Serialize)]
pub struct LoaderInfo {
    pub latency_ms: u64,
    pub frame_bytes: Option<u64>,
    pub volume_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    pub bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BudgetResponse {
    pub max_budget_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub kind: Option<EntityKind>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub removed: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoadQuery {
    /// Wait for the load to settle before responding.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// A cache error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CacheError);

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            CacheError::DuplicateId { .. } => StatusCode::CONFLICT,
            CacheError::NotFound { .. } => StatusCode::NOT_FOUND,
            CacheError::InvalidBudget(_) | CacheError::BudgetBelowCurrentUsage { .. } => StatusCode::BAD_REQUEST,
            CacheError::CacheExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::Load(_) => StatusCode::BAD_GATEWAY,
            CacheError::Abandoned { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::NoRuntime { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.kind_name().to_string(),
            message: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache: state.cache.stats(),
        loader: LoaderInfo {
            latency_ms: state.config.loader.latency_ms,
            frame_bytes: state.config.loader.frame_bytes(),
            volume_bytes: state.config.loader.volume_bytes(),
        },
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(metrics) = state.cache.metrics() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.encode() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

async fn cache_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stream = events_to_sse_stream(state.cache.subscribe());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn set_budget(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BudgetRequest>,
) -> Result<Json<BudgetResponse>, ApiError> {
    state.cache.set_max_budget(req.bytes)?;
    Ok(Json(BudgetResponse {
        max_budget_bytes: state.cache.max_budget(),
    }))
}

async fn purge(State(state): State<Arc<AppState>>, Query(query): Query<PurgeQuery>) -> Json<PurgeResponse> {
    let removed = match query.kind {
        Some(kind) => state.cache.purge(kind),
        None => state.cache.purge_all(),
    };
    Json(PurgeResponse { removed })
}

async fn list_entries(State(state): State<Arc<AppState>>, Path(kind): Path<EntityKind>) -> Json<Vec<EntryInfo>> {
    Json(state.cache.entries(kind))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(EntityKind, String)>,
) -> Result<Json<EntryInfo>, ApiError> {
    state
        .cache
        .entry_info(kind, &id)
        .map(Json)
        .ok_or(ApiError(CacheError::NotFound { kind, id }))
}

async fn load_entry(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(EntityKind, String)>,
    Query(query): Query<LoadQuery>,
) -> Result<(StatusCode, Json<EntryInfo>), ApiError> {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id = %request_id, %kind, id = %id, wait = query.wait, "Load request");

    let handle = state.cache.load(kind, &id, state.loader.clone())?;
    if query.wait {
        let entity = handle.wait().await?;
        return Ok((StatusCode::OK, Json(settled_info(&state.cache, kind, id, &entity))));
    }

    let info = state
        .cache
        .entry_info(kind, &id)
        .ok_or(ApiError(CacheError::NotFound { kind, id }))?;
    Ok((StatusCode::ACCEPTED, Json(info)))
}

/// Describe a settled load. The entry may already have been evicted or
/// removed, in which case the payload itself is described.
fn settled_info(cache: &EntityCache, kind: EntityKind, id: String, entity: &Entity) -> EntryInfo {
    cache.entry_info(kind, &id).unwrap_or_else(|| EntryInfo {
        kind,
        id,
        status: EntryStatus::Released,
        size_in_bytes: entity.byte_len(),
        last_accessed: 0,
        shared_cache_key: None,
    })
}

async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(EntityKind, String)>,
) -> Result<StatusCode, ApiError> {
    state.cache.remove(kind, &id)?;
    Ok(StatusCode::NO_CONTENT)
}
