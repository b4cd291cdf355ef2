//! HTTP surface of the bridge: webhook receiver, task API, KPI and debug
//! endpoints.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clients::{HttpExternalApi, HttpInternalApi};
use crate::config::BridgeConfig;
use crate::errors::SyncError;
use crate::identity::IdentityMapper;
use crate::models::{TaskPatch, WebhookPayload};
use crate::sync::{KpiBoard, OutboundSync, SyncRelay, TagSync, WebhookQueue};
use crate::sync::outbound::CreateTaskRequest;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub mapper: Arc<IdentityMapper>,
    pub outbound: Arc<OutboundSync>,
    pub queue: Arc<WebhookQueue>,
    pub kpi: Arc<KpiBoard>,
    pub tags: Arc<TagSync>,
}

pub type SharedState = Arc<AppState>;

// ── Request/response payload types ────────────────────────────────────

/// Webhook acknowledgement. Always sent with HTTP 200; the external
/// service disables webhooks that fail repeatedly, so even bad payloads
/// are acknowledged and only reported in the body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct SyncTagsRequest {
    pub tags: Vec<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::TaskNotFound(id) => ApiError::NotFound(format!("task {} not found", id)),
            SyncError::MalformedPayload(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", put(update_task).delete(delete_task))
        .route("/tasks/{id}/tags", put(sync_task_tags))
        .route("/tags", get(list_tags))
        .route("/kpi", get(kpi_report))
        .route("/debug/mapping", get(mapping_report))
        .route("/debug/mapping/refresh", post(refresh_mapping))
        .route("/debug/mapping/external/{id}", get(resolve_external))
        .route("/debug/mapping/internal/{id}", get(resolve_internal))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Webhook intake. Parsing happens here rather than in an extractor so a
/// malformed body still gets a 200 acknowledgement.
async fn receive_webhook(State(state): State<SharedState>, body: String) -> Json<WebhookAck> {
    let ack = |success: bool, message: &str, event_type: Option<String>| WebhookAck {
        success,
        message: message.to_string(),
        event_type,
        timestamp: Utc::now(),
    };

    match serde_json::from_str::<WebhookPayload>(&body) {
        Ok(payload) => {
            let event = payload.event.clone();
            if state.queue.try_enqueue(payload) {
                Json(ack(true, "event queued", Some(event)))
            } else {
                Json(ack(false, "event dropped, queue unavailable", Some(event)))
            }
        }
        Err(err) => Json(ack(false, &format!("malformed payload: {}", err), None)),
    }
}

async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    let task = state.outbound.create_task(req).await?;
    state.kpi.invalidate().await;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> Result<StatusCode, ApiError> {
    state.outbound.update_task(id, patch).await?;
    state.kpi.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.outbound.delete_task(id).await?;
    state.kpi.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_task_tags(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<SyncTagsRequest>,
) -> Result<StatusCode, ApiError> {
    state.outbound.sync_task_tags(id, &req.tags).await?;
    state.tags.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tags(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .tags
        .snapshot()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(snapshot.as_ref().clone()))
}

async fn kpi_report(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .kpi
        .report()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(report.as_ref().clone()))
}

async fn mapping_report(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.mapper.report().await)
}

async fn refresh_mapping(State(state): State<SharedState>) -> impl IntoResponse {
    state.mapper.invalidate().await;
    Json(state.mapper.report().await)
}

async fn resolve_external(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let internal_id = state.mapper.resolve(&id).await;
    Json(serde_json::json!({
        "external_id": id,
        "internal_id": internal_id,
    }))
}

async fn resolve_internal(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let external_id = state.mapper.resolve_reverse(id).await;
    Json(serde_json::json!({
        "internal_id": id,
        "external_id": external_id,
    }))
}

// ── Bootstrap ─────────────────────────────────────────────────────────

/// Wire the full application state from configuration.
pub fn build_state(config: &BridgeConfig) -> Result<SharedState> {
    let internal = Arc::new(
        HttpInternalApi::new(&config.internal).context("Failed to build internal client")?,
    );
    let external = Arc::new(
        HttpExternalApi::new(&config.external).context("Failed to build external client")?,
    );

    let mapper = Arc::new(IdentityMapper::new(
        internal.clone(),
        external.clone(),
        config.mapping_ttl(),
    ));
    let relay = Arc::new(SyncRelay::new(
        internal.clone(),
        external.clone(),
        mapper.clone(),
    ));
    let queue = Arc::new(WebhookQueue::start(
        relay,
        config.server.workers,
        config.server.queue_capacity,
    ));
    let outbound = Arc::new(OutboundSync::new(
        internal.clone(),
        external.clone(),
        mapper.clone(),
    ));
    let tags = Arc::new(TagSync::new(
        internal.clone(),
        external,
        config.tags_ttl(),
        config.external.tag_concurrency,
    ));
    let kpi = Arc::new(KpiBoard::new(internal, tags.clone(), config.kpi_ttl()));

    Ok(Arc::new(AppState {
        mapper,
        outbound,
        queue,
        kpi,
        tags,
    }))
}

/// Run the HTTP server until Ctrl+C, then drain the webhook queue.
pub async fn start_server(config: BridgeConfig) -> Result<()> {
    let state = build_state(&config)?;
    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(addr = %listener.local_addr()?, "taskbridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // In-flight webhook events finish before the process exits.
    state.queue.shutdown().await;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutdown signal received");
}
