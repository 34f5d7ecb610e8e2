use std::collections::HashMap;
use std::future::Future;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use placecrawl_core::{Enrichment, JobMode, JobState};
use placecrawl_storage::Storage;

/// HTTP surface for the search layer and the scheduler: enqueue crawls,
/// poll job status, health. Crawls never run inline here; workers own all
/// fetching.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
}

pub enum ApiError {
    Validation(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                error!("internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub place_ids: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: JobMode,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_mode() -> JobMode {
    JobMode::Realtime
}

fn default_priority() -> i32 {
    10
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub job_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: i64,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub db: bool,
    pub queue_depth: HashMap<String, i64>,
    pub version: &'static str,
}

async fn scrape(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    if req.place_ids.is_empty() {
        return Err(ApiError::Validation("place_ids must not be empty".into()));
    }
    if !(0..=10).contains(&req.priority) {
        return Err(ApiError::Validation("priority must be within 0..10".into()));
    }

    let items: Vec<(String, JobMode, i32)> = req
        .place_ids
        .iter()
        .map(|p| (p.clone(), req.mode, req.priority))
        .collect();
    let job_ids = state.storage.enqueue_many(&items).await?;
    info!(count = job_ids.len(), mode = req.mode.as_str(), "jobs enqueued via API");
    Ok(Json(ScrapeResponse { job_ids }))
}

async fn scrape_status(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let Some(status) = state.storage.get_job_status(job_id).await? else {
        return Err(ApiError::NotFound(format!("job {job_id} not found")));
    };

    let mut response = JobStatusResponse {
        job_id: status.job_id,
        state: status.state,
        started_at: status.started_at,
        finished_at: status.finished_at,
        error: status.error,
        updated_fields: None,
        enrichment: None,
    };

    // The latest snapshot rides along once the job has succeeded.
    if status.state == JobState::Success {
        if let Some(enrichment) = state.storage.get_enrichment(&status.place_id).await? {
            response.updated_fields = Some(
                enrichment
                    .present_fields()
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
            );
            response.enrichment = Some(enrichment);
        }
    }

    Ok(Json(response))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.storage.check_connectivity().await.is_ok();
    let queue_depth = state.storage.queue_depth().await.unwrap_or_default();
    Json(HealthResponse {
        ok: db,
        db,
        queue_depth,
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scrape", post(scrape))
        .route("/scrape/{job_id}", get(scrape_status))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves.
pub async fn run(
    state: AppState,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
