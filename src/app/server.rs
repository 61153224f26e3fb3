use crate::app::checkpoint::{Checkpoint, Checkpointer};
use crate::app::connect::ConnectedStores;
use crate::app::scheduler::Scheduler;
use crate::domain::ports::{DocumentStore, KeyValueStore};
use crate::utils::error::{Result, StackError};
use crate::utils::validation;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub key_value: Arc<dyn KeyValueStore>,
    pub key_value_label: String,
    pub document: Option<Arc<dyn DocumentStore>>,
    pub document_label: String,
    pub scheduler: Arc<Scheduler>,
    pub checkpoints: Arc<Checkpointer>,
}

impl AppState {
    pub fn new(stores: &ConnectedStores, scheduler: Arc<Scheduler>) -> Self {
        Self {
            key_value: Arc::clone(&stores.key_value),
            key_value_label: stores.key_value_label.clone(),
            document: stores.document.clone(),
            document_label: stores.document_label.clone(),
            scheduler,
            checkpoints: Arc::new(Checkpointer::new(Arc::clone(&stores.key_value))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStatus {
    pub endpoint: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreStatus {
    fn from_result(endpoint: String, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                endpoint,
                healthy: true,
                error: None,
            },
            Err(e) => Self {
                endpoint,
                healthy: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    /// `ok` when every configured store answers, `degraded` otherwise.
    pub status: String,
    pub version: String,
    pub key_value: StoreStatus,
    pub document_store: Option<StoreStatus>,
    pub jobs: Vec<String>,
}

impl StatusReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Fetches `/status` from a running backend. A degraded (503) report is still returned.
pub async fn fetch_status(base_url: &str, timeout: Duration) -> Result<StatusReport> {
    let mut base = validation::validate_url("url", base_url, &["http", "https"])?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let url = base.join("status").map_err(|e| StackError::InvalidConfigValueError {
        field: "url".to_string(),
        value: base_url.to_string(),
        reason: e.to_string(),
    })?;

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    tracing::debug!("GET {}", url);
    let response = client.get(url.clone()).send().await?;

    let status = response.status();
    if !(status.is_success() || status.as_u16() == 503) {
        return Err(StackError::protocol(format!(
            "{} answered with HTTP {}",
            url, status
        )));
    }
    Ok(response.json::<StatusReport>().await?)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/checkpoints", get(handle_list_checkpoints))
        .route(
            "/checkpoints/:name",
            get(handle_load_checkpoint)
                .put(handle_create_checkpoint)
                .delete(handle_delete_checkpoint),
        )
        .layer(TraceLayer::new_for_http())
        // The browser frontend is served from another origin.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": VERSION
    }))
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let key_value = StoreStatus::from_result(
        state.key_value_label.clone(),
        state.key_value.ping().await,
    );

    let document_store = match &state.document {
        Some(document) => Some(StoreStatus::from_result(
            state.document_label.clone(),
            document.ping().await,
        )),
        None => None,
    };

    let healthy =
        key_value.healthy && document_store.as_ref().map_or(true, |status| status.healthy);
    let report = StatusReport {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: VERSION.to_string(),
        key_value,
        document_store,
        jobs: state.scheduler.job_ids(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        tracing::warn!("⚠️ Status check degraded: {:?}", report);
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

fn error_response(e: StackError) -> (StatusCode, String) {
    match e {
        StackError::ValidationError { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
        other => {
            tracing::error!("❌ Checkpoint request failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page_size() -> usize {
    10
}

fn default_page() -> usize {
    1
}

async fn handle_list_checkpoints(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> std::result::Result<Json<Vec<String>>, (StatusCode, String)> {
    state
        .checkpoints
        .list(query.page_size, query.page)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn handle_load_checkpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> std::result::Result<Json<Checkpoint>, (StatusCode, String)> {
    match state.checkpoints.load(&name).await.map_err(error_response)? {
        Some(checkpoint) => Ok(Json(checkpoint)),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("checkpoint '{}' not found", name),
        )),
    }
}

async fn handle_create_checkpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(state_data): Json<serde_json::Value>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let checkpoint = state
        .checkpoints
        .create(&name, state_data)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(checkpoint)))
}

async fn handle_delete_checkpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> std::result::Result<StatusCode, (StatusCode, String)> {
    if state
        .checkpoints
        .delete(&name)
        .await
        .map_err(error_response)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("checkpoint '{}' not found", name),
        ))
    }
}
