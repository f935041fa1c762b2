//! HTTP API surface.
//!
//! Workflow management, manual run triggering, run inspection and the
//! live status WebSocket. Webhook ingress routes are merged in from the
//! trigger adapters.

mod websocket;

pub use websocket::ws_handler;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::{Runner, Services};
use crate::error::Error;
use crate::storage::StoredWorkflow;
use crate::triggers::create_webhook_routes;
use crate::workflow::{parse_workflow, validate_workflow};

/// Shared API state.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    /// Shared secret webhook ingress must present; `None` disables the check.
    pub webhook_secret: Option<String>,
}

/// Build the full API router, including webhook ingress routes.
pub async fn build_router(state: AppState) -> Router {
    let webhook_routes = create_webhook_routes(&state).await;

    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{name}",
            axum::routing::delete(delete_workflow),
        )
        .route("/api/workflows/{name}/run", post(run_workflow))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/resume", post(resume_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/ws/status", get(ws_handler))
        .merge(webhook_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, err: &Error) -> axum::response::Response {
    (
        status,
        Json(json!({"error": err.external_message(), "kind": err.kind()})),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CreateWorkflowRequest {
    /// Workflow definition YAML
    definition: String,
    /// Owning tenant user
    #[serde(default = "default_user")]
    user_id: String,
}

fn default_user() -> String {
    "default".to_string()
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> impl IntoResponse {
    let workflow = match parse_workflow(&request.definition) {
        Ok(w) => w,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e),
    };

    if let Err(e) = validate_workflow(&workflow, &state.services.registry) {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e);
    }

    let now = Utc::now();
    let stored = StoredWorkflow {
        id: uuid::Uuid::new_v4().to_string(),
        name: workflow.name.clone(),
        user_id: request.user_id,
        definition: request.definition,
        enabled: true,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = state.services.storage.save_workflow(&stored).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
    }

    info!("Workflow '{}' saved", stored.name);
    (
        StatusCode::CREATED,
        Json(json!({"name": stored.name, "id": stored.id})),
    )
        .into_response()
}

async fn list_workflows(State(state): State<AppState>) -> impl IntoResponse {
    match state.services.storage.list_workflows().await {
        Ok(workflows) => {
            let summaries: Vec<Value> = workflows
                .iter()
                .map(|w| {
                    json!({
                        "name": w.name,
                        "enabled": w.enabled,
                        "updatedAt": w.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            Json(json!({"workflows": summaries})).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.services.storage.delete_workflow(&name).await {
        Ok(true) => Json(json!({"deleted": name})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("workflow '{}' not found", name)})),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Manually trigger a run; the request body becomes the trigger data.
async fn run_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let trigger_data: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("malformed JSON payload: {}", e)})),
                )
                    .into_response();
            }
        }
    };

    let stored = match state.services.storage.get_workflow(&name).await {
        Ok(Some(w)) if w.enabled => w,
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("workflow '{}' not found", name)})),
            )
                .into_response();
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };

    let runner = Runner::new(state.services.clone());

    match runner.start(&stored, "manual", trigger_data).await {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> impl IntoResponse {
    match state
        .services
        .storage
        .list_runs(query.workflow.as_deref(), query.limit)
        .await
    {
        Ok(runs) => Json(json!({"runs": runs})).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.services.storage.get_run(&id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("run '{}' not found", id)})),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn resume_run(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let runner = Runner::new(state.services.clone());
    match runner.resume(&id).await {
        Ok(run) => Json(run).into_response(),
        Err(e @ Error::Workflow(_)) => error_response(StatusCode::NOT_FOUND, &e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn cancel_run(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let runner = Runner::new(state.services.clone());
    match runner.cancel(&id).await {
        Ok(signalled) => Json(json!({"runId": id, "signalled": signalled})).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}
