//! Webhook trigger ingress.
//!
//! Converts an authenticated HTTP callback into trigger data and starts a
//! run of the bound workflow. Unauthenticated or malformed requests are
//! rejected with a 4xx and never start a run.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::engine::Runner;
use crate::workflow::{parse_workflow, TriggerBinding};

/// Header carrying the shared ingress secret.
pub const SIGNATURE_HEADER: &str = "x-opsflow-signature";

/// Create webhook routes for all workflows with webhook triggers.
pub async fn create_webhook_routes(state: &AppState) -> Router<AppState> {
    let mut router = Router::new();

    let workflows = match state.services.storage.list_workflows().await {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to load workflows for webhook routes: {}", e);
            return router;
        }
    };

    let mut webhook_count = 0;

    for stored in workflows {
        if !stored.enabled {
            continue;
        }

        let workflow = match parse_workflow(&stored.definition) {
            Ok(w) => w,
            Err(e) => {
                warn!(
                    "Failed to parse workflow '{}' for webhooks: {}",
                    stored.name, e
                );
                continue;
            }
        };

        for trigger in &workflow.triggers {
            if let TriggerBinding::Webhook { path } = trigger {
                let route_path = path
                    .clone()
                    .unwrap_or_else(|| format!("/hooks/{}", workflow.name));
                let workflow_name = workflow.name.clone();

                let handler = move |State(state): State<AppState>,
                                    headers: HeaderMap,
                                    body: Bytes| {
                    let workflow_name = workflow_name.clone();
                    async move { handle_webhook(state, &workflow_name, headers, body).await }
                };

                router = router.route(&route_path, post(handler));
                info!("Registered webhook: POST {}", route_path);
                webhook_count += 1;
            }
        }
    }

    info!("Registered {} webhook route(s)", webhook_count);
    router
}

/// Constant-time comparison of the presented secret against the expected
/// one.
fn signature_matches(expected: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .bytes()
        .zip(provided.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Handle an incoming webhook request.
async fn handle_webhook(
    state: AppState,
    workflow_name: &str,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Authenticate before anything else; a failed check never starts a run.
    if let Some(expected) = &state.webhook_secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !signature_matches(expected, provided) {
            warn!(
                workflow_name,
                "Webhook rejected: missing or invalid signature"
            );
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid or missing signature"})),
            )
                .into_response();
        }
    }

    let body_value: Value = if body.is_empty() {
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

    let stored = match state.services.storage.get_workflow(workflow_name).await {
        Ok(Some(w)) if w.enabled => w,
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("workflow '{}' not found", workflow_name)})),
            )
                .into_response();
        }
        Err(e) => {
            error!("Failed to load workflow '{}': {}", workflow_name, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.external_message()})),
            )
                .into_response();
        }
    };

    info!(workflow_name, "Webhook triggered");

    let headers_value: Value = {
        let mut map = serde_json::Map::new();
        for (key, value) in headers.iter() {
            if key.as_str() == SIGNATURE_HEADER {
                continue;
            }
            if let Ok(v) = value.to_str() {
                map.insert(key.to_string(), Value::String(v.to_string()));
            }
        }
        Value::Object(map)
    };

    let trigger_data = json!({
        "headers": headers_value,
        "body": body_value,
        "receivedAt": Utc::now().to_rfc3339(),
    });

    let runner = Runner::new(state.services.clone());
    match runner.start(&stored, "webhook", trigger_data).await {
        Ok(run) => Json(json!({
            "runId": run.id,
            "status": run.status.to_string(),
            "error": run.error,
        }))
        .into_response(),
        Err(e) => {
            error!("Webhook run failed for '{}': {}", workflow_name, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.external_message()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_match() {
        assert!(signature_matches("topsecret", Some("topsecret")));
        assert!(!signature_matches("topsecret", Some("topsecreX")));
        assert!(!signature_matches("topsecret", Some("short")));
        assert!(!signature_matches("topsecret", None));
    }
}
