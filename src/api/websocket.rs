//! WebSocket handler for the live status channel.
//!
//! Observers (the editor UI) subscribe to one node kind's topic and
//! receive its status events as JSON. The channel is advisory: a lagging
//! or disconnected observer misses events, and run-state authority stays
//! with the stored run record.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::status::StatusEvent;

/// Query parameters for a status subscription.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Node kind topic to subscribe to
    pub kind: String,
    /// Only forward events for this run
    #[serde(default)]
    pub run: Option<String>,
}

/// WebSocket handler for live status monitoring.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: AppState, query: StatusQuery) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.services.hub.subscribe(&query.kind);

    info!(
        kind = %query.kind,
        run = ?query.run,
        "Status observer connected"
    );

    loop {
        tokio::select! {
            // Client messages: only pings and close matter.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Status observer disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if !should_forward(&event, &query.run) {
                            continue;
                        }
                        if let Err(e) = send_event(&mut sender, &event).await {
                            error!("Failed to send status event: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Advisory channel: dropped events are allowed.
                        warn!("Status observer lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Status topic closed");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &StatusEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}

fn should_forward(event: &StatusEvent, run_filter: &Option<String>) -> bool {
    match run_filter {
        Some(run_id) => event.run_id.as_deref() == Some(run_id.as_str()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::NodeStatus;

    #[test]
    fn test_forward_without_filter() {
        let event = StatusEvent::new("n-1", NodeStatus::Loading).with_run("r-1");
        assert!(should_forward(&event, &None));
    }

    #[test]
    fn test_forward_with_matching_run() {
        let event = StatusEvent::new("n-1", NodeStatus::Success).with_run("r-1");
        assert!(should_forward(&event, &Some("r-1".to_string())));
        assert!(!should_forward(&event, &Some("r-2".to_string())));
    }

    #[test]
    fn test_event_without_run_filtered_out() {
        let event = StatusEvent::new("n-1", NodeStatus::Error);
        assert!(!should_forward(&event, &Some("r-1".to_string())));
    }
}
