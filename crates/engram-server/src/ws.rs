//! WebSocket event stream
//!
//! Clients connect to `/ws` and receive engine events as
//! `{type, timestamp, data}` JSON objects. On connect the durable queue
//! backlog is drained first (at-least-once delivery across restarts),
//! then the live broadcast is forwarded; a slow poll keeps picking up
//! rows persisted by other processes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use engram_core::{EngineEvent, StoredEvent};

use crate::state::AppState;

/// Durable rows fetched per drain
const QUEUE_BATCH: usize = 100;

/// How often the durable queue is re-polled for cross-process events
const QUEUE_POLL_SECS: u64 = 5;

/// WebSocket upgrade handler - GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Wire shape for durable rows: same envelope the live stream uses
fn stored_to_json(event: &StoredEvent) -> String {
    serde_json::json!({
        "type": event.event_type,
        "timestamp": event.timestamp,
        "data": event.data,
    })
    .to_string()
}

/// Live events in the `{type, timestamp, data}` envelope
fn live_to_json(event: &EngineEvent) -> String {
    let data = event.payload();
    let timestamp = data
        .get("timestamp")
        .cloned()
        .unwrap_or_else(|| serde_json::json!(Utc::now()));
    serde_json::json!({
        "type": event.kind(),
        "timestamp": timestamp,
        "data": data,
    })
    .to_string()
}

/// Drain the unprocessed backlog into the client, acknowledging delivery
async fn drain_queue(state: &AppState, sender: &mut SplitSink<WebSocket, Message>) -> bool {
    loop {
        let batch = match state.engine.unprocessed_events(QUEUE_BATCH) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Event queue drain failed: {}", e);
                return true;
            }
        };
        if batch.is_empty() {
            return true;
        }

        let ids: Vec<i64> = batch.iter().map(|e| e.id).collect();
        for event in &batch {
            if sender
                .send(Message::Text(stored_to_json(event).into()))
                .await
                .is_err()
            {
                return false;
            }
        }
        if let Err(e) = state.engine.mark_events_processed(&ids) {
            warn!("Acknowledging events failed: {}", e);
            return true;
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx: broadcast::Receiver<EngineEvent> = state.engine.subscribe();

    debug!("WebSocket client connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "timestamp": Utc::now().to_rfc3339(),
        "data": { "version": engram_core::VERSION },
    });
    if sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    // Backlog first, then live
    if !drain_queue(&state, &mut sender).await {
        return;
    }

    let mut poll = tokio::time::interval(std::time::Duration::from_secs(QUEUE_POLL_SECS));
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Live event from the engine
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if sender
                            .send(Message::Text(live_to_json(&event).into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("WebSocket client lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            // Cross-process rows land in the durable queue only
            _ = poll.tick() => {
                if !drain_queue(&state, &mut sender).await {
                    break;
                }
            }
            // Client messages: ping/pong and close
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}
