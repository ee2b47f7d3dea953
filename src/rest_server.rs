use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use http::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::ConfigurationRecord;
use crate::store::{ConfigStore, StoreError};

/// Live push-channel viewers. Owned by the server state, guarded by a lock
/// so fan-out never iterates while a connect/disconnect mutates the set.
pub type ViewerSessions = Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<Message>>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub sessions: ViewerSessions,
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigurationRecord> {
    Json(state.store.read().await)
}

/// Accepts a partial or full record as a JSON object and merges it over
/// the stored one. Malformed input never mutates state.
async fn update_config(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let patch: Value = match serde_json::from_str(&body) {
        Ok(patch) => patch,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON body: {}", e) })),
            );
        }
    };

    match state.store.merge(patch).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e @ StoreError::Validation(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
        Err(e) => {
            error!("Failed to save configuration: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One viewer session: register, forward queued updates until the socket
/// drops, then unregister. No retry, no per-session buffering beyond the
/// channel.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_id = Uuid::new_v4();

    register_viewer(&state, session_id, tx).await;
    info!("Viewer {} connected.", session_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are drained only to observe the close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.sessions.lock().await.remove(&session_id);
    info!("Viewer {} disconnected.", session_id);
}

/// Queues the current record for a new viewer and adds it to the registry.
/// Snapshot and registration happen under the sessions lock, so a write
/// landing in between is either in the snapshot or fanned out to the
/// registered session; late joiners always converge.
async fn register_viewer(
    state: &AppState,
    session_id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
) {
    let mut sessions = state.sessions.lock().await;
    let _ = tx.send(config_update_message(&state.store.read().await));
    sessions.insert(session_id, tx);
}

pub(crate) fn config_update_message(record: &ConfigurationRecord) -> Message {
    let envelope = json!({ "type": "config_update", "data": record });
    Message::Text(envelope.to_string().into())
}

/// Sends the record to every live session; sessions whose channel is gone
/// are dropped from the set.
pub(crate) async fn fan_out(sessions: &ViewerSessions, record: &ConfigurationRecord) {
    let message = config_update_message(record);
    let mut sessions = sessions.lock().await;
    sessions.retain(|session_id, tx| {
        if tx.send(message.clone()).is_err() {
            debug!("Viewer {} is gone. Dropping the session.", session_id);
            false
        } else {
            true
        }
    });
}

/// Background task pushing every store change to all connected viewers.
pub fn start_fanout(store: Arc<ConfigStore>, sessions: ViewerSessions) {
    // Subscribe before spawning so no write between spawn and first poll
    // is missed.
    let mut updates = store.subscribe();
    tokio::spawn(async move {
        loop {
            let record = match updates.recv().await {
                Ok(record) => record,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Push fan-out lagged by {}. Sending the latest record.", skipped);
                    store.read().await
                }
                Err(RecvError::Closed) => break,
            };
            fan_out(&sessions, &record).await;
        }
    });
}

/// Runs the configuration API and push channel.
pub async fn run_rest_server(store: Arc<ConfigStore>, port: u16) {
    let sessions: ViewerSessions = Arc::new(Mutex::new(HashMap::new()));
    start_fanout(store.clone(), sessions.clone());

    let state = AppState { store, sessions };
    let app = Router::new()
        .route("/api/config", get(get_config).post(update_config).put(update_config))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    info!("Config server running on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("REST server error: {:?}", e);
    }
}
