use super::room::Outbound;
use super::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::BearerToken;
use crate::signaling::{PeerId, SignalingMessage};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Bearer token (browsers cannot set headers on WebSocket upgrades)
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /ws
/// Upgrade to a signaling socket. Requires a bearer token that has not expired.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let token = params.token.or(header_token).unwrap_or_default();
    if let Err(e) = BearerToken::parse(&token) {
        warn!("Rejected signaling connection: {}", e);
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse { error: e.to_string() }),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer_id = PeerId::generate();
    info!("Signaling client connected: {}", peer_id);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();

    state.peers.write().await.insert(peer_id.clone(), tx);

    // Writer: drains this peer's queue; ends once the queue's sender is removed
    let writer_peer = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {}: {}", message.event_name(), e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Socket write to {} failed: {}", writer_peer, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                Ok(message) => {
                    debug!("<- {} from {}", message.event_name(), peer_id);
                    let outbound = state.rooms.write().await.handle(&peer_id, message, Utc::now());
                    state.deliver(outbound).await;
                }
                Err(e) => {
                    warn!("Unparseable signaling frame from {}: {}", peer_id, e);
                    state
                        .deliver(vec![Outbound {
                            to: peer_id.clone(),
                            message: SignalingMessage::Error {
                                message: format!("invalid message: {}", e),
                            },
                        }])
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Socket error from {}: {}", peer_id, e);
                break;
            }
        }
    }

    let outbound = state.rooms.write().await.disconnect(&peer_id);
    state.peers.write().await.remove(&peer_id);
    state.deliver(outbound).await;

    if let Err(e) = writer.await {
        error!("Writer task for {} panicked: {}", peer_id, e);
    }
    info!("Signaling client disconnected: {}", peer_id);
}

/// GET /sessions/:session_id/status
/// Participants and transcript activity of a live session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let rooms = state.rooms.read().await;

    match rooms.status(&session_id) {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
