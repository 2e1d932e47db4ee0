// HTTP and WebSocket request handlers
use crate::presentation::app_state::AppState;
use crate::presentation::relay_session::run_peer;
use axum::{
    Json,
    extract::{State, ws::WebSocketUpgrade},
    response::IntoResponse,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub peers: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        peers: state.relay.peer_count().await,
    })
}

/// Upgrade any path to a relay peer connection
pub async fn relay_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| run_peer(socket, relay))
}
