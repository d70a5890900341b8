//! # WebSocket Handlers
//!
//! Upgrades `GET /ws` requests and hands each socket to the
//! [`Gateway`](crate::gateway::Gateway), which owns the connection from
//! then on.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::debug;

use crate::state::AppState;

/// `GET /ws`: Upgrades the HTTP connection to a WebSocket connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    debug!("WebSocket upgrade requested");
    let gateway = state.gateway;
    ws.on_upgrade(move |socket| gateway.handle_socket(socket))
}
