//! # Chat Gateway
//!
//! Accepts WebSocket connections, validates chat requests, and streams the
//! generation backend's reply back to the requesting connection.

pub mod api;
pub mod backend;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod registry;
pub mod session;
pub mod state;

use axum::{routing::get, Router};

use crate::state::AppState;

/// All HTTP and WebSocket routes, with CORS from the state's config.
pub fn router(state: AppState) -> Router {
    let cors = state.config.cors_layer();
    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .layer(cors)
        .with_state(state)
}
