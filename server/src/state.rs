//! # Server State
//!
//! Holds the shared application state handed to every axum handler:
//! - **Gateway**: the connection registry, the generation backend and the
//!   per-connection settings
//! - **Config**: the parsed process configuration, for introspection
//!
//! Cloning is cheap; both fields are reference-counted.

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::Gateway;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(gateway: Gateway, config: Config) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
        }
    }
}
