//! # Configuration
//!
//! Command-line flags, each with an environment-variable fallback. A `.env`
//! file in the working directory is loaded by `main` before parsing.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use chat_protocol::Limits;
use clap::Parser;
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::warn;

use crate::gateway::{GatewayOptions, DEFAULT_OUTBOUND_CAPACITY};

/// Origin allowed in debug mode (the frontend dev server).
const DEBUG_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "chat-gateway",
    version,
    about = "WebSocket gateway streaming generated chat replies"
)]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Model the backend generates with.
    #[arg(long = "model", env = "DEFAULT_MODEL_NAME", default_value = "llama3.1")]
    pub model_name: String,

    /// Base URL of the Ollama server.
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    /// Longest accepted `userMsg`, in characters.
    #[arg(long, env = "MAX_MESSAGE_LENGTH", default_value_t = 1000)]
    pub max_message_length: usize,

    /// Longest accepted `userMsgId`, in characters.
    #[arg(long, env = "MAX_ID_LENGTH", default_value_t = 50)]
    pub max_id_length: usize,

    /// Comma-separated CORS origins. Ignored in debug mode.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Verbose logging and a permissive dev CORS origin.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Frames buffered per connection before generation pauses.
    #[arg(long, env = "OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Upper bound on one generation, start to finish.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,
}

/// The subset of [`Config`] exposed on `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct PublicConfig {
    pub debug: bool,
    pub model_name: String,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid HOST {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_id_length: self.max_id_length,
            max_message_length: self.max_message_length,
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            limits: self.limits(),
            outbound_capacity: self.outbound_capacity.max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Origins allowed to call the HTTP endpoints cross-origin.
    pub fn origins(&self) -> Vec<String> {
        if self.debug {
            return vec![DEBUG_ORIGIN.to_owned()];
        }
        self.allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .origins()
            .into_iter()
            .filter_map(|origin| match HeaderValue::from_str(&origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    }

    pub fn public(&self) -> PublicConfig {
        PublicConfig {
            debug: self.debug,
            model_name: self.model_name.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}
