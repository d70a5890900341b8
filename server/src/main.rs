use std::sync::Arc;

use anyhow::Context;
use chat_gateway::{
    backend::OllamaBackend, config::Config, gateway::Gateway, router, state::AppState,
};
use clap::Parser;
use tracing::info;

// ─── Main ────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let default_filter = if config.debug {
        "chat_gateway=debug"
    } else {
        "chat_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!("Starting chat gateway");
    info!("Model: {} via {}", config.model_name, config.ollama_url);
    info!("Debug mode: {}", config.debug);
    info!("Allowed origins: {:?}", config.origins());

    let backend = OllamaBackend::new(
        config.ollama_url.clone(),
        config.model_name.clone(),
        config.request_timeout(),
    )
    .context("failed to build the Ollama client")?;
    let gateway = Gateway::new(Arc::new(backend), config.gateway_options());

    let addr = config.bind_addr()?;
    let app = router(AppState::new(gateway.clone(), config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("💬 Chat gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await
        .context("server error")?;

    info!("Chat gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, after telling every session to stop.
async fn shutdown_signal(gateway: Gateway) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        active = gateway.connection_count(),
        "Shutdown requested, closing connections"
    );
    gateway.shutdown();
}
