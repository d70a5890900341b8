//! # Generation Backend
//!
//! The narrow contract the gateway needs from a text generator: given a
//! prompt, produce a lazy, ordered, finite stream of text fragments that
//! either runs to completion or ends with a single error item.
//!
//! Implementations are injected into the [`Gateway`](crate::gateway::Gateway)
//! as `Arc<dyn GenerationBackend>`, so tests can substitute scripted
//! backends for the real one.

pub mod ollama;

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;

pub use ollama::OllamaBackend;

/// Fragments of one generation. An `Err` item is terminal.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// Everything that can go wrong talking to a generator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or the client could not be built.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with a non-success HTTP status.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend reported a failure inside the stream.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The backend's output could not be understood.
    #[error("malformed backend output: {0}")]
    Protocol(String),

    /// The connection to the backend broke mid-stream.
    #[error("backend transport error: {0}")]
    Transport(String),
}

/// Model description reported to health and metrics endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub is_healthy: bool,
    pub provider: String,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts generating a reply to `prompt`.
    ///
    /// Dropping the returned stream must release whatever the backend holds
    /// for this generation.
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, BackendError>;

    /// Whether the backend is currently able to serve requests.
    async fn health(&self) -> bool;

    fn model_name(&self) -> &str;

    fn provider(&self) -> &str;

    async fn describe(&self) -> ModelInfo {
        ModelInfo {
            model_name: self.model_name().to_owned(),
            is_healthy: self.health().await,
            provider: self.provider().to_owned(),
        }
    }
}

/// Calls [`GenerationBackend::generate`] and normalizes the result: empty
/// fragments are dropped and nothing is yielded after the first error.
pub async fn generate(
    backend: &dyn GenerationBackend,
    prompt: &str,
) -> Result<FragmentStream, BackendError> {
    backend.generate(prompt).await.map(normalize)
}

pub(crate) fn normalize<S>(stream: S) -> FragmentStream
where
    S: Stream<Item = Result<String, BackendError>> + Send + 'static,
{
    let mut failed = false;
    stream
        .take_while(move |item| {
            let keep = !failed;
            failed |= item.is_err();
            future::ready(keep)
        })
        .filter(|item| future::ready(!matches!(item, Ok(fragment) if fragment.is_empty())))
        .boxed()
}
