//! # Ollama Backend
//!
//! Streams completions from an Ollama server's `/api/generate` endpoint.
//!
//! Ollama answers a streaming request with newline-delimited JSON (NDJSON),
//! one object per line:
//!
//! ```text
//! {"model":"llama3.1","response":"Hi","done":false}
//! {"model":"llama3.1","response":" there","done":false}
//! {"model":"llama3.1","response":"","done":true}
//! ```
//!
//! A line carrying an `"error"` field ends the stream with a failure.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{normalize, BackendError, FragmentStream, GenerationBackend};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client bound to one Ollama server and one model.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaBackend {
    /// `request_timeout` bounds a whole generation, including the time
    /// spent streaming the body.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, BackendError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %self.model, "Requesting generation from {}", url);

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(normalize(ndjson_fragments(response.bytes_stream())))
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Ollama health check failed: {}", e);
                false
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "ollama"
    }
}

// ─── NDJSON Parsing ─────────────────────────────────────────────

enum Line {
    Skip,
    Fragment(String),
    Done(String),
}

/// State threaded through the `unfold` below.
struct NdjsonState<E> {
    stream: BoxStream<'static, Result<Bytes, E>>,
    buf: BytesMut,
    done: bool,
}

/// Converts an NDJSON byte stream into fragments. Lines may be split
/// across chunks arbitrarily.
fn ndjson_fragments<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, BackendError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = NdjsonState {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line = st.buf.split_to(pos + 1);
                match parse_line(&line) {
                    Ok(Line::Skip) => continue,
                    Ok(Line::Fragment(text)) => return Some((Ok(text), st)),
                    Ok(Line::Done(text)) => {
                        st.done = true;
                        return Some((Ok(text), st));
                    }
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(BackendError::Transport(e.to_string())), st));
                }
                None => {
                    // The final line may lack its newline.
                    st.done = true;
                    let rest = st.buf.split();
                    let item = match parse_line(&rest) {
                        Ok(Line::Done(text)) => Ok(text),
                        Ok(_) => Err(BackendError::Protocol(
                            "stream ended before completion".into(),
                        )),
                        Err(e) => Err(e),
                    };
                    return Some((item, st));
                }
            }
        }
    })
}

fn parse_line(line: &[u8]) -> Result<Line, BackendError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(Line::Skip);
    }

    let chunk: GenerateChunk =
        serde_json::from_slice(line).map_err(|e| BackendError::Protocol(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(BackendError::Generation(error));
    }
    if chunk.done {
        Ok(Line::Done(chunk.response))
    } else {
        Ok(Line::Fragment(chunk.response))
    }
}
