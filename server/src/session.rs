//! # Connection Session
//!
//! Drives one connection's request/response cycle:
//!
//! ```text
//! Open ──frame──▶ decode ──▶ validate ──▶ ProcessingRequest ──▶ Open
//!   │               │err         │err          │
//!   │               ▼            ▼             ▼
//!   │          error frame   error frame   received, stream*, end | error
//!   ▼
//! Closed (inbound ended, writer gone, or shutdown)
//! ```
//!
//! Only one request is in flight per connection, and every frame for a
//! connection is queued from this one task, so frames reach the writer in
//! exactly the order they were produced.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use chat_protocol::{codec, ChatRequest, Limits, ResponseFrame};
use futures::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{self, BackendError, GenerationBackend};
use crate::registry::{ConnectionId, FrameTx};

pub const MALFORMED_INPUT_MESSAGE: &str = "Invalid message format: expecting JSON";
pub const INVALID_REQUEST_MESSAGE: &str = "Invalid message format: check required fields";
pub const BACKEND_FAILURE_MESSAGE: &str = "Error processing your request. Please try again.";

/// How many characters of user text go into log lines.
const LOG_PREVIEW_CHARS: usize = 50;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The inbound stream ended: the client closed or the transport failed.
    Disconnected,
    /// The writer task is gone, so nothing more can reach the client.
    WriterClosed,
    /// The gateway is shutting down.
    Shutdown,
}

enum Reply {
    Complete { fragments: usize },
    Failed(BackendError),
}

/// One connection's request loop. Owns the sender side of the
/// connection's outbound queue; the writer task owns the socket.
pub struct Session {
    conn_id: ConnectionId,
    backend: Arc<dyn GenerationBackend>,
    limits: Limits,
    outbound: FrameTx,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        conn_id: ConnectionId,
        backend: Arc<dyn GenerationBackend>,
        limits: Limits,
        outbound: FrameTx,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            conn_id,
            backend,
            limits,
            outbound,
            shutdown,
        }
    }

    /// Runs until the connection closes. `inbound` yields the payload of
    /// each data frame and ends when the client disconnects.
    pub async fn run<S>(self, mut inbound: S) -> SessionEnd
    where
        S: Stream<Item = Bytes> + Unpin + Send,
    {
        // Frames read while a request was in flight, oldest first.
        let mut pending = VecDeque::new();

        loop {
            let frame = match pending.pop_front() {
                Some(frame) => frame,
                None => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return SessionEnd::Shutdown,
                    frame = inbound.next() => match frame {
                        Some(frame) => frame,
                        None => return SessionEnd::Disconnected,
                    },
                },
            };

            if let Err(end) = self.handle_frame(&frame, &mut inbound, &mut pending).await {
                return end;
            }
        }
    }

    async fn handle_frame<S>(
        &self,
        frame: &[u8],
        inbound: &mut S,
        pending: &mut VecDeque<Bytes>,
    ) -> Result<(), SessionEnd>
    where
        S: Stream<Item = Bytes> + Unpin + Send,
    {
        let raw = match codec::decode(frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(conn_id = %self.conn_id, "Invalid JSON: {}", e);
                return self.send(ResponseFrame::error(MALFORMED_INPUT_MESSAGE)).await;
            }
        };

        let request = match self.limits.validate(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(conn_id = %self.conn_id, "Message validation error: {}", e);
                return self.send(ResponseFrame::error(INVALID_REQUEST_MESSAGE)).await;
            }
        };

        self.process(request, inbound, pending).await
    }

    /// Emits `received`, the generated fragments, and one terminal frame.
    ///
    /// While generation runs, the inbound stream keeps being read so that a
    /// disconnect cancels it. Frames that arrive meanwhile are queued on
    /// `pending` and handled after this request finishes.
    async fn process<S>(
        &self,
        request: ChatRequest,
        inbound: &mut S,
        pending: &mut VecDeque<Bytes>,
    ) -> Result<(), SessionEnd>
    where
        S: Stream<Item = Bytes> + Unpin + Send,
    {
        let assistant_msg_id = new_assistant_msg_id();
        info!(
            conn_id = %self.conn_id,
            user_msg_id = request.user_msg_id(),
            assistant_msg_id = %assistant_msg_id,
            "Processing message: {}",
            preview(request.user_msg())
        );

        self.send(ResponseFrame::received(&request, &assistant_msg_id))
            .await?;

        let reply = {
            let generation = self.stream_reply(&request, &assistant_msg_id);
            tokio::pin!(generation);

            // Returning from inside this loop drops `generation`, and with
            // it the backend's fragment stream.
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Err(SessionEnd::Shutdown),
                    _ = self.outbound.closed() => return Err(SessionEnd::WriterClosed),
                    next = inbound.next() => match next {
                        Some(frame) => pending.push_back(frame),
                        None => {
                            info!(
                                conn_id = %self.conn_id,
                                assistant_msg_id = %assistant_msg_id,
                                "Client left mid-generation; cancelling"
                            );
                            return Err(SessionEnd::Disconnected);
                        }
                    },
                    reply = &mut generation => break reply?,
                }
            }
        };

        match reply {
            Reply::Complete { fragments } => {
                info!(
                    conn_id = %self.conn_id,
                    assistant_msg_id = %assistant_msg_id,
                    fragments,
                    "Response complete"
                );
                self.send(ResponseFrame::end(&request, &assistant_msg_id))
                    .await
            }
            Reply::Failed(e) => {
                error!(
                    conn_id = %self.conn_id,
                    assistant_msg_id = %assistant_msg_id,
                    "LLM streaming error: {}",
                    e
                );
                self.send(ResponseFrame::request_error(
                    &request,
                    &assistant_msg_id,
                    BACKEND_FAILURE_MESSAGE,
                ))
                .await
            }
        }
    }

    async fn stream_reply(
        &self,
        request: &ChatRequest,
        assistant_msg_id: &str,
    ) -> Result<Reply, SessionEnd> {
        let mut fragments = match backend::generate(self.backend.as_ref(), request.user_msg()).await
        {
            Ok(fragments) => fragments,
            Err(e) => return Ok(Reply::Failed(e)),
        };

        let mut count = 0;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    self.send(ResponseFrame::stream(request, assistant_msg_id, fragment))
                        .await?;
                    count += 1;
                }
                Err(e) => return Ok(Reply::Failed(e)),
            }
        }
        Ok(Reply::Complete { fragments: count })
    }

    /// Queues a frame, waiting for room in the outbound queue.
    async fn send(&self, frame: ResponseFrame) -> Result<(), SessionEnd> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SessionEnd::Shutdown),
            sent = self.outbound.send(frame) => sent.map_err(|_| SessionEnd::WriterClosed),
        }
    }
}

/// Short random ID for one assistant reply.
fn new_assistant_msg_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(LOG_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
