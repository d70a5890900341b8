//! # Gateway
//!
//! Composition root for live connections. For each upgraded WebSocket the
//! gateway:
//! 1. Assigns a fresh [`ConnectionId`] and registers the connection
//! 2. Splits the socket into a sink (outbound) and a stream (inbound)
//! 3. Spawns a writer task that encodes queued frames onto the sink
//! 4. Runs a [`Session`] over the inbound stream on the current task
//! 5. On exit: cancels generation, unregisters, and lets the writer drain

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use chat_protocol::{codec, Limits, ResponseFrame};
use futures::stream::{self, SplitSink, SplitStream, Stream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{GenerationBackend, ModelInfo};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::session::{Session, SessionEnd};

/// Default bound on frames queued for one connection's writer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Per-connection settings handed to every session.
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub limits: Limits,
    pub outbound_capacity: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Shared by every connection handler; cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    backend: Arc<dyn GenerationBackend>,
    options: GatewayOptions,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(backend: Arc<dyn GenerationBackend>, options: GatewayOptions) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            backend,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    pub async fn is_healthy(&self) -> bool {
        self.backend.health().await
    }

    pub async fn model_info(&self) -> ModelInfo {
        self.backend.describe().await
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Queues `frame` on every live connection.
    pub fn broadcast(&self, frame: &ResponseFrame) -> usize {
        self.registry.broadcast(frame)
    }

    /// Stops every session at its next suspension point.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Manages the full lifecycle of one upgraded WebSocket connection.
    pub async fn handle_socket(self, socket: WebSocket) {
        self.serve(ConnectionId::generate(), socket).await
    }

    async fn serve(self, conn_id: ConnectionId, socket: WebSocket) {
        info!(conn_id = %conn_id, "New connection");

        let (ws_sink, ws_stream) = socket.split();
        let (tx, rx) = mpsc::channel::<ResponseFrame>(self.options.outbound_capacity);

        // Dropping this guard is the single place the connection leaves
        // the registry, whichever way the session ends. On a duplicate ID
        // the socket halves drop here, closing only this connection.
        let registration = match self
            .registry
            .register_scoped(Connection::new(conn_id, tx.clone()))
        {
            Ok(registration) => registration,
            Err(e) => {
                error!(
                    conn_id = %conn_id,
                    "Registry invariant violated, closing connection: {}", e
                );
                return;
            }
        };

        let writer = tokio::spawn(write_frames(conn_id, ws_sink, rx));

        let session = Session::new(
            conn_id,
            Arc::clone(&self.backend),
            self.options.limits,
            tx,
            self.shutdown.child_token(),
        );
        match session.run(inbound_frames(conn_id, ws_stream)).await {
            SessionEnd::Disconnected => info!(conn_id = %conn_id, "Connection closed by client"),
            SessionEnd::WriterClosed => info!(conn_id = %conn_id, "Connection lost while writing"),
            SessionEnd::Shutdown => info!(conn_id = %conn_id, "Connection closed for shutdown"),
        }

        drop(registration);

        // All senders are gone now, so the writer flushes what is queued
        // and closes the socket.
        if let Err(e) = writer.await {
            error!(conn_id = %conn_id, "Writer task failed: {}", e);
        }
    }
}

/// Payloads of the client's data frames, ending at the first close frame
/// or transport error. Pings and pongs are answered by axum and skipped.
fn inbound_frames(
    conn_id: ConnectionId,
    ws_stream: SplitStream<WebSocket>,
) -> impl Stream<Item = Bytes> + Unpin + Send {
    Box::pin(stream::unfold(ws_stream, move |mut ws_stream| async move {
        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some((Bytes::copy_from_slice(text.as_str().as_bytes()), ws_stream));
                }
                Some(Ok(Message::Binary(data))) => return Some((data, ws_stream)),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, "WebSocket read error: {}", e);
                    return None;
                }
            }
        }
    }))
}

/// Drains the outbound queue onto the socket, one JSON text frame per
/// queued frame, in queue order.
async fn write_frames(
    conn_id: ConnectionId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ResponseFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let text = match codec::encode(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!(conn_id = %conn_id, "Serialize error: {}", e);
                continue;
            }
        };
        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
            debug!(conn_id = %conn_id, "WebSocket write failed: {}", e);
            return;
        }
    }
    let _ = ws_sink.close().await;
}
