//! # Connection Registry
//!
//! Process-wide table of live WebSocket connections, keyed by
//! [`ConnectionId`]. The table only holds each connection's outbound frame
//! queue; the socket itself stays with the connection's session and writer
//! task.
//!
//! Uses [`DashMap`] so that registering, unregistering and counting lock a
//! single shard for the duration of the map operation and never while a
//! frame is being delivered.

use std::fmt;
use std::sync::Arc;

use chat_protocol::ResponseFrame;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};
use uuid::Uuid;

/// Sender half of a connection's bounded outbound frame queue.
pub type FrameTx = mpsc::Sender<ResponseFrame>;

/// Unique, never reused identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A fresh random (v4) ID.
    pub fn generate() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Non-owning handle to a live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: FrameTx,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: FrameTx) -> Self {
        Self { id, tx }
    }

    /// Queues a frame without waiting for capacity.
    pub fn try_send(&self, frame: ResponseFrame) -> Result<(), TrySendError<ResponseFrame>> {
        self.tx.try_send(frame)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two connections were given the same ID. This is a bookkeeping bug.
    #[error("connection {0} is already registered")]
    DuplicateId(ConnectionId),
}

/// Live connections by ID. Shared behind an `Arc` by the gateway and every
/// [`Registration`] guard.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Connection) -> Result<(), RegistryError> {
        match self.connections.entry(connection.id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateId(connection.id)),
            Entry::Vacant(slot) => {
                slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Registers `connection` and returns a guard that unregisters it when
    /// dropped.
    pub fn register_scoped(
        self: &Arc<Self>,
        connection: Connection,
    ) -> Result<Registration, RegistryError> {
        let id = connection.id;
        self.register(connection)?;
        info!(conn_id = %id, active = self.count(), "Connection registered");
        Ok(Registration {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Removes `id`. Returns whether an entry was removed; removing an
    /// absent ID is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Queues `frame` on every registered connection and returns how many
    /// accepted it.
    ///
    /// A connection whose queue is closed is unregistered; one whose queue
    /// is full misses this frame. One failure never stops delivery to the
    /// rest.
    pub fn broadcast(&self, frame: &ResponseFrame) -> usize {
        let targets: Vec<Connection> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for connection in targets {
            match connection.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        conn_id = %connection.id,
                        "Outbound queue full; broadcast frame dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(conn_id = %connection.id, "Broadcast to closed connection");
                    dead.push(connection.id);
                }
            }
        }

        for id in dead {
            self.unregister(&id);
        }
        delivered
    }
}

/// Keeps a connection registered for as long as it is alive.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister(&self.id) {
            info!(conn_id = %self.id, active = self.registry.count(), "Connection unregistered");
        }
    }
}
