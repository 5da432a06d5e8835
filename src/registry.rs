//! The Connection Registry: authenticated user id -> one live connection.
//!
//! Source of truth for "is this user reachable right now".  Each connected
//! gateway task registers its outbound channel here; every other component
//! resolves through the registry before emitting a delivery event, and a
//! miss is a normal branch, never a fault.
//!
//! Reconnect semantics are last-writer-wins per user id: a register always
//! overwrites, and the teardown of a superseded connection carries its own
//! connection id so it cannot clobber the entry the newer connection owns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::events::ServerEvent;
use crate::{logging, rlog};

/// Handle to one live duplex connection: a process-unique id plus the
/// sending half of the connection's outbound event channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: u64,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Best-effort enqueue.  Returns false when the connection task has
    /// already shut down its receiving half.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
    next_conn_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`, unconditionally replacing any
    /// prior handle, and return the new connection id.
    pub async fn register(
        &self,
        user_id: &str,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ConnectionHandle { conn_id, tx };
        let previous = {
            let mut connections = self.connections.write().await;
            connections.insert(user_id.to_string(), handle)
        };
        if let Some(prev) = previous {
            rlog!(
                "registry: {} reconnected, handle {} supersedes {}",
                logging::user_id(user_id),
                conn_id,
                prev.conn_id
            );
        }
        conn_id
    }

    /// Pure in-memory lookup; never touches the directory.
    pub async fn resolve(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(user_id).cloned()
    }

    /// Clear the mapping for `user_id` regardless of which connection owns
    /// it.  Idempotent: unknown users are a no-op.
    pub async fn unregister(&self, user_id: &str) -> bool {
        self.connections.write().await.remove(user_id).is_some()
    }

    /// Clear the mapping only if it still belongs to `conn_id`.  A
    /// connection that was superseded by a reconnect finds someone else's
    /// handle here and leaves it alone.
    pub async fn unregister_conn(&self, user_id: &str, conn_id: u64) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                connections.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Resolve and deliver in one step.  Returns false when the user is
    /// offline or the connection already closed; callers treat that as a
    /// normal branch.
    pub async fn send(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.resolve(user_id).await {
            Some(handle) => handle.deliver(event),
            None => false,
        }
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
