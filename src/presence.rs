//! Mirrors registry transitions into the user directory.
//!
//! The in-memory registry stays the source of truth for reachability; the
//! directory's `status` and `connection_id` columns are a projection other
//! services read.  Directory writes are best-effort relative to delivery:
//! a failed write is logged and the connection flow continues.

use crate::storage::{PresenceStatus, SharedStorage};
use crate::{logging, rlog};

#[derive(Clone)]
pub struct PresenceTracker {
    storage: SharedStorage,
}

impl PresenceTracker {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// `Offline -> Online` on register.
    pub async fn went_online(&self, user_id: &str, conn_id: u64) {
        let result = {
            let storage = self.storage.lock().await;
            storage.set_presence(user_id, PresenceStatus::Online, Some(conn_id as i64))
        };
        match result {
            Ok(()) => rlog!("presence: {} online", logging::user_id(user_id)),
            Err(e) => rlog!(
                "presence: failed to mark {} online: {e}",
                logging::user_id(user_id)
            ),
        }
    }

    /// `Online -> Offline` on explicit disconnect or dead-connection
    /// detection.
    pub async fn went_offline(&self, user_id: &str) {
        let result = {
            let storage = self.storage.lock().await;
            storage.set_presence(user_id, PresenceStatus::Offline, None)
        };
        match result {
            Ok(()) => rlog!("presence: {} offline", logging::user_id(user_id)),
            Err(e) => rlog!(
                "presence: failed to mark {} offline: {e}",
                logging::user_id(user_id)
            ),
        }
    }
}
