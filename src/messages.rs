//! The Message Router: durable append, then best-effort fan-out.
//!
//! A message is persisted (and the append committed) before any delivery
//! event is emitted, so a client can always re-fetch what it was shown.
//! Delivery to the two participants is independent: one side being offline
//! or mid-disconnect never affects persistence or the other side.

use std::path::Path;

use rand::Rng;

use crate::events::{FileMetadata, MessageKind, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::storage::{now_millis, MessageRow, SharedStorage, StorageError};
use crate::{logging, rlog};

#[derive(Clone)]
pub struct MessageRouter {
    storage: SharedStorage,
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub fn new(storage: SharedStorage, registry: ConnectionRegistry) -> Self {
        Self { storage, registry }
    }

    /// Append a text or link message and notify both participants.
    pub async fn send_text(
        &self,
        conversation_id: i64,
        from: &str,
        to: &str,
        kind: MessageKind,
        text: &str,
    ) -> Result<MessageRow, StorageError> {
        let message = {
            let mut storage = self.storage.lock().await;
            storage.append_message(
                conversation_id,
                from,
                to,
                kind,
                Some(text),
                None,
                now_millis(),
            )?
        };
        self.fan_out(&message).await;
        Ok(message)
    }

    /// Append a file message.  Only the storage key and the message record
    /// are in scope here; the content upload is an external collaborator
    /// keyed by the same derived name.
    pub async fn send_file(
        &self,
        conversation_id: i64,
        from: &str,
        to: &str,
        file: &FileMetadata,
    ) -> Result<MessageRow, StorageError> {
        let message = {
            let mut storage = self.storage.lock().await;
            // Timestamp assigned under the lock, so append order and
            // created_at order agree.
            let created_at = now_millis();
            let key = derive_storage_key(&file.name, created_at);
            storage.append_message(
                conversation_id,
                from,
                to,
                MessageKind::File,
                None,
                Some(&key),
                created_at,
            )?
        };
        self.fan_out(&message).await;
        Ok(message)
    }

    /// Ordered read of a conversation's log.
    pub async fn list_messages(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<MessageRow>, StorageError> {
        let storage = self.storage.lock().await;
        storage.list_messages(conversation_id)
    }

    /// Push `new_message` to recipient and sender, each independently and
    /// best-effort.  Runs only after the append committed.
    async fn fan_out(&self, message: &MessageRow) {
        for party in [&message.recipient_id, &message.sender_id] {
            let delivered = self
                .registry
                .send(
                    party,
                    ServerEvent::NewMessage {
                        conversation_id: message.conversation_id,
                        message: message.clone(),
                    },
                )
                .await;
            if !delivered {
                rlog!(
                    "router: {} offline, message {} in {} not delivered live",
                    logging::user_id(party),
                    message.id,
                    logging::conv_id(message.conversation_id)
                );
            }
        }
    }
}

/// Derive a content-store key for an uploaded file: the server-assigned
/// timestamp, a random four-digit suffix, and the original extension.
pub fn derive_storage_key(original_name: &str, created_at: i64) -> String {
    let extension = Path::new(original_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{created_at}_{suffix:04}{extension}")
}
