//! Conversation lookup and creation for unordered participant pairs.
//!
//! The "one conversation per pair" invariant lives in the store (UNIQUE
//! pair key), so two participants racing to start the same conversation
//! both converge on the row the insert race produced.

use crate::storage::{now_millis, ConversationView, SharedStorage, StorageError};
use crate::{logging, rlog};

#[derive(Debug)]
pub enum ConversationError {
    /// A conversation needs two distinct participants.
    SameParticipants,
    Storage(StorageError),
}

impl std::fmt::Display for ConversationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationError::SameParticipants => {
                write!(f, "a conversation needs two distinct participants")
            }
            ConversationError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConversationError {}

impl From<StorageError> for ConversationError {
    fn from(e: StorageError) -> Self {
        ConversationError::Storage(e)
    }
}

#[derive(Clone)]
pub struct ConversationManager {
    storage: SharedStorage,
}

impl ConversationManager {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Return the one conversation for this unordered pair, creating it if
    /// needed.  Order-independent: `(a, b)` and `(b, a)` land on the same
    /// row.  The bool reports whether this call created it.
    pub async fn find_or_create(
        &self,
        a: &str,
        b: &str,
    ) -> Result<(ConversationView, bool), ConversationError> {
        if a == b {
            return Err(ConversationError::SameParticipants);
        }
        let (view, created) = {
            let storage = self.storage.lock().await;
            let (row, created) = storage.find_or_create_conversation(a, b, now_millis())?;
            (storage.conversation_view(&row)?, created)
        };
        if created {
            rlog!(
                "conversations: created {} for {} and {}",
                logging::conv_id(view.id),
                logging::user_id(a),
                logging::user_id(b)
            );
        }
        Ok((view, created))
    }

    /// Every conversation the user participates in, with both participants
    /// resolved to display projections.  Read enrichment only.
    pub async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationView>, ConversationError> {
        let storage = self.storage.lock().await;
        Ok(storage.conversations_for_user(user_id)?)
    }
}
