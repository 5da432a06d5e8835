//! WebSocket wire contract: inbound client events and outbound server events.
//!
//! Every frame is a JSON object tagged by an `event` field.  Inbound events
//! mirror what a chat client emits over its persistent connection; outbound
//! events are either targeted notifications (delivered through the
//! [`ConnectionRegistry`][crate::registry::ConnectionRegistry] to whichever
//! participants are online) or direct replies on the requesting connection.

use serde::{Deserialize, Serialize};

use crate::storage::{ConversationView, MessageRow};

/// Payload kind for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Link,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Link => "link",
            MessageKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "link" => Some(MessageKind::Link),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

/// Client-supplied metadata for a file message.  The upload itself happens
/// out of band; the core only derives a storage key from the original name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Events sent by a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Offer friendship from `from` to `to`.
    FriendRequest { from: String, to: String },
    /// Accept a pending friend request by record id.
    AcceptRequest { request_id: i64 },
    /// Discard a pending friend request without creating a friendship.
    RejectRequest { request_id: i64 },
    /// List every conversation the user participates in; replied with
    /// [`ServerEvent::DirectConversations`] on the same connection.
    GetDirectConversations { user_id: String },
    /// Find or create the one conversation for this pair; replied with
    /// [`ServerEvent::StartChat`] on the same connection.
    StartConversation { from: String, to: String },
    /// Fetch a conversation's message log; replied with
    /// [`ServerEvent::Messages`] on the same connection.
    GetMessages { conversation_id: i64 },
    /// Append a text or link message and notify both participants.
    TextMessage {
        to: String,
        from: String,
        message: String,
        conversation_id: i64,
        #[serde(rename = "type", default)]
        kind: MessageKind,
    },
    /// Append a file message (storage key derived server-side) and notify
    /// both participants.
    FileMessage {
        to: String,
        from: String,
        file: FileMetadata,
        conversation_id: i64,
    },
    /// Explicit disconnect: mark the user offline and close the socket.
    End { user_id: String },
}

/// Events pushed to live connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Delivered to the recipient of a freshly created friend request.
    NewFriendRequest {
        request_id: i64,
        from: String,
        message: String,
    },
    /// Acknowledgment delivered to the sender of a friend request.
    RequestSent { request_id: i64, message: String },
    /// Delivered to both parties when a request is accepted.
    RequestAccepted {
        request_id: i64,
        friend: String,
        message: String,
    },
    /// Delivered to both participants after a message is durably appended.
    NewMessage {
        conversation_id: i64,
        message: MessageRow,
    },
    /// Reply to `start_conversation`, for both the found and created cases.
    StartChat { conversation: ConversationView },
    /// Reply to `get_direct_conversations`.
    DirectConversations { conversations: Vec<ConversationView> },
    /// Reply to `get_messages`.
    Messages {
        conversation_id: i64,
        messages: Vec<MessageRow>,
    },
    /// Per-request failure, reported only on the requesting connection.
    Error { message: String },
}
