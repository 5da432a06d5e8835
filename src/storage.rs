//! SQLite persistence for the radiance core.
//!
//! Holds the projections the core reads and writes: the user directory
//! (name/email/status plus the last-known connection handle), symmetric
//! friendship edges, pending friend requests, two-party conversations, and
//! their append-only message logs.  The uniqueness guarantees the rest of
//! the core relies on (one pending request per ordered sender/recipient
//! pair, one conversation per unordered participant pair) are enforced
//! here with UNIQUE constraints, not by in-process locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::events::MessageKind;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    NotFound(String),
    AlreadyExists(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Online/offline state mirrored into the directory by the presence tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Online => "Online",
            PresenceStatus::Offline => "Offline",
        }
    }
}

/// Directory row for one user.  `connection_id` is a back-reference to the
/// user's last-known live connection and may be stale; the in-memory
/// registry is the source of truth for reachability.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub connection_id: Option<i64>,
}

/// Display projection of a user, embedded in conversation views.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub status: String,
}

/// A pending friendship offer.  Consumed (deleted) on acceptance.
#[derive(Debug, Clone)]
pub struct FriendRequestRow {
    pub id: i64,
    pub sender_id: String,
    pub recipient_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub participant_a: String,
    pub participant_b: String,
    pub created_at: i64,
}

/// A conversation enriched with participant projections and its message
/// log, in the shape pushed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: i64,
    pub participants: Vec<UserView>,
    pub messages: Vec<MessageRow>,
    pub created_at: i64,
}

/// One chat message.  Owned by its conversation; `id` order is the
/// canonical read order and `created_at` is non-decreasing along it.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    #[serde(rename = "from")]
    pub sender_id: String,
    #[serde(rename = "to")]
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Storage shared across connection tasks.  Waiters yield to the runtime,
/// so one user's persistence never stalls another's event loop turn.
pub type SharedStorage = Arc<Mutex<Storage>>;

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id         TEXT PRIMARY KEY,
                first_name      TEXT,
                last_name       TEXT,
                email           TEXT,
                status          TEXT NOT NULL DEFAULT 'Offline',
                connection_id   INTEGER
            );

            CREATE TABLE IF NOT EXISTS friendships (
                user_id     TEXT NOT NULL,
                friend_id   TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (user_id, friend_id)
            );

            CREATE TABLE IF NOT EXISTS friend_requests (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id   TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                UNIQUE (sender_id, recipient_id)
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_key        TEXT NOT NULL UNIQUE,
                participant_a   TEXT NOT NULL,
                participant_b   TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                recipient_id    TEXT NOT NULL,
                kind            TEXT NOT NULL,
                body            TEXT,
                file_key        TEXT,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, id);
            CREATE INDEX IF NOT EXISTS idx_conversations_a
                ON conversations(participant_a);
            CREATE INDEX IF NOT EXISTS idx_conversations_b
                ON conversations(participant_b);
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // User directory
    // -----------------------------------------------------------------------

    /// Insert or update a directory entry's profile fields.  Presence fields
    /// are left to [`set_presence`][Self::set_presence].
    pub fn upsert_user(
        &self,
        user_id: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO users (user_id, first_name, last_name, email)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 first_name = excluded.first_name,
                 last_name = excluded.last_name,
                 email = excluded.email",
            params![user_id, first_name, last_name, email],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, first_name, last_name, email, status, connection_id
             FROM users WHERE user_id = ?1",
        )?;
        let row = stmt
            .query_row(params![user_id], |row| {
                Ok(UserRow {
                    user_id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    email: row.get(3)?,
                    status: row.get(4)?,
                    connection_id: row.get(5)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Record a presence transition.  Upserts so a user the directory has
    /// never seen still gets a row the projection can resolve later.
    pub fn set_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
        connection_id: Option<i64>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO users (user_id, status, connection_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 status = excluded.status,
                 connection_id = excluded.connection_id",
            params![user_id, status.as_str(), connection_id],
        )?;
        Ok(())
    }

    /// Display projection for one user.  Unknown ids resolve to an offline
    /// placeholder: the core trusts caller-supplied ids, so a conversation
    /// may reference a user the directory has not stored yet.
    pub fn user_view(&self, user_id: &str) -> Result<UserView, StorageError> {
        match self.get_user(user_id)? {
            Some(row) => Ok(UserView {
                user_id: row.user_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                status: row.status,
            }),
            None => Ok(UserView {
                user_id: user_id.to_string(),
                first_name: None,
                last_name: None,
                email: None,
                status: PresenceStatus::Offline.as_str().to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Friendships and friend requests
    // -----------------------------------------------------------------------

    pub fn are_friends(&self, a: &str, b: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
            params![a, b],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn friends_of(&self, user_id: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT friend_id FROM friendships WHERE user_id = ?1 ORDER BY friend_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Persist a new friend request.  A pending request for the same
    /// ordered (sender, recipient) pair already in the table is rejected by
    /// the UNIQUE constraint and surfaces as `AlreadyExists`.
    pub fn insert_friend_request(
        &self,
        sender_id: &str,
        recipient_id: &str,
        created_at: i64,
    ) -> Result<FriendRequestRow, StorageError> {
        let result = self.conn.execute(
            "INSERT INTO friend_requests (sender_id, recipient_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![sender_id, recipient_id, created_at],
        );
        match result {
            Ok(_) => Ok(FriendRequestRow {
                id: self.conn.last_insert_rowid(),
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
                created_at,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(format!(
                    "pending friend request from {sender_id} to {recipient_id}"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_friend_request(&self, id: i64) -> Result<Option<FriendRequestRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sender_id, recipient_id, created_at
             FROM friend_requests WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(FriendRequestRow {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    recipient_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Consume a pending request: add the symmetric friendship edges and
    /// delete the record, all in one transaction.  Either every effect is
    /// durable or none is; an already-present edge is a no-op, not a
    /// second entry.
    pub fn accept_friend_request(
        &mut self,
        id: i64,
        now: i64,
    ) -> Result<FriendRequestRow, StorageError> {
        let tx = self.conn.transaction()?;
        let request = {
            let mut stmt = tx.prepare(
                "SELECT id, sender_id, recipient_id, created_at
                 FROM friend_requests WHERE id = ?1",
            )?;
            stmt.query_row(params![id], |row| {
                Ok(FriendRequestRow {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    recipient_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .optional()?
        };
        let request = match request {
            Some(r) => r,
            None => return Err(StorageError::NotFound(format!("friend request {id}"))),
        };
        tx.execute(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![request.sender_id, request.recipient_id, now],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![request.recipient_id, request.sender_id, now],
        )?;
        tx.execute("DELETE FROM friend_requests WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(request)
    }

    /// Discard a pending request without touching friend sets.
    pub fn delete_friend_request(&self, id: i64) -> Result<FriendRequestRow, StorageError> {
        let request = self
            .get_friend_request(id)?
            .ok_or_else(|| StorageError::NotFound(format!("friend request {id}")))?;
        self.conn
            .execute("DELETE FROM friend_requests WHERE id = ?1", params![id])?;
        Ok(request)
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Return the existing conversation for the unordered pair, or create
    /// an empty one.  The UNIQUE pair key makes the insert an atomic upsert:
    /// two racing calls both land on the winning row.
    pub fn find_or_create_conversation(
        &self,
        a: &str,
        b: &str,
        created_at: i64,
    ) -> Result<(ConversationRow, bool), StorageError> {
        let (key, lo, hi) = pair_key(a, b);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO conversations (pair_key, participant_a, participant_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, lo, hi, created_at],
        )?;
        let row = self
            .conn
            .query_row(
                "SELECT id, participant_a, participant_b, created_at
                 FROM conversations WHERE pair_key = ?1",
                params![key],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        participant_a: row.get(1)?,
                        participant_b: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )?;
        Ok((row, inserted > 0))
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, participant_a, participant_b, created_at
             FROM conversations WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    participant_a: row.get(1)?,
                    participant_b: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Enrich a conversation row with participant projections and its
    /// message log.
    pub fn conversation_view(&self, row: &ConversationRow) -> Result<ConversationView, StorageError> {
        let participants = vec![
            self.user_view(&row.participant_a)?,
            self.user_view(&row.participant_b)?,
        ];
        let messages = self.list_messages(row.id)?;
        Ok(ConversationView {
            id: row.id,
            participants,
            messages,
            created_at: row.created_at,
        })
    }

    pub fn conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationView>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, participant_a, participant_b, created_at
             FROM conversations
             WHERE participant_a = ?1 OR participant_b = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                participant_a: row.get(1)?,
                participant_b: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(self.conversation_view(&row?)?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Append one message to a conversation's log.  The existence check and
    /// the insert share a transaction, so a concurrent append into the same
    /// conversation serializes here and never interleaves partially.
    pub fn append_message(
        &mut self,
        conversation_id: i64,
        sender_id: &str,
        recipient_id: &str,
        kind: MessageKind,
        text: Option<&str>,
        file_key: Option<&str>,
        created_at: i64,
    ) -> Result<MessageRow, StorageError> {
        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }
        tx.execute(
            "INSERT INTO messages
             (conversation_id, sender_id, recipient_id, kind, body, file_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conversation_id,
                sender_id,
                recipient_id,
                kind.as_str(),
                text,
                file_key,
                created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(MessageRow {
            id,
            conversation_id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            kind,
            text: text.map(str::to_string),
            file_key: file_key.map(str::to_string),
            created_at,
        })
    }

    /// The conversation's message log in append order.
    pub fn list_messages(&self, conversation_id: i64) -> Result<Vec<MessageRow>, StorageError> {
        if self.get_conversation(conversation_id)?.is_none() {
            return Err(StorageError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, sender_id, recipient_id, kind, body, file_key, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            let kind: String = row.get(4)?;
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                recipient_id: row.get(3)?,
                kind: MessageKind::parse(&kind).unwrap_or(MessageKind::Text),
                text: row.get(5)?,
                file_key: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Canonical key for an unordered participant pair.  Returns the key and
/// the pair in stored order.
pub fn pair_key<'a>(a: &'a str, b: &'a str) -> (String, &'a str, &'a str) {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (format!("{lo}:{hi}"), lo, hi)
}

/// Server-assigned message timestamp, Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Database file location inside the data directory.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("radiance.db")
}
