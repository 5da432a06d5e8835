//! Friend request lifecycle: create, accept, reject.
//!
//! Acceptance turns a pending request into a symmetric friendship edge in
//! one storage transaction, then notifies both parties if they are
//! reachable.  Notification is strictly per-party: either side being
//! offline never affects the other side or the persisted outcome.

use crate::events::ServerEvent;
use crate::registry::ConnectionRegistry;
use crate::storage::{now_millis, FriendRequestRow, SharedStorage, StorageError};
use crate::{logging, rlog};

#[derive(Debug)]
pub enum FriendError {
    /// A user cannot befriend themselves.
    SelfRequest,
    /// The pair already share a friendship edge.
    AlreadyFriends,
    Storage(StorageError),
}

impl std::fmt::Display for FriendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FriendError::SelfRequest => write!(f, "cannot send a friend request to yourself"),
            FriendError::AlreadyFriends => write!(f, "already friends"),
            FriendError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FriendError {}

impl From<StorageError> for FriendError {
    fn from(e: StorageError) -> Self {
        FriendError::Storage(e)
    }
}

#[derive(Clone)]
pub struct FriendRequestCoordinator {
    storage: SharedStorage,
    registry: ConnectionRegistry,
}

impl FriendRequestCoordinator {
    pub fn new(storage: SharedStorage, registry: ConnectionRegistry) -> Self {
        Self { storage, registry }
    }

    /// Persist a friend request and notify each party that resolves to a
    /// live connection.  The record persists whether or not anyone is
    /// online.
    pub async fn send_request(
        &self,
        from: &str,
        to: &str,
    ) -> Result<FriendRequestRow, FriendError> {
        if from == to {
            return Err(FriendError::SelfRequest);
        }
        let request = {
            let storage = self.storage.lock().await;
            if storage.are_friends(from, to)? {
                return Err(FriendError::AlreadyFriends);
            }
            storage.insert_friend_request(from, to, now_millis())?
        };
        rlog!(
            "friends: request {} from {} to {}",
            request.id,
            logging::user_id(from),
            logging::user_id(to)
        );

        self.registry
            .send(
                to,
                ServerEvent::NewFriendRequest {
                    request_id: request.id,
                    from: from.to_string(),
                    message: "New Friend Request Received".to_string(),
                },
            )
            .await;
        self.registry
            .send(
                from,
                ServerEvent::RequestSent {
                    request_id: request.id,
                    message: "Request sent successfully".to_string(),
                },
            )
            .await;
        Ok(request)
    }

    /// Consume a pending request: both friendship edges and the record
    /// deletion commit as one unit, then `request_accepted` goes to each
    /// participant that is online.
    pub async fn accept_request(&self, request_id: i64) -> Result<FriendRequestRow, FriendError> {
        let request = {
            let mut storage = self.storage.lock().await;
            storage.accept_friend_request(request_id, now_millis())?
        };
        rlog!(
            "friends: request {} accepted, {} <-> {}",
            request.id,
            logging::user_id(&request.sender_id),
            logging::user_id(&request.recipient_id)
        );

        for (party, friend) in [
            (&request.sender_id, &request.recipient_id),
            (&request.recipient_id, &request.sender_id),
        ] {
            self.registry
                .send(
                    party,
                    ServerEvent::RequestAccepted {
                        request_id: request.id,
                        friend: friend.clone(),
                        message: "Friend Request Accepted".to_string(),
                    },
                )
                .await;
        }
        Ok(request)
    }

    /// Discard a pending request without creating a friendship.
    pub async fn reject_request(&self, request_id: i64) -> Result<FriendRequestRow, FriendError> {
        let request = {
            let storage = self.storage.lock().await;
            storage.delete_friend_request(request_id)?
        };
        rlog!(
            "friends: request {} from {} rejected",
            request.id,
            logging::user_id(&request.sender_id)
        );
        Ok(request)
    }
}
