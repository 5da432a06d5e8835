//! WebSocket gateway: one task per live connection.
//!
//! A connection upgrades at `GET /ws?user_id=…`.  When the handshake query
//! names a user, the connection is registered and presence goes online;
//! without it the socket may still issue requests (the identity service
//! verified the id before the client got here, so the core trusts it).
//!
//! Each connection runs a select loop over its outbound event channel and
//! inbound frames.  Failures are isolated per connection: a malformed frame
//! or a failed operation produces an `error` reply on that socket and
//! nothing else.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::conversations::ConversationManager;
use crate::events::{ClientEvent, ServerEvent};
use crate::friends::FriendRequestCoordinator;
use crate::messages::MessageRouter;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::storage::{SharedStorage, Storage};
use crate::{logging, rlog};

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub storage: SharedStorage,
    pub presence: PresenceTracker,
    pub friends: FriendRequestCoordinator,
    pub conversations: ConversationManager,
    pub router: MessageRouter,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        let storage = storage.into_shared();
        let registry = ConnectionRegistry::new();
        Self {
            presence: PresenceTracker::new(storage.clone()),
            friends: FriendRequestCoordinator::new(storage.clone(), registry.clone()),
            conversations: ConversationManager::new(storage.clone()),
            router: MessageRouter::new(storage.clone(), registry.clone()),
            registry,
            storage,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthcheck() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Deserialize)]
struct ConnectParams {
    user_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, params.user_id, addr, state))
}

/// Whether the connection loop keeps running after an event.
enum Flow {
    Continue,
    Disconnect,
}

async fn handle_connection(
    mut socket: WebSocket,
    user_id: Option<String>,
    addr: SocketAddr,
    state: AppState,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let session = match user_id {
        Some(uid) if !uid.is_empty() => {
            let conn_id = state.registry.register(&uid, tx.clone()).await;
            state.presence.went_online(&uid, conn_id).await;
            rlog!(
                "gateway: {} connected from {addr}, handle {conn_id}",
                logging::user_id(&uid)
            );
            Some((uid, conn_id))
        }
        _ => {
            rlog!("gateway: anonymous connection from {addr}");
            None
        }
    };

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(t) => t,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Flow::Disconnect = dispatch(&state, &tx, event).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(ServerEvent::Error {
                                    message: format!("malformed event: {e}"),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    if let Some((uid, conn_id)) = session {
        // Exactly one offline transition per connection; a superseded
        // handle finds the newer entry and leaves presence alone.
        if state.registry.unregister_conn(&uid, conn_id).await {
            state.presence.went_offline(&uid).await;
        }
        rlog!("gateway: {} disconnected", logging::user_id(&uid));
    }
}

/// Route one inbound event to the owning component.  Direct replies (and
/// per-request errors) go out on this connection's own channel; targeted
/// notifications go through the registry inside each component.
async fn dispatch(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) -> Flow {
    match event {
        ClientEvent::FriendRequest { from, to } => {
            if let Err(e) = state.friends.send_request(&from, &to).await {
                reply_error(tx, &e);
            }
        }
        ClientEvent::AcceptRequest { request_id } => {
            if let Err(e) = state.friends.accept_request(request_id).await {
                reply_error(tx, &e);
            }
        }
        ClientEvent::RejectRequest { request_id } => {
            if let Err(e) = state.friends.reject_request(request_id).await {
                reply_error(tx, &e);
            }
        }
        ClientEvent::GetDirectConversations { user_id } => {
            match state.conversations.list_for_user(&user_id).await {
                Ok(conversations) => {
                    let _ = tx.send(ServerEvent::DirectConversations { conversations });
                }
                Err(e) => reply_error(tx, &e),
            }
        }
        ClientEvent::StartConversation { from, to } => {
            match state.conversations.find_or_create(&from, &to).await {
                Ok((conversation, _created)) => {
                    let _ = tx.send(ServerEvent::StartChat { conversation });
                }
                Err(e) => reply_error(tx, &e),
            }
        }
        ClientEvent::GetMessages { conversation_id } => {
            match state.router.list_messages(conversation_id).await {
                Ok(messages) => {
                    let _ = tx.send(ServerEvent::Messages {
                        conversation_id,
                        messages,
                    });
                }
                Err(e) => reply_error(tx, &e),
            }
        }
        ClientEvent::TextMessage {
            to,
            from,
            message,
            conversation_id,
            kind,
        } => {
            if let Err(e) = state
                .router
                .send_text(conversation_id, &from, &to, kind, &message)
                .await
            {
                reply_error(tx, &e);
            }
        }
        ClientEvent::FileMessage {
            to,
            from,
            file,
            conversation_id,
        } => {
            if let Err(e) = state
                .router
                .send_file(conversation_id, &from, &to, &file)
                .await
            {
                reply_error(tx, &e);
            }
        }
        ClientEvent::End { user_id } => {
            state.registry.unregister(&user_id).await;
            state.presence.went_offline(&user_id).await;
            return Flow::Disconnect;
        }
    }
    Flow::Continue
}

fn reply_error(tx: &mpsc::UnboundedSender<ServerEvent>, error: &dyn std::error::Error) {
    let _ = tx.send(ServerEvent::Error {
        message: error.to_string(),
    });
}
