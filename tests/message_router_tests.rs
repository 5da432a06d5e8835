use tokio::sync::mpsc;

use radiance::events::{FileMetadata, MessageKind, ServerEvent};
use radiance::messages::{derive_storage_key, MessageRouter};
use radiance::registry::ConnectionRegistry;
use radiance::storage::{now_millis, SharedStorage, Storage, StorageError};

fn shared_storage() -> SharedStorage {
    Storage::open_in_memory().expect("open storage").into_shared()
}

async fn conversation_between(storage: &SharedStorage, a: &str, b: &str) -> i64 {
    let st = storage.lock().await;
    let (row, _) = st
        .find_or_create_conversation(a, b, now_millis())
        .expect("create conversation");
    row.id
}

#[tokio::test]
async fn send_appends_and_persists_before_delivery() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage.clone(), registry.clone());
    let conversation = conversation_between(&storage, "alice", "bob").await;

    let (tx, mut bob_rx) = mpsc::unbounded_channel();
    registry.register("bob", tx).await;

    let sent = router
        .send_text(conversation, "alice", "bob", MessageKind::Text, "hi")
        .await
        .expect("send");

    // The delivery event references a message the store can already serve.
    match bob_rx.recv().await.expect("bob delivery") {
        ServerEvent::NewMessage {
            conversation_id,
            message,
        } => {
            assert_eq!(conversation_id, conversation);
            assert_eq!(message.id, sent.id);
            assert_eq!(message.text.as_deref(), Some("hi"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let log = router.list_messages(conversation).await.expect("list");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, sent.id);
    assert_eq!(log[0].sender_id, "alice");
    assert_eq!(log[0].recipient_id, "bob");
}

#[tokio::test]
async fn delivery_reaches_sender_and_recipient_independently() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage.clone(), registry.clone());
    let conversation = conversation_between(&storage, "alice", "bob").await;

    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    registry.register("alice", alice_tx).await;
    registry.register("bob", bob_tx).await;

    router
        .send_text(conversation, "alice", "bob", MessageKind::Text, "hello")
        .await
        .expect("send");

    for rx in [&mut alice_rx, &mut bob_rx] {
        match rx.recv().await.expect("delivery") {
            ServerEvent::NewMessage { message, .. } => {
                assert_eq!(message.text.as_deref(), Some("hello"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn offline_recipient_degrades_to_persistence_only() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage.clone(), registry.clone());
    let conversation = conversation_between(&storage, "alice", "bob").await;

    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    registry.register("alice", alice_tx).await;

    // Nobody registered for bob: send must still succeed and persist.
    router
        .send_text(conversation, "alice", "bob", MessageKind::Text, "hi")
        .await
        .expect("send with offline recipient");

    match alice_rx.recv().await.expect("sender copy") {
        ServerEvent::NewMessage { message, .. } => {
            assert_eq!(message.text.as_deref(), Some("hi"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let log = router.list_messages(conversation).await.expect("list");
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn send_into_unknown_conversation_is_not_found() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage, registry.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.register("bob", tx).await;

    match router
        .send_text(404, "alice", "bob", MessageKind::Text, "hi")
        .await
    {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }

    // Persist-before-deliver: a failed append emits nothing.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn list_messages_for_unknown_conversation_is_not_found() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage, registry);

    match router.list_messages(404).await {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_sends_into_one_conversation_keep_order_and_count() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage.clone(), registry);
    let conversation = conversation_between(&storage, "alice", "bob").await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router
                .send_text(
                    conversation,
                    "alice",
                    "bob",
                    MessageKind::Text,
                    &format!("message {i}"),
                )
                .await
                .expect("concurrent send")
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    let log = router.list_messages(conversation).await.expect("list");
    assert_eq!(log.len(), 20);
    for pair in log.windows(2) {
        assert!(pair[0].id < pair[1].id);
        assert!(
            pair[0].created_at <= pair[1].created_at,
            "created_at must be non-decreasing in append order"
        );
    }
}

#[tokio::test]
async fn sends_into_different_conversations_do_not_interfere() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage.clone(), registry);
    let ab = conversation_between(&storage, "alice", "bob").await;
    let cd = conversation_between(&storage, "carol", "dave").await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router
                .send_text(ab, "alice", "bob", MessageKind::Text, &format!("ab {i}"))
                .await
                .expect("send ab");
            router
                .send_text(cd, "carol", "dave", MessageKind::Link, &format!("cd {i}"))
                .await
                .expect("send cd");
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    assert_eq!(router.list_messages(ab).await.expect("ab log").len(), 10);
    let cd_log = router.list_messages(cd).await.expect("cd log");
    assert_eq!(cd_log.len(), 10);
    assert!(cd_log.iter().all(|m| m.kind == MessageKind::Link));
}

#[tokio::test]
async fn file_message_carries_derived_storage_key() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(storage.clone(), registry.clone());
    let conversation = conversation_between(&storage, "alice", "bob").await;

    let (tx, mut bob_rx) = mpsc::unbounded_channel();
    registry.register("bob", tx).await;

    let sent = router
        .send_file(
            conversation,
            "alice",
            "bob",
            &FileMetadata {
                name: "holiday photo.jpeg".to_string(),
                size_bytes: Some(120_000),
            },
        )
        .await
        .expect("send file");

    assert_eq!(sent.kind, MessageKind::File);
    assert!(sent.text.is_none());
    let key = sent.file_key.as_deref().expect("storage key");
    assert!(key.ends_with(".jpeg"));
    assert!(key.starts_with(&format!("{}_", sent.created_at)));

    match bob_rx.recv().await.expect("delivery") {
        ServerEvent::NewMessage { message, .. } => {
            assert_eq!(message.file_key.as_deref(), Some(key));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn storage_key_shape() {
    let key = derive_storage_key("report.pdf", 1_700_000_000_000);
    let rest = key
        .strip_prefix("1700000000000_")
        .expect("timestamp prefix");
    let suffix = rest.strip_suffix(".pdf").expect("extension preserved");
    assert_eq!(suffix.len(), 4);
    assert!(suffix.chars().all(|c| c.is_ascii_digit()));

    // No extension on the original name: no trailing dot either.
    let bare = derive_storage_key("README", 42);
    assert!(bare.starts_with("42_"));
    assert!(!bare.contains('.'));
}
