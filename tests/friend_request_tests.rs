use tokio::sync::mpsc;

use radiance::events::ServerEvent;
use radiance::friends::{FriendError, FriendRequestCoordinator};
use radiance::registry::ConnectionRegistry;
use radiance::storage::{SharedStorage, Storage, StorageError};

fn shared_storage() -> SharedStorage {
    Storage::open_in_memory().expect("open storage").into_shared()
}

async fn connect(
    registry: &ConnectionRegistry,
    user_id: &str,
) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry.register(user_id, tx).await;
    rx
}

#[tokio::test]
async fn send_request_persists_and_notifies_both_online_parties() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage.clone(), registry.clone());

    let mut alice_rx = connect(&registry, "alice").await;
    let mut bob_rx = connect(&registry, "bob").await;

    let request = coordinator
        .send_request("alice", "bob")
        .await
        .expect("send request");

    match bob_rx.recv().await.expect("bob notified") {
        ServerEvent::NewFriendRequest {
            request_id, from, ..
        } => {
            assert_eq!(request_id, request.id);
            assert_eq!(from, "alice");
        }
        other => panic!("unexpected event for bob: {other:?}"),
    }
    match alice_rx.recv().await.expect("alice acknowledged") {
        ServerEvent::RequestSent { request_id, .. } => assert_eq!(request_id, request.id),
        other => panic!("unexpected event for alice: {other:?}"),
    }

    let st = storage.lock().await;
    assert!(st.get_friend_request(request.id).expect("lookup").is_some());
}

#[tokio::test]
async fn send_request_with_offline_recipient_still_persists() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage.clone(), registry.clone());

    let request = coordinator
        .send_request("alice", "bob")
        .await
        .expect("send request");

    let st = storage.lock().await;
    let row = st
        .get_friend_request(request.id)
        .expect("lookup")
        .expect("record persisted");
    assert_eq!(row.sender_id, "alice");
    assert_eq!(row.recipient_id, "bob");
}

#[tokio::test]
async fn duplicate_pending_request_is_rejected() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage, registry);

    coordinator
        .send_request("alice", "bob")
        .await
        .expect("first request");
    match coordinator.send_request("alice", "bob").await {
        Err(FriendError::Storage(StorageError::AlreadyExists(_))) => {}
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    // The reverse direction is a different ordered pair and is allowed.
    coordinator
        .send_request("bob", "alice")
        .await
        .expect("reverse request");
}

#[tokio::test]
async fn self_request_is_rejected() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage, registry);

    match coordinator.send_request("alice", "alice").await {
        Err(FriendError::SelfRequest) => {}
        other => panic!("expected SelfRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn accept_creates_symmetric_friendship_and_consumes_record() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage.clone(), registry.clone());

    let mut alice_rx = connect(&registry, "alice").await;
    let mut bob_rx = connect(&registry, "bob").await;

    let request = coordinator
        .send_request("alice", "bob")
        .await
        .expect("send request");
    alice_rx.recv().await.expect("request_sent");
    bob_rx.recv().await.expect("new_friend_request");

    coordinator
        .accept_request(request.id)
        .await
        .expect("accept");

    for rx in [&mut alice_rx, &mut bob_rx] {
        match rx.recv().await.expect("request_accepted") {
            ServerEvent::RequestAccepted { request_id, .. } => assert_eq!(request_id, request.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let st = storage.lock().await;
    assert!(st.are_friends("alice", "bob").expect("edge a->b"));
    assert!(st.are_friends("bob", "alice").expect("edge b->a"));
    assert!(st.get_friend_request(request.id).expect("lookup").is_none());
}

#[tokio::test]
async fn accept_unknown_request_is_not_found() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage, registry);

    match coordinator.accept_request(999).await {
        Err(FriendError::Storage(StorageError::NotFound(_))) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn accept_is_single_use() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage, registry);

    let request = coordinator
        .send_request("alice", "bob")
        .await
        .expect("send request");
    coordinator
        .accept_request(request.id)
        .await
        .expect("first accept");
    match coordinator.accept_request(request.id).await {
        Err(FriendError::Storage(StorageError::NotFound(_))) => {}
        other => panic!("expected NotFound on second accept, got {other:?}"),
    }
}

#[tokio::test]
async fn request_between_existing_friends_is_rejected() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage, registry);

    let request = coordinator
        .send_request("alice", "bob")
        .await
        .expect("send request");
    coordinator
        .accept_request(request.id)
        .await
        .expect("accept");

    match coordinator.send_request("alice", "bob").await {
        Err(FriendError::AlreadyFriends) => {}
        other => panic!("expected AlreadyFriends, got {other:?}"),
    }
}

#[tokio::test]
async fn accepting_when_one_edge_already_exists_does_not_duplicate() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage.clone(), registry);

    // A mutual pair of requests: accepting both must leave exactly one
    // edge in each direction.
    let ab = coordinator
        .send_request("alice", "bob")
        .await
        .expect("alice -> bob");
    let ba = coordinator
        .send_request("bob", "alice")
        .await
        .expect("bob -> alice");

    coordinator.accept_request(ab.id).await.expect("accept ab");
    coordinator.accept_request(ba.id).await.expect("accept ba");

    let st = storage.lock().await;
    assert_eq!(st.friends_of("alice").expect("alice friends"), vec!["bob"]);
    assert_eq!(st.friends_of("bob").expect("bob friends"), vec!["alice"]);
}

#[tokio::test]
async fn reject_discards_record_without_friendship() {
    let storage = shared_storage();
    let registry = ConnectionRegistry::new();
    let coordinator = FriendRequestCoordinator::new(storage.clone(), registry);

    let request = coordinator
        .send_request("alice", "bob")
        .await
        .expect("send request");
    coordinator
        .reject_request(request.id)
        .await
        .expect("reject");

    let st = storage.lock().await;
    assert!(st.get_friend_request(request.id).expect("lookup").is_none());
    assert!(!st.are_friends("alice", "bob").expect("no edge"));

    drop(st);
    match coordinator.reject_request(request.id).await {
        Err(FriendError::Storage(StorageError::NotFound(_))) => {}
        other => panic!("expected NotFound on second reject, got {other:?}"),
    }
}
