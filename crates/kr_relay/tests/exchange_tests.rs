mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{publish, Harness};
use kr_crypto::x3dh::{generate_keypair, initiator_secret, responder_secret, RecipientBundle};
use kr_proto::{api::InitiateKeyExchangeRequest, ErrorCode};
use kr_relay::RelayError;

fn request(sender: &str, recipient: &str) -> InitiateKeyExchangeRequest {
    InitiateKeyExchangeRequest {
        recipient_id: recipient.into(),
        sender_id: sender.into(),
        sender_identity_key: generate_keypair().1.to_b64(),
        sender_ephemeral_key: generate_keypair().1.to_b64(),
    }
}

#[tokio::test]
async fn both_sides_derive_the_same_key() {
    let h = Harness::new().await;
    let bob = publish(&h.store, "bob", 3).await;
    let (alice_ik, alice_ik_pub) = generate_keypair();
    let (alice_ek, alice_ek_pub) = generate_keypair();

    let bundle = h
        .relay
        .exchange()
        .initiate(&InitiateKeyExchangeRequest {
            recipient_id: "bob".into(),
            sender_id: "alice".into(),
            sender_identity_key: alice_ik_pub.to_b64(),
            sender_ephemeral_key: alice_ek_pub.to_b64(),
        })
        .await
        .unwrap();
    assert_eq!(bundle.recipient_identity_key, bob.identity_public);
    assert_eq!(bundle.recipient_signed_pre_key, bob.signed_pre_key_public);
    assert_eq!(bundle.recipient_one_time_pre_key, bob.one_time[bundle.consumed_index as usize].1);

    let alice_key = initiator_secret(
        &alice_ik,
        &alice_ek,
        &RecipientBundle {
            identity_key: bundle.recipient_identity_key,
            signed_pre_key: bundle.recipient_signed_pre_key,
            one_time_pre_key: Some(bundle.recipient_one_time_pre_key),
        },
    )
    .unwrap();

    let pickup = h.relay.exchange().retrieve("alice", "bob").await.unwrap();
    assert!(pickup.found);
    let session = pickup.session.unwrap();
    assert_eq!(session.sender_identity_key, alice_ik_pub);
    assert_eq!(session.sender_ephemeral_key, alice_ek_pub);
    assert_eq!(session.one_time_pre_key_index, bundle.consumed_index);

    let bob_key = responder_secret(
        &bob.identity,
        &bob.signed_pre_key,
        Some(bob.one_time_secret(session.one_time_pre_key_index)),
        &session.sender_identity_key,
        &session.sender_ephemeral_key,
    )
    .unwrap();
    assert_eq!(alice_key.as_bytes(), bob_key.as_bytes());
}

#[tokio::test]
async fn session_is_picked_up_exactly_once() {
    let h = Harness::new().await;
    publish(&h.store, "bob", 2).await;
    let exchange = h.relay.exchange();

    let missing = exchange.retrieve("alice", "bob").await.unwrap();
    assert!(!missing.found);
    assert!(missing.session.is_none());

    exchange.initiate(&request("alice", "bob")).await.unwrap();
    assert!(exchange.retrieve("alice", "bob").await.unwrap().found);
    assert!(!exchange.retrieve("alice", "bob").await.unwrap().found);
}

#[tokio::test]
async fn reinitiating_replaces_the_pending_session() {
    let h = Harness::new().await;
    publish(&h.store, "bob", 2).await;
    let exchange = h.relay.exchange();

    exchange.initiate(&request("alice", "bob")).await.unwrap();
    let second = request("alice", "bob");
    let bundle = exchange.initiate(&second).await.unwrap();

    let session = exchange.retrieve("alice", "bob").await.unwrap().session.unwrap();
    assert_eq!(session.sender_ephemeral_key.to_b64(), second.sender_ephemeral_key);
    assert_eq!(session.one_time_pre_key_index, bundle.consumed_index);
    assert_eq!(exchange.remaining_pre_keys("bob").await.unwrap().remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initiators_get_distinct_indices_until_exhausted() {
    let h = Harness::new().await;
    publish(&h.store, "bob", 5).await;
    let relay = Arc::new(h.relay);

    let mut handles = Vec::new();
    for i in 0..16 {
        let relay = relay.clone();
        handles.push(tokio::spawn(async move {
            relay.exchange().initiate(&request(&format!("sender-{i}"), "bob")).await
        }));
    }

    let mut indices = HashSet::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(bundle) => assert!(indices.insert(bundle.consumed_index), "index reused"),
            Err(RelayError::PreKeysExhausted(who)) => {
                assert_eq!(who, "bob");
                exhausted += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(indices, (0..5).collect::<HashSet<u32>>());
    assert_eq!(exhausted, 11);
    assert_eq!(relay.exchange().remaining_pre_keys("bob").await.unwrap().remaining, 0);
}

#[tokio::test]
async fn exhaustion_maps_to_not_found() {
    let h = Harness::new().await;
    publish(&h.store, "bob", 1).await;
    let exchange = h.relay.exchange();

    exchange.initiate(&request("alice", "bob")).await.unwrap();
    let err = exchange.initiate(&request("carol", "bob")).await.unwrap_err();
    assert!(matches!(err, RelayError::PreKeysExhausted(_)));
    assert_eq!(err.code(), ErrorCode::NotFound);
    // Nothing was written for the failed initiator.
    assert!(!exchange.retrieve("carol", "bob").await.unwrap().found);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let h = Harness::new().await;
    publish(&h.store, "bob", 3).await;
    let exchange = h.relay.exchange();

    let cases = [
        InitiateKeyExchangeRequest { recipient_id: String::new(), ..request("alice", "bob") },
        InitiateKeyExchangeRequest { sender_id: String::new(), ..request("alice", "bob") },
        InitiateKeyExchangeRequest { sender_identity_key: String::new(), ..request("alice", "bob") },
        InitiateKeyExchangeRequest { sender_ephemeral_key: "%%%".into(), ..request("alice", "bob") },
        InitiateKeyExchangeRequest { sender_ephemeral_key: "c2hvcnQ=".into(), ..request("alice", "bob") },
        request("bob", "bob"),
        InitiateKeyExchangeRequest::default(),
    ];
    for case in &cases {
        let err = exchange.initiate(case).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument, "{case:?}");
    }
    assert_eq!(exchange.remaining_pre_keys("bob").await.unwrap().remaining, 3);

    let err = exchange.initiate(&request("alice", "nobody")).await.unwrap_err();
    assert!(matches!(err, RelayError::ParticipantNotFound(_)));
    let pickup = exchange.retrieve("", "bob").await.unwrap();
    assert!(!pickup.found && pickup.session.is_none());
    assert!(!exchange.retrieve("alice", "").await.unwrap().found);
    let err = exchange.remaining_pre_keys("nobody").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}
