mod common;

use common::{publish, Harness, SERVER_ID};
use kr_crypto::encoding;
use kr_proto::{api::RejectReason, ChallengeStatus, ErrorCode};
use kr_relay::{challenge::answer_challenge, RelayError, ServerKeyring};
use kr_store::Mailbox;

#[tokio::test]
async fn correct_response_verifies() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;

    let issued = h.relay.challenges().issue("alice").await.unwrap();
    assert_eq!(issued.keyring_version, 1);
    assert_eq!(issued.server_public_key, h.keyring.current().public_key);

    let response = answer_challenge(&alice.identity, &issued).unwrap();
    let outcome = h.relay.challenges().verify("alice", &response).await.unwrap();
    assert!(outcome.verified);
    assert_eq!(outcome.reason, None);

    let record = h.store.challenge("alice").await.unwrap().unwrap();
    assert_eq!(record.status, ChallengeStatus::Verified);
}

#[tokio::test]
async fn any_tampered_byte_fails_without_error() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;

    let issued = h.relay.challenges().issue("alice").await.unwrap();
    let len = encoding::decode(&answer_challenge(&alice.identity, &issued).unwrap()).unwrap().len();

    for i in 0..len {
        let issued = h.relay.challenges().issue("alice").await.unwrap();
        let mut bytes = encoding::decode(&answer_challenge(&alice.identity, &issued).unwrap()).unwrap();
        bytes[i] ^= 0x01;

        let outcome = h.relay.challenges().verify("alice", &encoding::encode(&bytes)).await.unwrap();
        assert!(!outcome.verified, "flipping byte {i} still verified");
        assert_eq!(outcome.reason, Some(RejectReason::DecryptionFailed));
    }
    let record = h.store.challenge("alice").await.unwrap().unwrap();
    assert_eq!(record.status, ChallengeStatus::Failed);
}

#[tokio::test]
async fn another_key_holder_cannot_answer() {
    let h = Harness::new().await;
    publish(&h.store, "alice", 0).await;
    let mallory = publish(&h.store, "mallory", 0).await;

    let issued = h.relay.challenges().issue("alice").await.unwrap();
    // Mallory cannot even open Alice's challenge.
    assert!(answer_challenge(&mallory.identity, &issued).is_err());

    let own = h.relay.challenges().issue("mallory").await.unwrap();
    let forged = answer_challenge(&mallory.identity, &own).unwrap();
    let outcome = h.relay.challenges().verify("alice", &forged).await.unwrap();
    assert!(!outcome.verified);
    assert_eq!(outcome.reason, Some(RejectReason::DecryptionFailed));
}

#[tokio::test]
async fn response_for_another_relay_is_an_identity_mismatch() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;

    let issued = h.relay.challenges().issue("alice").await.unwrap();
    let response = answer_challenge(&alice.identity, &issued).unwrap();

    let (_store, other_relay) = h.reopen("relay-other").await;
    let outcome = other_relay.challenges().verify("alice", &response).await.unwrap();
    assert!(!outcome.verified);
    assert_eq!(outcome.reason, Some(RejectReason::IdentityMismatch));
}

#[tokio::test]
async fn resolved_challenge_reports_recorded_outcome() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;

    let issued = h.relay.challenges().issue("alice").await.unwrap();
    let response = answer_challenge(&alice.identity, &issued).unwrap();
    assert!(h.relay.challenges().verify("alice", &response).await.unwrap().verified);

    let again = h.relay.challenges().verify("alice", "AAAA").await.unwrap();
    assert!(again.verified);
    assert_eq!(again.reason, Some(RejectReason::AlreadyResolved));
}

#[tokio::test]
async fn reissue_invalidates_the_previous_challenge() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;

    let first = h.relay.challenges().issue("alice").await.unwrap();
    let stale = answer_challenge(&alice.identity, &first).unwrap();
    let second = h.relay.challenges().issue("alice").await.unwrap();
    assert_ne!(first.ciphertext, second.ciphertext);

    let outcome = h.relay.challenges().verify("alice", &stale).await.unwrap();
    assert!(!outcome.verified);

    // The failed verify closed the second attempt too; a fresh issue works.
    let third = h.relay.challenges().issue("alice").await.unwrap();
    let response = answer_challenge(&alice.identity, &third).unwrap();
    assert!(h.relay.challenges().verify("alice", &response).await.unwrap().verified);
}

#[tokio::test]
async fn outstanding_challenge_survives_rotation_and_restart() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;

    let issued = h.relay.challenges().issue("alice").await.unwrap();
    let rotated = h.keyring.rotate(&h.store).await.unwrap();
    assert_eq!(rotated.current().version, 2);

    // Fresh process: keyring reloaded from the store, nothing regenerated.
    let (store, relay) = h.reopen(SERVER_ID).await;
    let reloaded = ServerKeyring::load(SERVER_ID, &store).await.unwrap();
    assert_eq!(reloaded.versions().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(reloaded.get(1).unwrap().public_key, issued.server_public_key);
    assert!(reloaded.get(1).unwrap().retired_at.is_some());

    let response = answer_challenge(&alice.identity, &issued).unwrap();
    assert!(relay.challenges().verify("alice", &response).await.unwrap().verified);

    let next = relay.challenges().issue("alice").await.unwrap();
    assert_eq!(next.keyring_version, 2);
    assert_ne!(next.server_public_key, issued.server_public_key);
}

#[tokio::test]
async fn running_relay_follows_a_sibling_rotation() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;
    h.keyring.rotate(&h.store).await.unwrap();

    // A sibling process started after the rotation issues under version 2.
    let (_store, sibling) = h.reopen(SERVER_ID).await;
    let issued = sibling.challenges().issue("alice").await.unwrap();
    assert_eq!(issued.keyring_version, 2);

    // The relay that loaded only version 1 still verifies it.
    let response = answer_challenge(&alice.identity, &issued).unwrap();
    let outcome = h.relay.challenges().verify("alice", &response).await.unwrap();
    assert!(outcome.verified);
    assert_eq!(outcome.reason, None);

    // And no longer seals under the retired version.
    let next = h.relay.challenges().issue("alice").await.unwrap();
    assert_eq!(next.keyring_version, 2);
    assert_eq!(next.server_public_key, issued.server_public_key);
}

#[tokio::test]
async fn load_or_init_does_not_regenerate() {
    let h = Harness::new().await;
    let again = ServerKeyring::load_or_init(SERVER_ID, &h.store).await.unwrap();
    assert_eq!(again.versions().collect::<Vec<_>>(), vec![1]);
    assert_eq!(again.current().public_key, h.keyring.current().public_key);
}

#[tokio::test]
async fn unknown_participant_and_missing_record_are_not_found() {
    let h = Harness::new().await;
    publish(&h.store, "alice", 0).await;

    let err = h.relay.challenges().issue("nobody").await.unwrap_err();
    assert!(matches!(err, RelayError::ParticipantNotFound(_)));
    assert_eq!(err.code(), ErrorCode::NotFound);

    let err = h.relay.challenges().verify("alice", "AAAA").await.unwrap_err();
    assert!(matches!(err, RelayError::RecordNotFound { kind: "challenge", .. }));
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn malformed_response_is_invalid_and_keeps_the_attempt_open() {
    let h = Harness::new().await;
    let alice = publish(&h.store, "alice", 0).await;
    let issued = h.relay.challenges().issue("alice").await.unwrap();

    let err = h.relay.challenges().verify("alice", "not base64!").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    let err = h.relay.challenges().verify("alice", "").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let response = answer_challenge(&alice.identity, &issued).unwrap();
    assert!(h.relay.challenges().verify("alice", &response).await.unwrap().verified);
}
