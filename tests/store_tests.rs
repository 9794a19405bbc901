//! Unit tests for the conversion store
//!
//! These tests verify request deduplication, the atomic append-and-claim,
//! status records, validator records and snapshot persistence.

use bridge_validator::store::{
    AppendPolicy, BridgeStore, CollectedSignature, ConversionRequest, Direction, MemoryStore,
    HEAD_VALIDATOR,
};
use std::sync::Arc;

#[path = "mod.rs"]
mod test_helpers;

use test_helpers::{
    build_test_config, create_payout_proposal, FakeHive, TestValidator, DUMMY_ETH_TX_HASH,
    DUMMY_HIVE_RECIPIENT, VALIDATOR_ONE, VALIDATOR_TWO,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn seed() -> ConversionRequest {
    ConversionRequest::new(Direction::ToHive, DUMMY_ETH_TX_HASH, VALIDATOR_ONE)
}

fn signature(signer: &str, value: &str) -> CollectedSignature {
    CollectedSignature {
        signer: signer.to_string(),
        signature: value.to_string(),
    }
}

fn policy(claim_broadcast: bool) -> AppendPolicy {
    AppendPolicy {
        max_signatures: 3,
        required_signatures: 2,
        claim_broadcast,
    }
}

async fn seed_with_proposal(store: &MemoryStore) {
    let config = build_test_config();
    let hive = FakeHive::new(&config, &TestValidator::new(VALIDATOR_ONE, 1));
    let proposal = create_payout_proposal(
        &config,
        &hive,
        DUMMY_HIVE_RECIPIENT,
        bridge_validator::TokenAmount::from_milli(100_000),
        VALIDATOR_ONE,
    )
    .await;
    store.update_proposed_transaction(seed(), proposal).await.unwrap();
}

fn snapshot_path(name: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("bridge-validator-{}-{}-{}.json", name, std::process::id(), nanos))
}

// ============================================================================
// REQUEST TESTS
// ============================================================================

/// Test that a reference transaction is inserted once
/// What is tested: insert_if_absent on an existing key
/// Why: The reference transaction is the dedup key for redelivered events
#[tokio::test]
async fn test_insert_if_absent() {
    let store = MemoryStore::new();

    assert!(store.insert_if_absent(seed()).await.unwrap());
    assert!(!store.insert_if_absent(seed()).await.unwrap());

    let request = store.find_by_reference_id(DUMMY_ETH_TX_HASH).await.unwrap().unwrap();
    assert_eq!(request.direction, Direction::ToHive);
    assert!(!request.is_processed);
    assert!(request.signatures.is_empty());
}

/// Test that a missing request is reported as None
#[tokio::test]
async fn test_find_missing_request() {
    let store = MemoryStore::new();
    assert!(store.find_by_reference_id("missing").await.unwrap().is_none());
}

/// Test that the stored request uses the shared camelCase field names
/// Why: Other validators and the API read the same record shape
#[tokio::test]
async fn test_request_serialization_shape() {
    let value = serde_json::to_value(seed()).unwrap();
    assert_eq!(value["chain"], "hive");
    assert_eq!(value["referenceTransaction"], DUMMY_ETH_TX_HASH);
    assert_eq!(value["headValidator"], VALIDATOR_ONE);
    assert_eq!(value["isProcessed"], false);
}

// ============================================================================
// SIGNATURE APPEND TESTS
// ============================================================================

/// Test that a signer is counted once
/// What is tested: duplicate signer and duplicate signature string
/// Why: Replayed signature messages must not inflate the quorum count
#[tokio::test]
async fn test_append_signature_dedup() {
    let store = MemoryStore::new();

    let first = store
        .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(false))
        .await
        .unwrap();
    assert!(first.appended);
    assert_eq!(first.signature_count, 1);

    let same_signer = store
        .append_signature(seed(), signature(VALIDATOR_ONE, "bb"), policy(false))
        .await
        .unwrap();
    assert!(!same_signer.appended);

    let same_signature = store
        .append_signature(seed(), signature(VALIDATOR_TWO, "aa"), policy(false))
        .await
        .unwrap();
    assert!(!same_signature.appended);
    assert_eq!(same_signature.signature_count, 1);
}

/// Test that the signature list never exceeds the authority set size
/// Why: At most one signature per authority can ever be valid
#[tokio::test]
async fn test_append_signature_capped() {
    let store = MemoryStore::new();
    let capped = AppendPolicy {
        max_signatures: 2,
        required_signatures: 2,
        claim_broadcast: false,
    };

    for (i, signer) in ["a", "b", "c"].iter().enumerate() {
        store
            .append_signature(seed(), signature(signer, &format!("sig{}", i)), capped)
            .await
            .unwrap();
    }

    let request = store.find_by_reference_id(DUMMY_ETH_TX_HASH).await.unwrap().unwrap();
    assert_eq!(request.signatures.len(), 2);
}

/// Test that the broadcast is claimed exactly once at quorum
/// What is tested: claim flag across the quorum-reaching and later appends
/// Why: Exactly one caller may broadcast a payout
#[tokio::test]
async fn test_append_signature_claims_once() {
    let store = MemoryStore::new();
    seed_with_proposal(&store).await;

    let first = store
        .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(true))
        .await
        .unwrap();
    assert!(!first.broadcast_claimed, "below quorum");

    let second = store
        .append_signature(seed(), signature(VALIDATOR_TWO, "bb"), policy(true))
        .await
        .unwrap();
    assert!(second.broadcast_claimed);
    assert!(second.request.broadcast_claimed);

    let third = store
        .append_signature(seed(), signature("validator-three", "cc"), policy(true))
        .await
        .unwrap();
    assert!(third.appended);
    assert!(!third.broadcast_claimed, "claim already held");
}

/// Test that no claim is taken without a stored proposal
/// Why: There is nothing to broadcast until the proposal is known
#[tokio::test]
async fn test_append_signature_no_claim_without_proposal() {
    let store = MemoryStore::new();
    for (signer, value) in [(VALIDATOR_ONE, "aa"), (VALIDATOR_TWO, "bb")] {
        let outcome = store
            .append_signature(seed(), signature(signer, value), policy(true))
            .await
            .unwrap();
        assert!(!outcome.broadcast_claimed);
    }
}

/// Test that a released claim can be taken again and processing is final
/// What is tested: release_broadcast_claim then mark_processed
/// Why: A failed broadcast must be retryable; a successful one must never repeat
#[tokio::test]
async fn test_release_and_mark_processed() {
    let store = MemoryStore::new();
    seed_with_proposal(&store).await;
    store
        .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(true))
        .await
        .unwrap();
    let claimed = store
        .append_signature(seed(), signature(VALIDATOR_TWO, "bb"), policy(true))
        .await
        .unwrap();
    assert!(claimed.broadcast_claimed);

    store.release_broadcast_claim(DUMMY_ETH_TX_HASH).await.unwrap();
    let retried = store
        .append_signature(seed(), signature(VALIDATOR_TWO, "bb"), policy(true))
        .await
        .unwrap();
    assert!(!retried.appended);
    assert!(retried.broadcast_claimed, "released claim is available again");

    store.mark_processed(DUMMY_ETH_TX_HASH).await.unwrap();
    let after = store
        .append_signature(seed(), signature("validator-three", "cc"), policy(true))
        .await
        .unwrap();
    assert!(!after.appended);
    assert!(!after.broadcast_claimed);
    assert!(after.request.is_processed);
}

/// Test claiming the broadcast of a request that already holds a quorum
/// What is tested: claim_broadcast below quorum, at quorum, while held and after release
/// Why: Payouts whose quorum arrived earlier are broadcast through this claim
#[tokio::test]
async fn test_claim_broadcast() {
    let store = MemoryStore::new();
    assert!(store.claim_broadcast(DUMMY_ETH_TX_HASH, 2).await.unwrap().is_none(), "unknown");

    seed_with_proposal(&store).await;
    store
        .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(false))
        .await
        .unwrap();
    assert!(store.claim_broadcast(DUMMY_ETH_TX_HASH, 2).await.unwrap().is_none(), "below quorum");

    store
        .append_signature(seed(), signature(VALIDATOR_TWO, "bb"), policy(false))
        .await
        .unwrap();
    let claimed = store.claim_broadcast(DUMMY_ETH_TX_HASH, 2).await.unwrap().unwrap();
    assert_eq!(claimed.signatures.len(), 2);
    assert!(store.claim_broadcast(DUMMY_ETH_TX_HASH, 2).await.unwrap().is_none(), "held");

    store.release_broadcast_claim(DUMMY_ETH_TX_HASH).await.unwrap();
    assert!(store.claim_broadcast(DUMMY_ETH_TX_HASH, 2).await.unwrap().is_some());
}

/// Test that concurrent appends claim the broadcast once
/// What is tested: many signers appending in parallel on a shared store
/// Why: The append-and-check must be atomic under concurrency
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_single_claim() {
    let store = Arc::new(MemoryStore::new());
    seed_with_proposal(&store).await;
    let wide = AppendPolicy {
        max_signatures: 16,
        required_signatures: 2,
        claim_broadcast: true,
    };

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_signature(seed(), signature(&format!("v{}", i), &format!("s{}", i)), wide)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut claims = 0;
    for handle in handles {
        if handle.await.unwrap().broadcast_claimed {
            claims += 1;
        }
    }
    assert_eq!(claims, 1);
}

/// Test that proposals are not replaced on processed requests
/// Why: A processed request is final
#[tokio::test]
async fn test_update_proposal_ignored_when_processed() {
    let store = MemoryStore::new();
    seed_with_proposal(&store).await;
    let original = store
        .find_by_reference_id(DUMMY_ETH_TX_HASH)
        .await
        .unwrap()
        .unwrap()
        .proposed_transaction
        .unwrap();
    store.mark_processed(DUMMY_ETH_TX_HASH).await.unwrap();

    let mut replacement = original.clone();
    replacement.ref_block_num = 1;
    let updated = store.update_proposed_transaction(seed(), replacement).await.unwrap();
    assert_eq!(updated.proposed_transaction, Some(original));
}

/// Test that pending requests exclude processed ones
#[tokio::test]
async fn test_list_pending() {
    let store = MemoryStore::new();
    store.insert_if_absent(seed()).await.unwrap();
    store
        .insert_if_absent(ConversionRequest::new(Direction::ToEthereum, "hive-tx", VALIDATOR_ONE))
        .await
        .unwrap();
    store.mark_processed(DUMMY_ETH_TX_HASH).await.unwrap();

    let pending = store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reference_transaction, "hive-tx");
}

// ============================================================================
// STATUS AND VALIDATOR TESTS
// ============================================================================

/// Test that status writes bump the version
/// Why: Head validator changes are observable through the version
#[tokio::test]
async fn test_status_versioning() {
    let store = MemoryStore::new();
    assert!(store.find_status_by_name(HEAD_VALIDATOR).await.unwrap().is_none());

    let first = store.upsert_status_by_name(HEAD_VALIDATOR, VALIDATOR_ONE).await.unwrap();
    let second = store.upsert_status_by_name(HEAD_VALIDATOR, VALIDATOR_TWO).await.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_eq!(
        bridge_validator::store::current_head_validator(&store).await.unwrap(),
        Some(VALIDATOR_TWO.to_string())
    );
}

/// Test validator record upserts
#[tokio::test]
async fn test_validator_records() {
    let store = MemoryStore::new();
    store.upsert_validator("zed", false).await.unwrap();
    store.upsert_validator("amy", false).await.unwrap();
    store.upsert_validator("zed", true).await.unwrap();

    let validators = store.list_validators().await.unwrap();
    let names: Vec<_> = validators.iter().map(|v| v.username.as_str()).collect();
    assert_eq!(names, vec!["amy", "zed"]);
    assert!(store.find_validator("zed").await.unwrap().unwrap().active);
}

// ============================================================================
// SNAPSHOT TESTS
// ============================================================================

/// Test that state survives a restart through the snapshot file
/// What is tested: open -> mutate -> reopen
/// Why: Collected signatures must not be lost when a validator restarts
#[tokio::test]
async fn test_snapshot_reload() {
    let path = snapshot_path("reload");

    {
        let store = MemoryStore::open(&path).await.unwrap();
        store
            .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(false))
            .await
            .unwrap();
        store.upsert_status_by_name(HEAD_VALIDATOR, VALIDATOR_ONE).await.unwrap();
    }

    let reopened = MemoryStore::open(&path).await.unwrap();
    let request = reopened.find_by_reference_id(DUMMY_ETH_TX_HASH).await.unwrap().unwrap();
    assert_eq!(request.signatures, vec![signature(VALIDATOR_ONE, "aa")]);
    let head = reopened.find_status_by_name(HEAD_VALIDATOR).await.unwrap().unwrap();
    assert_eq!(head.data, VALIDATOR_ONE);

    let _ = std::fs::remove_file(&path);
}

/// Test that a corrupt snapshot fails to open
/// Why: Starting from empty state would drop collected signatures silently
#[tokio::test]
async fn test_snapshot_corrupt() {
    let path = snapshot_path("corrupt");
    std::fs::write(&path, "not json").unwrap();

    assert!(MemoryStore::open(&path).await.is_err());

    let _ = std::fs::remove_file(&path);
}

/// Test that a broadcast claim does not survive a restart
/// What is tested: claim at quorum, reopen the snapshot, then claim again
/// Why: A node that stopped mid-broadcast must be able to broadcast after restart
#[tokio::test]
async fn test_snapshot_drops_broadcast_claim() {
    let path = snapshot_path("claim");

    {
        let store = MemoryStore::open(&path).await.unwrap();
        seed_with_proposal(&store).await;
        store
            .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(true))
            .await
            .unwrap();
        let claimed = store
            .append_signature(seed(), signature(VALIDATOR_TWO, "bb"), policy(true))
            .await
            .unwrap();
        assert!(claimed.broadcast_claimed);
    }

    let reopened = MemoryStore::open(&path).await.unwrap();
    let request = reopened.find_by_reference_id(DUMMY_ETH_TX_HASH).await.unwrap().unwrap();
    assert!(!request.broadcast_claimed);
    assert!(!request.is_processed);

    let next = reopened
        .append_signature(seed(), signature("validator-three", "cc"), policy(true))
        .await
        .unwrap();
    assert!(next.broadcast_claimed, "quorum is claimable again after restart");

    let _ = std::fs::remove_file(&path);
}

/// Test that a mutation is undone when its snapshot cannot be written
/// What is tested: insert and append against a snapshot in a missing directory
/// Why: Memory and snapshot must agree, or a restart resurrects a claim or loses a signature
#[tokio::test]
async fn test_failed_snapshot_write_rolls_back() {
    let path = snapshot_path("missing-dir").join("store.json");
    let store = MemoryStore::open(&path).await.unwrap();

    assert!(store.insert_if_absent(seed()).await.is_err());
    assert!(store.find_by_reference_id(DUMMY_ETH_TX_HASH).await.unwrap().is_none());

    assert!(store
        .append_signature(seed(), signature(VALIDATOR_ONE, "aa"), policy(true))
        .await
        .is_err());
    assert!(store.find_by_reference_id(DUMMY_ETH_TX_HASH).await.unwrap().is_none());
    assert!(store.list_pending().await.unwrap().is_empty());
}
