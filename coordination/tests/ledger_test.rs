//! Integration tests for the audit ledger
//!
//! Exercises the client's read-your-writes guarantee over a batching
//! backend, cross-client convergence once blocks are sealed, and chain
//! verification against tampered copies.

use std::sync::Arc;

use serde_json::{json, Value};

use dal_coordination::ledger::{verify_entries, LedgerBackend, LedgerError, GENESIS_HASH};
use dal_coordination::{LedgerClient, MemoryLedger, RetryPolicy};

fn payloads() -> Vec<Value> {
    vec![
        json!({"type": "experiment_initialization", "experiment_id": "exp_a", "n": 1}),
        json!({"type": "model_update", "experiment_id": "exp_a", "label": 1, "nested": {"x": [1.5, 2.5]}}),
        json!({"type": "model_update", "experiment_id": "exp_b", "label": 0}),
        json!({"type": "voting_result", "experiment_id": "exp_a", "votes": []}),
        json!(null),
        json!("plain string"),
    ]
}

// ── Round trip ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_append_then_get_returns_same_payload() {
    // Large blocks: nothing is sealed during the test
    let backend = MemoryLedger::with_block_size(64).shared();
    let client = LedgerClient::new(backend.clone());

    let mut written = Vec::new();
    for payload in payloads() {
        let id = client.append(payload.clone()).await.unwrap();
        written.push((id, payload));
    }

    for (id, payload) in &written {
        assert_eq!(&client.get(id).await.unwrap(), payload);
    }
    assert_eq!(backend.status().await.unwrap().pending_entries, 6);
}

#[tokio::test]
async fn test_other_client_sees_writes_after_seal() {
    let backend = MemoryLedger::with_block_size(64).shared();
    let writer = LedgerClient::new(backend.clone());
    let reader = LedgerClient::new(backend.clone());

    let id = writer.append(json!({"k": "v"})).await.unwrap();
    assert!(matches!(
        reader.get(&id).await,
        Err(LedgerError::NotFound(_))
    ));

    let block = backend.seal_block().unwrap().expect("one pending entry");
    assert_eq!(block.entry_ids, vec![id.clone()]);
    assert_eq!(reader.get(&id).await.unwrap(), json!({"k": "v"}));
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let client = LedgerClient::new(MemoryLedger::new().shared());
    assert!(matches!(
        client.get("deadbeef").await,
        Err(LedgerError::NotFound(id)) if id == "deadbeef"
    ));
}

#[tokio::test]
async fn test_records_filter_and_order() {
    let backend = MemoryLedger::with_block_size(2).shared();
    let client = LedgerClient::new(backend.clone());
    for payload in payloads() {
        client.append(payload).await.unwrap();
    }

    let updates = client.records("model_update", None, 10).await.unwrap();
    assert_eq!(updates.len(), 2);
    assert!(updates[0].sequence > updates[1].sequence);

    let mine = client
        .records("model_update", Some("exp_a"), 10)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].payload["label"], 1);

    let limited = client.records("model_update", None, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

// ── Chain integrity ─────────────────────────────────────────────────

#[tokio::test]
async fn test_chain_links_and_verification() {
    let backend = MemoryLedger::with_block_size(1).shared();
    let client = LedgerClient::new(backend.clone());
    assert!(client.verify_chain().await.unwrap());

    for payload in payloads() {
        client.append(payload).await.unwrap();
    }
    assert!(client.verify_chain().await.unwrap());

    let entries = client.entries().await.unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0].previous_hash, GENESIS_HASH);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }

    let status = client.status().await.unwrap();
    assert_eq!(status.total_blocks, 6);
    assert!(status.chain_valid);
    assert_eq!(status.latest_hash, entries[5].hash);

    let blocks = client.recent_blocks(2).await.unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].index > blocks[1].index);
}

#[tokio::test]
async fn test_tampered_copy_fails_verification() {
    let client = LedgerClient::new(MemoryLedger::with_block_size(1).shared());
    for payload in payloads() {
        client.append(payload).await.unwrap();
    }
    let entries = client.entries().await.unwrap();
    assert!(verify_entries(&entries));

    let mut edited = entries.clone();
    edited[2].payload = json!({"type": "model_update", "label": 99});
    assert!(!verify_entries(&edited));

    let mut relinked = entries.clone();
    relinked[3].previous_hash = GENESIS_HASH.to_string();
    assert!(!verify_entries(&relinked));

    let mut dropped = entries;
    dropped.remove(1);
    assert!(!verify_entries(&dropped));
}

// ── Availability ────────────────────────────────────────────────────

#[tokio::test]
async fn test_offline_append_surfaces_attempts_and_writes_nothing() {
    let backend = MemoryLedger::with_block_size(1).shared();
    let client = LedgerClient::new(backend.clone()).with_retry_policy(RetryPolicy {
        max_retries: 3,
        initial_backoff_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 5,
    });

    client.append(json!({"n": 0})).await.unwrap();
    backend.set_available(false);
    match client.append(json!({"n": 1})).await {
        Err(LedgerError::Unavailable { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("expected Unavailable, got {other:?}"),
    }

    backend.set_available(true);
    client.append(json!({"n": 2})).await.unwrap();
    let entries = client.entries().await.unwrap();
    let ns: Vec<i64> = entries.iter().filter_map(|e| e.payload["n"].as_i64()).collect();
    assert_eq!(ns, vec![0, 2]);
    assert!(client.verify_chain().await.unwrap());
}

#[tokio::test]
async fn test_shared_client_across_tasks() {
    let client = Arc::new(LedgerClient::new(MemoryLedger::with_block_size(3).shared()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.append(json!({"task": i})).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    for id in &ids {
        assert!(client.get(id).await.is_ok());
    }
    assert!(client.verify_chain().await.unwrap());
}
