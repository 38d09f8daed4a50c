//! Ledger backends
//!
//! The orchestration core only needs an append-only, tamper-evident store.
//! [`MemoryLedger`] is an in-process hash chain that batches appends into
//! blocks the way a consensus ledger does; [`super::rpc::RpcLedger`]
//! reaches a remote ledger service over HTTP.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::types::{verify_entries, BlockInfo, ChainStatus, EntryId, LedgerEntry, GENESIS_HASH};

/// Error type for ledger operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("Ledger entry not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    /// Backend could not be reached on a single attempt
    pub fn offline(message: impl Into<String>) -> Self {
        Self::Unavailable {
            attempts: 1,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Append-only storage reachable by the ledger client
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Human-readable backend name for logs and status
    fn name(&self) -> &str;

    /// Link a payload onto the chain tail. Either the full entry is
    /// persisted with a correct link, or nothing is.
    async fn append(&self, payload: Value) -> LedgerResult<LedgerEntry>;

    /// Look up a committed entry
    async fn get(&self, id: &str) -> LedgerResult<Option<LedgerEntry>>;

    /// All committed entries in chain order
    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>>;

    /// Most recent sealed blocks, newest first
    async fn blocks(&self, limit: usize) -> LedgerResult<Vec<BlockInfo>>;

    async fn status(&self) -> LedgerResult<ChainStatus>;

    /// Cheap reachability check
    async fn health(&self) -> LedgerResult<()>;

    /// Drop all history (development only)
    async fn reset(&self) -> LedgerResult<()>;
}

/// Shared reference to a ledger backend
pub type SharedLedgerBackend = Arc<dyn LedgerBackend>;

/// Default number of entries sealed into one block
pub const DEFAULT_BLOCK_SIZE: usize = 4;

#[derive(Default)]
struct ChainState {
    committed: Vec<LedgerEntry>,
    index: HashMap<EntryId, usize>,
    pending: Vec<LedgerEntry>,
    blocks: Vec<BlockInfo>,
    next_sequence: u64,
    tail_hash: Option<String>,
}

impl ChainState {
    fn tail(&self) -> &str {
        self.tail_hash.as_deref().unwrap_or(GENESIS_HASH)
    }

    fn seal(&mut self) -> Option<BlockInfo> {
        if self.pending.is_empty() {
            return None;
        }

        let previous_hash = self
            .blocks
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut hasher = blake3::Hasher::new();
        hasher.update(previous_hash.as_bytes());
        for entry in &self.pending {
            hasher.update(entry.hash.as_bytes());
        }

        let block = BlockInfo {
            index: self.blocks.len() as u64,
            hash: hasher.finalize().to_hex().to_string(),
            previous_hash,
            timestamp: Utc::now(),
            entry_count: self.pending.len(),
            entry_ids: self.pending.iter().map(|e| e.id.clone()).collect(),
        };

        for entry in self.pending.drain(..) {
            self.index.insert(entry.id.clone(), self.committed.len());
            self.committed.push(entry);
        }
        self.blocks.push(block.clone());
        Some(block)
    }
}

/// In-memory hash-chained ledger with block batching.
///
/// Appends are linked immediately but only become readable once their
/// block is sealed, either because `block_size` entries are pending or
/// because [`MemoryLedger::seal_block`] ran (see
/// [`MemoryLedger::spawn_block_producer`]).
pub struct MemoryLedger {
    state: Mutex<ChainState>,
    available: AtomicBool,
    block_size: usize,
}

impl MemoryLedger {
    /// Create an empty ledger with the default block size
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create an empty ledger sealing a block every `block_size` entries
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            available: AtomicBool::new(true),
            block_size: block_size.max(1),
        }
    }

    /// Create a shared reference to this ledger
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Take the ledger offline (every call fails) or bring it back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        info!(available, "Memory ledger availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Seal all pending entries into a block
    pub fn seal_block(&self) -> LedgerResult<Option<BlockInfo>> {
        let mut state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let block = state.seal();
        if let Some(ref b) = block {
            debug!(block = b.index, entries = b.entry_count, "Sealed ledger block");
        }
        Ok(block)
    }

    /// Seal pending entries on a fixed interval until the task is aborted
    pub fn spawn_block_producer(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !ledger.is_available() {
                    continue;
                }
                if let Err(e) = ledger.seal_block() {
                    tracing::error!("Block producer stopped: {}", e);
                    break;
                }
            }
        })
    }

    fn ensure_available(&self) -> LedgerResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LedgerError::offline("memory ledger is offline"))
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerBackend for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, payload: Value) -> LedgerResult<LedgerEntry> {
        self.ensure_available()?;
        let mut state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;

        let entry = LedgerEntry::link(payload, state.next_sequence, state.tail(), Utc::now());
        state.next_sequence += 1;
        state.tail_hash = Some(entry.hash.clone());
        state.pending.push(entry.clone());

        if state.pending.len() >= self.block_size {
            state.seal();
        }

        Ok(entry)
    }

    async fn get(&self, id: &str) -> LedgerResult<Option<LedgerEntry>> {
        self.ensure_available()?;
        let state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state.index.get(id).map(|&i| state.committed[i].clone()))
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.ensure_available()?;
        let state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state.committed.clone())
    }

    async fn blocks(&self, limit: usize) -> LedgerResult<Vec<BlockInfo>> {
        self.ensure_available()?;
        let state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state.blocks.iter().rev().take(limit).cloned().collect())
    }

    async fn status(&self) -> LedgerResult<ChainStatus> {
        self.ensure_available()?;
        let state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(ChainStatus {
            total_blocks: state.blocks.len() as u64,
            total_entries: state.committed.len() as u64,
            pending_entries: state.pending.len() as u64,
            latest_hash: state
                .committed
                .last()
                .map(|e| e.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            chain_valid: verify_entries(&state.committed),
        })
    }

    async fn health(&self) -> LedgerResult<()> {
        self.ensure_available()
    }

    async fn reset(&self) -> LedgerResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;
        *state = ChainState::default();
        info!("Memory ledger reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_batch_into_blocks() {
        let ledger = MemoryLedger::with_block_size(3);

        let first = ledger.append(json!({"n": 0})).await.unwrap();
        ledger.append(json!({"n": 1})).await.unwrap();

        // Not sealed yet: invisible to readers
        assert_eq!(ledger.get(&first.id).await.unwrap(), None);
        assert_eq!(ledger.status().await.unwrap().pending_entries, 2);

        ledger.append(json!({"n": 2})).await.unwrap();
        assert_eq!(ledger.get(&first.id).await.unwrap(), Some(first));

        let status = ledger.status().await.unwrap();
        assert_eq!(status.total_blocks, 1);
        assert_eq!(status.total_entries, 3);
        assert_eq!(status.pending_entries, 0);
        assert!(status.chain_valid);
    }

    #[tokio::test]
    async fn test_links_span_blocks() {
        let ledger = MemoryLedger::with_block_size(2);
        for n in 0..5 {
            ledger.append(json!({ "n": n })).await.unwrap();
        }
        ledger.seal_block().unwrap();

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
        }
        assert!(verify_entries(&entries));

        let blocks = ledger.blocks(10).await.unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].index, 2); // newest first
        assert_eq!(blocks[2].previous_hash, GENESIS_HASH);
        assert_eq!(blocks[1].previous_hash, blocks[2].hash);
    }

    #[tokio::test]
    async fn test_seal_without_pending_is_noop() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.seal_block().unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_rejects_everything() {
        let ledger = MemoryLedger::new();
        ledger.set_available(false);

        let err = ledger.append(json!({})).await.unwrap_err();
        assert!(err.is_transient());
        assert!(ledger.health().await.is_err());

        ledger.set_available(true);
        assert!(ledger.append(json!({})).await.is_ok());
        assert_eq!(ledger.status().await.unwrap().pending_entries, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_chain() {
        let ledger = MemoryLedger::with_block_size(1);
        ledger.append(json!({"n": 1})).await.unwrap();
        ledger.reset().await.unwrap();

        let status = ledger.status().await.unwrap();
        assert_eq!(status.total_entries, 0);
        assert_eq!(status.latest_hash, GENESIS_HASH);

        let entry = ledger.append(json!({"n": 2})).await.unwrap();
        assert_eq!(entry.sequence, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_producer_seals_periodically() {
        let ledger = MemoryLedger::with_block_size(100).shared();
        let entry = ledger.append(json!({"n": 1})).await.unwrap();

        let handle = ledger.spawn_block_producer(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(ledger.get(&entry.id).await.unwrap().is_some());
        handle.abort();
    }
}
