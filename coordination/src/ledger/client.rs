//! Ledger client with retrying appends and read-your-writes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::backend::{LedgerError, LedgerResult, SharedLedgerBackend};
use super::types::{verify_entries, BlockInfo, ChainStatus, EntryId, LedgerEntry};
use crate::retry::RetryPolicy;

/// Number of own writes remembered for read-after-write
const OWN_WRITE_CAPACITY: usize = 4096;

#[derive(Default)]
struct OwnWrites {
    order: VecDeque<EntryId>,
    entries: HashMap<EntryId, LedgerEntry>,
}

impl OwnWrites {
    fn insert(&mut self, entry: LedgerEntry) {
        if self.entries.len() >= OWN_WRITE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }
}

/// Client over a ledger backend.
///
/// Appends are retried with exponential backoff while the backend reports
/// itself unavailable; a record is either linked or surfaced as
/// [`LedgerError::Unavailable`], never dropped silently. Entries appended
/// through this client are readable through it immediately, even if the
/// backend has not sealed them into a block yet.
pub struct LedgerClient {
    backend: SharedLedgerBackend,
    retry: RetryPolicy,
    own_writes: RwLock<OwnWrites>,
}

impl LedgerClient {
    /// Create a client with the default retry policy
    pub fn new(backend: SharedLedgerBackend) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            own_writes: RwLock::new(OwnWrites::default()),
        }
    }

    /// Use a custom retry policy for appends
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Append a payload, retrying while the backend is unreachable
    pub async fn append(&self, payload: Value) -> LedgerResult<EntryId> {
        let backend = &self.backend;
        let payload = &payload;
        let (result, attempts) = self
            .retry
            .run(
                || async move { backend.append(payload.clone()).await },
                LedgerError::is_transient,
            )
            .await;

        match result {
            Ok(entry) => {
                debug!(entry_id = %entry.id, sequence = entry.sequence, attempts, "Ledger append");
                let id = entry.id.clone();
                self.own_writes
                    .write()
                    .map_err(|_| LedgerError::LockPoisoned)?
                    .insert(entry);
                Ok(id)
            }
            Err(LedgerError::Unavailable { message, .. }) => {
                warn!(attempts, backend = self.backend.name(), "Ledger append gave up: {}", message);
                Err(LedgerError::Unavailable { attempts, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the full entry for `id`
    pub async fn get_entry(&self, id: &str) -> LedgerResult<LedgerEntry> {
        let remote = self.backend.get(id).await;
        if let Ok(Some(entry)) = remote {
            return Ok(entry);
        }

        if let Some(entry) = self.own_write(id)? {
            return Ok(entry);
        }

        match remote {
            Err(e) => Err(e),
            _ => Err(LedgerError::NotFound(id.to_string())),
        }
    }

    /// Fetch the payload stored under `id`
    pub async fn get(&self, id: &str) -> LedgerResult<Value> {
        self.get_entry(id).await.map(|entry| entry.payload)
    }

    fn own_write(&self, id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let writes = self.own_writes.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(writes.entries.get(id).cloned())
    }

    /// Committed entries in chain order
    pub async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.backend.entries().await
    }

    /// Walk the committed chain. Returns `false` at the first bad link.
    pub async fn verify_chain(&self) -> LedgerResult<bool> {
        let entries = self.backend.entries().await?;
        let valid = verify_entries(&entries);
        info!(entries = entries.len(), valid, "Ledger chain verified");
        Ok(valid)
    }

    /// Entries whose payload has the given `type`, newest first.
    ///
    /// Includes this client's own writes that the backend has not sealed
    /// yet. When `experiment_id` is set, only that experiment's records
    /// are returned.
    pub async fn records(
        &self,
        record_type: &str,
        experiment_id: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let mut entries = self.backend.entries().await?;
        let committed: HashSet<EntryId> = entries.iter().map(|e| e.id.clone()).collect();

        {
            let writes = self.own_writes.read().map_err(|_| LedgerError::LockPoisoned)?;
            entries.extend(
                writes
                    .entries
                    .values()
                    .filter(|e| !committed.contains(&e.id))
                    .cloned(),
            );
        }

        entries.retain(|e| {
            e.record_type() == Some(record_type)
                && experiment_id.map_or(true, |id| {
                    e.payload.get("experiment_id").and_then(Value::as_str) == Some(id)
                })
        });
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn status(&self) -> LedgerResult<ChainStatus> {
        self.backend.status().await
    }

    /// Most recent sealed blocks, newest first
    pub async fn recent_blocks(&self, limit: usize) -> LedgerResult<Vec<BlockInfo>> {
        self.backend.blocks(limit).await
    }

    pub async fn health(&self) -> LedgerResult<()> {
        self.backend.health().await
    }

    /// Drop all history on the backend and in the local write cache
    pub async fn reset(&self) -> LedgerResult<()> {
        self.backend.reset().await?;
        *self.own_writes.write().map_err(|_| LedgerError::LockPoisoned)? = OwnWrites::default();
        Ok(())
    }
}
