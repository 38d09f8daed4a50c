//! Core types for the hash-chained audit ledger
//!
//! Entries are immutable once written. Each entry links backward to the
//! hash of its predecessor; the first entry links to [`GENESIS_HASH`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Content-derived identifier of a ledger entry
pub type EntryId = String;

/// Chain link of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single immutable ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Content-derived identifier (hash of payload, timestamp and sequence)
    pub id: EntryId,

    /// Position in the chain, starting at 0
    pub sequence: u64,

    /// Arbitrary structured record
    pub payload: Value,

    /// Hash of the previous entry, or [`GENESIS_HASH`]
    pub previous_hash: String,

    /// Hash over this entry's id, link, timestamp and payload
    pub hash: String,

    /// Time the entry was linked into the chain
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Link a payload onto a chain tail
    pub fn link(
        payload: Value,
        sequence: u64,
        previous_hash: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let id = derive_id(&payload, timestamp, sequence);
        let mut entry = Self {
            id,
            sequence,
            payload,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            timestamp,
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Recompute the hash from the entry's contents
    pub fn compute_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.id.as_bytes());
        hasher.update(&self.sequence.to_le_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(&timestamp_nanos(self.timestamp).to_le_bytes());
        hasher.update(canonical_json(&self.payload).as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Record type tag of the payload, if it carries one
    pub fn record_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

fn timestamp_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(0)
}

// serde_json maps are ordered by key, so this is stable for equal values.
fn canonical_json(value: &Value) -> String {
    value.to_string()
}

fn derive_id(payload: &Value, timestamp: DateTime<Utc>, sequence: u64) -> EntryId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(canonical_json(payload).as_bytes());
    hasher.update(&timestamp_nanos(timestamp).to_le_bytes());
    hasher.update(&sequence.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Walk a chain in sequence order and validate every link.
///
/// Returns `false` on the first entry whose hash does not match its
/// contents, whose link does not match its predecessor, or whose sequence
/// number is out of place. Never repairs anything.
pub fn verify_entries(entries: &[LedgerEntry]) -> bool {
    let mut expected_previous = GENESIS_HASH;

    for (position, entry) in entries.iter().enumerate() {
        if entry.sequence != position as u64 {
            warn!(entry_id = %entry.id, position, sequence = entry.sequence, "Ledger sequence gap");
            return false;
        }
        if entry.previous_hash != expected_previous {
            warn!(entry_id = %entry.id, sequence = entry.sequence, "Ledger chain link mismatch");
            return false;
        }
        if entry.hash != entry.compute_hash() {
            warn!(entry_id = %entry.id, sequence = entry.sequence, "Ledger entry hash mismatch");
            return false;
        }
        expected_previous = entry.hash.as_str();
    }

    true
}

/// A sealed group of entries committed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub index: u64,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: DateTime<Utc>,
    pub entry_count: usize,
    pub entry_ids: Vec<EntryId>,
}

/// Ledger status and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Number of sealed blocks
    pub total_blocks: u64,
    /// Entries committed in sealed blocks
    pub total_entries: u64,
    /// Entries linked but not yet sealed into a block
    pub pending_entries: u64,
    /// Hash of the latest committed entry
    pub latest_hash: String,
    /// Result of walking the committed chain
    pub chain_valid: bool,
}
