//! Hash-chained, append-only audit ledger
//!
//! Every committed transition in the system (experiment initialization,
//! label commits, voting results, resets) is written here. The chain is
//! tamper-evident: each entry carries the hash of its predecessor.

pub mod backend;
pub mod client;
pub mod rpc;
pub mod types;

pub use backend::{
    LedgerBackend, LedgerError, LedgerResult, MemoryLedger, SharedLedgerBackend,
    DEFAULT_BLOCK_SIZE,
};
pub use client::LedgerClient;
pub use rpc::RpcLedger;
pub use types::{verify_entries, BlockInfo, ChainStatus, EntryId, LedgerEntry, GENESIS_HASH};
