//! Audit trail of committed transitions.
//!
//! Ledger writes are best-effort relative to in-memory state: a failed
//! write never rolls anything back. It is logged, counted, and surfaced to
//! the caller as [`AuditStatus::Degraded`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::{Label, Metrics};
use crate::ledger::{EntryId, LedgerClient};
use crate::voting::{SessionStatus, Vote};

/// Where a committed label came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelSource {
    Direct,
    Voting { session_id: String },
}

/// Typed payloads written to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    ExperimentInitialization {
        experiment_id: String,
        config: Value,
        initial_metrics: Metrics,
        labeled_count: usize,
        unlabeled_count: usize,
        timestamp: DateTime<Utc>,
    },
    ModelUpdate {
        experiment_id: String,
        update_type: String,
        sample_id: String,
        sample_index: usize,
        label: Label,
        source: LabelSource,
        metrics_before: Metrics,
        metrics_after: Metrics,
        samples_processed: u64,
        #[serde(default)]
        metadata: Value,
        timestamp: DateTime<Utc>,
    },
    VotingResult {
        experiment_id: String,
        session_id: String,
        sample_id: String,
        votes: Vec<Vote>,
        final_label: Option<Label>,
        consensus_reached: bool,
        status: SessionStatus,
        timestamp: DateTime<Utc>,
    },
    ExperimentReset {
        experiment_id: String,
        labeled_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl AuditRecord {
    /// Value of the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExperimentInitialization { .. } => "experiment_initialization",
            Self::ModelUpdate { .. } => "model_update",
            Self::VotingResult { .. } => "voting_result",
            Self::ExperimentReset { .. } => "experiment_reset",
        }
    }

    pub fn experiment_id(&self) -> &str {
        match self {
            Self::ExperimentInitialization { experiment_id, .. }
            | Self::ModelUpdate { experiment_id, .. }
            | Self::VotingResult { experiment_id, .. }
            | Self::ExperimentReset { experiment_id, .. } => experiment_id,
        }
    }
}

/// Outcome of writing one audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    Recorded { entry_id: EntryId },
    Degraded { warning: String },
}

impl AuditStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn entry_id(&self) -> Option<&str> {
        match self {
            Self::Recorded { entry_id } => Some(entry_id),
            Self::Degraded { .. } => None,
        }
    }
}

/// Writes audit records through the ledger client and tracks failures
pub struct AuditLog {
    ledger: Arc<LedgerClient>,
    failures: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

impl AuditLog {
    pub fn new(ledger: Arc<LedgerClient>) -> Self {
        Self {
            ledger,
            failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerClient> {
        &self.ledger
    }

    /// Append `record`; failures are logged and counted, never returned
    pub async fn record(&self, record: &AuditRecord) -> AuditStatus {
        let payload = match serde_json::to_value(record) {
            Ok(payload) => payload,
            Err(e) => return self.degrade(record, format!("failed to encode record: {e}")),
        };

        match self.ledger.append(payload).await {
            Ok(entry_id) => {
                debug!(
                    experiment_id = record.experiment_id(),
                    record_type = record.kind(),
                    entry_id = %entry_id,
                    "Audit record written"
                );
                AuditStatus::Recorded { entry_id }
            }
            Err(e) => self.degrade(record, format!("ledger write failed: {e}")),
        }
    }

    fn degrade(&self, record: &AuditRecord, warning: String) -> AuditStatus {
        warn!(
            experiment_id = record.experiment_id(),
            record_type = record.kind(),
            "Audit trail degraded: {}",
            warning
        );
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.lock() {
            *last = Some(warning.clone());
        }
        AuditStatus::Degraded { warning }
    }

    /// Number of records that could not be written
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_failure(&self) -> Option<String> {
        self.last_failure.lock().ok().and_then(|last| last.clone())
    }
}
