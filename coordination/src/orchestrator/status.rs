//! Result and status types returned by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ExperimentState;
use crate::audit::{AuditStatus, LabelSource};
use crate::config::{QueryStrategyConfig, VotingConfig};
use crate::engine::{Label, Metrics, SampleQuery};
use crate::health::{HealthStatus, ServiceHealth};
use crate::voting::{VoteReceipt, VotingOutcome};

/// Point-in-time view of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub experiment_id: String,
    pub state: ExperimentState,
    pub model_type: String,
    pub query_strategy: QueryStrategyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<VotingConfig>,
    pub created_at: DateTime<Utc>,
    pub labeled_count: usize,
    pub unlabeled_count: usize,
    pub total_samples: usize,
    /// Labels committed since the last reset
    pub labels_committed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of a successful initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializedExperiment {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub audit: AuditStatus,
}

/// Outcome of asking for the next sample
#[derive(Debug, Clone, PartialEq)]
pub enum NextSample {
    Sample(SampleQuery),
    /// The unlabeled pool is exhausted. Not an error.
    NoSamples,
}

/// A label applied to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCommit {
    pub experiment_id: String,
    pub sample_id: String,
    pub sample_index: usize,
    pub label: Label,
    pub source: LabelSource,
    pub metrics_before: Metrics,
    pub metrics: Metrics,
    pub remaining_unlabeled: usize,
    pub total_labeled: usize,
    pub audit: AuditStatus,
}

/// Result of a vote, plus the label commit when the vote finalized the
/// session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteSubmission {
    pub receipt: VoteReceipt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_commit: Option<LabelCommit>,
    /// Why a finalized session's label was not committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_error: Option<String>,
}

/// Request to open a voting session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartVoting {
    pub sample_index: usize,
    /// Overrides the experiment's voting config for this session
    #[serde(default)]
    pub config: Option<VotingConfig>,
}

/// A voting outcome finalized by the timeout sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweptSession {
    pub outcome: VotingOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_commit: Option<LabelCommit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub experiment_id: String,
    pub voting_sessions_dropped: usize,
    pub audit: AuditStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReset {
    pub experiments_cleared: usize,
}

/// System-wide status. Never fails to build: collaborators that cannot be
/// reached are reported as unhealthy or unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub orchestrator_status: HealthStatus,
    pub engine_status: HealthStatus,
    pub ledger_status: HealthStatus,
    pub active_experiments: usize,
    pub active_voting_sessions: usize,
    pub total_samples_processed: u64,
    pub audit_failures: u64,
    pub audit_degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_audit_failure: Option<String>,
    pub system_uptime: String,
    pub uptime_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    pub service_health: Vec<ServiceHealth>,
}

/// `Xh Ym Zs`
pub fn format_uptime(seconds: u64) -> String {
    format!(
        "{}h {}m {}s",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3_725), "1h 2m 5s");
        assert_eq!(format_uptime(90_061), "25h 1m 1s");
    }
}
