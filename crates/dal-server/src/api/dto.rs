//! Request and response bodies of the orchestrator API

use chrono::{DateTime, Utc};
use dal_coordination::audit::AuditStatus;
use dal_coordination::ledger::{BlockInfo, LedgerEntry};
use dal_coordination::{ExperimentStatus, Label, Metrics, VotingConfig, VotingSession};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;

/// Success envelope: `{"status": "success", ...body}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    #[serde(flatten)]
    pub body: T,
}

impl<T> ApiResponse<T> {
    pub fn success(body: T) -> Self {
        Self {
            status: "success",
            body,
        }
    }
}

/// A pool sample reference: `12`, `"12"` or `"sample_12"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SampleRef {
    Index(usize),
    Id(String),
}

impl SampleRef {
    pub fn index(&self) -> Result<usize, ApiError> {
        match self {
            Self::Index(index) => Ok(*index),
            Self::Id(id) => {
                let digits = id.strip_prefix("sample_").unwrap_or(id);
                digits
                    .parse()
                    .map_err(|_| ApiError::bad_request(format!("invalid sample_id: {id:?}")))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitLabelRequest {
    pub sample_id: SampleRef,
    pub label: Label,
    #[serde(default)]
    pub metadata: Value,
}

/// Voting session request. Any of the voting fields given override the
/// experiment's voting config for this session.
#[derive(Debug, Deserialize)]
pub struct StartVotingRequest {
    pub sample_id: SampleRef,
    #[serde(default)]
    pub min_votes: Option<usize>,
    #[serde(default)]
    pub max_votes: Option<usize>,
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    #[serde(default)]
    pub require_consensus: Option<bool>,
}

impl StartVotingRequest {
    /// Session config built on top of `base`, or `None` when the request
    /// overrides nothing
    pub fn config_over(&self, base: Option<&VotingConfig>) -> Option<VotingConfig> {
        if self.min_votes.is_none()
            && self.max_votes.is_none()
            && self.timeout_minutes.is_none()
            && self.require_consensus.is_none()
        {
            return None;
        }
        let mut config = base.cloned().unwrap_or_default();
        if let Some(min_votes) = self.min_votes {
            config.min_votes = min_votes;
        }
        if let Some(max_votes) = self.max_votes {
            config.max_votes = max_votes;
        }
        if let Some(timeout_minutes) = self.timeout_minutes {
            config.timeout_minutes = timeout_minutes;
        }
        if let Some(require_consensus) = self.require_consensus {
            config.require_consensus = require_consensus;
        }
        Some(config)
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, 1_000)
    }
}

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub experiment_id: String,
    pub experiment: ExperimentStatus,
    pub audit: AuditStatus,
}

#[derive(Debug, Serialize)]
pub struct NoSamplesResponse {
    pub status: &'static str,
    pub message: String,
}

impl NoSamplesResponse {
    pub fn new() -> Self {
        Self {
            status: "no_samples",
            message: "No unlabeled samples remaining".to_string(),
        }
    }
}

impl Default for NoSamplesResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: VotingSession,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub experiment_id: String,
    pub metrics: Metrics,
}

#[derive(Debug, Serialize)]
pub struct ModelUpdatesResponse {
    pub experiment_id: String,
    pub updates: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
pub struct BlocksResponse {
    pub blocks: Vec<BlockInfo>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub chain_valid: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sample_ref_forms() {
        for body in [json!(12), json!("12"), json!("sample_12")] {
            let sample: SampleRef = serde_json::from_value(body).unwrap();
            assert_eq!(sample.index().unwrap(), 12);
        }
        let bad: SampleRef = serde_json::from_value(json!("sample_x")).unwrap();
        assert!(bad.index().is_err());
        assert!(serde_json::from_value::<SampleRef>(json!(-1)).is_err());
    }

    #[test]
    fn test_voting_overrides() {
        let request: StartVotingRequest =
            serde_json::from_value(json!({"sample_id": 3})).unwrap();
        assert_eq!(request.config_over(None), None);

        let request: StartVotingRequest =
            serde_json::from_value(json!({"sample_id": 3, "min_votes": 2})).unwrap();
        let base = VotingConfig {
            max_votes: 4,
            ..Default::default()
        };
        let config = request.config_over(Some(&base)).unwrap();
        assert_eq!(config.min_votes, 2);
        assert_eq!(config.max_votes, 4);
    }

    #[test]
    fn test_success_envelope_flattens() {
        let body = serde_json::to_value(ApiResponse::success(VerifyResponse { chain_valid: true }))
            .unwrap();
        assert_eq!(body, json!({"status": "success", "chain_valid": true}));
    }
}
