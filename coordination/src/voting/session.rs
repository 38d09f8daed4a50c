//! Voting session state and the majority tally

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditStatus;
use crate::config::VotingConfig;
use crate::engine::Label;

/// Voting session identifier (`vote_<8 hex>`)
pub type SessionId = String;

/// A single voter's label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub label: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Incoming vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub voter_id: String,
    pub label: Label,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    TimedOut,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Majority tally over a set of votes.
///
/// Returns the most frequent label (lowest label wins ties) and whether it
/// holds a strict majority of the votes cast. `None` when there are no
/// votes. Vote order does not affect the result.
pub fn tally(votes: &[Vote]) -> Option<(Label, bool)> {
    let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote.label).or_insert(0) += 1;
    }

    // BTreeMap iterates labels ascending; strict `>` keeps the lowest
    let mut winner: Option<(Label, usize)> = None;
    for (&label, &count) in &counts {
        if winner.map_or(true, |(_, best)| count > best) {
            winner = Some((label, count));
        }
    }

    winner.map(|(label, count)| (label, count * 2 > votes.len()))
}

/// One voting round over a pool sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: SessionId,
    pub experiment_id: String,
    pub sample_index: usize,
    pub sample_id: String,
    pub config: VotingConfig,
    pub votes: Vec<Vote>,
    pub status: SessionStatus,
    pub final_label: Option<Label>,
    pub consensus_reached: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<String>,
}

impl VotingSession {
    pub fn new(
        id: SessionId,
        experiment_id: impl Into<String>,
        sample_index: usize,
        config: VotingConfig,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            experiment_id: experiment_id.into(),
            sample_index,
            sample_id: crate::engine::sample_id(sample_index),
            config,
            votes: Vec::new(),
            status: SessionStatus::Active,
            final_label: None,
            consensus_reached: false,
            created_at,
            completed_at: None,
            ledger_entry_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.votes.iter().any(|v| v.voter_id == voter_id)
    }

    /// Votes still needed to reach quorum
    pub fn votes_needed(&self) -> usize {
        self.config.min_votes.saturating_sub(self.votes.len())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.config.timeout()
    }

    /// Whether the current vote count requires finalization
    pub fn quorum_reached(&self) -> bool {
        self.votes.len() >= self.config.min_votes || self.votes.len() >= self.config.max_votes
    }

    /// Close the session with `status` and record the tally
    pub(crate) fn finalize(&mut self, status: SessionStatus, now: DateTime<Utc>) -> VotingOutcome {
        let (final_label, consensus_reached) = match tally(&self.votes) {
            Some((label, consensus)) => (Some(label), consensus),
            None => (None, false),
        };
        self.status = status;
        self.final_label = final_label;
        self.consensus_reached = consensus_reached;
        self.completed_at = Some(now);

        VotingOutcome {
            session_id: self.id.clone(),
            experiment_id: self.experiment_id.clone(),
            sample_index: self.sample_index,
            sample_id: self.sample_id.clone(),
            status,
            final_label,
            consensus_reached,
            votes: self.votes.clone(),
            audit: None,
        }
    }
}

/// Result of a finalized session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingOutcome {
    pub session_id: SessionId,
    pub experiment_id: String,
    pub sample_index: usize,
    pub sample_id: String,
    pub status: SessionStatus,
    pub final_label: Option<Label>,
    pub consensus_reached: bool,
    pub votes: Vec<Vote>,
    /// Ledger write of the `voting_result` record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditStatus>,
}

/// Acknowledgement of an accepted vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub session_id: SessionId,
    pub vote_count: usize,
    pub votes_needed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized: Option<VotingOutcome>,
}
