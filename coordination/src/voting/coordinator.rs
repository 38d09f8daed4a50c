//! Voting coordinator
//!
//! Sessions are individually locked: a vote on one session never waits on
//! another. Finalized results are written to the audit ledger after the
//! session lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::session::{
    SessionId, SessionStatus, Vote, VoteReceipt, VoteRequest, VotingOutcome, VotingSession,
};
use super::{VotingError, VotingResult};
use crate::audit::{AuditLog, AuditRecord, AuditStatus};
use crate::config::VotingConfig;

type SessionSlot = Arc<Mutex<VotingSession>>;

/// Manages concurrent voting sessions
pub struct VotingCoordinator {
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
    audit: Arc<AuditLog>,
}

/// Shared reference to the coordinator
pub type SharedVotingCoordinator = Arc<VotingCoordinator>;

fn new_session_id() -> SessionId {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("vote_{}", &hex[..8])
}

impl VotingCoordinator {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub fn shared(self) -> SharedVotingCoordinator {
        Arc::new(self)
    }

    /// Open a session for one pool sample.
    ///
    /// Fails if the config is invalid or the sample already has an active
    /// session in this experiment.
    pub async fn start_session(
        &self,
        experiment_id: &str,
        sample_index: usize,
        config: VotingConfig,
    ) -> VotingResult<VotingSession> {
        config
            .validate()
            .map_err(|e| VotingError::InvalidConfig(e.to_string()))?;

        let mut sessions = self.sessions.write().await;
        for slot in sessions.values() {
            let existing = slot.lock().await;
            if existing.is_active()
                && existing.experiment_id == experiment_id
                && existing.sample_index == sample_index
            {
                return Err(VotingError::SessionExists {
                    sample_id: existing.sample_id.clone(),
                    session_id: existing.id.clone(),
                });
            }
        }

        let mut id = new_session_id();
        while sessions.contains_key(&id) {
            id = new_session_id();
        }

        let session = VotingSession::new(id.clone(), experiment_id, sample_index, config, Utc::now());
        sessions.insert(id.clone(), Arc::new(Mutex::new(session.clone())));

        info!(
            session_id = %id,
            experiment_id,
            sample_index,
            min_votes = session.config.min_votes,
            "Voting session started"
        );
        Ok(session)
    }

    async fn slot(&self, session_id: &str) -> VotingResult<SessionSlot> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| VotingError::SessionNotFound(session_id.to_string()))
    }

    /// Record a vote; finalizes the session once quorum is reached
    pub async fn submit_vote(
        &self,
        session_id: &str,
        request: VoteRequest,
    ) -> VotingResult<VoteReceipt> {
        if request.voter_id.trim().is_empty() {
            return Err(VotingError::InvalidVote("voter_id must not be empty".into()));
        }
        if let Some(c) = request.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(VotingError::InvalidVote(format!(
                    "confidence {c} is outside [0, 1]"
                )));
            }
        }

        let slot = self.slot(session_id).await?;
        let (receipt, outcome) = {
            let mut session = slot.lock().await;
            if !session.is_active() {
                return Err(VotingError::SessionNotActive {
                    session_id: session_id.to_string(),
                    status: session.status,
                });
            }
            if session.has_voted(&request.voter_id) {
                return Err(VotingError::DuplicateVoter {
                    session_id: session_id.to_string(),
                    voter_id: request.voter_id,
                });
            }

            let now = Utc::now();
            session.votes.push(Vote {
                voter_id: request.voter_id,
                label: request.label,
                confidence: request.confidence,
                timestamp: now,
            });
            debug!(session_id, votes = session.votes.len(), "Vote recorded");

            let outcome = if session.quorum_reached() {
                Some(session.finalize(SessionStatus::Completed, now))
            } else {
                None
            };
            let receipt = VoteReceipt {
                session_id: session.id.clone(),
                vote_count: session.votes.len(),
                votes_needed: session.votes_needed(),
                finalized: None,
            };
            (receipt, outcome)
        };

        let finalized = match outcome {
            Some(outcome) => Some(self.record_outcome(&slot, outcome).await),
            None => None,
        };
        Ok(VoteReceipt {
            finalized,
            ..receipt
        })
    }

    /// Current state of a session
    pub async fn session(&self, session_id: &str) -> VotingResult<VotingSession> {
        let slot = self.slot(session_id).await?;
        let session = slot.lock().await;
        Ok(session.clone())
    }

    /// All sessions of an experiment, oldest first
    pub async fn sessions_for(&self, experiment_id: &str) -> Vec<VotingSession> {
        let slots: Vec<SessionSlot> = self.sessions.read().await.values().cloned().collect();
        let mut result = Vec::new();
        for slot in slots {
            let session = slot.lock().await;
            if session.experiment_id == experiment_id {
                result.push(session.clone());
            }
        }
        result.sort_by_key(|s| s.created_at);
        result
    }

    pub async fn active_count(&self) -> usize {
        let slots: Vec<SessionSlot> = self.sessions.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_active() {
                count += 1;
            }
        }
        count
    }

    /// Time out every active session older than its timeout at `now`.
    ///
    /// Each is finalized with whatever votes it has.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<VotingOutcome> {
        let slots: Vec<SessionSlot> = self.sessions.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for slot in slots {
            let outcome = {
                let mut session = slot.lock().await;
                if session.is_active() && session.is_expired(now) {
                    Some(session.finalize(SessionStatus::TimedOut, now))
                } else {
                    None
                }
            };
            if let Some(outcome) = outcome {
                warn!(
                    session_id = %outcome.session_id,
                    votes = outcome.votes.len(),
                    "Voting session timed out"
                );
                expired.push(self.record_outcome(&slot, outcome).await);
            }
        }
        expired
    }

    /// Drop sessions belonging to one experiment
    pub async fn remove_experiment(&self, experiment_id: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut doomed = Vec::new();
        for (id, slot) in sessions.iter() {
            if slot.lock().await.experiment_id == experiment_id {
                doomed.push(id.clone());
            }
        }
        for id in &doomed {
            sessions.remove(id);
        }
        doomed.len()
    }

    /// Drop every session
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    async fn record_outcome(&self, slot: &SessionSlot, mut outcome: VotingOutcome) -> VotingOutcome {
        let record = AuditRecord::VotingResult {
            experiment_id: outcome.experiment_id.clone(),
            session_id: outcome.session_id.clone(),
            sample_id: outcome.sample_id.clone(),
            votes: outcome.votes.clone(),
            final_label: outcome.final_label,
            consensus_reached: outcome.consensus_reached,
            status: outcome.status,
            timestamp: Utc::now(),
        };
        let audit = self.audit.record(&record).await;
        if let AuditStatus::Recorded { entry_id } = &audit {
            slot.lock().await.ledger_entry_id = Some(entry_id.clone());
        }

        info!(
            session_id = %outcome.session_id,
            final_label = ?outcome.final_label,
            consensus = outcome.consensus_reached,
            status = %outcome.status,
            "Voting session finalized"
        );
        outcome.audit = Some(audit);
        outcome
    }
}
