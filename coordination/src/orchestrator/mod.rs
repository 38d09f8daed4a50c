//! Experiment orchestrator - top-level coordinator of the labeling loop
//!
//! Owns every experiment and drives its learning engine through the
//! state machine in [`state`]. Operations on one experiment are serialized
//! by that experiment's lock; different experiments and different voting
//! sessions proceed concurrently. Model fitting and scoring run on the
//! blocking pool. Audit records are written after the experiment lock is
//! released, and a failed write never rolls back the in-memory state.

pub(crate) mod experiment;
pub mod state;
pub mod status;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::{AuditLog, AuditRecord, LabelSource};
use crate::config::{ConfigError, ExperimentConfig};
use crate::engine::{
    sample_id, Dataset, EngineError, EstimatorRegistry, Label, LearningEngine, Metrics,
};
use crate::health::{HealthStatus, ServiceHealthMonitor};
use crate::ledger::{BlockInfo, ChainStatus, LedgerClient, LedgerEntry, LedgerError};
use crate::voting::{VoteRequest, VotingCoordinator, VotingError, VotingOutcome, VotingSession};

use experiment::Experiment;
pub use state::{
    ExperimentState, ExperimentStateMachine, IllegalTransition, StateCell, TransitionRecord,
    MAX_TRANSITIONS,
};
pub use status::{
    format_uptime, ExperimentStatus, InitializedExperiment, LabelCommit, NextSample,
    ResetOutcome, StartVoting, SweptSession, SystemReset, SystemStatus, VoteSubmission,
};

/// Broad error classes, used to pick a response at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad request shape or config
    Validation,
    /// Operation not valid in the current experiment or session state
    State,
    NotFound,
    /// Model or ledger unreachable
    CollaboratorUnavailable,
    /// Internal invariant broken
    Consistency,
}

/// Error type for orchestrator operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Experiment {experiment_id} already exists")]
    ExperimentExists { experiment_id: String },

    #[error("Cannot {operation}: experiment {experiment_id} is {state}")]
    InvalidState {
        experiment_id: String,
        state: ExperimentState,
        operation: &'static str,
    },

    #[error("Experiment {0} labels through voting sessions")]
    VotingRequired(String),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Voting error: {0}")]
    Voting(#[from] VotingError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::ExperimentExists { .. } => {
                ErrorKind::Validation
            }
            Self::ExperimentNotFound(_) => ErrorKind::NotFound,
            Self::InvalidState { .. } | Self::VotingRequired(_) | Self::Transition(_) => {
                ErrorKind::State
            }
            Self::Engine(e) => match e {
                EngineError::InvalidTrainingData(_) | EngineError::SampleNotInPool(_) => {
                    ErrorKind::Validation
                }
                EngineError::NotInitialized | EngineError::NoUnlabeledSamples => ErrorKind::State,
                EngineError::Model(_) => ErrorKind::CollaboratorUnavailable,
                EngineError::Consistency(_) => ErrorKind::Consistency,
            },
            Self::Voting(e) => match e {
                VotingError::InvalidConfig(_) | VotingError::InvalidVote(_) => {
                    ErrorKind::Validation
                }
                VotingError::SessionNotFound(_) => ErrorKind::NotFound,
                VotingError::SessionNotActive { .. }
                | VotingError::DuplicateVoter { .. }
                | VotingError::SessionExists { .. } => ErrorKind::State,
            },
            Self::Ledger(LedgerError::NotFound(_)) => ErrorKind::NotFound,
            Self::Ledger(_) => ErrorKind::CollaboratorUnavailable,
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Shared reference to the orchestrator
pub type SharedOrchestrator = Arc<ExperimentOrchestrator>;

type ExperimentSlot = Arc<Mutex<Experiment>>;

/// An experiment and a view of its state that needs no lock
struct ExperimentEntry {
    slot: ExperimentSlot,
    state: StateCell,
}

impl ExperimentEntry {
    fn new(experiment: Experiment) -> Self {
        let state = experiment.machine.observer();
        Self {
            slot: Arc::new(Mutex::new(experiment)),
            state,
        }
    }
}

fn new_experiment_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("exp_{}", &hex[..8])
}

fn require_state(
    exp: &Experiment,
    expected: ExperimentState,
    operation: &'static str,
) -> OrchestratorResult<()> {
    if exp.state() == expected {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidState {
            experiment_id: exp.id.clone(),
            state: exp.state(),
            operation,
        })
    }
}

/// Run synchronous experiment work (model fits, scoring) on the blocking
/// pool.
///
/// The experiment lock moves into the task, so it is released when the work
/// finishes even if the caller stops waiting. A panic in `work` moves the
/// experiment to `error`.
async fn run_blocking<T, F>(slot: &ExperimentSlot, work: F) -> OrchestratorResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Experiment) -> OrchestratorResult<T> + Send + 'static,
{
    let mut guard = Arc::clone(slot).lock_owned().await;
    match tokio::task::spawn_blocking(move || work(&mut *guard)).await {
        Ok(result) => result,
        Err(e) => {
            let mut exp = slot.lock().await;
            let reason = format!("engine task failed: {e}");
            error!(experiment_id = %exp.id, "{}", reason);
            exp.fail(reason.clone());
            Err(EngineError::Consistency(reason).into())
        }
    }
}

/// Coordinates experiments, voting and the audit trail
pub struct ExperimentOrchestrator {
    experiments: RwLock<HashMap<String, ExperimentEntry>>,
    registry: Arc<EstimatorRegistry>,
    voting: VotingCoordinator,
    audit: Arc<AuditLog>,
    health: Option<Arc<ServiceHealthMonitor>>,
    total_samples_processed: Arc<AtomicU64>,
    started_at: Instant,
}

impl ExperimentOrchestrator {
    pub fn new(registry: Arc<EstimatorRegistry>, ledger: Arc<LedgerClient>) -> Self {
        let audit = Arc::new(AuditLog::new(ledger));
        Self {
            experiments: RwLock::new(HashMap::new()),
            registry,
            voting: VotingCoordinator::new(audit.clone()),
            audit,
            health: None,
            total_samples_processed: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    /// Report collaborator health from `monitor` in system status
    pub fn with_health_monitor(mut self, monitor: Arc<ServiceHealthMonitor>) -> Self {
        self.health = Some(monitor);
        self
    }

    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(self)
    }

    pub fn ledger(&self) -> &Arc<LedgerClient> {
        self.audit.ledger()
    }

    pub fn registry(&self) -> &Arc<EstimatorRegistry> {
        &self.registry
    }

    pub fn voting(&self) -> &VotingCoordinator {
        &self.voting
    }

    async fn slot(&self, experiment_id: &str) -> OrchestratorResult<ExperimentSlot> {
        self.experiments
            .read()
            .await
            .get(experiment_id)
            .map(|entry| entry.slot.clone())
            .ok_or_else(|| OrchestratorError::ExperimentNotFound(experiment_id.to_string()))
    }

    // ========================================================================
    // Experiment lifecycle
    // ========================================================================

    /// Validate `config`, train on its seed set and record the result.
    ///
    /// An idle (new or reset) experiment id may be initialized; any other
    /// state is rejected. If training fails the experiment moves to
    /// `error` and the engine's error is returned.
    pub async fn initialize_experiment(
        &self,
        mut config: ExperimentConfig,
    ) -> OrchestratorResult<InitializedExperiment> {
        config.validate()?;
        let estimator = self.registry.create(&config.model)?;
        let experiment_id = config
            .experiment_id
            .clone()
            .unwrap_or_else(new_experiment_id);
        config.experiment_id = Some(experiment_id.clone());

        let slot = {
            let mut experiments = self.experiments.write().await;
            experiments
                .entry(experiment_id.clone())
                .or_insert_with(|| {
                    ExperimentEntry::new(Experiment::new(experiment_id.clone(), config.clone()))
                })
                .slot
                .clone()
        };

        let id = experiment_id.clone();
        let (record, status) = run_blocking(&slot, move |exp| {
            if exp.state() != ExperimentState::Idle {
                return Err(OrchestratorError::ExperimentExists { experiment_id: id });
            }
            exp.config = config.clone();
            exp.labels_committed = 0;
            exp.last_error = None;

            let Dataset {
                seed_x,
                seed_y,
                pool_x,
                eval_x,
                eval_y,
                ..
            } = Dataset::from_config(&config.dataset);
            let mut engine = LearningEngine::new(estimator, pool_x).with_eval_set(eval_x, eval_y);

            let metrics = match engine.initial_train(seed_x, seed_y) {
                Ok(metrics) => metrics,
                Err(e) => {
                    error!(experiment_id = %id, "Initial training failed: {}", e);
                    exp.fail(format!("initial training failed: {e}"));
                    return Err(e.into());
                }
            };

            let unlabeled_count = engine.pool().unlabeled_count();
            exp.engine = Some(engine);
            exp.machine
                .advance(ExperimentState::Initialized, Some("initial training complete"))?;

            let record = AuditRecord::ExperimentInitialization {
                experiment_id: id,
                config: serde_json::to_value(&config).unwrap_or(Value::Null),
                labeled_count: metrics.labeled_count,
                unlabeled_count,
                initial_metrics: metrics,
                timestamp: Utc::now(),
            };
            Ok((record, exp.status()))
        })
        .await?;

        let audit = self.audit.record(&record).await;
        info!(
            experiment_id = %experiment_id,
            model = %status.model_type,
            pool = status.total_samples,
            voting = status.voting.is_some(),
            "Experiment initialized"
        );
        Ok(InitializedExperiment {
            experiment_id,
            status,
            audit,
        })
    }

    /// Current state and counters. Pure read.
    pub async fn get_experiment_status(
        &self,
        experiment_id: &str,
    ) -> OrchestratorResult<ExperimentStatus> {
        let slot = self.slot(experiment_id).await?;
        let exp = slot.lock().await;
        Ok(exp.status())
    }

    /// Transition log of an experiment
    pub async fn get_transitions(
        &self,
        experiment_id: &str,
    ) -> OrchestratorResult<Vec<TransitionRecord>> {
        let slot = self.slot(experiment_id).await?;
        let exp = slot.lock().await;
        Ok(exp.machine.transitions().iter().cloned().collect())
    }

    /// Most uncertain unlabeled sample, or [`NextSample::NoSamples`] once
    /// the pool is exhausted
    pub async fn get_next_sample(&self, experiment_id: &str) -> OrchestratorResult<NextSample> {
        let slot = self.slot(experiment_id).await?;
        run_blocking(&slot, |exp| {
            require_state(exp, ExperimentState::Initialized, "query next sample")?;

            exp.machine.advance(ExperimentState::Querying, None)?;
            let result = match exp.engine.as_ref() {
                Some(engine) => engine.query_next(),
                None => Err(EngineError::NotInitialized),
            };

            match result {
                Ok(query) => {
                    exp.machine.advance(ExperimentState::Initialized, None)?;
                    Ok(NextSample::Sample(query))
                }
                Err(EngineError::NoUnlabeledSamples) => {
                    exp.machine
                        .advance(ExperimentState::Initialized, Some("pool exhausted"))?;
                    Ok(NextSample::NoSamples)
                }
                Err(e @ EngineError::Consistency(_)) => {
                    error!(experiment_id = %exp.id, "Consistency violation during query: {}", e);
                    exp.fail(e.to_string());
                    Err(e.into())
                }
                Err(e) => {
                    warn!(experiment_id = %exp.id, "Query failed: {}", e);
                    exp.machine.advance(ExperimentState::Initialized, Some("query failed"))?;
                    Err(e.into())
                }
            }
        })
        .await
    }

    /// Label a sample directly. Rejected when the experiment uses voting.
    pub async fn submit_label(
        &self,
        experiment_id: &str,
        sample_index: usize,
        label: Label,
        metadata: Value,
    ) -> OrchestratorResult<LabelCommit> {
        self.commit_label(experiment_id, sample_index, label, LabelSource::Direct, metadata)
            .await
    }

    async fn commit_label(
        &self,
        experiment_id: &str,
        sample_index: usize,
        label: Label,
        source: LabelSource,
        metadata: Value,
    ) -> OrchestratorResult<LabelCommit> {
        let slot = self.slot(experiment_id).await?;
        let sample_id = sample_id(sample_index);

        let processed = Arc::clone(&self.total_samples_processed);
        let record_source = source.clone();
        let record_sample_id = sample_id.clone();
        let (update, total_labeled, record) = run_blocking(&slot, move |exp| {
            require_state(exp, ExperimentState::Initialized, "submit label")?;
            if record_source == LabelSource::Direct && exp.config.voting_enabled() {
                return Err(OrchestratorError::VotingRequired(exp.id.clone()));
            }

            exp.machine
                .advance(ExperimentState::Training, Some(record_sample_id.as_str()))?;
            let result = match exp.engine.as_mut() {
                Some(engine) => engine.label(sample_index, label),
                None => Err(EngineError::NotInitialized),
            };

            let update = match result {
                Ok(update) => update,
                Err(e @ EngineError::Consistency(_)) => {
                    error!(
                        experiment_id = %exp.id,
                        sample_index,
                        "Consistency violation during label: {}",
                        e
                    );
                    exp.fail(e.to_string());
                    return Err(e.into());
                }
                Err(e) => {
                    exp.machine
                        .advance(ExperimentState::Initialized, Some("label rejected"))?;
                    return Err(e.into());
                }
            };

            exp.machine.advance(ExperimentState::Initialized, None)?;
            exp.labels_committed += 1;
            processed.fetch_add(1, Ordering::Relaxed);

            let record = AuditRecord::ModelUpdate {
                experiment_id: exp.id.clone(),
                update_type: "incremental".to_string(),
                sample_id: record_sample_id,
                sample_index,
                label,
                source: record_source,
                metrics_before: update.metrics_before.clone(),
                metrics_after: update.metrics_after.clone(),
                samples_processed: exp.labels_committed,
                metadata,
                timestamp: Utc::now(),
            };
            Ok((update, exp.labels_committed, record))
        })
        .await?;

        let audit = self.audit.record(&record).await;
        info!(
            experiment_id,
            sample_index,
            label,
            total_labeled,
            degraded = audit.is_degraded(),
            "Label committed"
        );
        Ok(LabelCommit {
            experiment_id: experiment_id.to_string(),
            sample_id,
            sample_index,
            label,
            source,
            metrics_before: update.metrics_before,
            metrics: update.metrics_after,
            remaining_unlabeled: update.unlabeled_count,
            total_labeled: update.labeled_count,
            audit,
        })
    }

    pub async fn get_metrics(&self, experiment_id: &str) -> OrchestratorResult<Metrics> {
        let slot = self.slot(experiment_id).await?;
        run_blocking(&slot, |exp| {
            require_state(exp, ExperimentState::Initialized, "read metrics")?;
            match exp.engine.as_ref() {
                Some(engine) => Ok(engine.metrics()?),
                None => Err(EngineError::NotInitialized.into()),
            }
        })
        .await
    }

    /// Model updates recorded for an experiment, newest first
    pub async fn get_model_updates(
        &self,
        experiment_id: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<LedgerEntry>> {
        self.slot(experiment_id).await?;
        Ok(self
            .ledger()
            .records("model_update", Some(experiment_id), limit)
            .await?)
    }

    /// Return an experiment to `idle` from any state.
    ///
    /// The model, pool and counters are cleared and the experiment's voting
    /// sessions are dropped. Ledger history is kept.
    pub async fn reset_experiment(&self, experiment_id: &str) -> OrchestratorResult<ResetOutcome> {
        let slot = self.slot(experiment_id).await?;
        let labeled_count = {
            let mut exp = slot.lock().await;
            let labeled = exp
                .engine
                .as_ref()
                .map(|e| e.pool().labeled_count())
                .unwrap_or(0);
            if let Some(engine) = exp.engine.as_mut() {
                engine.reset();
            }
            exp.engine = None;
            exp.machine.reset("reset requested");
            exp.labels_committed = 0;
            exp.last_error = None;
            labeled
        };

        let voting_sessions_dropped = self.voting.remove_experiment(experiment_id).await;
        let audit = self
            .audit
            .record(&AuditRecord::ExperimentReset {
                experiment_id: experiment_id.to_string(),
                labeled_count,
                timestamp: Utc::now(),
            })
            .await;

        info!(experiment_id, voting_sessions_dropped, "Experiment reset");
        Ok(ResetOutcome {
            experiment_id: experiment_id.to_string(),
            voting_sessions_dropped,
            audit,
        })
    }

    // ========================================================================
    // Voting
    // ========================================================================

    /// Open a voting session for an unlabeled sample
    pub async fn start_voting_session(
        &self,
        experiment_id: &str,
        request: StartVoting,
    ) -> OrchestratorResult<VotingSession> {
        let slot = self.slot(experiment_id).await?;
        let config = {
            let exp = slot.lock().await;
            require_state(&exp, ExperimentState::Initialized, "start voting")?;
            let in_pool = exp
                .engine
                .as_ref()
                .map_or(false, |e| e.pool().is_unlabeled(request.sample_index));
            if !in_pool {
                return Err(EngineError::SampleNotInPool(request.sample_index).into());
            }
            request
                .config
                .clone()
                .or_else(|| exp.config.voting.clone())
                .unwrap_or_default()
        };

        Ok(self
            .voting
            .start_session(experiment_id, request.sample_index, config)
            .await?)
    }

    async fn session_of(
        &self,
        experiment_id: &str,
        session_id: &str,
    ) -> OrchestratorResult<VotingSession> {
        self.slot(experiment_id).await?;
        let session = self.voting.session(session_id).await?;
        if session.experiment_id != experiment_id {
            return Err(VotingError::SessionNotFound(session_id.to_string()).into());
        }
        Ok(session)
    }

    /// Record a vote. When it finalizes the session, the winning label is
    /// committed through the normal label path.
    ///
    /// Once the vote is stored the call succeeds. A label that cannot be
    /// committed is reported in `commit_error`; the session stays finalized.
    pub async fn submit_vote(
        &self,
        experiment_id: &str,
        session_id: &str,
        vote: VoteRequest,
    ) -> OrchestratorResult<VoteSubmission> {
        self.session_of(experiment_id, session_id).await?;
        let receipt = self.voting.submit_vote(session_id, vote).await?;

        let (label_commit, commit_error) = match &receipt.finalized {
            Some(outcome) => match self.commit_outcome(outcome).await {
                Ok(commit) => (commit, None),
                Err(e) => {
                    warn!(
                        session_id = %outcome.session_id,
                        sample_index = outcome.sample_index,
                        "Voted label not committed: {}",
                        e
                    );
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };
        Ok(VoteSubmission {
            receipt,
            label_commit,
            commit_error,
        })
    }

    pub async fn get_voting_results(
        &self,
        experiment_id: &str,
        session_id: &str,
    ) -> OrchestratorResult<VotingSession> {
        self.session_of(experiment_id, session_id).await
    }

    /// Feed a finalized session's label into the engine.
    ///
    /// Nothing is committed when there were no votes, or when the session
    /// requires consensus and did not reach it.
    async fn commit_outcome(
        &self,
        outcome: &VotingOutcome,
    ) -> OrchestratorResult<Option<LabelCommit>> {
        let Some(label) = outcome.final_label else {
            return Ok(None);
        };

        let require_consensus = self
            .voting
            .session(&outcome.session_id)
            .await
            .map(|s| s.config.require_consensus)
            .unwrap_or(false);
        if require_consensus && !outcome.consensus_reached {
            info!(
                session_id = %outcome.session_id,
                "No consensus; label not committed"
            );
            return Ok(None);
        }

        self.commit_label(
            &outcome.experiment_id,
            outcome.sample_index,
            label,
            LabelSource::Voting {
                session_id: outcome.session_id.clone(),
            },
            Value::Null,
        )
        .await
        .map(Some)
    }

    /// Time out overdue sessions and commit whatever they decided
    pub async fn sweep_voting_timeouts(&self, now: DateTime<Utc>) -> Vec<SweptSession> {
        let outcomes = self.voting.sweep_expired(now).await;
        let mut swept = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let label_commit = match self.commit_outcome(&outcome).await {
                Ok(commit) => commit,
                Err(e) => {
                    warn!(
                        session_id = %outcome.session_id,
                        "Timed-out session label not committed: {}",
                        e
                    );
                    None
                }
            };
            swept.push(SweptSession {
                outcome,
                label_commit,
            });
        }
        swept
    }

    /// Sweep voting timeouts on a fixed interval until the task is aborted
    pub fn spawn_voting_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let swept = orchestrator.sweep_voting_timeouts(Utc::now()).await;
                if !swept.is_empty() {
                    info!(sessions = swept.len(), "Voting sessions timed out");
                }
            }
        })
    }

    // ========================================================================
    // System
    // ========================================================================

    /// Aggregate status. Never fails.
    pub async fn system_status(&self) -> SystemStatus {
        let active_experiments = self
            .experiments
            .read()
            .await
            .values()
            .filter(|entry| entry.state.get().is_active())
            .count();

        let (engine_status, ledger_status, service_health, last_health_check) = match &self.health
        {
            Some(monitor) => (
                monitor.status_of("learning_engine").await,
                monitor.status_of("ledger").await,
                monitor.snapshot().await,
                monitor.last_check().await,
            ),
            None => (HealthStatus::Unknown, HealthStatus::Unknown, Vec::new(), None),
        };

        let uptime_seconds = self.started_at.elapsed().as_secs();
        let audit_failures = self.audit.failures();
        SystemStatus {
            orchestrator_status: HealthStatus::Healthy,
            engine_status,
            ledger_status,
            active_experiments,
            active_voting_sessions: self.voting.active_count().await,
            total_samples_processed: self.total_samples_processed.load(Ordering::Relaxed),
            audit_failures,
            audit_degraded: audit_failures > 0,
            last_audit_failure: self.audit.last_failure(),
            system_uptime: format_uptime(uptime_seconds),
            uptime_seconds,
            last_health_check,
            service_health,
        }
    }

    /// Drop every experiment and voting session. Ledger history is kept.
    pub async fn reset_system(&self) -> SystemReset {
        let experiments_cleared = {
            let mut experiments = self.experiments.write().await;
            let n = experiments.len();
            experiments.clear();
            n
        };
        self.voting.clear().await;
        self.total_samples_processed.store(0, Ordering::Relaxed);
        warn!(experiments_cleared, "System reset");
        SystemReset {
            experiments_cleared,
        }
    }

    pub async fn ledger_status(&self) -> OrchestratorResult<ChainStatus> {
        Ok(self.ledger().status().await?)
    }

    pub async fn recent_blocks(&self, limit: usize) -> OrchestratorResult<Vec<BlockInfo>> {
        Ok(self.ledger().recent_blocks(limit).await?)
    }

    pub async fn verify_ledger(&self) -> OrchestratorResult<bool> {
        Ok(self.ledger().verify_chain().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetConfig, ModelConfig, VotingConfig};
    use crate::ledger::MemoryLedger;

    fn orchestrator() -> ExperimentOrchestrator {
        let ledger = Arc::new(LedgerClient::new(MemoryLedger::with_block_size(1).shared()));
        ExperimentOrchestrator::new(Arc::new(EstimatorRegistry::with_defaults()), ledger)
    }

    fn config(id: &str) -> ExperimentConfig {
        ExperimentConfig {
            experiment_id: Some(id.to_string()),
            model: ModelConfig::new("nearest_centroid"),
            query_strategy: Default::default(),
            dataset: DatasetConfig::synthetic(),
            voting: None,
        }
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            OrchestratorError::Engine(EngineError::SampleNotInPool(5)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            OrchestratorError::Engine(EngineError::Consistency("x".into())).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            OrchestratorError::Ledger(LedgerError::offline("down")).kind(),
            ErrorKind::CollaboratorUnavailable
        );
        assert_eq!(
            OrchestratorError::ExperimentNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            OrchestratorError::VotingRequired("x".into()).kind(),
            ErrorKind::State
        );
    }

    #[test]
    fn test_generated_experiment_id() {
        let id = new_experiment_id();
        assert!(id.starts_with("exp_"));
        assert_eq!(id.len(), 12);
    }

    #[tokio::test]
    async fn test_initialize_generates_id() {
        let orch = orchestrator();
        let mut cfg = config("unused");
        cfg.experiment_id = None;
        let init = orch.initialize_experiment(cfg).await.unwrap();
        assert!(init.experiment_id.starts_with("exp_"));
        assert_eq!(init.status.state, ExperimentState::Initialized);
        assert!(!init.audit.is_degraded());
    }

    #[tokio::test]
    async fn test_duplicate_initialize_rejected() {
        let orch = orchestrator();
        orch.initialize_experiment(config("exp_a")).await.unwrap();
        let err = orch.initialize_experiment(config("exp_a")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_model_rejected_before_creation() {
        let orch = orchestrator();
        let mut cfg = config("exp_a");
        cfg.model = ModelConfig::new("transformer");
        let err = orch.initialize_experiment(cfg).await.unwrap_err();
        assert_eq!(err, OrchestratorError::Config(ConfigError::UnknownModel("transformer".into())));
        assert!(matches!(
            orch.get_experiment_status("exp_a").await,
            Err(OrchestratorError::ExperimentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_training_failure_moves_to_error() {
        let orch = orchestrator();
        let mut cfg = config("exp_bad");
        cfg.dataset = DatasetConfig::Inline {
            seed_features: vec![vec![0.0], vec![1.0]],
            seed_labels: vec![0],
            pool_features: vec![vec![0.5]],
            pool_labels: None,
            eval_features: vec![],
            eval_labels: vec![],
        };
        let err = orch.initialize_experiment(cfg).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Engine(EngineError::InvalidTrainingData(_))
        ));

        let status = orch.get_experiment_status("exp_bad").await.unwrap();
        assert_eq!(status.state, ExperimentState::Error);
        assert!(status.last_error.is_some());

        // Everything but reset is refused
        assert!(matches!(
            orch.get_next_sample("exp_bad").await,
            Err(OrchestratorError::InvalidState { .. })
        ));
        assert!(orch.submit_label("exp_bad", 0, 0, Value::Null).await.is_err());

        orch.reset_experiment("exp_bad").await.unwrap();
        orch.initialize_experiment(config("exp_bad")).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_label_cycle() {
        let orch = orchestrator();
        orch.initialize_experiment(config("exp_a")).await.unwrap();

        let NextSample::Sample(query) = orch.get_next_sample("exp_a").await.unwrap() else {
            panic!("expected a sample");
        };
        let commit = orch
            .submit_label("exp_a", query.sample_index, query.predicted_label, Value::Null)
            .await
            .unwrap();
        assert_eq!(commit.total_labeled, 1);
        assert_eq!(commit.remaining_unlabeled, 89);
        assert_eq!(commit.source, LabelSource::Direct);

        let status = orch.get_experiment_status("exp_a").await.unwrap();
        assert_eq!(status.state, ExperimentState::Initialized);
        assert_eq!(status.labels_committed, 1);

        let updates = orch.get_model_updates("exp_a", 10).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].payload["sample_id"], commit.sample_id);

        let transitions = orch.get_transitions("exp_a").await.unwrap();
        let states: Vec<ExperimentState> = transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                ExperimentState::Initialized,
                ExperimentState::Querying,
                ExperimentState::Initialized,
                ExperimentState::Training,
                ExperimentState::Initialized,
            ]
        );
    }

    #[tokio::test]
    async fn test_direct_label_rejected_when_voting_enabled() {
        let orch = orchestrator();
        let mut cfg = config("exp_v");
        cfg.voting = Some(VotingConfig::default());
        orch.initialize_experiment(cfg).await.unwrap();

        let err = orch.submit_label("exp_v", 0, 1, Value::Null).await.unwrap_err();
        assert_eq!(err, OrchestratorError::VotingRequired("exp_v".into()));
    }

    #[tokio::test]
    async fn test_require_consensus_blocks_split_vote() {
        let orch = orchestrator();
        let mut cfg = config("exp_v");
        cfg.voting = Some(VotingConfig {
            min_votes: 2,
            max_votes: 2,
            require_consensus: true,
            ..Default::default()
        });
        orch.initialize_experiment(cfg).await.unwrap();

        let session = orch
            .start_voting_session("exp_v", StartVoting { sample_index: 0, config: None })
            .await
            .unwrap();
        for (voter, label) in [("a", 0), ("b", 1)] {
            orch.submit_vote(
                "exp_v",
                &session.id,
                VoteRequest {
                    voter_id: voter.into(),
                    label,
                    confidence: None,
                },
            )
            .await
            .map(|submission| assert!(submission.label_commit.is_none()))
            .unwrap();
        }

        let status = orch.get_experiment_status("exp_v").await.unwrap();
        assert_eq!(status.labels_committed, 0);
    }

    #[tokio::test]
    async fn test_session_of_other_experiment_is_hidden() {
        let orch = orchestrator();
        orch.initialize_experiment(config("exp_a")).await.unwrap();
        orch.initialize_experiment(config("exp_b")).await.unwrap();

        let session = orch
            .start_voting_session("exp_a", StartVoting { sample_index: 1, config: None })
            .await
            .unwrap();
        let err = orch.get_voting_results("exp_b", &session.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_active_count_ignores_locked_inactive_experiments() {
        let orch = orchestrator();
        orch.initialize_experiment(config("exp_a")).await.unwrap();
        orch.initialize_experiment(config("exp_b")).await.unwrap();
        orch.reset_experiment("exp_b").await.unwrap();

        // An operation holds each lock while status is read
        let slot_a = orch.slot("exp_a").await.unwrap();
        let slot_b = orch.slot("exp_b").await.unwrap();
        let _a = slot_a.lock().await;
        let _b = slot_b.lock().await;

        let status = orch.system_status().await;
        assert_eq!(status.active_experiments, 1);
    }

    #[tokio::test]
    async fn test_system_status_counts() {
        let orch = orchestrator();
        let status = orch.system_status().await;
        assert_eq!(status.active_experiments, 0);
        assert_eq!(status.ledger_status, HealthStatus::Unknown);
        assert_eq!(status.orchestrator_status, HealthStatus::Healthy);

        orch.initialize_experiment(config("exp_a")).await.unwrap();
        orch.submit_label("exp_a", 0, 0, Value::Null).await.unwrap();
        orch.submit_label("exp_a", 1, 1, Value::Null).await.unwrap();

        let status = orch.system_status().await;
        assert_eq!(status.active_experiments, 1);
        assert_eq!(status.total_samples_processed, 2);
        assert!(!status.audit_degraded);

        let cleared = orch.reset_system().await;
        assert_eq!(cleared.experiments_cleared, 1);
        let status = orch.system_status().await;
        assert_eq!(status.active_experiments, 0);
        assert_eq!(status.total_samples_processed, 0);
        // Ledger history survives a system reset
        assert!(orch.ledger_status().await.unwrap().total_entries >= 3);
    }
}
