//! Per-experiment state owned by the orchestrator

use chrono::{DateTime, Utc};

use super::state::{ExperimentState, ExperimentStateMachine};
use super::status::ExperimentStatus;
use crate::config::ExperimentConfig;
use crate::engine::LearningEngine;

/// Everything the orchestrator knows about one experiment.
///
/// Always accessed under the experiment's own lock.
pub(crate) struct Experiment {
    pub id: String,
    pub config: ExperimentConfig,
    pub machine: ExperimentStateMachine,
    pub engine: Option<LearningEngine>,
    pub created_at: DateTime<Utc>,
    pub labels_committed: u64,
    pub last_error: Option<String>,
}

impl Experiment {
    pub fn new(id: String, config: ExperimentConfig) -> Self {
        Self {
            id,
            config,
            machine: ExperimentStateMachine::new(),
            engine: None,
            created_at: Utc::now(),
            labels_committed: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ExperimentState {
        self.machine.current()
    }

    /// Record an unrecoverable failure
    pub fn fail(&mut self, reason: String) {
        if self.machine.fail(&reason).is_err() {
            tracing::debug!(experiment_id = %self.id, "Experiment already in error state");
        }
        self.last_error = Some(reason);
    }

    pub fn status(&self) -> ExperimentStatus {
        let (labeled_count, unlabeled_count, total_samples, metrics) = match &self.engine {
            Some(engine) => {
                let pool = engine.pool();
                (
                    pool.labeled_count(),
                    pool.unlabeled_count(),
                    pool.total(),
                    engine.metrics().ok(),
                )
            }
            None => (0, 0, 0, None),
        };

        ExperimentStatus {
            experiment_id: self.id.clone(),
            state: self.state(),
            model_type: self.config.model.model_type.clone(),
            query_strategy: self.config.query_strategy,
            voting: self.config.voting.clone(),
            created_at: self.created_at,
            labeled_count,
            unlabeled_count,
            total_samples,
            labels_committed: self.labels_committed,
            metrics,
            last_error: self.last_error.clone(),
        }
    }
}
