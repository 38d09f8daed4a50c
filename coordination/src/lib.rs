//! Distributed active learning coordination
//!
//! This library provides:
//! - A hash-chained, append-only audit ledger with at-least-once appends
//! - A learning engine running the uncertainty-sampling query/label cycle
//! - Majority-vote label consensus across independent voters
//! - An experiment orchestrator driving all of the above through a state machine
//! - Periodic health probes of collaborating services
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use dal_coordination::{
//!     DatasetConfig, EstimatorRegistry, ExperimentConfig, ExperimentOrchestrator,
//!     LedgerClient, MemoryLedger, ModelConfig,
//! };
//!
//! # async fn run() -> Result<(), dal_coordination::OrchestratorError> {
//! let ledger = Arc::new(LedgerClient::new(MemoryLedger::new().shared()));
//! let orchestrator =
//!     ExperimentOrchestrator::new(Arc::new(EstimatorRegistry::with_defaults()), ledger);
//!
//! let init = orchestrator
//!     .initialize_experiment(ExperimentConfig {
//!         experiment_id: None,
//!         model: ModelConfig::new("logistic_regression"),
//!         query_strategy: Default::default(),
//!         dataset: DatasetConfig::synthetic(),
//!         voting: None,
//!     })
//!     .await?;
//! let next = orchestrator.get_next_sample(&init.experiment_id).await?;
//! # let _ = next;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod health;
pub mod ledger;
pub mod orchestrator;
pub mod retry;
pub mod voting;

pub use audit::{AuditLog, AuditRecord, AuditStatus, LabelSource};
pub use config::{
    ConfigError, ConfigResult, DatasetConfig, ExperimentConfig, ModelConfig, QueryStrategyConfig,
    VotingConfig,
};
pub use engine::{
    EngineError, EngineResult, Estimator, EstimatorRegistry, Label, LearningEngine, Metrics,
    SampleQuery, SamplePool,
};
pub use health::{
    EngineProbe, HealthCheckConfig, HealthProbe, HealthStatus, HttpProbe, LedgerProbe,
    ServiceHealth, ServiceHealthMonitor,
};
pub use ledger::{
    LedgerBackend, LedgerClient, LedgerEntry, LedgerError, LedgerResult, MemoryLedger, RpcLedger,
};
pub use orchestrator::{
    ErrorKind, ExperimentOrchestrator, ExperimentState, ExperimentStatus, LabelCommit,
    NextSample, OrchestratorError, OrchestratorResult, SharedOrchestrator, StartVoting,
    SystemStatus, VoteSubmission,
};
pub use retry::RetryPolicy;
pub use voting::{
    SessionStatus, Vote, VoteRequest, VotingCoordinator, VotingError, VotingOutcome,
    VotingSession,
};
