//! Learning engine: one model, its sample pool, and the query/label cycle
//!
//! The engine is plain synchronous state. Callers are responsible for
//! serializing access (the orchestrator keeps one engine per experiment
//! behind that experiment's lock), so `query_next` never sees a torn pool.

pub mod dataset;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use dataset::Dataset;
pub use metrics::Metrics;
pub use model::{Estimator, ModelError, ModelResult};
pub use pool::SamplePool;
pub use registry::EstimatorRegistry;

/// Class label
pub type Label = i64;

/// Error type for engine operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Learning engine not initialized")]
    NotInitialized,

    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("No unlabeled samples remain")]
    NoUnlabeledSamples,

    #[error("Sample {0} is not in the unlabeled pool")]
    SampleNotInPool(usize),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Pool consistency violated: {0}")]
    Consistency(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// External identifier of a pool sample
pub fn sample_id(index: usize) -> String {
    format!("sample_{index}")
}

/// Most uncertain unlabeled sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleQuery {
    pub sample_index: usize,
    pub sample_id: String,
    pub features: Vec<f64>,
    pub predicted_label: Label,
    /// `1 - max(predict_proba)`, in `[0, 1]`
    pub uncertainty_score: f64,
    pub remaining_unlabeled: usize,
}

/// Outcome of labeling one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub sample_index: usize,
    pub label: Label,
    pub metrics_before: Metrics,
    pub metrics_after: Metrics,
    pub labeled_count: usize,
    pub unlabeled_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub initialized: bool,
    pub model: String,
    pub labeled: usize,
    pub unlabeled: usize,
    pub total: usize,
}

/// One model instance with its pool and metrics
pub struct LearningEngine {
    estimator: Box<dyn Estimator>,
    pool_x: Vec<Vec<f64>>,
    eval_x: Vec<Vec<f64>>,
    eval_y: Vec<Label>,
    seed_x: Vec<Vec<f64>>,
    seed_y: Vec<Label>,
    pool: SamplePool,
    /// Labels assigned to pool indices
    assigned: BTreeMap<usize, Label>,
    metrics: Metrics,
    initialized: bool,
}

impl LearningEngine {
    /// Uninitialized engine over `pool_x`
    pub fn new(estimator: Box<dyn Estimator>, pool_x: Vec<Vec<f64>>) -> Self {
        Self {
            estimator,
            pool_x,
            eval_x: Vec::new(),
            eval_y: Vec::new(),
            seed_x: Vec::new(),
            seed_y: Vec::new(),
            pool: SamplePool::default(),
            assigned: BTreeMap::new(),
            metrics: Metrics::empty(),
            initialized: false,
        }
    }

    /// Held-out split used for metrics instead of the training set
    pub fn with_eval_set(mut self, eval_x: Vec<Vec<f64>>, eval_y: Vec<Label>) -> Self {
        self.eval_x = eval_x;
        self.eval_y = eval_y;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn pool(&self) -> &SamplePool {
        &self.pool
    }

    /// Fit on the seed set and make the whole pool unlabeled again
    pub fn initial_train(&mut self, x: Vec<Vec<f64>>, y: Vec<Label>) -> EngineResult<Metrics> {
        if x.is_empty() || y.is_empty() {
            return Err(EngineError::InvalidTrainingData(
                "seed set must not be empty".into(),
            ));
        }
        if x.len() != y.len() {
            return Err(EngineError::InvalidTrainingData(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }

        self.estimator.fit(&x, &y).map_err(|e| match e {
            ModelError::InvalidData(msg) => EngineError::InvalidTrainingData(msg),
            other => EngineError::Model(other),
        })?;

        self.seed_x = x;
        self.seed_y = y;
        self.pool = SamplePool::new(self.pool_x.len());
        self.assigned.clear();
        self.initialized = true;
        self.metrics = self.evaluate()?;

        info!(
            model = self.estimator.name(),
            seed = self.seed_x.len(),
            pool = self.pool.total(),
            accuracy = self.metrics.accuracy,
            "Initial training complete"
        );
        Ok(self.metrics.clone())
    }

    /// Score every unlabeled sample and return the least confident one.
    /// Does not modify the pool.
    pub fn query_next(&self) -> EngineResult<SampleQuery> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        let candidates = self.pool.unlabeled();
        if candidates.is_empty() {
            return Err(EngineError::NoUnlabeledSamples);
        }

        let features: Vec<Vec<f64>> = candidates.iter().map(|&i| self.pool_x[i].clone()).collect();
        let proba = self.estimator.predict_proba(&features)?;
        let classes = self.estimator.classes();

        // candidates are in ascending index order; strict `>` keeps the
        // lowest index among equal scores
        let mut best: Option<(usize, f64)> = None;
        for (position, row) in proba.iter().enumerate() {
            let confidence = row.iter().cloned().fold(0.0, f64::max);
            let score = (1.0 - confidence).clamp(0.0, 1.0);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((position, score));
            }
        }
        let (position, score) = best.ok_or(EngineError::NoUnlabeledSamples)?;
        let index = candidates[position];
        let predicted_label = classes
            .get(model::argmax(&proba[position]))
            .copied()
            .ok_or(EngineError::Model(ModelError::NotFitted))?;

        debug!(sample_index = index, uncertainty = score, "Queried next sample");
        Ok(SampleQuery {
            sample_index: index,
            sample_id: sample_id(index),
            features: features[position].clone(),
            predicted_label,
            uncertainty_score: score,
            remaining_unlabeled: candidates.len(),
        })
    }

    /// Assign `label` to a pool sample and retrain.
    ///
    /// The model is refit on the seed set plus every labeled pool sample.
    /// If the fit fails, neither the pool nor the metrics change.
    pub fn label(&mut self, sample_index: usize, label: Label) -> EngineResult<UpdateResult> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        if !self.pool.is_unlabeled(sample_index) {
            return Err(EngineError::SampleNotInPool(sample_index));
        }

        let (mut x, mut y) = self.training_set();
        x.push(self.pool_x[sample_index].clone());
        y.push(label);
        self.estimator.fit(&x, &y)?;

        self.pool.mark_labeled(sample_index)?;
        self.assigned.insert(sample_index, label);
        self.pool.check_invariants()?;

        let metrics_before = self.metrics.clone();
        self.metrics = self.evaluate()?;

        debug!(
            sample_index,
            label,
            labeled = self.pool.labeled_count(),
            accuracy = self.metrics.accuracy,
            "Sample labeled"
        );
        Ok(UpdateResult {
            sample_index,
            label,
            metrics_before,
            metrics_after: self.metrics.clone(),
            labeled_count: self.pool.labeled_count(),
            unlabeled_count: self.pool.unlabeled_count(),
        })
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> EngineResult<Metrics> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        Ok(self.metrics.clone())
    }

    /// Drop the model, pool partition and metrics
    pub fn reset(&mut self) {
        self.estimator.reset();
        self.seed_x.clear();
        self.seed_y.clear();
        self.pool = SamplePool::default();
        self.assigned.clear();
        self.metrics = Metrics::empty();
        self.initialized = false;
        info!(model = self.estimator.name(), "Learning engine reset");
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            initialized: self.initialized,
            model: self.estimator.name().to_string(),
            labeled: self.pool.labeled_count(),
            unlabeled: self.pool.unlabeled_count(),
            total: self.pool.total(),
        }
    }

    fn training_set(&self) -> (Vec<Vec<f64>>, Vec<Label>) {
        let mut x = self.seed_x.clone();
        let mut y = self.seed_y.clone();
        for (&index, &label) in &self.assigned {
            x.push(self.pool_x[index].clone());
            y.push(label);
        }
        (x, y)
    }

    fn evaluate(&self) -> EngineResult<Metrics> {
        let (x, y) = if self.eval_x.is_empty() {
            self.training_set()
        } else {
            (self.eval_x.clone(), self.eval_y.clone())
        };
        let predicted = self.estimator.predict(&x)?;
        Ok(Metrics::evaluate(
            &y,
            &predicted,
            self.seed_y.len() + self.assigned.len(),
            self.seed_y.len() + self.pool.total(),
        ))
    }
}
