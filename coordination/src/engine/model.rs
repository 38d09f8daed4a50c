//! Estimators
//!
//! The engine only relies on the [`Estimator`] capability set. Two small
//! estimators are provided so experiments can run without an external
//! model service.

use serde::{Deserialize, Serialize};

use super::Label;

/// Error type for estimator operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Invalid training data: {0}")]
    InvalidData(String),

    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result type for estimator operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Capability set of a trainable classifier.
///
/// Implementations must leave the previous fit intact when `fit` fails.
pub trait Estimator: Send + Sync {
    fn name(&self) -> &str;

    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> ModelResult<()>;

    /// Class probabilities per row, columns ordered as [`Estimator::classes`]
    fn predict_proba(&self, x: &[Vec<f64>]) -> ModelResult<Vec<Vec<f64>>>;

    /// Classes seen during the last fit, ascending
    fn classes(&self) -> &[Label];

    /// Forget the current fit
    fn reset(&mut self);

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Vec<Label>> {
        let classes = self.classes();
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|row| classes[argmax(row)])
            .collect())
    }
}

/// Index of the largest value; the first one wins ties
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shared input checks for `fit`; returns the feature dimension
fn check_training_data(x: &[Vec<f64>], y: &[Label]) -> ModelResult<usize> {
    if x.is_empty() {
        return Err(ModelError::InvalidData("no training samples".into()));
    }
    if x.len() != y.len() {
        return Err(ModelError::InvalidData(format!(
            "{} feature rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let dim = x[0].len();
    if dim == 0 {
        return Err(ModelError::InvalidData("empty feature vector".into()));
    }
    for row in x {
        if row.len() != dim {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidData("non-finite feature value".into()));
        }
    }
    Ok(dim)
}

fn sorted_classes(y: &[Label]) -> Vec<Label> {
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

fn check_rows(x: &[Vec<f64>], dim: usize) -> ModelResult<()> {
    match x.iter().find(|row| row.len() != dim) {
        Some(row) => Err(ModelError::DimensionMismatch {
            expected: dim,
            actual: row.len(),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Nearest centroid
// ============================================================================

/// Parameters of [`NearestCentroid`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NearestCentroidParams {
    /// Softmax temperature applied to negative squared distances
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    1.0
}

impl Default for NearestCentroidParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
        }
    }
}

/// Classifies by distance to per-class mean vectors
pub struct NearestCentroid {
    params: NearestCentroidParams,
    classes: Vec<Label>,
    centroids: Vec<Vec<f64>>,
}

impl NearestCentroid {
    pub fn new(params: NearestCentroidParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            centroids: Vec::new(),
        }
    }
}

impl Estimator for NearestCentroid {
    fn name(&self) -> &str {
        "nearest_centroid"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> ModelResult<()> {
        let dim = check_training_data(x, y)?;
        let classes = sorted_classes(y);

        let mut sums = vec![vec![0.0; dim]; classes.len()];
        let mut counts = vec![0usize; classes.len()];
        for (row, label) in x.iter().zip(y) {
            // classes is built from y, so the label is always present
            let Ok(c) = classes.binary_search(label) else {
                continue;
            };
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(row) {
                *s += v;
            }
        }
        for (sum, count) in sums.iter_mut().zip(&counts) {
            for s in sum.iter_mut() {
                *s /= *count as f64;
            }
        }

        self.classes = classes;
        self.centroids = sums;
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> ModelResult<Vec<Vec<f64>>> {
        let dim = self.centroids.first().ok_or(ModelError::NotFitted)?.len();
        check_rows(x, dim)?;

        let t = self.params.temperature;
        Ok(x.iter()
            .map(|row| {
                let logits: Vec<f64> = self
                    .centroids
                    .iter()
                    .map(|c| {
                        let d2: f64 = c.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum();
                        -d2 / t
                    })
                    .collect();
                softmax(&logits)
            })
            .collect())
    }

    fn classes(&self) -> &[Label] {
        &self.classes
    }

    fn reset(&mut self) {
        self.classes.clear();
        self.centroids.clear();
    }
}

// ============================================================================
// Logistic regression
// ============================================================================

/// Parameters of [`LogisticRegression`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogisticRegressionParams {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// L2 penalty on the weights (not the bias)
    #[serde(default)]
    pub l2: f64,
}

fn default_learning_rate() -> f64 {
    0.1
}
fn default_epochs() -> usize {
    200
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
            l2: 0.0,
        }
    }
}

/// Multinomial logistic regression trained by batch gradient descent
pub struct LogisticRegression {
    params: LogisticRegressionParams,
    classes: Vec<Label>,
    /// One row per class: bias followed by feature weights
    weights: Vec<Vec<f64>>,
}

impl LogisticRegression {
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            weights: Vec::new(),
        }
    }

    fn logits(weights: &[Vec<f64>], row: &[f64]) -> Vec<f64> {
        weights
            .iter()
            .map(|w| w[0] + w[1..].iter().zip(row).map(|(a, b)| a * b).sum::<f64>())
            .collect()
    }
}

impl Estimator for LogisticRegression {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> ModelResult<()> {
        let dim = check_training_data(x, y)?;
        let classes = sorted_classes(y);
        let k = classes.len();
        let n = x.len() as f64;

        let targets: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or(0))
            .collect();

        let mut weights = vec![vec![0.0; dim + 1]; k];
        if k > 1 {
            for _ in 0..self.params.epochs {
                let mut grad = vec![vec![0.0; dim + 1]; k];
                for (row, &target) in x.iter().zip(&targets) {
                    let proba = softmax(&Self::logits(&weights, row));
                    for c in 0..k {
                        let err = proba[c] - if c == target { 1.0 } else { 0.0 };
                        grad[c][0] += err;
                        for (g, v) in grad[c][1..].iter_mut().zip(row) {
                            *g += err * v;
                        }
                    }
                }
                for (w, g) in weights.iter_mut().zip(&grad) {
                    w[0] -= self.params.learning_rate * g[0] / n;
                    for j in 1..=dim {
                        w[j] -= self.params.learning_rate * (g[j] / n + self.params.l2 * w[j]);
                    }
                }
            }
        }

        if weights.iter().flatten().any(|w| !w.is_finite()) {
            return Err(ModelError::InvalidData(
                "training diverged; lower the learning rate".into(),
            ));
        }

        self.classes = classes;
        self.weights = weights;
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> ModelResult<Vec<Vec<f64>>> {
        let dim = self.weights.first().ok_or(ModelError::NotFitted)?.len() - 1;
        check_rows(x, dim)?;
        Ok(x.iter()
            .map(|row| softmax(&Self::logits(&self.weights, row)))
            .collect())
    }

    fn classes(&self) -> &[Label] {
        &self.classes
    }

    fn reset(&mut self) {
        self.classes.clear();
        self.weights.clear();
    }
}
