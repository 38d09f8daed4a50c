//! Experiment configuration.
//!
//! Requests carry loosely shaped JSON; everything is parsed into the typed
//! configs here and checked by [`ExperimentConfig::validate`] before any
//! component sees it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::Label;

/// Upper bound on generated synthetic samples across all splits
const MAX_SYNTHETIC_SAMPLES: usize = 100_000;

/// Error type for configuration validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown model type: {0}")]
    UnknownModel(String),

    #[error("Invalid parameters for model '{model}': {reason}")]
    InvalidModelParameters { model: String, reason: String },

    #[error("Invalid dataset config: {0}")]
    InvalidDataset(String),

    #[error("Invalid voting config: {0}")]
    InvalidVoting(String),

    #[error("Invalid experiment id: {0}")]
    InvalidExperimentId(String),
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Full configuration of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Generated as `exp_<8 hex>` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,

    pub model: ModelConfig,

    #[serde(default)]
    pub query_strategy: QueryStrategyConfig,

    pub dataset: DatasetConfig,

    /// Route labels through majority voting when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<VotingConfig>,
}

impl ExperimentConfig {
    /// Structural checks that do not need the estimator registry
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(id) = &self.experiment_id {
            validate_experiment_id(id)?;
        }
        self.dataset.validate()?;
        if let Some(voting) = &self.voting {
            voting.validate()?;
        }
        Ok(())
    }

    pub fn voting_enabled(&self) -> bool {
        self.voting.is_some()
    }
}

fn validate_experiment_id(id: &str) -> ConfigResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(ConfigError::InvalidExperimentId(
            "must be between 1 and 128 characters".into(),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ConfigError::InvalidExperimentId(format!(
            "'{id}' may only contain letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

/// Estimator selection. `type` is resolved through the estimator registry;
/// `parameters` are parsed by the selected estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(rename = "type")]
    pub model_type: String,

    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ModelConfig {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// How the next sample to label is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryStrategyConfig {
    /// Least-confident sample: score = 1 - max class probability
    #[default]
    Uncertainty,
}

/// Where the seed, pool and evaluation samples come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetConfig {
    /// Samples supplied directly in the request
    Inline {
        seed_features: Vec<Vec<f64>>,
        seed_labels: Vec<Label>,
        pool_features: Vec<Vec<f64>>,
        /// Oracle labels for the pool, if known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool_labels: Option<Vec<Label>>,
        #[serde(default)]
        eval_features: Vec<Vec<f64>>,
        #[serde(default)]
        eval_labels: Vec<Label>,
    },

    /// Gaussian-like clusters around per-class centres
    Synthetic {
        #[serde(default = "default_n_classes")]
        n_classes: usize,
        #[serde(default = "default_n_features")]
        n_features: usize,
        #[serde(default = "default_n_seed")]
        n_seed: usize,
        #[serde(default = "default_n_pool")]
        n_pool: usize,
        #[serde(default)]
        n_eval: usize,
        #[serde(default = "default_spread")]
        spread: f64,
        #[serde(default = "default_rng_seed")]
        seed: u64,
    },
}

fn default_n_classes() -> usize {
    2
}
fn default_n_features() -> usize {
    2
}
fn default_n_seed() -> usize {
    10
}
fn default_n_pool() -> usize {
    90
}
fn default_spread() -> f64 {
    1.0
}
fn default_rng_seed() -> u64 {
    42
}

impl DatasetConfig {
    /// Synthetic dataset with every default (10 seed, 90 pool, 2 classes)
    pub fn synthetic() -> Self {
        Self::Synthetic {
            n_classes: default_n_classes(),
            n_features: default_n_features(),
            n_seed: default_n_seed(),
            n_pool: default_n_pool(),
            n_eval: 0,
            spread: default_spread(),
            seed: default_rng_seed(),
        }
    }

    /// Shape checks. Seed/label agreement is left to the engine, which
    /// reports it as invalid training data.
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            Self::Inline {
                seed_features,
                pool_features,
                pool_labels,
                eval_features,
                eval_labels,
                ..
            } => {
                if let Some(labels) = pool_labels {
                    if labels.len() != pool_features.len() {
                        return Err(ConfigError::InvalidDataset(format!(
                            "pool_labels has {} entries but pool_features has {}",
                            labels.len(),
                            pool_features.len()
                        )));
                    }
                }
                if eval_features.len() != eval_labels.len() {
                    return Err(ConfigError::InvalidDataset(format!(
                        "eval_labels has {} entries but eval_features has {}",
                        eval_labels.len(),
                        eval_features.len()
                    )));
                }

                let mut rows = seed_features
                    .iter()
                    .chain(pool_features)
                    .chain(eval_features);
                if let Some(first) = rows.next() {
                    let dim = first.len();
                    if dim == 0 {
                        return Err(ConfigError::InvalidDataset(
                            "feature vectors must not be empty".into(),
                        ));
                    }
                    if let Some(bad) = rows.find(|row| row.len() != dim) {
                        return Err(ConfigError::InvalidDataset(format!(
                            "inconsistent feature dimension: expected {dim}, found {}",
                            bad.len()
                        )));
                    }
                }
                Ok(())
            }
            Self::Synthetic {
                n_classes,
                n_features,
                n_seed,
                n_pool,
                n_eval,
                spread,
                ..
            } => {
                if *n_classes < 2 {
                    return Err(ConfigError::InvalidDataset("n_classes must be at least 2".into()));
                }
                if *n_features == 0 {
                    return Err(ConfigError::InvalidDataset("n_features must be at least 1".into()));
                }
                if !spread.is_finite() || *spread <= 0.0 {
                    return Err(ConfigError::InvalidDataset("spread must be positive".into()));
                }
                if n_seed + n_pool + n_eval > MAX_SYNTHETIC_SAMPLES {
                    return Err(ConfigError::InvalidDataset(format!(
                        "at most {MAX_SYNTHETIC_SAMPLES} synthetic samples are supported"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Majority-vote labeling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Votes required before a session finalizes
    #[serde(default = "default_min_votes")]
    pub min_votes: usize,

    /// Hard cap on votes per session
    #[serde(default = "default_max_votes")]
    pub max_votes: usize,

    /// Age after which an active session times out
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Only commit results that reached a strict majority
    #[serde(default)]
    pub require_consensus: bool,
}

fn default_min_votes() -> usize {
    3
}
fn default_max_votes() -> usize {
    10
}
fn default_timeout_minutes() -> u64 {
    30
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            min_votes: default_min_votes(),
            max_votes: default_max_votes(),
            timeout_minutes: default_timeout_minutes(),
            require_consensus: false,
        }
    }
}

impl VotingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_votes < 1 {
            return Err(ConfigError::InvalidVoting("min_votes must be at least 1".into()));
        }
        if self.max_votes < self.min_votes {
            return Err(ConfigError::InvalidVoting(format!(
                "max_votes ({}) must be >= min_votes ({})",
                self.max_votes, self.min_votes
            )));
        }
        if self.timeout_minutes == 0 {
            return Err(ConfigError::InvalidVoting("timeout_minutes must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.timeout_minutes.min(i64::MAX as u64 / 60_000) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ExperimentConfig = serde_json::from_value(json!({
            "model": {"type": "nearest_centroid"},
            "dataset": {"type": "synthetic"}
        }))
        .unwrap();

        assert_eq!(config.experiment_id, None);
        assert_eq!(config.query_strategy, QueryStrategyConfig::Uncertainty);
        assert_eq!(config.dataset, DatasetConfig::synthetic());
        assert!(config.model.parameters.is_empty());
        assert!(!config.voting_enabled());
        config.validate().unwrap();
    }

    #[test]
    fn test_voting_defaults() {
        let config: ExperimentConfig = serde_json::from_value(json!({
            "experiment_id": "exp_demo",
            "model": {"type": "logistic_regression", "parameters": {"epochs": 50}},
            "dataset": {"type": "synthetic", "n_pool": 20},
            "voting": {}
        }))
        .unwrap();

        let voting = config.voting.clone().unwrap();
        assert_eq!(voting, VotingConfig::default());
        assert_eq!(voting.timeout(), chrono::Duration::minutes(30));
        assert_eq!(config.model.parameters["epochs"], 50);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_dataset_type_is_rejected() {
        let result: Result<ExperimentConfig, _> = serde_json::from_value(json!({
            "model": {"type": "nearest_centroid"},
            "dataset": {"type": "csv", "path": "/tmp/x.csv"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_voting_bounds() {
        let bad = VotingConfig {
            min_votes: 5,
            max_votes: 3,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidVoting(_))));

        let zero = VotingConfig {
            min_votes: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_inline_dimension_mismatch() {
        let dataset = DatasetConfig::Inline {
            seed_features: vec![vec![0.0, 1.0]],
            seed_labels: vec![0],
            pool_features: vec![vec![0.0, 1.0], vec![2.0]],
            pool_labels: None,
            eval_features: vec![],
            eval_labels: vec![],
        };
        let err = dataset.validate().unwrap_err();
        assert!(err.to_string().contains("inconsistent feature dimension"));
    }

    #[test]
    fn test_inline_label_count_mismatch() {
        let dataset = DatasetConfig::Inline {
            seed_features: vec![vec![0.0]],
            seed_labels: vec![0],
            pool_features: vec![vec![1.0], vec![2.0]],
            pool_labels: Some(vec![1]),
            eval_features: vec![],
            eval_labels: vec![],
        };
        assert!(matches!(dataset.validate(), Err(ConfigError::InvalidDataset(_))));
    }

    #[test]
    fn test_experiment_id_characters() {
        assert!(validate_experiment_id("exp_1a2b-3.c").is_ok());
        assert!(validate_experiment_id("").is_err());
        assert!(validate_experiment_id("exp/../etc").is_err());
    }

    #[test]
    fn test_synthetic_bounds() {
        let dataset = DatasetConfig::Synthetic {
            n_classes: 1,
            n_features: 2,
            n_seed: 10,
            n_pool: 10,
            n_eval: 0,
            spread: 1.0,
            seed: 1,
        };
        assert!(dataset.validate().is_err());
    }
}
