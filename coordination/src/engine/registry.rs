//! Estimator registry
//!
//! Maps model type names to factories. Built once at startup and handed to
//! the orchestrator; nothing is looked up through global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::model::{
    Estimator, LogisticRegression, LogisticRegressionParams, NearestCentroid, NearestCentroidParams,
};
use crate::config::{ConfigError, ConfigResult, ModelConfig};

/// Builds an estimator from its `parameters` object
pub type EstimatorFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Estimator>, String> + Send + Sync>;

/// Registry of available estimator types
#[derive(Clone, Default)]
pub struct EstimatorRegistry {
    factories: BTreeMap<String, EstimatorFactory>,
}

impl EstimatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in estimators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("nearest_centroid", |params| {
            let params: NearestCentroidParams = parse_params(params)?;
            if !params.temperature.is_finite() || params.temperature <= 0.0 {
                return Err("temperature must be positive".into());
            }
            Ok(Box::new(NearestCentroid::new(params)) as Box<dyn Estimator>)
        });
        registry.register("logistic_regression", |params| {
            let params: LogisticRegressionParams = parse_params(params)?;
            if !params.learning_rate.is_finite() || params.learning_rate <= 0.0 {
                return Err("learning_rate must be positive".into());
            }
            if params.epochs == 0 || params.epochs > 100_000 {
                return Err("epochs must be between 1 and 100000".into());
            }
            if !params.l2.is_finite() || params.l2 < 0.0 {
                return Err("l2 must be non-negative".into());
            }
            Ok(Box::new(LogisticRegression::new(params)) as Box<dyn Estimator>)
        });
        registry
    }

    /// Register (or replace) a factory under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Estimator>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered type names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate the estimator described by `config`
    pub fn create(&self, config: &ModelConfig) -> ConfigResult<Box<dyn Estimator>> {
        let factory = self
            .factories
            .get(&config.model_type)
            .ok_or_else(|| ConfigError::UnknownModel(config.model_type.clone()))?;

        factory(&config.parameters).map_err(|reason| ConfigError::InvalidModelParameters {
            model: config.model_type.clone(),
            reason,
        })
    }
}

impl std::fmt::Debug for EstimatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstimatorRegistry")
            .field("models", &self.names())
            .finish()
    }
}

fn parse_params<T: DeserializeOwned>(params: &Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_registered() {
        let registry = EstimatorRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["logistic_regression", "nearest_centroid"]);
        assert!(registry.contains("nearest_centroid"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_create_known_model() {
        let registry = EstimatorRegistry::with_defaults();
        let model = registry
            .create(&ModelConfig::new("logistic_regression").with_parameter("epochs", json!(10)))
            .unwrap();
        assert_eq!(model.name(), "logistic_regression");
    }

    #[test]
    fn test_unknown_model() {
        let registry = EstimatorRegistry::with_defaults();
        let err = registry.create(&ModelConfig::new("random_forest")).err().unwrap();
        assert_eq!(err, ConfigError::UnknownModel("random_forest".into()));
    }

    #[test]
    fn test_bad_parameters() {
        let registry = EstimatorRegistry::with_defaults();
        let unknown_field = ModelConfig::new("nearest_centroid").with_parameter("depth", json!(3));
        assert!(matches!(
            registry.create(&unknown_field).err(),
            Some(ConfigError::InvalidModelParameters { .. })
        ));

        let negative = ModelConfig::new("nearest_centroid").with_parameter("temperature", json!(-1.0));
        assert!(registry.create(&negative).is_err());
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = EstimatorRegistry::new();
        assert!(registry.is_empty());
        registry.register("centroid_sharp", |_| {
            Ok(Box::new(NearestCentroid::new(NearestCentroidParams { temperature: 0.1 }))
                as Box<dyn Estimator>)
        });
        assert!(registry.create(&ModelConfig::new("centroid_sharp")).is_ok());
    }
}
