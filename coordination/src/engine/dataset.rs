//! Dataset materialization

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Label;
use crate::config::DatasetConfig;

/// Seed, pool and evaluation splits of one experiment
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub seed_x: Vec<Vec<f64>>,
    pub seed_y: Vec<Label>,
    pub pool_x: Vec<Vec<f64>>,
    /// Oracle labels for the pool, when the source has them
    pub pool_y: Option<Vec<Label>>,
    pub eval_x: Vec<Vec<f64>>,
    pub eval_y: Vec<Label>,
}

impl Dataset {
    /// Materialize a validated dataset config
    pub fn from_config(config: &DatasetConfig) -> Self {
        match config {
            DatasetConfig::Inline {
                seed_features,
                seed_labels,
                pool_features,
                pool_labels,
                eval_features,
                eval_labels,
            } => Self {
                seed_x: seed_features.clone(),
                seed_y: seed_labels.clone(),
                pool_x: pool_features.clone(),
                pool_y: pool_labels.clone(),
                eval_x: eval_features.clone(),
                eval_y: eval_labels.clone(),
            },
            DatasetConfig::Synthetic {
                n_classes,
                n_features,
                n_seed,
                n_pool,
                n_eval,
                spread,
                seed,
            } => {
                let mut blobs = Blobs::new(*n_classes, *n_features, *spread, *seed);
                let (seed_x, seed_y) = blobs.sample(*n_seed);
                let (pool_x, pool_y) = blobs.sample(*n_pool);
                let (eval_x, eval_y) = blobs.sample(*n_eval);
                Self {
                    seed_x,
                    seed_y,
                    pool_x,
                    pool_y: Some(pool_y),
                    eval_x,
                    eval_y,
                }
            }
        }
    }

    pub fn pool_len(&self) -> usize {
        self.pool_x.len()
    }
}

/// Isotropic clusters around random class centres
struct Blobs {
    rng: StdRng,
    centres: Vec<Vec<f64>>,
    spread: f64,
}

impl Blobs {
    fn new(n_classes: usize, n_features: usize, spread: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let centres: Vec<Vec<f64>> = (0..n_classes)
            .map(|_| {
                (0..n_features)
                    .map(|_| rng.gen_range(-5.0..5.0))
                    .collect::<Vec<f64>>()
            })
            .collect();
        Self {
            rng,
            centres,
            spread,
        }
    }

    // Irwin-Hall approximation of a standard normal
    fn noise(&mut self) -> f64 {
        (0..12).map(|_| self.rng.gen::<f64>()).sum::<f64>() - 6.0
    }

    /// `n` samples with classes assigned round-robin
    fn sample(&mut self, n: usize) -> (Vec<Vec<f64>>, Vec<Label>) {
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % self.centres.len();
            let centre = self.centres[class].clone();
            let spread = self.spread;
            let row: Vec<f64> = centre.iter().map(|c| c + spread * self.noise()).collect();
            x.push(row);
            y.push(class as Label);
        }
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_shapes() {
        let dataset = Dataset::from_config(&DatasetConfig::synthetic());
        assert_eq!(dataset.seed_x.len(), 10);
        assert_eq!(dataset.seed_y.len(), 10);
        assert_eq!(dataset.pool_len(), 90);
        assert_eq!(dataset.pool_y.as_ref().map(Vec::len), Some(90));
        assert!(dataset.eval_x.is_empty());
        assert!(dataset.seed_x.iter().all(|row| row.len() == 2));
        assert!(dataset.seed_y.contains(&0) && dataset.seed_y.contains(&1));
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let a = Dataset::from_config(&DatasetConfig::synthetic());
        let b = Dataset::from_config(&DatasetConfig::synthetic());
        assert_eq!(a, b);
    }

    #[test]
    fn test_inline_passes_through() {
        let config = DatasetConfig::Inline {
            seed_features: vec![vec![0.0], vec![1.0]],
            seed_labels: vec![0, 1],
            pool_features: vec![vec![0.5]],
            pool_labels: None,
            eval_features: vec![],
            eval_labels: vec![],
        };
        let dataset = Dataset::from_config(&config);
        assert_eq!(dataset.pool_x, vec![vec![0.5]]);
        assert_eq!(dataset.pool_y, None);
    }
}
