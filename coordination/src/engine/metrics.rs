//! Classification metrics

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Label;

/// Snapshot of model quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    /// Macro-averaged over the classes present in truth or prediction
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Seed samples plus pool samples labeled so far
    pub labeled_count: usize,
    /// Seed samples plus the whole pool
    pub total_samples: usize,
    pub last_updated: DateTime<Utc>,
}

impl Metrics {
    /// All scores zero
    pub fn empty() -> Self {
        Self {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
            labeled_count: 0,
            total_samples: 0,
            last_updated: Utc::now(),
        }
    }

    /// Score predictions against ground truth
    pub fn evaluate(
        truth: &[Label],
        predicted: &[Label],
        labeled_count: usize,
        total_samples: usize,
    ) -> Self {
        let mut metrics = Self {
            labeled_count,
            total_samples,
            ..Self::empty()
        };

        let n = truth.len().min(predicted.len());
        if n == 0 {
            return metrics;
        }

        let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
        metrics.accuracy = correct as f64 / n as f64;

        let classes: BTreeSet<Label> = truth[..n].iter().chain(&predicted[..n]).copied().collect();
        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
        for class in &classes {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (t, p) in truth.iter().zip(predicted) {
                match (t == class, p == class) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let p = ratio(tp, tp + fp);
            let r = ratio(tp, tp + fn_);
            precision += p;
            recall += r;
            f1 += if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        }

        let k = classes.len() as f64;
        metrics.precision = precision / k;
        metrics.recall = recall / k;
        metrics.f1_score = f1 / k;
        metrics
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_perfect_predictions() {
        let m = Metrics::evaluate(&[0, 1, 1, 2], &[0, 1, 1, 2], 4, 10);
        assert!(close(m.accuracy, 1.0));
        assert!(close(m.precision, 1.0));
        assert!(close(m.recall, 1.0));
        assert!(close(m.f1_score, 1.0));
        assert_eq!(m.labeled_count, 4);
        assert_eq!(m.total_samples, 10);
    }

    #[test]
    fn test_macro_average() {
        // class 0: tp=1 fp=1 fn=1 -> p=0.5 r=0.5
        // class 1: tp=1 fp=1 fn=1 -> p=0.5 r=0.5
        let m = Metrics::evaluate(&[0, 0, 1, 1], &[0, 1, 0, 1], 4, 4);
        assert!(close(m.accuracy, 0.5));
        assert!(close(m.precision, 0.5));
        assert!(close(m.recall, 0.5));
        assert!(close(m.f1_score, 0.5));
    }

    #[test]
    fn test_class_never_predicted() {
        let m = Metrics::evaluate(&[0, 1], &[0, 0], 2, 2);
        // class 0: p=0.5 r=1.0; class 1: p=0 r=0
        assert!(close(m.precision, 0.25));
        assert!(close(m.recall, 0.5));
    }

    #[test]
    fn test_empty_input() {
        let m = Metrics::evaluate(&[], &[], 0, 0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.f1_score, 0.0);
    }
}
