//! Labeled/unlabeled partition of the sample pool

use std::collections::BTreeSet;

use serde::Serialize;

use super::{EngineError, EngineResult};

/// Partition of pool indices `0..total` into unlabeled and labeled.
///
/// `unlabeled` keeps dataset order. An index moves to `labeled` exactly
/// once and never comes back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SamplePool {
    unlabeled: Vec<usize>,
    labeled: BTreeSet<usize>,
    total: usize,
}

impl SamplePool {
    /// All `total` indices unlabeled
    pub fn new(total: usize) -> Self {
        Self {
            unlabeled: (0..total).collect(),
            labeled: BTreeSet::new(),
            total,
        }
    }

    pub fn unlabeled(&self) -> &[usize] {
        &self.unlabeled
    }

    pub fn labeled(&self) -> &BTreeSet<usize> {
        &self.labeled
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn unlabeled_count(&self) -> usize {
        self.unlabeled.len()
    }

    pub fn labeled_count(&self) -> usize {
        self.labeled.len()
    }

    pub fn is_unlabeled(&self, index: usize) -> bool {
        // unlabeled stays sorted because it starts sorted and only shrinks
        self.unlabeled.binary_search(&index).is_ok()
    }

    /// Move `index` from unlabeled to labeled
    pub fn mark_labeled(&mut self, index: usize) -> EngineResult<()> {
        let position = self
            .unlabeled
            .binary_search(&index)
            .map_err(|_| EngineError::SampleNotInPool(index))?;

        if !self.labeled.insert(index) {
            return Err(EngineError::Consistency(format!(
                "index {index} is both labeled and unlabeled"
            )));
        }
        self.unlabeled.remove(position);
        Ok(())
    }

    /// Verify the two sets are disjoint and cover `0..total`
    pub fn check_invariants(&self) -> EngineResult<()> {
        if let Some(index) = self.unlabeled.iter().find(|&&i| self.labeled.contains(&i)) {
            return Err(EngineError::Consistency(format!(
                "index {index} is both labeled and unlabeled"
            )));
        }
        if self.unlabeled.len() + self.labeled.len() != self.total {
            return Err(EngineError::Consistency(format!(
                "pool covers {} of {} indices",
                self.unlabeled.len() + self.labeled.len(),
                self.total
            )));
        }
        if let Some(index) = self
            .unlabeled
            .iter()
            .chain(self.labeled.iter())
            .find(|&&i| i >= self.total)
        {
            return Err(EngineError::Consistency(format!(
                "index {index} is outside the pool"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pool_is_all_unlabeled() {
        let pool = SamplePool::new(5);
        assert_eq!(pool.unlabeled(), &[0, 1, 2, 3, 4]);
        assert_eq!(pool.labeled_count(), 0);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_mark_labeled_moves_once() {
        let mut pool = SamplePool::new(5);
        pool.mark_labeled(3).unwrap();
        assert_eq!(pool.unlabeled(), &[0, 1, 2, 4]);
        assert!(pool.labeled().contains(&3));
        assert!(!pool.is_unlabeled(3));

        let err = pool.mark_labeled(3).unwrap_err();
        assert_eq!(err, EngineError::SampleNotInPool(3));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_out_of_range_index() {
        let mut pool = SamplePool::new(2);
        assert_eq!(pool.mark_labeled(7), Err(EngineError::SampleNotInPool(7)));
        assert_eq!(pool, SamplePool::new(2));
    }

    #[test]
    fn test_partition_holds_under_any_labeling_order() {
        for total in [1usize, 7, 30] {
            for stride in [1usize, 3, 5] {
                let mut pool = SamplePool::new(total);
                let mut index = 0;
                for _ in 0..total {
                    index = (index + stride) % total;
                    let _ = pool.mark_labeled(index);
                    pool.check_invariants().unwrap();
                    assert!(pool.unlabeled().windows(2).all(|w| w[0] < w[1]));
                }
            }
        }
    }

    #[test]
    fn test_check_invariants_detects_overlap() {
        let mut pool = SamplePool::new(3);
        pool.labeled.insert(1);
        pool.total = 4;
        assert!(matches!(pool.check_invariants(), Err(EngineError::Consistency(_))));
    }
}
