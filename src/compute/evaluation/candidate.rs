//! What the evaluation engine needs from a candidate solution.

use std::sync::{PoisonError, RwLock};

use crate::schema::Fitness;

/// Shared, writable fitness of a candidate.
///
/// Filled by whichever thread resolves the evaluation: a pool worker, the
/// batch dispatcher or the cache when the value is already known.
#[derive(Debug, Default)]
pub struct FitnessSlot(RwLock<Option<Fitness>>);

impl FitnessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the fitness, if known.
    pub fn get(&self) -> Option<Fitness> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, fitness: Fitness) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(fitness);
    }

    pub fn is_set(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// A candidate solution as seen by the evaluation engine.
///
/// Candidates are shared as `Arc<C>` between the submitting thread, the cache
/// waiter lists and the workers.
pub trait Candidate: Send + Sync + 'static {
    /// Stable identity, used to name evaluator input files.
    fn id(&self) -> &str;

    /// Normalized phenotype, the cache key.
    fn phenotype(&self) -> &str;

    /// Fitness slot written back by the engine.
    fn fitness(&self) -> &FitnessSlot;

    /// Text handed to an external evaluator.
    fn to_code(&self) -> String {
        self.phenotype().to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal candidate used across the evaluation tests.
    #[derive(Debug)]
    pub struct TestCandidate {
        pub id: String,
        pub phenotype: String,
        pub fitness: FitnessSlot,
    }

    impl TestCandidate {
        pub fn new(id: impl Into<String>, phenotype: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                phenotype: phenotype.into(),
                fitness: FitnessSlot::new(),
            }
        }
    }

    impl Candidate for TestCandidate {
        fn id(&self) -> &str {
            &self.id
        }

        fn phenotype(&self) -> &str {
            &self.phenotype
        }

        fn fitness(&self) -> &FitnessSlot {
            &self.fitness
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_set_and_clear() {
        let slot = FitnessSlot::new();
        assert!(!slot.is_set());
        slot.set(Fitness::new(vec![1.0]));
        assert_eq!(slot.get(), Some(Fitness::new(vec![1.0])));
        slot.clear();
        assert_eq!(slot.get(), None);
    }
}
