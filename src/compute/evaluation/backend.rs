//! Backend seam and state shared between the evaluator and its backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::schema::Fitness;

use super::{Candidate, EvaluationCache, EvaluationError};

/// State shared by the evaluator, its backend and the backend's workers.
///
/// Lock order: the cache lock is always taken before any backend lock.
#[derive(Debug)]
pub struct EvaluationContext<C> {
    cache: Mutex<EvaluationCache<C>>,
    stop_requested: AtomicBool,
    generation: AtomicU64,
}

impl<C: Candidate> EvaluationContext<C> {
    pub fn new(cache: EvaluationCache<C>) -> Self {
        Self {
            cache: Mutex::new(cache),
            stop_requested: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn lock_cache(&self) -> MutexGuard<'_, EvaluationCache<C>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an evaluator asked to end the run.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn set_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::Release);
    }
}

/// A candidate forwarded to a backend.
#[derive(Debug)]
pub struct DispatchItem<C> {
    pub candidate: Arc<C>,
    pub phenotype: String,
}

impl<C: Candidate> DispatchItem<C> {
    pub fn new(candidate: Arc<C>) -> Self {
        let phenotype = candidate.phenotype().to_string();
        Self {
            candidate,
            phenotype,
        }
    }

    /// Write a result into the candidate and the cache.
    pub(crate) fn complete(&self, cache: &mut EvaluationCache<C>, fitness: Fitness) {
        self.candidate.fitness().set(fitness.clone());
        cache.store(&self.phenotype, fitness);
    }
}

/// Progress reporter for [`EvaluationBackend::flush`], called with the
/// fraction of the requests completed since the last flush.
pub type ProgressFn<'a> = dyn FnMut(f64) + 'a;

/// Where cache misses are evaluated.
pub trait EvaluationBackend<C: Candidate>: Send {
    fn name(&self) -> &'static str;

    /// Queue an item. Called with the cache lock held; must not block on
    /// evaluation progress.
    fn submit(&mut self, item: DispatchItem<C>);

    /// Block until every submitted item is resolved.
    fn flush(&mut self, progress: &mut ProgressFn<'_>) -> Result<(), EvaluationError>;

    /// Number of evaluations that may run at once.
    fn worker_count(&self) -> usize;

    /// Change the number of evaluations that may run at once.
    fn set_worker_count(&mut self, count: usize) -> Result<(), EvaluationError>;
}

/// Check the shape of a fitness returned by an evaluator.
pub(crate) fn check_fitness(
    phenotype: &str,
    fitness: &Fitness,
    components: usize,
) -> Result<(), EvaluationError> {
    if fitness.len() != components {
        return Err(EvaluationError::ComponentCount {
            phenotype: phenotype.to_string(),
            expected: components,
            found: fitness.len(),
        });
    }
    if let Some(index) = fitness.first_negative() {
        return Err(EvaluationError::NegativeComponent {
            phenotype: phenotype.to_string(),
            index,
            value: fitness.values[index],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_fitness() {
        assert!(check_fitness("p", &Fitness::new(vec![1.0, 0.0]), 2).is_ok());
        assert!(matches!(
            check_fitness("p", &Fitness::new(vec![1.0]), 2),
            Err(EvaluationError::ComponentCount { found: 1, .. })
        ));
        assert!(matches!(
            check_fitness("p", &Fitness::new(vec![1.0, -2.0]), 2),
            Err(EvaluationError::NegativeComponent { index: 1, .. })
        ));
    }
}
