//! Evaluator facade: cache, backend and run statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, trace};

use crate::schema::{BackendConfig, EvaluatorConfig};

use super::backend::ProgressFn;
use super::{
    BatchDispatcher, CacheCounters, Candidate, DispatchItem, EvaluateFn, EvaluationBackend,
    EvaluationCache, EvaluationContext, EvaluationError, Lookup, PoolDispatcher,
};

/// Snapshot of evaluator accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluatorStatistics {
    /// Lookups of the current generation.
    pub generation: CacheCounters,
    /// Lookups since the evaluator was created, current generation included.
    pub total: CacheCounters,
    /// Entries currently cached.
    pub cached: usize,
    /// Wall time spent between the first request after a flush and the end
    /// of that flush, summed over the run.
    pub evaluation_time: Duration,
}

/// Resolves candidate fitness through the cache and a backend.
pub struct Evaluator<C: Candidate> {
    name: String,
    config: EvaluatorConfig,
    context: Arc<EvaluationContext<C>>,
    backend: Box<dyn EvaluationBackend<C>>,
    /// Counters of finished generations.
    totals: CacheCounters,
    started: Option<Instant>,
    evaluation_time: Duration,
}

impl<C: Candidate> Evaluator<C> {
    /// Build the evaluator and its configured backend. A pool backend needs
    /// the evaluation `function`.
    pub fn new(
        name: impl Into<String>,
        config: EvaluatorConfig,
        function: Option<Arc<EvaluateFn<C>>>,
    ) -> Result<Self, EvaluationError> {
        let context = Arc::new(EvaluationContext::new(EvaluationCache::new(
            config.cache_size,
        )));

        let backend: Box<dyn EvaluationBackend<C>> = match &config.backend {
            BackendConfig::Batch(batch) => Box::new(BatchDispatcher::new(
                batch.clone(),
                config.concurrency,
                config.fitness_components,
                Arc::clone(&context),
            )),
            BackendConfig::Pool(pool) => {
                let function = function.ok_or(EvaluationError::MissingFunction)?;
                Box::new(PoolDispatcher::new(
                    pool,
                    config.concurrency,
                    config.fitness_components,
                    function,
                    Arc::clone(&context),
                )?)
            }
        };

        Ok(Self::with_backend(name, config, context, backend))
    }

    /// Assemble an evaluator around an existing backend sharing `context`.
    pub fn with_backend(
        name: impl Into<String>,
        config: EvaluatorConfig,
        context: Arc<EvaluationContext<C>>,
        backend: Box<dyn EvaluationBackend<C>>,
    ) -> Self {
        let name = name.into();
        info!(
            "Evaluator {} using {} backend, concurrency {}, cache size {}",
            name,
            backend.name(),
            backend.worker_count(),
            config.cache_size
        );
        Self {
            name,
            config,
            context,
            backend,
            totals: CacheCounters::default(),
            started: None,
            evaluation_time: Duration::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<EvaluationContext<C>> {
        &self.context
    }

    /// Request the fitness of `candidate`. It is filled immediately on a
    /// cache hit, otherwise by the next [`Evaluator::flush`].
    pub fn evaluate(&mut self, candidate: &Arc<C>) -> Lookup {
        self.started.get_or_insert_with(Instant::now);

        let mut cache = self.context.lock_cache();
        let lookup = cache.evaluate(candidate);
        if lookup == Lookup::Forward {
            self.backend.submit(DispatchItem::new(Arc::clone(candidate)));
        }
        trace!("{} -> {:?}", candidate.id(), lookup);
        lookup
    }

    /// Wait for every pending evaluation, reporting progress at info level.
    pub fn flush(&mut self) -> Result<(), EvaluationError> {
        let name = self.name.clone();
        self.flush_with(&mut |fraction| {
            info!("{}: {:.0}% of evaluations done", name, fraction * 100.0);
        })
    }

    /// Wait for every pending evaluation with a custom progress reporter.
    pub fn flush_with(&mut self, progress: &mut ProgressFn<'_>) -> Result<(), EvaluationError> {
        let result = self.backend.flush(progress);
        if let Some(started) = self.started.take() {
            self.evaluation_time += started.elapsed();
        }
        result
    }

    /// Close the current generation's accounting and move the cache to
    /// `generation`.
    pub fn step(&mut self, generation: u64) {
        let mut cache = self.context.lock_cache();
        self.totals += cache.take_counters();
        cache.step(generation);
        drop(cache);
        self.context.set_generation(generation);
    }

    pub fn statistics(&self) -> EvaluatorStatistics {
        let cache = self.context.lock_cache();
        let generation = cache.counters();
        let mut total = self.totals;
        total += generation;
        EvaluatorStatistics {
            generation,
            total,
            cached: cache.len(),
            evaluation_time: self.evaluation_time,
        }
    }

    pub fn log_statistics(&self) {
        let stats = self.statistics();
        info!(
            "{}: {} evaluations, {} duplicates, {} cache hits this generation ({} cached)",
            self.name,
            stats.generation.actual,
            stats.generation.duplicate,
            stats.generation.cache_hit,
            stats.cached
        );
        info!(
            "{}: {} evaluations, {} duplicates, {} cache hits in total, {:.3}s evaluating",
            self.name,
            stats.total.actual,
            stats.total.duplicate,
            stats.total.cache_hit,
            stats.evaluation_time.as_secs_f64()
        );
    }

    /// Column names matching [`Evaluator::csv_row`].
    pub fn csv_header(&self) -> String {
        format!(
            "{0}_EvalCount,{0}_DuplicateCount,{0}_CacheCount",
            self.name
        )
    }

    /// Current generation's counters as CSV.
    pub fn csv_row(&self) -> String {
        let counters = self.context.lock_cache().counters();
        format!(
            "{},{},{}",
            counters.actual, counters.duplicate, counters.cache_hit
        )
    }

    /// Forget every cached fitness.
    pub fn clear_cache(&mut self) {
        self.context.lock_cache().clear();
    }

    pub fn set_worker_count(&mut self, count: usize) -> Result<(), EvaluationError> {
        self.backend.set_worker_count(count)
    }

    pub fn worker_count(&self) -> usize {
        self.backend.worker_count()
    }

    /// Whether an evaluator asked to end the run.
    pub fn stop_requested(&self) -> bool {
        self.context.stop_requested()
    }

    pub fn generation(&self) -> u64 {
        self.context.generation()
    }

    pub fn evaluation_time(&self) -> Duration {
        self.evaluation_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evaluation::WorkerContext;
    use crate::compute::evaluation::candidate::testing::TestCandidate;
    use crate::schema::{Fitness, PoolConfig};

    fn evaluator(cache_size: usize) -> Evaluator<TestCandidate> {
        let config = EvaluatorConfig {
            cache_size,
            concurrency: 2,
            backend: BackendConfig::Pool(PoolConfig {
                progress_interval_ms: 10,
            }),
            ..Default::default()
        };
        let function: Arc<EvaluateFn<TestCandidate>> = Arc::new(
            |candidate: &TestCandidate, _: &WorkerContext<'_, TestCandidate>| {
                Ok::<_, crate::compute::evaluation::WorkerError>(Fitness::new(vec![
                    candidate.phenotype.len() as f64,
                ]))
            },
        );
        Evaluator::new("main", config, Some(function)).unwrap()
    }

    fn candidate(id: &str, phenotype: &str) -> Arc<TestCandidate> {
        Arc::new(TestCandidate::new(id, phenotype))
    }

    #[test]
    fn test_pool_requires_function() {
        assert!(matches!(
            Evaluator::<TestCandidate>::new("main", EvaluatorConfig::default(), None),
            Err(EvaluationError::MissingFunction)
        ));
    }

    #[test]
    fn test_generation_accounting() {
        let mut evaluator = evaluator(100);
        evaluator.step(1);

        let a = candidate("1", "aaa");
        assert_eq!(evaluator.evaluate(&a), Lookup::Forward);
        assert_eq!(evaluator.evaluate(&candidate("2", "aaa")), Lookup::Coalesced);
        evaluator.flush_with(&mut |_| {}).unwrap();
        assert_eq!(a.fitness().get().unwrap().values, vec![3.0]);
        assert_eq!(evaluator.csv_row(), "1,1,0");

        evaluator.step(2);
        assert_eq!(evaluator.evaluate(&candidate("3", "aaa")), Lookup::Resolved);
        assert_eq!(evaluator.csv_row(), "0,0,1");

        let stats = evaluator.statistics();
        assert_eq!(stats.total.actual, 1);
        assert_eq!(stats.total.duplicate, 1);
        assert_eq!(stats.total.cache_hit, 1);
        assert_eq!(stats.cached, 1);
        assert_eq!(evaluator.generation(), 2);
    }

    #[test]
    fn test_csv_header() {
        let evaluator = evaluator(10);
        assert_eq!(
            evaluator.csv_header(),
            "main_EvalCount,main_DuplicateCount,main_CacheCount"
        );
    }

    #[test]
    fn test_clear_cache() {
        let mut evaluator = evaluator(100);
        evaluator.evaluate(&candidate("1", "x"));
        evaluator.flush_with(&mut |_| {}).unwrap();
        evaluator.clear_cache();
        assert_eq!(evaluator.statistics().cached, 0);
        evaluator.step(1);
        assert_eq!(evaluator.evaluate(&candidate("2", "x")), Lookup::Forward);
        evaluator.flush_with(&mut |_| {}).unwrap();
    }

    #[test]
    fn test_evaluation_time_accumulates() {
        let mut evaluator = evaluator(100);
        evaluator.evaluate(&candidate("1", "x"));
        evaluator.flush_with(&mut |_| {}).unwrap();
        let first = evaluator.evaluation_time();
        // A flush with nothing requested adds nothing.
        evaluator.flush_with(&mut |_| {}).unwrap();
        assert_eq!(evaluator.evaluation_time(), first);
    }
}
