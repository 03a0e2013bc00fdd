//! Persistent worker pool running an in-process evaluation function.
//!
//! Items travel `pending -> in progress -> done`. Workers take jobs from an
//! unbounded channel and check a separate stop-token channel before every
//! job, so shrinking the pool lets in-flight evaluations finish. Results are
//! written back under the cache lock first and the pool lock second.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{debug, error, info};

use crate::schema::{Fitness, PoolConfig};

use super::backend::{ProgressFn, check_fitness};
use super::{Candidate, DispatchItem, EvaluationBackend, EvaluationContext, EvaluationError};

/// What an evaluation function sees besides the candidate.
pub struct WorkerContext<'a, C> {
    pub worker_id: usize,
    /// Generation current when the evaluation started.
    pub generation: u64,
    context: &'a EvaluationContext<C>,
}

impl<C: Candidate> WorkerContext<'_, C> {
    pub fn stop_requested(&self) -> bool {
        self.context.stop_requested()
    }

    /// Ask the run to end after the current generation.
    pub fn request_stop(&self) {
        self.context.request_stop();
    }
}

/// Error returned by an evaluation function.
pub type WorkerError = Box<dyn std::error::Error + Send + Sync>;

/// Per-candidate evaluation function run by the workers.
pub type EvaluateFn<C> =
    dyn Fn(&C, &WorkerContext<'_, C>) -> Result<Fitness, WorkerError> + Send + Sync;

struct Job<C> {
    id: u64,
    item: DispatchItem<C>,
}

#[derive(Default)]
struct PoolState {
    pending: HashSet<u64>,
    in_progress: HashSet<u64>,
    /// Items submitted since the last flush.
    requests: usize,
    /// First failure since the last flush.
    error: Option<EvaluationError>,
}

struct PoolShared<C> {
    context: Arc<EvaluationContext<C>>,
    function: Arc<EvaluateFn<C>>,
    components: usize,
    state: Mutex<PoolState>,
    drained: Condvar,
    running: AtomicUsize,
}

impl<C: Candidate> PoolShared<C> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, worker_id: usize, job: Job<C>) {
        {
            let mut state = self.lock_state();
            state.pending.remove(&job.id);
            state.in_progress.insert(job.id);
        }

        let worker = WorkerContext {
            worker_id,
            generation: self.context.generation(),
            context: &self.context,
        };
        let phenotype = &job.item.phenotype;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.function)(job.item.candidate.as_ref(), &worker)
        }));
        let result = match outcome {
            Ok(Ok(fitness)) => check_fitness(phenotype, &fitness, self.components).map(|()| fitness),
            Ok(Err(e)) => Err(EvaluationError::Worker {
                phenotype: phenotype.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(EvaluationError::Worker {
                phenotype: phenotype.clone(),
                message: "evaluation panicked".to_string(),
            }),
        };
        self.done(job, result);
    }

    fn done(&self, job: Job<C>, result: Result<Fitness, EvaluationError>) {
        let mut cache = self.context.lock_cache();
        let mut state = self.lock_state();

        state.in_progress.remove(&job.id);
        match result {
            Ok(fitness) => job.item.complete(&mut cache, fitness),
            Err(err) => {
                error!("{}", err);
                cache.abandon(&job.item.phenotype);
                state.error.get_or_insert(err);
            }
        }

        if state.pending.is_empty() && state.in_progress.is_empty() {
            self.drained.notify_all();
        }
    }
}

fn worker_loop<C: Candidate>(
    shared: Arc<PoolShared<C>>,
    worker_id: usize,
    jobs: Receiver<Job<C>>,
    stops: Receiver<()>,
) {
    debug!("Evaluation worker {} started", worker_id);
    loop {
        if stops.try_recv().is_ok() {
            break;
        }
        select! {
            recv(stops) -> _ => break,
            recv(jobs) -> job => match job {
                Ok(job) => shared.run(worker_id, job),
                Err(_) => break,
            },
        }
    }
    shared.running.fetch_sub(1, Ordering::SeqCst);
    debug!("Evaluation worker {} stopped", worker_id);
}

/// Worker pool backend.
pub struct PoolDispatcher<C> {
    shared: Arc<PoolShared<C>>,
    jobs: Sender<Job<C>>,
    job_queue: Receiver<Job<C>>,
    stops: Sender<()>,
    stop_queue: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    next_job: u64,
    next_worker: usize,
    progress_interval: Duration,
}

impl<C: Candidate> PoolDispatcher<C> {
    /// Start a pool of `workers` threads.
    pub fn new(
        config: &PoolConfig,
        workers: usize,
        components: usize,
        function: Arc<EvaluateFn<C>>,
        context: Arc<EvaluationContext<C>>,
    ) -> Result<Self, EvaluationError> {
        let (jobs, job_queue) = unbounded();
        let (stops, stop_queue) = unbounded();
        let shared = Arc::new(PoolShared {
            context,
            function,
            components,
            state: Mutex::new(PoolState::default()),
            drained: Condvar::new(),
            running: AtomicUsize::new(0),
        });

        let mut pool = Self {
            shared,
            jobs,
            job_queue,
            stops,
            stop_queue,
            workers: Vec::new(),
            next_job: 0,
            next_worker: 0,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        };
        pool.set_worker_count(workers)?;
        Ok(pool)
    }

    /// Items pending and in progress.
    pub fn outstanding(&self) -> (usize, usize) {
        let state = self.shared.lock_state();
        (state.pending.len(), state.in_progress.len())
    }

    fn spawn_worker(&mut self) -> Result<(), EvaluationError> {
        let worker_id = self.next_worker;
        self.next_worker += 1;

        let shared = Arc::clone(&self.shared);
        let jobs = self.job_queue.clone();
        let stops = self.stop_queue.clone();
        self.shared.running.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(format!("evaluator-{}", worker_id))
            .spawn(move || worker_loop(shared, worker_id, jobs, stops));
        match spawned {
            Ok(handle) => {
                self.workers.retain(|h| !h.is_finished());
                self.workers.push(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.fetch_sub(1, Ordering::SeqCst);
                Err(EvaluationError::WorkerSpawn(e))
            }
        }
    }
}

impl<C: Candidate> EvaluationBackend<C> for PoolDispatcher<C> {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn submit(&mut self, item: DispatchItem<C>) {
        let id = self.next_job;
        self.next_job += 1;
        {
            let mut state = self.shared.lock_state();
            state.pending.insert(id);
            state.requests += 1;
        }

        if let Err(err) = self.jobs.send(Job { id, item }) {
            let job = err.into_inner();
            error!("Evaluation queue closed, dropping {}", job.item.phenotype);
            self.shared.lock_state().pending.remove(&job.id);
        }
    }

    fn flush(&mut self, progress: &mut ProgressFn<'_>) -> Result<(), EvaluationError> {
        let mut state = self.shared.lock_state();
        while !(state.pending.is_empty() && state.in_progress.is_empty()) {
            if self.shared.running.load(Ordering::SeqCst) == 0 {
                return Err(EvaluationError::NoWorkers);
            }

            let (guard, wait) = self
                .shared
                .drained
                .wait_timeout(state, self.progress_interval)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;

            if wait.timed_out() {
                let outstanding = state.pending.len() + state.in_progress.len();
                let requests = state.requests.max(1);
                let fraction = requests.saturating_sub(outstanding) as f64 / requests as f64;
                drop(state);
                progress(fraction);
                state = self.shared.lock_state();
            }
        }

        state.requests = 0;
        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn worker_count(&self) -> usize {
        self.shared
            .running
            .load(Ordering::SeqCst)
            .saturating_sub(self.stops.len())
    }

    fn set_worker_count(&mut self, count: usize) -> Result<(), EvaluationError> {
        let mut current = self.worker_count();
        while current > count {
            // The pool owns a receiver, so the channel cannot be closed.
            let _ = self.stops.send(());
            current -= 1;
        }
        // Withdraw stop tokens no worker picked up yet.
        while current < count && self.stop_queue.try_recv().is_ok() {
            current += 1;
        }
        while current < count {
            self.spawn_worker()?;
            current += 1;
        }
        info!("Evaluation pool resized to {} workers", count);
        Ok(())
    }
}

impl<C> Drop for PoolDispatcher<C> {
    fn drop(&mut self) {
        for _ in 0..self.shared.running.load(Ordering::SeqCst) {
            let _ = self.stops.send(());
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
