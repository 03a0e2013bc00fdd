//! Candidate evaluation: phenotype cache, coalescing and dispatch backends.
//!
//! The [`Evaluator`] looks every candidate up in the [`EvaluationCache`].
//! Misses are forwarded to a backend: [`BatchDispatcher`] runs an external
//! process over files, [`PoolDispatcher`] runs an evaluation function on
//! persistent worker threads.

mod backend;
mod batch;
mod cache;
pub(crate) mod candidate;
mod error;
mod evaluator;
mod pool;

pub use backend::{DispatchItem, EvaluationBackend, EvaluationContext, ProgressFn};
pub use batch::{BatchDispatcher, ENV_FITNESS_FILE, ENV_OFFSPRING, STOP_MARKER, parse_fitness_line};
pub use cache::{CacheCounters, CacheEntry, EvaluationCache, Lookup};
pub use candidate::{Candidate, FitnessSlot};
pub use error::EvaluationError;
pub use evaluator::{Evaluator, EvaluatorStatistics};
pub use pool::{EvaluateFn, PoolDispatcher, WorkerContext, WorkerError};
