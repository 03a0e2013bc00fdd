//! Compute module - Operator scheduling, evaluation and the generation loop.

pub mod driver;
pub mod evaluation;
pub mod scheduler;

pub use driver::{DriverError, GenerationDriver, Offspring, Produced};
pub use evaluation::{Candidate, Evaluator, EvaluatorStatistics, Lookup};
pub use scheduler::{OperatorRegistry, OperatorScheduler, Selection};
