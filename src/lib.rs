//! Evo Driver - Adaptive operator scheduling and cached fitness evaluation
//! for evolutionary search.
//!
//! Genome representation and variation operators belong to the caller. This
//! crate decides which operator to apply next, learns from how its children
//! perform, and evaluates every distinct phenotype at most once.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration and fitness value types
//! - `compute`: Operator scheduler, evaluation cache and backends, and the
//!   generation driver
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use evo_driver::{
//!     compute::evaluation::{Candidate, EvaluateFn, FitnessSlot, WorkerContext, WorkerError},
//!     compute::scheduler::{OperatorCategory, OperatorRegistry},
//!     compute::{GenerationDriver, Produced},
//!     schema::{DriverConfig, Fitness},
//! };
//!
//! struct Word {
//!     id: String,
//!     text: String,
//!     fitness: FitnessSlot,
//! }
//!
//! impl Candidate for Word {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!     fn phenotype(&self) -> &str {
//!         &self.text
//!     }
//!     fn fitness(&self) -> &FitnessSlot {
//!         &self.fitness
//!     }
//! }
//!
//! let mut registry = OperatorRegistry::new();
//! registry.register("append", OperatorCategory::DefaultOn, 'a').unwrap();
//!
//! let function: Arc<EvaluateFn<Word>> =
//!     Arc::new(|word: &Word, _: &WorkerContext<'_, Word>| {
//!         Ok::<_, WorkerError>(Fitness::new(vec![word.text.len() as f64]))
//!     });
//! let mut driver =
//!     GenerationDriver::new(registry, DriverConfig::default(), Some(function)).unwrap();
//!
//! let parent = Arc::new(Word {
//!     id: "0".to_string(),
//!     text: "a".to_string(),
//!     fitness: FitnessSlot::new(),
//! });
//! let children = driver
//!     .run_generation(
//!         &[Arc::clone(&parent)],
//!         |_, letter| Produced {
//!             parents: vec![Arc::clone(&parent)],
//!             children: vec![Word {
//!                 id: "1".to_string(),
//!                 text: format!("{}{}", parent.text, letter),
//!                 fitness: FitnessSlot::new(),
//!             }],
//!         },
//!         |a, b| a.text.len() > b.text.len(),
//!     )
//!     .unwrap();
//!
//! println!("{} children evaluated", children.len());
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{Candidate, Evaluator, GenerationDriver, OperatorRegistry, OperatorScheduler};
pub use schema::{DriverConfig, EvaluatorConfig, Fitness, SchedulerConfig};
