//! Evaluation errors. All of them end the run.

use std::io;
use std::path::PathBuf;

/// Errors raised while dispatching evaluations.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to run evaluator {command}: {source}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Evaluator output {0} is missing")]
    MissingOutput(PathBuf),

    #[error("Evaluator output ended after {found} of {expected} results")]
    UnexpectedEnd { expected: usize, found: usize },

    #[error("Malformed fitness line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("Negative fitness component {value} at position {index} for {phenotype}")]
    NegativeComponent {
        phenotype: String,
        index: usize,
        value: f64,
    },

    #[error("Evaluation of {phenotype} returned {found} fitness components, expected {expected}")]
    ComponentCount {
        phenotype: String,
        expected: usize,
        found: usize,
    },

    #[error("Evaluation of {phenotype} failed: {message}")]
    Worker { phenotype: String, message: String },

    #[error("Failed to start evaluation worker: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("Pending evaluations but no worker is running")]
    NoWorkers,

    #[error("Pool backend configured without an evaluation function")]
    MissingFunction,
}
