//! Configuration types for evaluation caching, dispatch and the driver.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::SchedulerConfig;

/// Top-level driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    /// Operator scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Evaluation cache and backend.
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl DriverConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.evaluator.validate()
    }
}

/// Evaluator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Maximum number of cache entries kept between generations.
    /// Zero disables caching across generations.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Batch size for the external process, or worker count for the pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Number of fitness components every evaluation must produce.
    #[serde(default = "default_fitness_components")]
    pub fitness_components: usize,
    /// Evaluation backend.
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            concurrency: default_concurrency(),
            fitness_components: default_fitness_components(),
            backend: BackendConfig::default(),
        }
    }
}

fn default_cache_size() -> usize {
    10_000
}
fn default_concurrency() -> usize {
    1
}
fn default_fitness_components() -> usize {
    1
}

/// Evaluation backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    /// External evaluator process invoked once per batch.
    Batch(BatchConfig),
    /// Persistent worker threads running an in-process evaluation function.
    Pool(PoolConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Pool(PoolConfig::default())
    }
}

/// External process backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Evaluator command. Input file paths are passed as arguments.
    pub command: PathBuf,
    /// Arguments placed before the input file paths.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Input file pattern; `%s` is replaced by the candidate id.
    #[serde(default = "default_input_pattern")]
    pub input_pattern: String,
    /// File the evaluator writes its results to.
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    /// File listing the input paths of the current batch.
    #[serde(default = "default_list_file")]
    pub list_file: PathBuf,
    /// Delete input files once the batch has been read back.
    #[serde(default)]
    pub remove_temporary_files: bool,
}

impl BatchConfig {
    /// Create a batch configuration with default file names.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
            input_pattern: default_input_pattern(),
            output_file: default_output_file(),
            list_file: default_list_file(),
            remove_temporary_files: false,
        }
    }

    /// Input file path for the given candidate id.
    pub fn input_path(&self, id: &str) -> PathBuf {
        if self.input_pattern.contains("%s") {
            PathBuf::from(self.input_pattern.replace("%s", id))
        } else {
            PathBuf::from(format!("{}{}", self.input_pattern, id))
        }
    }
}

fn default_input_pattern() -> String {
    "candidate_%s.input".to_string()
}
fn default_output_file() -> PathBuf {
    PathBuf::from("fitness.output")
}
fn default_list_file() -> PathBuf {
    PathBuf::from("candidates_to_evaluate.txt")
}

/// Worker pool backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Interval between progress reports while flushing.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

fn default_progress_interval_ms() -> u64 {
    1000
}

impl EvaluatorConfig {
    /// Validate evaluator configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.fitness_components == 0 {
            return Err(ConfigError::InvalidFitnessComponents);
        }
        match &self.backend {
            BackendConfig::Batch(batch) => {
                if batch.command.as_os_str().is_empty() {
                    return Err(ConfigError::EmptyCommand);
                }
                if batch.input_pattern.is_empty() {
                    return Err(ConfigError::InvalidParameter(
                        "input pattern must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            BackendConfig::Pool(pool) => {
                if pool.progress_interval_ms == 0 {
                    return Err(ConfigError::InvalidParameter(
                        "progress interval must be non-zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Offspring budget (lambda) must be non-zero")]
    InvalidLambda,
    #[error("Concurrency must be non-zero")]
    InvalidConcurrency,
    #[error("Evaluations must produce at least one fitness component")]
    InvalidFitnessComponents,
    #[error("Batch evaluator command must not be empty")]
    EmptyCommand,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
}
