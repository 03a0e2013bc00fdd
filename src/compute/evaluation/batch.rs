//! External evaluator process, run once per batch of candidates.
//!
//! For every batch the dispatcher writes one input file per candidate, lists
//! them in a list file and runs the configured command with the input paths
//! as arguments. The command must write one line per candidate, in order, to
//! the output file: the fitness components followed by an optional
//! description. A trailing `#stop` line asks the run to end.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::schema::{BatchConfig, Fitness};

use super::backend::{ProgressFn, check_fitness};
use super::{Candidate, DispatchItem, EvaluationBackend, EvaluationContext, EvaluationError};

/// Marker line requesting the end of the run.
pub const STOP_MARKER: &str = "#stop";

/// Environment variable holding the space-separated input paths.
pub const ENV_OFFSPRING: &str = "EVALUATOR_OFFSPRING";

/// Environment variable holding the output path.
pub const ENV_FITNESS_FILE: &str = "EVALUATOR_FITNESS_FILE";

pub struct BatchDispatcher<C> {
    config: BatchConfig,
    batch_size: usize,
    components: usize,
    context: Arc<EvaluationContext<C>>,
    queue: Vec<DispatchItem<C>>,
}

impl<C: Candidate> BatchDispatcher<C> {
    pub fn new(
        config: BatchConfig,
        batch_size: usize,
        components: usize,
        context: Arc<EvaluationContext<C>>,
    ) -> Self {
        Self {
            config,
            batch_size: batch_size.max(1),
            components,
            context,
            queue: Vec::new(),
        }
    }

    /// Items waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn run_batch(&self, batch: &[DispatchItem<C>]) -> Result<(), EvaluationError> {
        let inputs: Vec<PathBuf> = batch
            .iter()
            .map(|item| self.config.input_path(item.candidate.id()))
            .collect();

        batch
            .par_iter()
            .zip(inputs.par_iter())
            .try_for_each(|(item, path)| {
                fs::write(path, item.candidate.to_code()).map_err(|source| EvaluationError::Io {
                    path: path.clone(),
                    source,
                })
            })?;

        let output = &self.config.output_file;
        remove_if_present(output);

        let listed: Vec<String> = inputs.iter().map(|p| p.display().to_string()).collect();
        let mut list = listed.join("\n");
        list.push('\n');
        fs::write(&self.config.list_file, list).map_err(|source| EvaluationError::Io {
            path: self.config.list_file.clone(),
            source,
        })?;

        debug!(
            "Running {} on {} candidates",
            self.config.command.display(),
            batch.len()
        );
        let status = Command::new(&self.config.command)
            .args(&self.config.arguments)
            .args(&inputs)
            .envs([
                (ENV_OFFSPRING, listed.join(" ")),
                (ENV_FITNESS_FILE, output.display().to_string()),
            ])
            .status()
            .map_err(|source| EvaluationError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;
        if !status.success() {
            warn!(
                "Evaluator {} exited with {}",
                self.config.command.display(),
                status
            );
        }

        let results = self.read_results(batch.len());
        self.cleanup(&inputs);
        let (results, stop) = results?;

        for (item, fitness) in batch.iter().zip(&results) {
            check_fitness(&item.phenotype, fitness, self.components)?;
        }
        if stop {
            info!("Evaluator requested the end of the run");
            self.context.request_stop();
        }

        let mut cache = self.context.lock_cache();
        for (item, fitness) in batch.iter().zip(results) {
            item.complete(&mut cache, fitness);
        }
        Ok(())
    }

    /// Parse `expected` result lines and look for a stop request after them.
    fn read_results(&self, expected: usize) -> Result<(Vec<Fitness>, bool), EvaluationError> {
        let output = &self.config.output_file;
        let text = fs::read_to_string(output).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => EvaluationError::MissingOutput(output.clone()),
            _ => EvaluationError::Io {
                path: output.clone(),
                source,
            },
        })?;

        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let mut results = Vec::with_capacity(expected);
        for found in 0..expected {
            let line = lines
                .next()
                .ok_or(EvaluationError::UnexpectedEnd { expected, found })?;
            results.push(parse_fitness_line(line, self.components)?);
        }

        let stop = lines.any(|l| l.trim_start().starts_with(STOP_MARKER));
        Ok((results, stop))
    }

    fn cleanup(&self, inputs: &[PathBuf]) {
        remove_if_present(&self.config.output_file);
        remove_if_present(&self.config.list_file);
        if self.config.remove_temporary_files {
            inputs.par_iter().for_each(|path| remove_if_present(path));
        }
    }
}

fn remove_if_present(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Parse one result line: exactly `components` numbers, then an optional
/// free-text description.
pub fn parse_fitness_line(line: &str, components: usize) -> Result<Fitness, EvaluationError> {
    let malformed = |reason: String| EvaluationError::MalformedLine {
        line: line.to_string(),
        reason,
    };

    let mut tokens = line.split_whitespace();
    let mut values = Vec::with_capacity(components);
    for found in 0..components {
        let token = tokens
            .next()
            .ok_or_else(|| malformed(format!("expected {} values, found {}", components, found)))?;
        let value: f64 = token
            .parse()
            .map_err(|e| malformed(format!("{:?} is not a number: {}", token, e)))?;
        if !value.is_finite() {
            return Err(malformed(format!("{:?} is not finite", token)));
        }
        values.push(value);
    }

    let description = tokens.collect::<Vec<_>>().join(" ");
    Ok(Fitness {
        values,
        description,
    })
}

impl<C: Candidate> EvaluationBackend<C> for BatchDispatcher<C> {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn submit(&mut self, item: DispatchItem<C>) {
        self.queue.push(item);
    }

    fn flush(&mut self, progress: &mut ProgressFn<'_>) -> Result<(), EvaluationError> {
        let queue = std::mem::take(&mut self.queue);
        let total = queue.len();
        let mut done = 0;

        let mut batches = queue.chunks(self.batch_size);
        while let Some(batch) = batches.next() {
            if let Err(err) = self.run_batch(batch) {
                let mut cache = self.context.lock_cache();
                for item in batch.iter().chain(batches.by_ref().flatten()) {
                    cache.abandon(&item.phenotype);
                }
                return Err(err);
            }
            done += batch.len();
            progress(done as f64 / total as f64);
        }
        Ok(())
    }

    fn worker_count(&self) -> usize {
        self.batch_size
    }

    fn set_worker_count(&mut self, count: usize) -> Result<(), EvaluationError> {
        if count == 0 {
            warn!("Batch size must be positive, using 1");
        }
        self.batch_size = count.max(1);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::compute::evaluation::EvaluationCache;
    use crate::compute::evaluation::candidate::testing::TestCandidate;
    use tempfile::TempDir;

    /// Scores every candidate by the length of its input file.
    const LENGTH_EVALUATOR: &str = r#"
: > "$EVALUATOR_FITNESS_FILE"
for f in "$@"; do
  n=$(wc -c < "$f" | tr -d ' ')
  echo "$n len$n" >> "$EVALUATOR_FITNESS_FILE"
done
"#;

    struct Fixture {
        dir: TempDir,
        context: Arc<EvaluationContext<TestCandidate>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                context: Arc::new(EvaluationContext::new(EvaluationCache::new(100))),
            }
        }

        fn dispatcher(&self, script: &str, batch_size: usize) -> BatchDispatcher<TestCandidate> {
            let script_path = self.dir.path().join("evaluate.sh");
            fs::write(&script_path, script).unwrap();

            let config = BatchConfig {
                arguments: vec![script_path.display().to_string()],
                input_pattern: self.dir.path().join("cand_%s.in").display().to_string(),
                output_file: self.dir.path().join("fitness.out"),
                list_file: self.dir.path().join("list.txt"),
                remove_temporary_files: true,
                ..BatchConfig::new("sh")
            };
            BatchDispatcher::new(config, batch_size, 1, Arc::clone(&self.context))
        }

        fn submit(
            &self,
            dispatcher: &mut BatchDispatcher<TestCandidate>,
            id: &str,
            phenotype: &str,
        ) -> Arc<TestCandidate> {
            let candidate = Arc::new(TestCandidate::new(id, phenotype));
            let mut cache = self.context.lock_cache();
            if cache.evaluate(&candidate) == crate::compute::evaluation::Lookup::Forward {
                dispatcher.submit(DispatchItem::new(Arc::clone(&candidate)));
            }
            candidate
        }
    }

    #[test]
    fn test_parse_fitness_line() {
        let fitness = parse_fitness_line("1.5 2 best so far", 2).unwrap();
        assert_eq!(fitness.values, vec![1.5, 2.0]);
        assert_eq!(fitness.description, "best so far");

        assert!(matches!(
            parse_fitness_line("1.5", 2),
            Err(EvaluationError::MalformedLine { .. })
        ));
        assert!(matches!(
            parse_fitness_line("x 1", 2),
            Err(EvaluationError::MalformedLine { .. })
        ));
        assert!(parse_fitness_line("inf", 1).is_err());
    }

    #[test]
    fn test_batches_resolve_candidates() {
        let fixture = Fixture::new();
        let mut dispatcher = fixture.dispatcher(LENGTH_EVALUATOR, 2);

        let a = fixture.submit(&mut dispatcher, "1", "abc");
        let b = fixture.submit(&mut dispatcher, "2", "abcdef");
        let c = fixture.submit(&mut dispatcher, "3", "a");
        let waiter = fixture.submit(&mut dispatcher, "4", "abc");
        assert_eq!(dispatcher.queued(), 3);

        let mut reports = Vec::new();
        dispatcher.flush(&mut |fraction| reports.push(fraction)).unwrap();

        assert_eq!(a.fitness().get().unwrap().values, vec![3.0]);
        assert_eq!(a.fitness().get().unwrap().description, "len3");
        assert_eq!(b.fitness().get().unwrap().values, vec![6.0]);
        assert_eq!(c.fitness().get().unwrap().values, vec![1.0]);
        assert_eq!(waiter.fitness().get().unwrap().values, vec![3.0]);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports.last(), Some(&1.0));

        assert!(!fixture.dir.path().join("cand_1.in").exists());
        assert!(!fixture.dir.path().join("fitness.out").exists());
        assert!(!fixture.dir.path().join("list.txt").exists());
        assert!(!fixture.context.stop_requested());
    }

    #[test]
    fn test_stop_marker() {
        let fixture = Fixture::new();
        let script = format!("{}\necho '#stop' >> \"$EVALUATOR_FITNESS_FILE\"\n", LENGTH_EVALUATOR);
        let mut dispatcher = fixture.dispatcher(&script, 4);
        let a = fixture.submit(&mut dispatcher, "1", "ab");
        dispatcher.flush(&mut |_| {}).unwrap();

        assert_eq!(a.fitness().get().unwrap().values, vec![2.0]);
        assert!(fixture.context.stop_requested());
    }

    #[test]
    fn test_negative_component_is_fatal() {
        let fixture = Fixture::new();
        let mut dispatcher =
            fixture.dispatcher("echo '-1' > \"$EVALUATOR_FITNESS_FILE\"\n", 4);
        let a = fixture.submit(&mut dispatcher, "1", "ab");

        let result = dispatcher.flush(&mut |_| {});
        assert!(matches!(
            result,
            Err(EvaluationError::NegativeComponent { index: 0, .. })
        ));
        assert!(!a.fitness().is_set());
        assert!(!fixture.context.lock_cache().contains("ab"));
    }

    #[test]
    fn test_missing_output_is_fatal() {
        let fixture = Fixture::new();
        let mut dispatcher = fixture.dispatcher("exit 3\n", 4);
        fixture.submit(&mut dispatcher, "1", "ab");
        assert!(matches!(
            dispatcher.flush(&mut |_| {}),
            Err(EvaluationError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_unreadable_output_is_io_error() {
        let fixture = Fixture::new();
        let mut dispatcher =
            fixture.dispatcher("printf '\\377\\376\\n' > \"$EVALUATOR_FITNESS_FILE\"\n", 4);
        fixture.submit(&mut dispatcher, "1", "ab");
        assert!(matches!(
            dispatcher.flush(&mut |_| {}),
            Err(EvaluationError::Io { .. })
        ));
    }

    #[test]
    fn test_short_output_is_fatal() {
        let fixture = Fixture::new();
        let mut dispatcher = fixture.dispatcher("echo 1 > \"$EVALUATOR_FITNESS_FILE\"\n", 4);
        fixture.submit(&mut dispatcher, "1", "ab");
        fixture.submit(&mut dispatcher, "2", "cd");
        assert!(matches!(
            dispatcher.flush(&mut |_| {}),
            Err(EvaluationError::UnexpectedEnd {
                expected: 2,
                found: 1
            })
        ));
    }
}
