//! Generation loop tying the operator scheduler to the evaluator.
//!
//! Genome logic stays with the caller: operators are opaque payloads of the
//! registry and the apply step is a closure turning an operator into
//! children.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::schema::{ConfigError, DriverConfig};

use super::evaluation::{Candidate, EvaluateFn, EvaluationError, Evaluator};
use super::scheduler::{
    CallId, OperatorRegistry, OperatorScheduler, SchedulerError, classify_child, rank_rewards,
};

/// Attempts allowed per offspring slot before a production phase gives up.
pub const ATTEMPTS_PER_SLOT: usize = 100;

/// Errors ending a generation.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Result of applying an operator. No children marks a failed call.
#[derive(Debug)]
pub struct Produced<C> {
    pub parents: Vec<Arc<C>>,
    pub children: Vec<C>,
}

impl<C> Produced<C> {
    pub fn failed() -> Self {
        Self {
            parents: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// A child of the current generation and the call that produced it.
#[derive(Debug)]
pub struct Offspring<C> {
    pub candidate: Arc<C>,
    pub call: CallId,
    pub parents: Vec<Arc<C>>,
}

/// Runs select, apply, evaluate and learn once per generation.
pub struct GenerationDriver<O, C: Candidate> {
    registry: OperatorRegistry<O>,
    scheduler: OperatorScheduler,
    evaluator: Evaluator<C>,
    generation: u64,
    attempt_limit: usize,
    offspring: Vec<Offspring<C>>,
    cancelled: Arc<AtomicBool>,
}

impl<O, C: Candidate> GenerationDriver<O, C> {
    /// Build the scheduler and evaluator from `config`. A pool backend needs
    /// the evaluation `function`.
    pub fn new(
        registry: OperatorRegistry<O>,
        config: DriverConfig,
        function: Option<Arc<EvaluateFn<C>>>,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let scheduler = OperatorScheduler::new(&registry, config.scheduler, config.random_seed)?;
        let evaluator = Evaluator::new("evaluator", config.evaluator, function)?;
        Ok(Self::from_parts(registry, scheduler, evaluator))
    }

    pub fn from_parts(
        registry: OperatorRegistry<O>,
        scheduler: OperatorScheduler,
        evaluator: Evaluator<C>,
    ) -> Self {
        let attempt_limit = ATTEMPTS_PER_SLOT * scheduler.lambda() as usize;
        Self {
            registry,
            scheduler,
            evaluator,
            generation: 0,
            attempt_limit,
            offspring: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the number of apply attempts per production phase.
    pub fn with_attempt_limit(mut self, limit: usize) -> Self {
        self.attempt_limit = limit;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn registry(&self) -> &OperatorRegistry<O> {
        &self.registry
    }

    pub fn scheduler(&self) -> &OperatorScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut OperatorScheduler {
        &mut self.scheduler
    }

    pub fn evaluator(&self) -> &Evaluator<C> {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut Evaluator<C> {
        &mut self.evaluator
    }

    /// Children produced since the last [`GenerationDriver::finish_generation`].
    pub fn offspring(&self) -> &[Offspring<C>] {
        &self.offspring
    }

    /// Handle that stops production from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Whether the run should end, by cancellation or evaluator request.
    pub fn stop_requested(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || self.evaluator.stop_requested()
    }

    /// Fill the offspring budget. Every produced child is submitted to the
    /// evaluator right away. Returns the number of successful calls.
    pub fn produce_offspring<F>(&mut self, mut apply: F) -> Result<usize, DriverError>
    where
        F: FnMut(&str, &O) -> Produced<C>,
    {
        self.scheduler.prepare_for_selections();
        let lambda = self.scheduler.lambda() as usize;

        let mut successes = 0;
        let mut attempts = 0;
        while successes < lambda {
            if self.stop_requested() {
                info!("Stop requested, ending offspring production");
                break;
            }
            if attempts >= self.attempt_limit {
                warn!(
                    "Generation {}: {} attempts yielded {} of {} successful calls, giving up",
                    self.generation, attempts, successes, lambda
                );
                break;
            }
            attempts += 1;

            let selection = self.scheduler.select()?;
            let Some(registered) = self.registry.by_index(selection.index) else {
                return Err(SchedulerError::UnknownOperator(selection.index.to_string()).into());
            };
            let produced = apply(&registered.name, &registered.operator);

            if produced.children.is_empty() {
                self.scheduler.failure(&selection)?;
                continue;
            }

            let call = self
                .scheduler
                .success(&selection, produced.children.len())?;
            for child in produced.children {
                let candidate = Arc::new(child);
                self.evaluator.evaluate(&candidate);
                self.offspring.push(Offspring {
                    candidate,
                    call,
                    parents: produced.parents.clone(),
                });
            }
            successes += 1;
        }

        debug!(
            "Generation {}: {} successful calls in {} attempts, {} children",
            self.generation,
            successes,
            attempts,
            self.offspring.len()
        );
        Ok(successes)
    }

    /// Wait until every child has its fitness.
    pub fn evaluate_offspring(&mut self) -> Result<(), DriverError> {
        self.evaluator.flush()?;
        Ok(())
    }

    /// Record child performances and rank rewards against `population`, step
    /// the scheduler and move the cache to the next generation. Returns the
    /// evaluated children.
    pub fn finish_generation(
        &mut self,
        population: &[Arc<C>],
        better: impl Fn(&C, &C) -> bool,
    ) -> Result<Vec<Arc<C>>, DriverError> {
        let offspring: Vec<Offspring<C>> = std::mem::take(&mut self.offspring)
            .into_iter()
            .filter(|o| o.candidate.fitness().is_set())
            .collect();

        let (best, worst) = extremes(population, &better);
        for child in &offspring {
            let parents: Vec<&C> = child.parents.iter().map(|p| p.as_ref()).collect();
            let level = classify_child(child.candidate.as_ref(), best, worst, &parents, &better);
            self.scheduler.call_mut(child.call)?.record_performance(level);
        }

        let everyone: Vec<(&C, Option<CallId>)> = population
            .iter()
            .map(|c| (c.as_ref(), None))
            .chain(offspring.iter().map(|o| (o.candidate.as_ref(), Some(o.call))))
            .collect();
        let rewards = rank_rewards(&everyone, |e| e.1.is_some(), |a, b| better(a.0, b.0));
        for (index, reward) in rewards {
            if let Some(call) = everyone[index].1 {
                self.scheduler.call_mut(call)?.add_reward(reward);
            }
        }

        self.scheduler.step();
        self.generation += 1;
        self.evaluator.step(self.generation);

        Ok(offspring.into_iter().map(|o| o.candidate).collect())
    }

    /// Produce, evaluate and learn for one generation.
    pub fn run_generation<F>(
        &mut self,
        population: &[Arc<C>],
        apply: F,
        better: impl Fn(&C, &C) -> bool,
    ) -> Result<Vec<Arc<C>>, DriverError>
    where
        F: FnMut(&str, &O) -> Produced<C>,
    {
        self.produce_offspring(apply)?;
        self.evaluate_offspring()?;
        self.finish_generation(population, better)
    }
}

fn extremes<'a, C>(
    population: &'a [Arc<C>],
    better: &impl Fn(&C, &C) -> bool,
) -> (Option<&'a C>, Option<&'a C>) {
    let mut members = population.iter().map(|c| c.as_ref());
    let Some(first) = members.next() else {
        return (None, None);
    };
    let (best, worst) = members.fold((first, first), |(best, worst), c| {
        (
            if better(c, best) { c } else { best },
            if better(worst, c) { c } else { worst },
        )
    });
    (Some(best), Some(worst))
}
