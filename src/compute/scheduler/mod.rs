//! Adaptive operator scheduler.
//!
//! The base protocol owns the token budget and the dormancy state of every
//! operator and guards against starvation. A [`SelectionStrategy`] chosen at
//! configuration time scores the operators that survive the protocol.
//!
//! One generation runs as:
//!
//! 1. [`OperatorScheduler::prepare_for_selections`]
//! 2. for every offspring slot, [`OperatorScheduler::select`] then either
//!    [`OperatorScheduler::success`] or [`OperatorScheduler::failure`]
//! 3. once the children are evaluated, performances and rewards are recorded
//!    through [`OperatorScheduler::call_mut`]
//! 4. [`OperatorScheduler::step`]

mod bandit;
mod random;
mod registry;
mod reward;
mod self_adaptive;
mod stats;
mod strategy;

pub use bandit::{BanditArm, DmabSelector, KappaRouletteSelector, PdmabSelector};
pub use random::RandomSelector;
pub use registry::{OperatorCategory, OperatorRegistry, RegisteredOperator, RegistryError};
pub use reward::{classify_child, rank_rewards};
pub use self_adaptive::SelfAdaptiveSelector;
pub use stats::{
    CallId, CallOutcome, EpochSummary, OperatorStats, Performance, PerformanceHistogram,
};
pub use strategy::{Selection, SelectionStrategy, build_strategy};

use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::schema::{ConfigError, SchedulerConfig};

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Operator {0} failed without a token left")]
    NoTokens(String),
    #[error("No enabled operator to select")]
    NoEnabledOperators,
    #[error("Unknown call {0:?}")]
    UnknownCall(CallId),
    #[error("Unknown operator {0}")]
    UnknownOperator(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Chooses operators for offspring slots and learns from call outcomes.
pub struct OperatorScheduler {
    config: SchedulerConfig,
    operators: Vec<OperatorStats>,
    strategy: Box<dyn SelectionStrategy>,
    rng: StdRng,
    /// A dormant operator was reactivated during the current generation.
    reset_due: bool,
    /// Deadlock recovery fired on the previous selection.
    starved: bool,
}

impl OperatorScheduler {
    /// Build a scheduler over every operator of `registry`, in registration
    /// order. Operators not enabled by the configuration are kept but never
    /// selected.
    pub fn new<O>(
        registry: &OperatorRegistry<O>,
        config: SchedulerConfig,
        seed: Option<u64>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let enabled = registry.enabled_names(&config)?;

        let operators: Vec<OperatorStats> = registry
            .iter()
            .map(|r| {
                let mut stats = OperatorStats::new(r.name.clone(), config.initial_tokens);
                stats.enabled = enabled.contains(&r.name);
                stats
            })
            .collect();
        let strategy = build_strategy(&config.strategy, operators.len());
        let seed = seed.unwrap_or_else(rand::random);
        let rng = StdRng::seed_from_u64(seed);

        debug!(
            "Scheduler using {} over {} operators ({} enabled), seed {}",
            strategy.name(),
            operators.len(),
            enabled.len(),
            seed
        );

        Ok(Self {
            config,
            operators,
            strategy,
            rng,
            reset_due: false,
            starved: false,
        })
    }

    pub fn lambda(&self) -> u32 {
        self.config.lambda
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Per-operator state, indexed like the registry.
    pub fn stats(&self) -> &[OperatorStats] {
        &self.operators
    }

    pub fn operator_name(&self, index: usize) -> Option<&str> {
        self.operators.get(index).map(|o| o.name())
    }

    /// Strategy-specific weight of an operator, when the strategy has one.
    pub fn weight(&self, index: usize) -> Option<f64> {
        self.strategy.weight(index)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let operator = self
            .operators
            .iter_mut()
            .find(|o| o.name == name)
            .ok_or_else(|| SchedulerError::UnknownOperator(name.to_string()))?;
        operator.enabled = enabled;
        Ok(())
    }

    /// Start a generation: refill active operators and tick dormant ones.
    pub fn prepare_for_selections(&mut self) {
        self.reset_due = false;
        let lambda = self.config.lambda;
        let window = self.config.dormancy_window;

        for operator in self.operators.iter_mut().filter(|o| o.enabled) {
            operator.pending = 0;
            if operator.dormant {
                operator.generations_since_token += 1;
                if operator.generations_since_token >= window {
                    operator.tokens = 1;
                    operator.generations_since_token = 0;
                    debug!("Dormant operator {} got a probe token", operator.name);
                }
            } else {
                operator.tokens = lambda;
            }
        }
    }

    /// Choose the operator for the next offspring slot.
    pub fn select(&mut self) -> Result<Selection, SchedulerError> {
        if !self.operators.iter().any(|o| o.enabled) {
            return Err(SchedulerError::NoEnabledOperators);
        }

        // Nothing holds a token: wake the dormant operators up.
        let exhausted = self
            .operators
            .iter()
            .filter(|o| o.enabled)
            .all(|o| o.tokens == 0);
        if exhausted {
            if self.starved {
                warn!("All enabled operators are still failing after recovery");
            }
            warn!("All enabled operators are failing repeatedly, check your configuration");
            for operator in self.operators.iter_mut().filter(|o| o.enabled && o.dormant) {
                operator.tokens = self.config.recovery_tokens;
                operator.generations_since_token = 0;
            }
        }
        self.starved = exhausted;

        if let Some(index) = self.operators.iter().position(|o| o.has_probe_token()) {
            debug!(
                "Selected {} to spend a dormancy probe token",
                self.operators[index].name
            );
            return Ok(Selection { index, score: 0.0 });
        }

        if !self.operators.iter().any(|o| o.selectable()) {
            warn!("No operator left with tokens, refilling active operators");
            let lambda = self.config.lambda;
            for operator in self.operators.iter_mut().filter(|o| o.enabled && !o.dormant) {
                operator.tokens = lambda;
                operator.generations_since_token = 0;
            }
        }

        if let Some(selection) = self.strategy.select(&self.operators, &mut self.rng) {
            debug!(
                "{} selected {} (score {})",
                self.strategy.name(),
                self.operators[selection.index].name,
                selection.score
            );
            return Ok(selection);
        }

        // Only dormant operators with spent probes remain.
        warn!("{} found no selectable operator", self.strategy.name());
        self.operators
            .iter()
            .position(|o| o.enabled && o.tokens > 0)
            .map(|index| Selection { index, score: 0.0 })
            .ok_or(SchedulerError::NoEnabledOperators)
    }

    /// Record a call that produced `valid_children` children.
    ///
    /// A dormant operator is reactivated for good and refilled.
    pub fn success(
        &mut self,
        selection: &Selection,
        valid_children: usize,
    ) -> Result<CallId, SchedulerError> {
        let lambda = self.config.lambda;
        let operator = self.operator_mut(selection.index)?;
        operator.pending += 1;
        let activated = operator.dormant;
        if activated {
            operator.dormant = false;
            operator.tokens = lambda;
            debug!("{} produced valid children, activated for good", operator.name);
        }
        operator.outcomes.push(CallOutcome::new(valid_children));
        let call = operator.outcomes.len() - 1;
        if activated {
            self.reset_due = true;
        }
        Ok(CallId {
            operator: selection.index,
            call,
        })
    }

    /// Record a call that produced nothing. Spends one token.
    pub fn failure(&mut self, selection: &Selection) -> Result<CallId, SchedulerError> {
        let operator = self.operator_mut(selection.index)?;
        if operator.tokens == 0 {
            return Err(SchedulerError::NoTokens(operator.name.clone()));
        }
        operator.tokens -= 1;
        operator.outcomes.push(CallOutcome::new(0));
        Ok(CallId {
            operator: selection.index,
            call: operator.outcomes.len() - 1,
        })
    }

    fn operator_mut(&mut self, index: usize) -> Result<&mut OperatorStats, SchedulerError> {
        self.operators
            .get_mut(index)
            .ok_or_else(|| SchedulerError::UnknownOperator(index.to_string()))
    }

    /// Call record of the current generation, to record child performances
    /// and rewards once the children are evaluated.
    pub fn call_mut(&mut self, id: CallId) -> Result<&mut CallOutcome, SchedulerError> {
        self.operators
            .get_mut(id.operator)
            .and_then(|o| o.outcomes.get_mut(id.call))
            .ok_or(SchedulerError::UnknownCall(id))
    }

    /// End a generation: fold outcomes, update the strategy and drop the
    /// generation's call records.
    pub fn step(&mut self) {
        for operator in &mut self.operators {
            operator.fold_outcomes();
        }
        self.strategy.step(&self.operators, self.reset_due);
        for operator in &mut self.operators {
            operator.outcomes.clear();
        }
        self.reset_due = false;
    }

    /// Start a new epoch of statistics.
    pub fn epoch(&mut self) {
        for operator in &mut self.operators {
            operator.clear_epoch();
        }
        self.strategy.epoch();
    }

    /// Epoch statistics over the enabled operators.
    pub fn summary(&self) -> EpochSummary {
        let mut summary = EpochSummary::default();
        for operator in self.operators.iter().filter(|o| o.enabled) {
            summary.performance.merge(operator.epoch_performance());
            summary.failures += operator.failed_calls();
        }
        summary
    }
}
