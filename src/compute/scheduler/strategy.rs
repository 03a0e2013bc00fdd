//! Strategy seam of the operator scheduler.

use rand::rngs::StdRng;

use crate::schema::SelectorStrategy;

use super::OperatorStats;
use super::bandit::{DmabSelector, KappaRouletteSelector, PdmabSelector};
use super::random::RandomSelector;
use super::self_adaptive::SelfAdaptiveSelector;

/// An operator chosen for one offspring slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    /// Index of the operator in the scheduler.
    pub index: usize,
    /// Strategy score that led to the choice (0 when not score-based).
    pub score: f64,
}

/// Scoring strategy plugged into the scheduler's base protocol.
///
/// Strategies only choose among operators the base protocol reports as
/// selectable and keep their own per-operator state, indexed like the
/// scheduler's operator list.
pub trait SelectionStrategy: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Choose among selectable operators. `None` when nothing is selectable.
    fn select(&mut self, operators: &[OperatorStats], rng: &mut StdRng) -> Option<Selection>;

    /// Consume this generation's call outcomes. `reset_due` is set when a
    /// dormant operator was reactivated during the generation.
    fn step(&mut self, operators: &[OperatorStats], reset_due: bool);

    /// Called at every epoch boundary.
    fn epoch(&mut self) {}

    /// Strategy-specific weight of an operator, for reporting.
    fn weight(&self, _index: usize) -> Option<f64> {
        None
    }
}

/// Instantiate the configured strategy for `operator_count` operators.
pub fn build_strategy(config: &SelectorStrategy, operator_count: usize) -> Box<dyn SelectionStrategy> {
    match config {
        SelectorStrategy::Random => Box::new(RandomSelector),
        SelectorStrategy::SelfAdaptive(sa) => {
            Box::new(SelfAdaptiveSelector::new(sa.clone(), operator_count))
        }
        SelectorStrategy::Dmab(bandit) => Box::new(DmabSelector::new(bandit.clone(), operator_count)),
        SelectorStrategy::Pdmab(bandit) => {
            Box::new(PdmabSelector::new(bandit.clone(), operator_count))
        }
        SelectorStrategy::KappaRoulette(kr) => Box::new(KappaRouletteSelector::new(
            kr.bandit.clone(),
            kr.kappa,
            operator_count,
        )),
    }
}

/// Indices of the selectable operators.
pub(crate) fn selectable_indices(operators: &[OperatorStats]) -> Vec<usize> {
    operators
        .iter()
        .enumerate()
        .filter(|(_, o)| o.selectable())
        .map(|(i, _)| i)
        .collect()
}
