//! Uniform operator selection.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::OperatorStats;
use super::strategy::{Selection, SelectionStrategy, selectable_indices};

/// Picks uniformly among selectable operators and learns nothing.
#[derive(Debug, Default)]
pub struct RandomSelector;

impl SelectionStrategy for RandomSelector {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&mut self, operators: &[OperatorStats], rng: &mut StdRng) -> Option<Selection> {
        selectable_indices(operators)
            .choose(rng)
            .map(|&index| Selection { index, score: 0.0 })
    }

    fn step(&mut self, _operators: &[OperatorStats], _reset_due: bool) {}
}
