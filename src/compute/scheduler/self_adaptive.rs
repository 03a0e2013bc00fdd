//! Self-adaptive roulette selection.
//!
//! Every operator carries an activation weight. Selection is a roulette over
//! the weights of the selectable operators. At the end of a generation the
//! weight moves toward 1 if some child was good, toward 0 if children were
//! only bad, and the move is damped by the configured inertia.

use log::{trace, warn};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::schema::SelfAdaptiveConfig;

use super::strategy::{Selection, SelectionStrategy, selectable_indices};
use super::{OperatorStats, Performance, PerformanceHistogram};

pub struct SelfAdaptiveSelector {
    config: SelfAdaptiveConfig,
    weights: Vec<f64>,
}

impl SelfAdaptiveSelector {
    pub fn new(config: SelfAdaptiveConfig, operator_count: usize) -> Self {
        let initial = config.max_weight;
        Self {
            config,
            weights: vec![initial; operator_count],
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Out-of-bounds weights are kept but reported.
    fn set_weight(&mut self, index: usize, name: &str, value: f64) {
        if value < self.config.min_weight || value > self.config.max_weight {
            warn!(
                "Weight {} for {} is out of bounds [{}, {}]",
                value, name, self.config.min_weight, self.config.max_weight
            );
        }
        self.weights[index] = value;
    }

    /// Target weight from the histogram of this generation's successful calls.
    fn aimed_weight(&self, index: usize, operator: &OperatorStats) -> f64 {
        let mut histogram = PerformanceHistogram::default();
        let mut calls = 0;
        for outcome in operator.outcomes() {
            if outcome.valid_children() > 0 {
                histogram.merge(outcome.performance());
                calls += 1;
            }
        }

        let current = self.weights[index];
        if calls == 0 {
            return current;
        }

        if histogram.get(Performance::VeryGood) > 0 || histogram.get(Performance::Good) > 0 {
            1.0
        } else if histogram.get(Performance::Normal) > 0 {
            current
        } else if histogram.get(Performance::Bad) > 0 || histogram.get(Performance::VeryBad) > 0 {
            0.0
        } else {
            current
        }
    }
}

impl SelectionStrategy for SelfAdaptiveSelector {
    fn name(&self) -> &'static str {
        "self-adaptive"
    }

    fn select(&mut self, operators: &[OperatorStats], rng: &mut StdRng) -> Option<Selection> {
        let selectable = selectable_indices(operators);
        if selectable.is_empty() {
            return None;
        }

        let total: f64 = selectable.iter().map(|&i| self.weights[i]).sum();
        if total <= 0.0 {
            return selectable
                .choose(rng)
                .map(|&index| Selection { index, score: 0.0 });
        }

        let target = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        for &index in &selectable {
            cumulative += self.weights[index];
            if cumulative >= target {
                return Some(Selection { index, score: 0.0 });
            }
        }
        // Rounding can leave the target just above the last cumulative sum.
        selectable.last().map(|&index| Selection { index, score: 0.0 })
    }

    fn step(&mut self, operators: &[OperatorStats], _reset_due: bool) {
        let inertia = self.config.inertia;
        for (index, operator) in operators.iter().enumerate() {
            let aimed = self.aimed_weight(index, operator);
            let blended = inertia * self.weights[index] + (1.0 - inertia) * aimed;
            self.set_weight(index, operator.name(), blended);
            trace!("New weight for {} is {}", operator.name(), blended);
        }
    }

    fn weight(&self, index: usize) -> Option<f64> {
        self.weights.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scheduler::CallOutcome;
    use rand::SeedableRng;

    fn active(name: &str) -> OperatorStats {
        let mut stats = OperatorStats::new(name, 5);
        stats.dormant = false;
        stats
    }

    fn outcome(level: Performance) -> CallOutcome {
        let mut outcome = CallOutcome::new(1);
        outcome.record_performance(level);
        outcome
    }

    #[test]
    fn test_weights_move_toward_aim() {
        let config = SelfAdaptiveConfig {
            inertia: 0.5,
            ..Default::default()
        };
        let mut selector = SelfAdaptiveSelector::new(config, 3);
        selector.weights = vec![0.5, 0.5, 0.5];

        let mut ops = vec![active("good"), active("bad"), active("idle")];
        ops[0].outcomes.push(outcome(Performance::Good));
        ops[1].outcomes.push(outcome(Performance::VeryBad));

        selector.step(&ops, false);
        assert_eq!(selector.weights(), &[0.75, 0.25, 0.5]);
    }

    #[test]
    fn test_normal_keeps_weight() {
        let mut selector = SelfAdaptiveSelector::new(SelfAdaptiveConfig::default(), 1);
        selector.weights = vec![0.4];
        let mut ops = vec![active("a")];
        ops[0].outcomes.push(outcome(Performance::Normal));
        ops[0].outcomes.push(outcome(Performance::Bad));
        selector.step(&ops, false);
        assert!((selector.weights()[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_failed_calls_ignored() {
        let config = SelfAdaptiveConfig {
            inertia: 0.0,
            ..Default::default()
        };
        let mut selector = SelfAdaptiveSelector::new(config, 1);
        let mut ops = vec![active("a")];
        ops[0].outcomes.push(CallOutcome::new(0));
        selector.step(&ops, false);
        assert_eq!(selector.weights()[0], 1.0);
    }

    #[test]
    fn test_zero_weight_never_chosen() {
        let mut selector = SelfAdaptiveSelector::new(SelfAdaptiveConfig::default(), 2);
        selector.weights = vec![0.0, 1.0];
        let ops = vec![active("zero"), active("one")];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(selector.select(&ops, &mut rng).unwrap().index, 1);
        }
    }

    #[test]
    fn test_all_zero_falls_back_to_uniform() {
        let mut selector = SelfAdaptiveSelector::new(SelfAdaptiveConfig::default(), 2);
        selector.weights = vec![0.0, 0.0];
        let ops = vec![active("a"), active("b")];
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = [false; 2];
        for _ in 0..100 {
            seen[selector.select(&ops, &mut rng).unwrap().index] = true;
        }
        assert!(seen[0] && seen[1]);
    }
}
