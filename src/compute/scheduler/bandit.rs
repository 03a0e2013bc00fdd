//! Dynamic multi-armed bandit selection.
//!
//! Three variants share one arm record and one reward update:
//!
//! - [`DmabSelector`] scores every selectable operator with UCB1 and takes the
//!   maximum.
//! - [`PdmabSelector`] does the same but counts calls issued this generation
//!   and not yet resolved, so repeated selections inside one generation spread
//!   out.
//! - [`KappaRouletteSelector`] samples with probability proportional to
//!   `(score / max_score)^kappa`.
//!
//! Rewards are smoothed through a rank-discounted window and fed to a
//! Page-Hinkley drift detector. When it fires every arm is reset.

use std::collections::VecDeque;

use log::{debug, trace};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::schema::BanditConfig;

use super::OperatorStats;
use super::strategy::{Selection, SelectionStrategy, selectable_indices};

/// Bandit statistics of one operator.
#[derive(Debug, Clone, Default)]
pub struct BanditArm {
    pub executions: u64,
    pub mean_reward: f64,
    pub mean_deviation: f64,
    pub max_deviation: f64,
    /// Most recent instantaneous rewards, newest first.
    pub past_rewards: VecDeque<f64>,
}

impl BanditArm {
    /// Clear the learned statistics. The reward window survives.
    pub fn reset(&mut self) {
        self.executions = 0;
        self.mean_reward = 0.0;
        self.mean_deviation = 0.0;
        self.max_deviation = 0.0;
    }

    /// Push an instantaneous reward and return the discounted window mean.
    fn smoothed_reward(&mut self, reward: f64, config: &BanditConfig) -> f64 {
        self.past_rewards.push_front(reward);
        self.past_rewards.truncate(config.window_size);

        let mut sorted: Vec<f64> = self.past_rewards.iter().copied().collect();
        sorted.sort_by(|a, b| b.total_cmp(a));

        let mut weight = 1.0;
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for value in sorted {
            weighted += weight * value;
            total_weight += weight;
            weight *= config.discount;
        }
        weighted / total_weight
    }

    /// Fold one reward into the running mean and the Page-Hinkley statistic.
    /// Returns true when drift is detected.
    fn update(&mut self, reward: f64, config: &BanditConfig) -> bool {
        let n = self.executions as f64;
        self.mean_reward = (self.mean_reward * n + reward) / (n + 1.0);
        self.executions += 1;
        self.mean_deviation += self.mean_reward - reward + config.ph_delta;
        self.max_deviation = self.max_deviation.max(self.mean_deviation);
        self.max_deviation - self.mean_deviation > config.ph_lambda
    }

    /// UCB1 score given the round totals to use.
    pub fn ucb(&self, exploration: f64, total_rounds: f64, executions: f64) -> f64 {
        self.mean_reward + exploration * (total_rounds.ln() / executions).sqrt()
    }
}

/// Arms and reward update shared by the three variants.
#[derive(Debug)]
pub struct BanditCore {
    config: BanditConfig,
    arms: Vec<BanditArm>,
}

impl BanditCore {
    pub fn new(config: BanditConfig, operator_count: usize) -> Self {
        Self {
            config,
            arms: vec![BanditArm::default(); operator_count],
        }
    }

    pub fn arms(&self) -> &[BanditArm] {
        &self.arms
    }

    pub fn reset_all(&mut self) {
        for arm in &mut self.arms {
            arm.reset();
        }
    }

    /// If some selectable arm was never executed, the selectable arm with the
    /// fewest executions plus pending calls.
    fn exploration_pick(&self, operators: &[OperatorStats], selectable: &[usize]) -> Option<Selection> {
        if !selectable.iter().any(|&i| self.arms[i].executions == 0) {
            return None;
        }
        selectable
            .iter()
            .map(|&i| (i, self.arms[i].executions + u64::from(operators[i].pending())))
            .min_by_key(|&(_, load)| load)
            .map(|(index, load)| Selection {
                index,
                score: load as f64,
            })
    }

    /// UCB1 scores of the selectable operators. With `count_pending`, calls
    /// issued this generation are added to both execution counts.
    fn scores(
        &self,
        operators: &[OperatorStats],
        selectable: &[usize],
        count_pending: bool,
    ) -> Vec<(usize, f64)> {
        let mut total_rounds: f64 = selectable
            .iter()
            .map(|&i| self.arms[i].executions as f64)
            .sum();
        if count_pending {
            total_rounds += selectable
                .iter()
                .map(|&i| f64::from(operators[i].pending()))
                .sum::<f64>();
        }

        selectable
            .iter()
            .map(|&i| {
                let mut executions = self.arms[i].executions as f64;
                if count_pending {
                    executions += f64::from(operators[i].pending());
                }
                (i, self.arms[i].ucb(self.config.exploration, total_rounds, executions))
            })
            .collect()
    }

    fn argmax(operators: &[OperatorStats], scores: &[(usize, f64)]) -> Option<Selection> {
        let mut best: Option<Selection> = None;
        for &(index, score) in scores {
            if best.is_none_or(|b| score > b.score) {
                best = Some(Selection { index, score });
            }
        }
        if let Some(selection) = best {
            trace!(
                "Best operator is {} with score {}",
                operators[selection.index].name(),
                selection.score
            );
        }
        best
    }

    /// Consume the generation's outcomes.
    fn step(&mut self, operators: &[OperatorStats], reset_due: bool) {
        if reset_due {
            debug!("Operator reactivated this generation: resetting bandit statistics");
            self.reset_all();
        }

        for (index, operator) in operators.iter().enumerate() {
            for outcome in operator.outcomes() {
                if outcome.valid_children() == 0 {
                    continue;
                }
                let arm = &mut self.arms[index];
                let reward = arm.smoothed_reward(outcome.max_reward(), &self.config);
                let drift = arm.update(reward, &self.config);
                trace!(
                    "{}: reward {} mean {} executions {}",
                    operator.name(),
                    reward,
                    arm.mean_reward,
                    arm.executions
                );
                if drift {
                    debug!(
                        "Page-Hinkley test fired on {}: resetting bandit statistics",
                        operator.name()
                    );
                    self.reset_all();
                }
            }
        }
    }
}

/// Plain DMAB: exploration of untried arms, then UCB1 argmax.
pub struct DmabSelector {
    core: BanditCore,
}

impl DmabSelector {
    pub fn new(config: BanditConfig, operator_count: usize) -> Self {
        Self {
            core: BanditCore::new(config, operator_count),
        }
    }

    pub fn arms(&self) -> &[BanditArm] {
        self.core.arms()
    }
}

impl SelectionStrategy for DmabSelector {
    fn name(&self) -> &'static str {
        "dmab"
    }

    fn select(&mut self, operators: &[OperatorStats], _rng: &mut StdRng) -> Option<Selection> {
        let selectable = selectable_indices(operators);
        if let Some(selection) = self.core.exploration_pick(operators, &selectable) {
            return Some(selection);
        }
        let scores = self.core.scores(operators, &selectable, false);
        BanditCore::argmax(operators, &scores)
    }

    fn step(&mut self, operators: &[OperatorStats], reset_due: bool) {
        self.core.step(operators, reset_due);
    }

    fn weight(&self, index: usize) -> Option<f64> {
        self.core.arms.get(index).map(|a| a.mean_reward)
    }
}

/// DMAB counting pending calls as executions.
pub struct PdmabSelector {
    core: BanditCore,
}

impl PdmabSelector {
    pub fn new(config: BanditConfig, operator_count: usize) -> Self {
        Self {
            core: BanditCore::new(config, operator_count),
        }
    }

    pub fn arms(&self) -> &[BanditArm] {
        self.core.arms()
    }
}

impl SelectionStrategy for PdmabSelector {
    fn name(&self) -> &'static str {
        "pdmab"
    }

    fn select(&mut self, operators: &[OperatorStats], _rng: &mut StdRng) -> Option<Selection> {
        let selectable = selectable_indices(operators);
        if let Some(selection) = self.core.exploration_pick(operators, &selectable) {
            return Some(selection);
        }
        let scores = self.core.scores(operators, &selectable, true);
        BanditCore::argmax(operators, &scores)
    }

    fn step(&mut self, operators: &[OperatorStats], reset_due: bool) {
        self.core.step(operators, reset_due);
    }

    fn weight(&self, index: usize) -> Option<f64> {
        self.core.arms.get(index).map(|a| a.mean_reward)
    }
}

/// DMAB scores sampled through an exponentiated roulette.
pub struct KappaRouletteSelector {
    core: BanditCore,
    kappa: f64,
}

impl KappaRouletteSelector {
    pub fn new(config: BanditConfig, kappa: f64, operator_count: usize) -> Self {
        Self {
            core: BanditCore::new(config, operator_count),
            kappa,
        }
    }

    pub fn arms(&self) -> &[BanditArm] {
        self.core.arms()
    }
}

impl SelectionStrategy for KappaRouletteSelector {
    fn name(&self) -> &'static str {
        "kappa-roulette"
    }

    fn select(&mut self, operators: &[OperatorStats], rng: &mut StdRng) -> Option<Selection> {
        let selectable = selectable_indices(operators);
        if let Some(selection) = self.core.exploration_pick(operators, &selectable) {
            return Some(selection);
        }

        let scores: Vec<(usize, f64)> = self
            .core
            .scores(operators, &selectable, false)
            .into_iter()
            .map(|(i, s)| (i, s.max(0.0)))
            .collect();
        let max_score = scores.iter().map(|&(_, s)| s).fold(0.0, f64::max);
        if max_score <= 0.0 {
            return scores
                .choose(rng)
                .map(|&(index, score)| Selection { index, score });
        }

        let weights: Vec<f64> = scores
            .iter()
            .map(|&(_, s)| (s / max_score).powf(self.kappa))
            .collect();
        let total: f64 = weights.iter().sum();
        let chosen = rng.gen_range(0.0..total);

        let mut cumulative = 0.0;
        for (&(index, score), weight) in scores.iter().zip(&weights) {
            cumulative += weight;
            if cumulative > chosen {
                return Some(Selection { index, score });
            }
        }
        scores.last().map(|&(index, score)| Selection { index, score })
    }

    fn step(&mut self, operators: &[OperatorStats], reset_due: bool) {
        self.core.step(operators, reset_due);
    }

    fn weight(&self, index: usize) -> Option<f64> {
        self.core.arms.get(index).map(|a| a.mean_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scheduler::CallOutcome;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn active(name: &str) -> OperatorStats {
        let mut stats = OperatorStats::new(name, 20);
        stats.dormant = false;
        stats
    }

    fn rewarded(reward: f64) -> CallOutcome {
        let mut outcome = CallOutcome::new(1);
        outcome.add_reward(reward);
        outcome
    }

    #[test]
    fn test_untried_operator_explored_first() {
        let ops = vec![active("x"), active("y"), active("z")];
        let mut selector = DmabSelector::new(BanditConfig::default(), 3);
        selector.core.arms[0].executions = 5;
        selector.core.arms[0].mean_reward = 100.0;
        selector.core.arms[2].executions = 2;

        let mut rng = StdRng::seed_from_u64(1);
        let selection = selector.select(&ops, &mut rng).unwrap();
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn test_exploration_counts_pending() {
        let mut ops = vec![active("x"), active("y")];
        ops[0].pending = 2;
        let mut selector = DmabSelector::new(BanditConfig::default(), 2);
        selector.core.arms[1].executions = 1;

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.select(&ops, &mut rng).unwrap().index, 1);
    }

    #[test]
    fn test_argmax_after_exploration() {
        let ops = vec![active("x"), active("y")];
        let mut selector = DmabSelector::new(BanditConfig::default(), 2);
        for (arm, mean) in selector.core.arms.iter_mut().zip([0.2, 0.9]) {
            arm.executions = 10;
            arm.mean_reward = mean;
        }
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.select(&ops, &mut rng).unwrap().index, 1);
    }

    #[test]
    fn test_pending_spreads_pdmab() {
        let mut ops = vec![active("x"), active("y")];
        let mut selector = PdmabSelector::new(BanditConfig::default(), 2);
        for arm in selector.core.arms.iter_mut() {
            arm.executions = 4;
            arm.mean_reward = 0.5;
        }
        ops[0].pending = 6;
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.select(&ops, &mut rng).unwrap().index, 1);
    }

    #[test]
    fn test_smoothed_reward_window() {
        let config = BanditConfig {
            window_size: 2,
            discount: 0.5,
            ..Default::default()
        };
        let mut arm = BanditArm::default();
        assert_eq!(arm.smoothed_reward(1.0, &config), 1.0);
        // Window [0, 1] sorted descending: (1 + 0.5 * 0) / 1.5
        assert!((arm.smoothed_reward(0.0, &config) - 1.0 / 1.5).abs() < 1e-12);
        arm.smoothed_reward(0.0, &config);
        assert_eq!(arm.past_rewards.len(), 2);
        assert_eq!(arm.past_rewards, VecDeque::from(vec![0.0, 0.0]));
    }

    #[test]
    fn test_page_hinkley_resets_all() {
        let config = BanditConfig {
            ph_delta: 0.0,
            ph_lambda: 0.4,
            window_size: 1,
            ..Default::default()
        };
        let mut ops = vec![active("x"), active("y")];
        let mut core = BanditCore::new(config, 2);
        core.arms[1].executions = 7;
        core.arms[1].mean_reward = 0.3;

        // Rewards below the mean build the deviation, then a jump trips it.
        ops[0].outcomes = vec![rewarded(1.0), rewarded(0.0), rewarded(0.0)];
        core.step(&ops, false);
        assert_eq!(core.arms[0].executions, 3);
        assert_eq!(core.arms[1].executions, 7);

        ops[0].outcomes = vec![rewarded(1.0)];
        core.step(&ops, false);
        assert_eq!(core.arms[0].executions, 0);
        assert_eq!(core.arms[1].executions, 0);
        assert_eq!(core.arms[1].mean_reward, 0.0);
        // The reward window survives the reset.
        assert_eq!(core.arms[0].past_rewards.len(), 1);
    }

    #[test]
    fn test_reset_due_clears_before_update() {
        let mut ops = vec![active("x")];
        let mut core = BanditCore::new(BanditConfig::default(), 1);
        core.arms[0].executions = 9;
        core.arms[0].mean_reward = 0.9;
        ops[0].outcomes = vec![rewarded(0.4)];
        core.step(&ops, true);
        assert_eq!(core.arms[0].executions, 1);
        assert!((core.arms[0].mean_reward - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_failed_calls_not_rewarded() {
        let mut ops = vec![active("x")];
        let mut core = BanditCore::new(BanditConfig::default(), 1);
        ops[0].outcomes = vec![CallOutcome::new(0)];
        core.step(&ops, false);
        assert_eq!(core.arms[0].executions, 0);
    }

    #[test]
    fn test_kappa_roulette_prefers_high_scores() {
        let ops = vec![active("x"), active("y")];
        let mut selector = KappaRouletteSelector::new(BanditConfig::default(), 8.0, 2);
        selector.core.arms[0].executions = 50;
        selector.core.arms[0].mean_reward = 0.05;
        selector.core.arms[1].executions = 50;
        selector.core.arms[1].mean_reward = 1.0;

        let mut rng = StdRng::seed_from_u64(42);
        let picks = (0..200)
            .filter(|_| selector.select(&ops, &mut rng).unwrap().index == 1)
            .count();
        assert!(picks > 150, "high-score operator picked {} times", picks);
    }

    #[test]
    fn test_kappa_zero_is_uniform() {
        let ops = vec![active("x"), active("y")];
        let mut selector = KappaRouletteSelector::new(BanditConfig::default(), 0.0, 2);
        selector.core.arms[0].executions = 50;
        selector.core.arms[0].mean_reward = 0.05;
        selector.core.arms[1].executions = 50;
        selector.core.arms[1].mean_reward = 1.0;

        let mut rng = StdRng::seed_from_u64(42);
        let picks = (0..400)
            .filter(|_| selector.select(&ops, &mut rng).unwrap().index == 0)
            .count();
        assert!((120..280).contains(&picks), "picked {} times", picks);
    }

    proptest! {
        #[test]
        fn prop_ucb_monotone_in_executions(
            mean in 0.0f64..1.0,
            fewer in 1u64..1000,
            extra in 0u64..1000,
            rounds in 2u64..100_000,
        ) {
            let more = fewer + extra;
            let total = (rounds.max(more + fewer)) as f64;
            let a = BanditArm { executions: fewer, mean_reward: mean, ..Default::default() };
            let b = BanditArm { executions: more, mean_reward: mean, ..Default::default() };
            prop_assert!(
                a.ucb(1.4, total, fewer as f64) >= b.ucb(1.4, total, more as f64)
            );
        }
    }
}
