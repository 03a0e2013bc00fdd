//! Per-operator bookkeeping shared by every selection strategy.

use std::fmt;

/// Qualitative outcome of one child compared with its references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Performance {
    VeryGood,
    Good,
    Normal,
    Bad,
    VeryBad,
}

impl Performance {
    /// Number of performance levels.
    pub const COUNT: usize = 5;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Histogram of child performances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceHistogram([u32; Performance::COUNT]);

impl PerformanceHistogram {
    pub fn get(&self, level: Performance) -> u32 {
        self.0[level.index()]
    }

    pub fn record(&mut self, level: Performance) {
        self.0[level.index()] += 1;
    }

    pub fn merge(&mut self, other: &PerformanceHistogram) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += *b;
        }
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

/// Identifies one call record of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId {
    pub operator: usize,
    pub call: usize,
}

/// Result of one operator call during the current generation.
#[derive(Debug, Clone, Default)]
pub struct CallOutcome {
    valid_children: usize,
    performance: PerformanceHistogram,
    rewards: Vec<f64>,
}

impl CallOutcome {
    pub fn new(valid_children: usize) -> Self {
        Self {
            valid_children,
            ..Default::default()
        }
    }

    pub fn valid_children(&self) -> usize {
        self.valid_children
    }

    /// Record the performance of one evaluated child. Call once per child.
    pub fn record_performance(&mut self, level: Performance) {
        self.performance.record(level);
    }

    pub fn performance(&self) -> &PerformanceHistogram {
        &self.performance
    }

    pub fn add_reward(&mut self, reward: f64) {
        self.rewards.push(reward);
    }

    /// Best reward among the children, 0 when none was recorded.
    pub fn max_reward(&self) -> f64 {
        self.rewards.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }
}

/// Scheduling state of one registered operator.
///
/// The base protocol in [`super::OperatorScheduler`] owns every field here;
/// strategy-specific state lives in the strategies, indexed in parallel.
#[derive(Debug, Clone)]
pub struct OperatorStats {
    pub(crate) name: String,
    pub(crate) enabled: bool,
    /// Remaining call budget for this generation.
    pub(crate) tokens: u32,
    /// Successful calls issued this generation and not yet folded into statistics.
    pub(crate) pending: u32,
    /// Pseudo-deactivated until the operator produces a valid child.
    pub(crate) dormant: bool,
    pub(crate) generations_since_token: u32,
    pub(crate) outcomes: Vec<CallOutcome>,
    // Epoch statistics, cleared by `epoch()`.
    pub(crate) performance: PerformanceHistogram,
    pub(crate) failed_calls: u32,
    pub(crate) calls_last_generation: usize,
}

impl OperatorStats {
    pub(crate) fn new(name: impl Into<String>, initial_tokens: u32) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            tokens: initial_tokens,
            pending: 0,
            dormant: true,
            generations_since_token: 0,
            outcomes: Vec::new(),
            performance: PerformanceHistogram::default(),
            failed_calls: 0,
            calls_last_generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn dormant(&self) -> bool {
        self.dormant
    }

    pub fn generations_since_token(&self) -> u32 {
        self.generations_since_token
    }

    /// Call records of the current generation.
    pub fn outcomes(&self) -> &[CallOutcome] {
        &self.outcomes
    }

    /// Child performance accumulated over the current epoch.
    pub fn epoch_performance(&self) -> &PerformanceHistogram {
        &self.performance
    }

    /// Calls without valid children over the current epoch.
    pub fn failed_calls(&self) -> u32 {
        self.failed_calls
    }

    pub fn calls_last_generation(&self) -> usize {
        self.calls_last_generation
    }

    /// Enabled, proven useful and holding at least one token.
    #[inline]
    pub fn selectable(&self) -> bool {
        self.enabled && !self.dormant && self.tokens > 0
    }

    /// Dormant with a probe token not yet spent this generation.
    #[inline]
    pub(crate) fn has_probe_token(&self) -> bool {
        self.enabled && self.dormant && self.tokens as usize > self.outcomes.len()
    }

    /// Fold the current generation's outcomes into the epoch statistics.
    pub(crate) fn fold_outcomes(&mut self) {
        for outcome in &self.outcomes {
            if outcome.valid_children == 0 {
                self.failed_calls += 1;
            } else {
                self.performance.merge(&outcome.performance);
            }
        }
        self.calls_last_generation = self.outcomes.len();
    }

    pub(crate) fn clear_epoch(&mut self) {
        self.performance = PerformanceHistogram::default();
        self.failed_calls = 0;
    }
}

/// Summary of epoch statistics over all operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochSummary {
    pub performance: PerformanceHistogram,
    pub failures: u32,
}

impl fmt::Display for EpochSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VBad={}; Bad={}; Norm={}; Good={}; VGood={}; FAIL={}",
            self.performance.get(Performance::VeryBad),
            self.performance.get(Performance::Bad),
            self.performance.get(Performance::Normal),
            self.performance.get(Performance::Good),
            self.performance.get(Performance::VeryGood),
            self.failures
        )
    }
}
