//! Operator scheduler configuration.
//!
//! The scheduler decides, for every offspring slot of a generation, which
//! operator is invoked. These types configure the token budget, the dormancy
//! protocol and the scoring strategy.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Offspring budget per generation (lambda). Active operators are refilled
    /// to this many tokens at every generation.
    #[serde(default = "default_lambda")]
    pub lambda: u32,
    /// Generations a dormant operator waits before receiving a probe token.
    #[serde(default = "default_dormancy_window")]
    pub dormancy_window: u32,
    /// Tokens granted to dormant operators when nothing is selectable.
    #[serde(default = "default_recovery_tokens")]
    pub recovery_tokens: u32,
    /// Tokens every operator starts with, while still dormant.
    #[serde(default = "default_initial_tokens")]
    pub initial_tokens: u32,
    /// Which registered operators are enabled when not named explicitly.
    #[serde(default)]
    pub default_operators: DefaultOperators,
    /// Operator names enabled regardless of the default policy.
    #[serde(default)]
    pub enable: Vec<String>,
    /// Operator names disabled regardless of the default policy.
    #[serde(default)]
    pub disable: Vec<String>,
    /// Scoring strategy.
    #[serde(default)]
    pub strategy: SelectorStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lambda: default_lambda(),
            dormancy_window: default_dormancy_window(),
            recovery_tokens: default_recovery_tokens(),
            initial_tokens: default_initial_tokens(),
            default_operators: DefaultOperators::default(),
            enable: Vec::new(),
            disable: Vec::new(),
            strategy: SelectorStrategy::default(),
        }
    }
}

fn default_lambda() -> u32 {
    20
}
fn default_dormancy_window() -> u32 {
    10
}
fn default_recovery_tokens() -> u32 {
    3
}
fn default_initial_tokens() -> u32 {
    3
}

/// Default enabling policy for registered operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultOperators {
    /// Only explicitly enabled operators.
    None,
    /// Every registered operator.
    All,
    /// Operators whose category is enabled by default.
    #[default]
    Smart,
}

/// Operator scoring strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SelectorStrategy {
    /// Uniform choice among selectable operators.
    Random,
    /// Weighted roulette with inertia-blended weights.
    SelfAdaptive(SelfAdaptiveConfig),
    /// Dynamic multi-armed bandit with UCB1 scores.
    Dmab(BanditConfig),
    /// DMAB variant that accounts for calls still pending this generation.
    Pdmab(BanditConfig),
    /// DMAB scores sampled through an exponentiated roulette.
    KappaRoulette(KappaRouletteConfig),
}

impl Default for SelectorStrategy {
    fn default() -> Self {
        Self::KappaRoulette(KappaRouletteConfig::default())
    }
}

/// Self-adaptive roulette configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfAdaptiveConfig {
    /// Share of the previous weight kept at each update, in [0, 1].
    #[serde(default = "default_inertia")]
    pub inertia: f64,
    /// Lower bound for operator weights.
    #[serde(default)]
    pub min_weight: f64,
    /// Upper bound for operator weights.
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
}

impl Default for SelfAdaptiveConfig {
    fn default() -> Self {
        Self {
            inertia: default_inertia(),
            min_weight: 0.0,
            max_weight: default_max_weight(),
        }
    }
}

fn default_inertia() -> f64 {
    0.9
}
fn default_max_weight() -> f64 {
    1.0
}

/// Parameters shared by the bandit strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// UCB1 exploration constant (C).
    #[serde(default = "default_exploration")]
    pub exploration: f64,
    /// Page-Hinkley slack (delta).
    #[serde(default = "default_ph_delta")]
    pub ph_delta: f64,
    /// Page-Hinkley reset threshold (lambda).
    #[serde(default = "default_ph_lambda")]
    pub ph_lambda: f64,
    /// Number of past rewards kept per operator.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Rank discount applied to the sorted reward window.
    #[serde(default = "default_discount")]
    pub discount: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            exploration: default_exploration(),
            ph_delta: default_ph_delta(),
            ph_lambda: default_ph_lambda(),
            window_size: default_window_size(),
            discount: default_discount(),
        }
    }
}

fn default_exploration() -> f64 {
    1.4
}
fn default_ph_delta() -> f64 {
    0.15
}
fn default_ph_lambda() -> f64 {
    1.0
}
fn default_window_size() -> usize {
    10
}
fn default_discount() -> f64 {
    0.7
}

/// Softened-argmax bandit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KappaRouletteConfig {
    #[serde(flatten)]
    pub bandit: BanditConfig,
    /// Exponent applied to normalized scores. Zero is uniform, large values
    /// approach argmax.
    #[serde(default = "default_kappa")]
    pub kappa: f64,
}

impl Default for KappaRouletteConfig {
    fn default() -> Self {
        Self {
            bandit: BanditConfig::default(),
            kappa: default_kappa(),
        }
    }
}

fn default_kappa() -> f64 {
    2.0
}

impl BanditConfig {
    /// Validate bandit parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exploration < 0.0 {
            return Err(ConfigError::InvalidParameter(format!(
                "exploration constant {} must be non-negative",
                self.exploration
            )));
        }
        if self.ph_lambda <= 0.0 {
            return Err(ConfigError::InvalidParameter(format!(
                "Page-Hinkley threshold {} must be positive",
                self.ph_lambda
            )));
        }
        if self.window_size == 0 {
            return Err(ConfigError::InvalidParameter(
                "reward window size must be non-zero".to_string(),
            ));
        }
        if self.discount <= 0.0 || self.discount > 1.0 {
            return Err(ConfigError::InvalidParameter(format!(
                "discount {} must be in (0, 1]",
                self.discount
            )));
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lambda == 0 {
            return Err(ConfigError::InvalidLambda);
        }
        if self.dormancy_window == 0 {
            return Err(ConfigError::InvalidParameter(
                "dormancy window must be non-zero".to_string(),
            ));
        }
        if self.recovery_tokens == 0 {
            return Err(ConfigError::InvalidParameter(
                "recovery token grant must be non-zero".to_string(),
            ));
        }
        if let Some(name) = self.enable.iter().find(|n| self.disable.contains(n)) {
            return Err(ConfigError::InvalidParameter(format!(
                "operator {} is both enabled and disabled",
                name
            )));
        }

        match &self.strategy {
            SelectorStrategy::Random => Ok(()),
            SelectorStrategy::SelfAdaptive(sa) => {
                if !(0.0..=1.0).contains(&sa.inertia) {
                    return Err(ConfigError::InvalidParameter(format!(
                        "inertia {} must be in [0, 1]",
                        sa.inertia
                    )));
                }
                if sa.min_weight < 0.0 || sa.min_weight > sa.max_weight || sa.max_weight > 1.0 {
                    return Err(ConfigError::InvalidBounds(format!(
                        "weight bounds [{}, {}] must satisfy 0 <= min <= max <= 1",
                        sa.min_weight, sa.max_weight
                    )));
                }
                Ok(())
            }
            SelectorStrategy::Dmab(bandit) | SelectorStrategy::Pdmab(bandit) => bandit.validate(),
            SelectorStrategy::KappaRoulette(kr) => {
                if kr.kappa < 0.0 {
                    return Err(ConfigError::InvalidParameter(format!(
                        "kappa {} must be non-negative",
                        kr.kappa
                    )));
                }
                kr.bandit.validate()
            }
        }
    }
}
