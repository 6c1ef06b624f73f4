//! Persistent per-agent capital for compounding payoff modes.

use serde::{Deserialize, Serialize};

/// How a round's payoff tier turns into a reward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RewardMode {
    /// The payoff itself is the round's reward.
    Additive,
    /// The payoff is a factor on running capital; the reward is the delta.
    #[default]
    Multiplicative,
    /// Capital grows by `(factor - 1) * base`; the reward is the delta.
    AdditiveOnBase { base: f64 },
}

impl RewardMode {
    /// Whether runs in this mode carry a [`CapitalState`].
    pub fn tracks_capital(self) -> bool {
        !matches!(self, RewardMode::Additive)
    }

    pub fn name(self) -> &'static str {
        match self {
            RewardMode::Additive => "additive",
            RewardMode::Multiplicative => "multiplicative",
            RewardMode::AdditiveOnBase { .. } => "additive_on_base",
        }
    }
}

/// One capital value per agent slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalState(Vec<f64>);

impl CapitalState {
    pub fn new(num_agents: usize, start: f64) -> Self {
        Self(vec![start; num_agents])
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Apply one factor per agent, returning the next state and the deltas.
    ///
    /// `Additive` mode leaves capital untouched and reports the factors
    /// themselves as rewards.
    pub fn apply(&self, factors: &[f64], mode: RewardMode) -> (CapitalState, Vec<f64>) {
        debug_assert_eq!(factors.len(), self.0.len());
        let (next, deltas): (Vec<f64>, Vec<f64>) = self
            .0
            .iter()
            .zip(factors)
            .map(|(&before, &factor)| match mode {
                RewardMode::Additive => (before, factor),
                RewardMode::Multiplicative => {
                    let after = before * factor;
                    (after, after - before)
                }
                RewardMode::AdditiveOnBase { base } => {
                    let delta = (factor - 1.0) * base;
                    (before + delta, delta)
                }
            })
            .unzip();
        (CapitalState(next), deltas)
    }
}
