//! Multi-agent cooperative-threshold payoffs.
//!
//! A round succeeds when enough agents pick the cooperative label. Payoff tiers
//! are either paid out directly or applied as factors to running capital, see
//! [`RewardMode`].

use serde::{Deserialize, Serialize};

use crate::choice::Decision;
use crate::reward::{CapitalState, RewardMode};

/// Minimum cooperation needed for the favorable collective outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooperationThreshold {
    /// Fraction of all agents, in `(0, 1]`.
    Fraction(f64),
    /// Absolute number of cooperators.
    Count(usize),
}

impl Default for CooperationThreshold {
    fn default() -> Self {
        CooperationThreshold::Fraction(0.5)
    }
}

impl CooperationThreshold {
    /// Interpret a raw override: values up to 1.0 are fractions, larger
    /// values are absolute counts.
    pub fn from_value(value: f64) -> Self {
        if value <= 1.0 {
            CooperationThreshold::Fraction(value)
        } else {
            CooperationThreshold::Count(value.round() as usize)
        }
    }

    pub fn is_met(&self, cooperators: usize, num_agents: usize) -> bool {
        if num_agents == 0 {
            return false;
        }
        match *self {
            CooperationThreshold::Fraction(fraction) => {
                cooperators as f64 / num_agents as f64 >= fraction
            }
            CooperationThreshold::Count(count) => cooperators >= count,
        }
    }

    /// Smallest cooperator count that satisfies the threshold.
    pub fn min_cooperators(&self, num_agents: usize) -> usize {
        (0..=num_agents)
            .find(|&k| self.is_met(k, num_agents))
            .unwrap_or(num_agents + 1)
    }

    pub fn fraction(&self, num_agents: usize) -> f64 {
        match *self {
            CooperationThreshold::Fraction(fraction) => fraction,
            CooperationThreshold::Count(count) if num_agents > 0 => {
                count as f64 / num_agents as f64
            }
            CooperationThreshold::Count(_) => 1.0,
        }
    }
}

/// The three payoff tiers of a cooperative game.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPayoffs {
    pub high: f64,
    pub normal: f64,
    pub low: f64,
}

impl Default for TierPayoffs {
    fn default() -> Self {
        Self {
            high: 1.25,
            normal: 0.9,
            low: 0.5,
        }
    }
}

/// Everything the payoff rule needs besides the decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CooperativeRules {
    pub threshold: CooperationThreshold,
    pub payoffs: TierPayoffs,
    pub mode: RewardMode,
    /// On success, non-cooperators also receive `high`.
    pub success_applies_to_all: bool,
}

/// Result of settling one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub cooperators: usize,
    pub unparseable: usize,
    pub ratio: f64,
    pub success: bool,
    /// Payoff tier value applied to each agent.
    pub tiers: Vec<f64>,
    /// Emitted reward per agent: the payoff, or the capital delta.
    pub rewards: Vec<f64>,
    pub capital_after: Option<CapitalState>,
    pub explanation: String,
}

/// Settle a round from every agent's decision.
///
/// Unparseable decisions count as non-cooperative and receive the
/// non-cooperator tier. `capital` is required for capital-tracking modes; a
/// missing state is treated as fresh capital of 1.0 per agent.
pub fn settle(
    decisions: &[Decision],
    cooperative_label: &str,
    rules: &CooperativeRules,
    capital: Option<&CapitalState>,
) -> Settlement {
    let n = decisions.len();
    let cooperators = decisions.iter().filter(|d| d.is(cooperative_label)).count();
    let unparseable = decisions.iter().filter(|d| d.is_unparseable()).count();
    let ratio = if n == 0 {
        0.0
    } else {
        cooperators as f64 / n as f64
    };
    let success = rules.threshold.is_met(cooperators, n);
    let TierPayoffs { high, normal, low } = rules.payoffs;

    let tiers: Vec<f64> = decisions
        .iter()
        .map(|decision| {
            let cooperated = decision.is(cooperative_label);
            match (success, cooperated) {
                (true, true) => high,
                (true, false) if rules.success_applies_to_all => high,
                (true, false) => normal,
                (false, true) => low,
                (false, false) => normal,
            }
        })
        .collect();

    let (rewards, capital_after) = if rules.mode.tracks_capital() {
        let fresh;
        let before = match capital {
            Some(state) => state,
            None => {
                fresh = CapitalState::new(n, 1.0);
                &fresh
            }
        };
        let (after, deltas) = before.apply(&tiers, rules.mode);
        (deltas, Some(after))
    } else {
        (tiers.clone(), None)
    };

    let explanation = explain(cooperators, n, ratio, success, unparseable, rules);

    Settlement {
        cooperators,
        unparseable,
        ratio,
        success,
        tiers,
        rewards,
        capital_after,
        explanation,
    }
}

fn explain(
    cooperators: usize,
    n: usize,
    ratio: f64,
    success: bool,
    unparseable: usize,
    rules: &CooperativeRules,
) -> String {
    let TierPayoffs { high, normal, low } = rules.payoffs;
    let tier = |value: f64| match rules.mode {
        RewardMode::Additive => format!("{value}"),
        RewardMode::Multiplicative => format!("x{value}"),
        RewardMode::AdditiveOnBase { base } => format!("{:+.2}", (value - 1.0) * base),
    };
    let verb = match rules.mode {
        RewardMode::Additive => "receive",
        RewardMode::Multiplicative => "multiply capital by",
        RewardMode::AdditiveOnBase { .. } => "add to capital",
    };

    let mut text = format!(
        "Collective choices: {cooperators}/{n} ({:.2}%). ",
        ratio * 100.0
    );
    if success && rules.success_applies_to_all {
        text.push_str(&format!(
            "Cooperation succeeded! Everyone's payoff: {} ({verb}).",
            tier(high)
        ));
    } else if success {
        text.push_str(&format!(
            "Cooperation succeeded! Collective {}, independent {} ({verb}).",
            tier(high),
            tier(normal)
        ));
    } else {
        text.push_str(&format!(
            "Cooperation failed. Collective {}, independent {} ({verb}).",
            tier(low),
            tier(normal)
        ));
    }
    if unparseable > 0 {
        text.push_str(&format!(
            " {unparseable} unparseable decision(s) counted as independent."
        ));
    }
    text
}
