//! Game variants behind one [`Environment`] interface.
//!
//! An environment turns its immutable config into round questions, system
//! prompts, and outcomes. It holds no run state: capital is passed in and the
//! updated value handed back through [`Outcome`].

mod cooperative;
mod rule_compliance;

pub use cooperative::{threshold_phrase, CooperativeEnvironment};
pub use rule_compliance::RuleComplianceEnvironment;

use crate::choice::{ChoiceLabels, Decision};
use crate::config::{EnvironmentConfig, Variant};
use crate::error::ConfigError;
use crate::history::HistoryLayout;
use crate::reward::{CapitalState, Supervision};

/// Rewards and bookkeeping produced for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// One reward per agent slot.
    pub rewards: Vec<f64>,
    pub explanation: String,
    pub reward_is_delta: bool,
    pub supervision: Option<Supervision>,
    pub cooperation_succeeded: Option<bool>,
    pub capital_after: Option<CapitalState>,
}

pub trait Environment: Send + Sync {
    fn config(&self) -> &EnvironmentConfig;

    fn labels(&self) -> &ChoiceLabels {
        self.config().labels()
    }

    /// Number of agent slots, fixed or not.
    fn agent_count(&self) -> usize {
        self.config().num_agents()
    }

    /// Slots whose decision is forced without inference.
    fn fixed_slots(&self) -> Vec<usize> {
        Vec::new()
    }

    /// The label fixed slots are forced to.
    fn fixed_label(&self) -> &str {
        &self.labels().compliant
    }

    fn history_layout(&self) -> HistoryLayout;

    /// Capital at the start of a run, for compounding variants.
    fn initial_capital(&self) -> Option<CapitalState> {
        None
    }

    fn generate_question(&self, round: usize) -> String;

    fn render_system_prompt(&self) -> String;

    fn compute_outcome(
        &self,
        round: usize,
        responses: &[String],
        decisions: &[Decision],
        capital: Option<&CapitalState>,
    ) -> Outcome;
}

/// Validate `config` and build the matching environment.
pub fn build(config: EnvironmentConfig) -> Result<Box<dyn Environment>, ConfigError> {
    config.validate()?;
    Ok(match config.variant.clone() {
        Variant::RuleCompliance(rules) => Box::new(RuleComplianceEnvironment::new(config, rules)),
        Variant::Cooperative(rules) => Box::new(CooperativeEnvironment::new(config, rules)),
    })
}

/// Render a float the way prompt authors write it: `1.0` rather than `1`.
pub fn display_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Join non-empty prompt fragments with single spaces.
fn join_fragments<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn json_instruction(labels: &ChoiceLabels) -> String {
    format!(
        r#"IMPORTANT: You must end your response with your final decision in JSON format: {{"choice": "{}"}} or {{"choice": "{}"}}."#,
        labels.compliant, labels.independent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CooperativeConfig, RuleComplianceConfig};

    #[test]
    fn test_build_dispatches_on_variant() {
        let single = EnvironmentConfig::new(
            "s",
            2,
            Variant::RuleCompliance(RuleComplianceConfig::new(ChoiceLabels::new("A", "B"))),
        );
        let env = build(single).unwrap();
        assert_eq!(env.agent_count(), 1);
        assert_eq!(env.history_layout(), HistoryLayout::SingleAgent);

        let coop = EnvironmentConfig::new(
            "c",
            2,
            Variant::Cooperative(CooperativeConfig::new(
                4,
                ChoiceLabels::new("collective", "independent"),
            )),
        );
        let env = build(coop).unwrap();
        assert_eq!(env.agent_count(), 4);
        assert!(env.initial_capital().is_some());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let bad = EnvironmentConfig::new(
            "s",
            0,
            Variant::RuleCompliance(RuleComplianceConfig::new(ChoiceLabels::new("A", "B"))),
        );
        assert_eq!(build(bad).err(), Some(ConfigError::NoRounds));
    }

    #[test]
    fn test_display_number() {
        assert_eq!(display_number(1.0), "1.0");
        assert_eq!(display_number(1.25), "1.25");
        assert_eq!(display_number(-0.5), "-0.5");
    }
}
