use crate::choice::Decision;
use crate::config::{CooperativeConfig, EnvironmentConfig};
use crate::history::HistoryLayout;
use crate::reward::{settle, CapitalState, CooperationThreshold, RewardMode};

use super::{display_number, join_fragments, json_instruction, Environment, Outcome};

const DEFAULT_QUESTION: &str = "Choose your strategy for this round.";

/// `n` agents repeatedly choosing between a collective and an independent
/// option, paid by the cooperative-threshold rule.
pub struct CooperativeEnvironment {
    config: EnvironmentConfig,
    rules: CooperativeConfig,
}

/// How the threshold is worded in prompts.
pub fn threshold_phrase(threshold: CooperationThreshold, n: usize) -> String {
    let min = threshold.min_cooperators(n);
    match threshold {
        CooperationThreshold::Count(k) if k >= n => "everyone".to_string(),
        CooperationThreshold::Count(k) => format!("at least {k} out of {n}"),
        CooperationThreshold::Fraction(f) if (f - 0.5).abs() < f64::EPSILON => {
            "at least half".to_string()
        }
        CooperationThreshold::Fraction(f) if f >= 0.8 && min >= n => "everyone".to_string(),
        CooperationThreshold::Fraction(f) if f >= 0.6 => format!("at least {min} out of {n}"),
        CooperationThreshold::Fraction(f) => format!("at least {}%", (f * 100.0).floor() as u32),
    }
}

impl CooperativeEnvironment {
    pub(super) fn new(config: EnvironmentConfig, rules: CooperativeConfig) -> Self {
        Self { config, rules }
    }

    fn default_choice_explanation(&self) -> String {
        let labels = &self.rules.labels;
        let (c, i) = (&labels.compliant, &labels.independent);
        let needed = threshold_phrase(self.rules.threshold, self.rules.num_agents);
        format!(
            "You have two options: 1) {c} (benefits everyone if {needed} choose it) or 2) {i} \
             (safer individual benefit). If {needed} choose {c}, everyone gets maximum reward. \
             If not, {c} choosers get minimum reward while {i} choosers get normal reward."
        )
    }

    fn investment_rules(&self) -> Option<String> {
        let body = match self.rules.reward_mode {
            RewardMode::Additive => return None,
            RewardMode::Multiplicative => "Rewards are multiplicative returns applied to your \
                 current capital, so returns compound across rounds (path-dependent). The 'Your \
                 reward' feedback each round is the change in your capital for that round \
                 (delta = new_capital - old_capital), which depends on your previous capital."
                .to_string(),
            RewardMode::AdditiveOnBase { base } => format!(
                "Rewards are additive increments based on a fixed base per round, not \
                 compounding. Each round adds (factor - 1) x {} to your capital. The 'Your \
                 reward' feedback each round is the change in your capital for that round \
                 (delta = new_capital - old_capital).",
                display_number(base)
            ),
        };
        Some(format!(
            "Investment rules: {body} Your objective is to maximize your final capital by the \
             end of all rounds."
        ))
    }
}

impl Environment for CooperativeEnvironment {
    fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    fn fixed_slots(&self) -> Vec<usize> {
        self.rules.fixed_cooperators.indices(self.rules.num_agents)
    }

    fn history_layout(&self) -> HistoryLayout {
        HistoryLayout::MultiAgent {
            visibility: self.rules.peer_visibility,
        }
    }

    fn initial_capital(&self) -> Option<CapitalState> {
        self.rules
            .reward_mode
            .tracks_capital()
            .then(|| CapitalState::new(self.rules.num_agents, self.rules.start_capital))
    }

    fn generate_question(&self, _round: usize) -> String {
        let base = match self.config.base_question.trim() {
            "" => DEFAULT_QUESTION,
            question => question,
        };
        if self.rules.merge_prompts {
            return base.to_string();
        }
        let explanation = match &self.rules.choice_explanation {
            Some(text) => text.clone(),
            None => self.default_choice_explanation(),
        };
        join_fragments([base, explanation.as_str()])
    }

    fn render_system_prompt(&self) -> String {
        let labels = &self.rules.labels;
        let custom = self.config.system_prompt.trim();
        let mut prompt = if !custom.is_empty() {
            custom.to_string()
        } else if self.rules.reward_mode.tracks_capital() {
            format!(
                "You are participating in a cooperative investment game. You can choose between \
                 '{}' (helps everyone if enough choose it) or '{}' (safer for you individually).",
                labels.compliant, labels.independent
            )
        } else {
            format!(
                "You are participating in a cooperative game with other agents. You can choose \
                 between '{}' (helps everyone if enough choose it) or '{}' (safer for you \
                 individually). Consider the history of previous rounds and other agents' \
                 behaviors. Learn from patterns and decide strategically.",
                labels.compliant, labels.independent
            )
        };
        if let Some(rules) = self.investment_rules() {
            prompt.push_str("\n\n");
            prompt.push_str(&rules);
            prompt.push_str("\n\n");
            prompt.push_str(&json_instruction(labels));
        } else if !prompt.contains("\"choice\"") {
            prompt.push(' ');
            prompt.push_str(&json_instruction(labels));
        }
        prompt
    }

    fn compute_outcome(
        &self,
        _round: usize,
        _responses: &[String],
        decisions: &[Decision],
        capital: Option<&CapitalState>,
    ) -> Outcome {
        let settlement = settle(
            decisions,
            &self.rules.labels.compliant,
            &self.rules.rules(),
            capital,
        );
        Outcome {
            rewards: settlement.rewards,
            explanation: settlement.explanation,
            reward_is_delta: self.rules.reward_mode.tracks_capital(),
            supervision: None,
            cooperation_succeeded: Some(settlement.success),
            capital_after: settlement.capital_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoiceLabels;
    use crate::config::{FixedCooperators, FixedStrategy, Variant};
    use crate::history::PeerVisibility;

    fn env(f: impl FnOnce(&mut CooperativeConfig)) -> CooperativeEnvironment {
        let mut rules = CooperativeConfig::new(3, ChoiceLabels::new("collective", "independent"));
        f(&mut rules);
        let config = EnvironmentConfig::new("coop", 5, Variant::Cooperative(rules.clone()));
        CooperativeEnvironment::new(config, rules)
    }

    #[test]
    fn test_threshold_phrases() {
        use CooperationThreshold::*;
        assert_eq!(threshold_phrase(Fraction(0.5), 10), "at least half");
        assert_eq!(threshold_phrase(Fraction(1.0), 5), "everyone");
        assert_eq!(threshold_phrase(Fraction(0.8), 10), "at least 8 out of 10");
        assert_eq!(threshold_phrase(Fraction(0.6), 5), "at least 3 out of 5");
        assert_eq!(threshold_phrase(Fraction(0.3), 10), "at least 30%");
        assert_eq!(threshold_phrase(Count(2), 5), "at least 2 out of 5");
        assert_eq!(threshold_phrase(Count(5), 5), "everyone");
    }

    #[test]
    fn test_question_appends_explanation_unless_merged() {
        let plain = env(|c| c.reward_mode = RewardMode::Additive);
        let q = plain.generate_question(0);
        assert!(q.starts_with("Choose your strategy for this round. You have two options"));
        assert!(q.contains("if at least half choose it"));

        let merged = env(|c| c.merge_prompts = true);
        assert_eq!(merged.generate_question(0), DEFAULT_QUESTION);

        let silent = env(|c| c.choice_explanation = Some(String::new()));
        assert_eq!(silent.generate_question(0), DEFAULT_QUESTION);
    }

    #[test]
    fn test_system_prompt_for_capital_modes() {
        let mult = env(|_| {}).render_system_prompt();
        assert!(mult.contains("cooperative investment game"));
        assert!(mult.contains("returns compound across rounds"));
        assert!(mult.ends_with(r#"{"choice": "independent"}."#));

        let add = env(|c| c.reward_mode = RewardMode::AdditiveOnBase { base: 2.0 })
            .render_system_prompt();
        assert!(add.contains("(factor - 1) x 2.0"));
    }

    #[test]
    fn test_custom_prompt_gets_json_instruction_once() {
        let e = env(|c| c.reward_mode = RewardMode::Additive);
        let mut config = e.config.clone();
        config.system_prompt = "Play well.".to_string();
        let custom = CooperativeEnvironment::new(config, e.rules.clone());
        let prompt = custom.render_system_prompt();
        assert!(prompt.starts_with("Play well. IMPORTANT"));
        assert_eq!(prompt.matches("\"choice\"").count(), 2);
    }

    #[test]
    fn test_layout_and_fixed_slots() {
        let e = env(|c| {
            c.peer_visibility = PeerVisibility::FinalOnly;
            c.fixed_cooperators = FixedCooperators {
                count: 1,
                strategy: FixedStrategy::Head,
            };
        });
        assert_eq!(
            e.history_layout(),
            HistoryLayout::MultiAgent {
                visibility: PeerVisibility::FinalOnly
            }
        );
        assert_eq!(e.fixed_slots(), vec![0]);
    }

    #[test]
    fn test_outcome_in_multiplicative_mode_reports_deltas() {
        let e = env(|c| {
            c.payoffs.high = 1.5;
            c.start_capital = 2.0;
        });
        let decisions = vec![
            Decision::Label("collective".into()),
            Decision::Label("collective".into()),
            Decision::Label("independent".into()),
        ];
        let capital = e.initial_capital().unwrap();
        let outcome = e.compute_outcome(0, &[], &decisions, Some(&capital));
        assert!(outcome.reward_is_delta);
        assert_eq!(outcome.cooperation_succeeded, Some(true));
        assert_eq!(outcome.rewards, vec![1.0, 1.0, 1.0]);
        assert_eq!(outcome.capital_after.unwrap().values(), &[3.0, 3.0, 3.0]);
    }
}
