//! End-of-run summary written alongside every simulation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EnvironmentConfig;
use crate::history::HistoryStore;
use crate::reward::CapitalState;

/// Everything a finished (or partially finished) run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub environment_name: String,
    pub num_agents: usize,
    /// Rounds actually executed.
    pub total_rounds: usize,
    pub agent_total_rewards: Vec<f64>,
    pub average_rewards: Vec<f64>,
    pub system_prompt: String,
    pub history: HistoryStore,
    pub config: EnvironmentConfig,
    /// SHA-256 of the serialized config.
    pub config_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_capital: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_capitals: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_wealth: Option<f64>,
    /// `"Round {i}: {outcome}"`, one per round, 1-based.
    pub round_outcome_lines: Vec<String>,
}

impl RunSummary {
    pub(crate) fn build(
        run_id: &str,
        config: &EnvironmentConfig,
        system_prompt: &str,
        history: &HistoryStore,
        capital: Option<&CapitalState>,
    ) -> Self {
        let totals = history.total_rewards().to_vec();
        let rounds = history.len();
        let average_rewards = totals
            .iter()
            .map(|total| if rounds == 0 { 0.0 } else { total / rounds as f64 })
            .collect();
        let start_capital = capital.and_then(|_| match &config.variant {
            crate::config::Variant::Cooperative(coop) => Some(coop.start_capital),
            crate::config::Variant::RuleCompliance(_) => None,
        });

        Self {
            run_id: run_id.to_string(),
            environment_name: config.name.clone(),
            num_agents: config.num_agents(),
            total_rounds: rounds,
            agent_total_rewards: totals,
            average_rewards,
            system_prompt: system_prompt.to_string(),
            history: history.clone(),
            config: config.clone(),
            config_digest: config.digest(),
            started_at: history.started_at(),
            finished_at: Utc::now(),
            start_capital,
            final_capitals: capital.map(|c| c.values().to_vec()),
            total_wealth: capital.map(CapitalState::total),
            round_outcome_lines: history
                .records()
                .iter()
                .map(|r| format!("Round {}: {}", r.round + 1, r.outcome))
                .collect(),
        }
    }

    /// Sum of every agent's cumulative reward.
    pub fn total_reward(&self) -> f64 {
        self.agent_total_rewards.iter().sum()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Human-readable digest of the run.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "Environment: {}\nAgents: {}\nRounds: {}\nTotal rewards: {}\nAverage rewards: {}\n",
            self.environment_name,
            self.num_agents,
            self.total_rounds,
            format_values(&self.agent_total_rewards),
            format_values(&self.average_rewards),
        );
        if let (Some(start), Some(finals), Some(wealth)) =
            (self.start_capital, &self.final_capitals, self.total_wealth)
        {
            out.push_str(&format!(
                "Start capital: {start:.2}\nFinal capitals: {}\nTotal wealth: {wealth:.4}\n",
                format_values(finals)
            ));
        }
        out.push('\n');
        for line in &self.round_outcome_lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

fn format_values(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
    format!("[{}]", parts.join(", "))
}
