//! The round loop.
//!
//! An [`Orchestrator`] owns one environment, its history, and the capital
//! state. Each round it builds one conversation per decision-making agent,
//! hands the whole batch to an [`InferenceGateway`], and commits exactly one
//! [`RoundRecord`]. Inference failures never abort a run: they become
//! `"Error: ..."` responses that extract as unparseable.

use tracing::{debug, info, instrument, Instrument};
use uuid::Uuid;

use crate::choice::{canonical_response, extract_choice, Decision};
use crate::config::EnvironmentConfig;
use crate::environment::{self, Environment};
use crate::error::{ConfigError, EngineError, InferenceError, Result};
use crate::gateway::{error_marker, Completion, InferenceGateway};
use crate::history::{HistoryLayout, HistoryStore, RoundRecord};
use crate::message::{Conversation, Message};
use crate::metrics::METRICS;
use crate::obs;
use crate::reward::CapitalState;
use crate::summary::RunSummary;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    /// `round` is the next round to execute.
    Running { round: usize },
    Complete,
}

pub struct Orchestrator {
    env: Box<dyn Environment>,
    history: HistoryStore,
    capital: Option<CapitalState>,
    state: RunState,
    run_id: String,
    system_prompt: String,
}

impl Orchestrator {
    /// Validate `config` and prepare a run. No round executes here.
    pub fn new(config: EnvironmentConfig) -> std::result::Result<Self, ConfigError> {
        let env = environment::build(config)?;
        let history = match env.history_layout() {
            HistoryLayout::SingleAgent => HistoryStore::single_agent(),
            HistoryLayout::MultiAgent { visibility } => {
                HistoryStore::multi_agent(env.agent_count(), visibility)
            }
        };
        let capital = env.initial_capital();
        let system_prompt = env.render_system_prompt();
        Ok(Self {
            env,
            history,
            capital,
            state: RunState::NotStarted,
            run_id: Uuid::new_v4().to_string(),
            system_prompt,
        })
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &EnvironmentConfig {
        self.env.config()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn capital(&self) -> Option<&CapitalState> {
        self.capital.as_ref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Execute the next round and commit its record.
    ///
    /// # Errors
    ///
    /// `EngineError::RunComplete` once `max_rounds` records exist.
    #[instrument(skip_all, fields(run_id = %self.run_id, round = self.history.len()))]
    pub async fn run_round(&mut self, gateway: &dyn InferenceGateway) -> Result<RoundRecord> {
        let max_rounds = self.env.config().max_rounds;
        let round = self.history.len();
        if round >= max_rounds {
            self.state = RunState::Complete;
            return Err(EngineError::RunComplete { rounds: round });
        }
        self.state = RunState::Running { round };

        let n = self.env.agent_count();
        let question = self.env.generate_question(round);
        let fixed = self.env.fixed_slots();
        let predicted: Vec<usize> = (0..n).filter(|slot| !fixed.contains(slot)).collect();

        let batch: Vec<Conversation> = predicted
            .iter()
            .map(|&agent| self.conversation(agent, &question))
            .collect();
        let completions = dispatch(gateway, round, batch).await;

        let mut responses = vec![String::new(); n];
        for &slot in &fixed {
            responses[slot] = canonical_response(self.env.fixed_label());
        }
        let mut failures = 0u64;
        for (&agent, completion) in predicted.iter().zip(completions) {
            responses[agent] = match completion {
                Ok(text) => text,
                Err(err) => {
                    failures += 1;
                    obs::emit_inference_failed(round, agent, &err);
                    error_marker(&err)
                }
            };
        }

        let labels = self.env.labels();
        let decisions: Vec<Decision> = responses
            .iter()
            .map(|response| extract_choice(response, labels))
            .collect();
        let unparseable = decisions.iter().filter(|d| d.is_unparseable()).count();

        let outcome =
            self.env
                .compute_outcome(round, &responses, &decisions, self.capital.as_ref());
        let capital_before = self.capital.as_ref().map(|c| c.values().to_vec());
        if let Some(after) = &outcome.capital_after {
            self.capital = Some(after.clone());
        }
        let multi = matches!(self.history.layout(), HistoryLayout::MultiAgent { .. });

        let record = RoundRecord {
            round,
            question,
            responses,
            decisions,
            rewards: outcome.rewards,
            outcome: outcome.explanation,
            timestamp: self.history.next_timestamp(),
            reward_is_delta: outcome.reward_is_delta,
            supervision: outcome.supervision,
            cooperation_succeeded: outcome.cooperation_succeeded,
            capital_before,
            capital_after: outcome.capital_after.map(|c| c.values().to_vec()),
            fixed_indices: if multi { fixed } else { Vec::new() },
            predicted_indices: if multi { predicted } else { Vec::new() },
        };
        self.history.append(record.clone());

        METRICS.inc_rounds();
        METRICS.add_inference_failures(failures);
        METRICS.add_unparseable(unparseable as u64);
        obs::emit_round_completed(round, &record.outcome, unparseable);

        self.state = if self.history.len() >= max_rounds {
            RunState::Complete
        } else {
            RunState::Running {
                round: self.history.len(),
            }
        };
        Ok(record)
    }

    /// Execute every remaining round and summarize the run.
    pub async fn run(&mut self, gateway: &dyn InferenceGateway) -> Result<RunSummary> {
        let span = obs::run_span(&self.run_id, &self.env.config().name);
        self.run_to_completion(gateway).instrument(span).await
    }

    async fn run_to_completion(&mut self, gateway: &dyn InferenceGateway) -> Result<RunSummary> {
        let config = self.env.config();
        if self.state == RunState::NotStarted {
            obs::emit_run_started(
                &self.run_id,
                &config.name,
                self.env.agent_count(),
                config.max_rounds,
            );
        }
        while self.state != RunState::Complete {
            match self.run_round(gateway).await {
                Ok(_) => {}
                Err(EngineError::RunComplete { .. }) => break,
                Err(err) => return Err(err),
            }
        }

        let summary = self.summary();
        obs::emit_run_finished(
            &self.run_id,
            summary.total_rounds,
            summary.duration_ms(),
            summary.total_reward(),
        );
        METRICS.flush();
        info!(
            environment = %summary.environment_name,
            rounds = summary.total_rounds,
            "run complete"
        );
        Ok(summary)
    }

    /// Summary of everything committed so far.
    pub fn summary(&self) -> RunSummary {
        RunSummary::build(
            &self.run_id,
            self.env.config(),
            &self.system_prompt,
            &self.history,
            self.capital.as_ref(),
        )
    }

    fn conversation(&self, agent: usize, question: &str) -> Conversation {
        let past = self.history.view(agent, self.env.config().history_window);
        let mut messages = Vec::with_capacity(past.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(past);
        messages.push(Message::user(question));
        messages
    }
}

/// One gateway call per round; any shortfall is filled with errors so the
/// result always lines up with `batch`.
async fn dispatch(
    gateway: &dyn InferenceGateway,
    round: usize,
    batch: Vec<Conversation>,
) -> Vec<Completion> {
    let expected = batch.len();
    if expected == 0 {
        return Vec::new();
    }
    debug!(round, requests = expected, "dispatching batch");
    match gateway.predict_batch(batch).await {
        Ok(results) if results.len() == expected => results,
        Ok(mut results) => {
            let got = results.len();
            let err = InferenceError::Backend(format!(
                "gateway returned {got} result(s) for {expected} request(s)"
            ));
            obs::emit_batch_failed(round, expected, &err);
            results.truncate(expected);
            results.resize_with(expected, || Err(err.clone()));
            results
        }
        Err(err) => {
            obs::emit_batch_failed(round, expected, &err);
            let err = InferenceError::Unavailable(err.to_string());
            vec![Err(err); expected]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::choice::ChoiceLabels;
    use crate::config::{
        CooperativeConfig, FixedCooperators, FixedStrategy, RuleComplianceConfig, Variant,
    };
    use crate::error::GatewayError;
    use crate::fakes::{FixedAgent, RejectingGateway, ScriptedGateway};
    use crate::gateway::AgentGateway;
    use crate::message::Role;
    use crate::reward::{RewardMode, SupervisionPattern};

    fn single(rounds: usize) -> EnvironmentConfig {
        let mut rc = RuleComplianceConfig::new(ChoiceLabels::new("A", "B"));
        rc.supervision_pattern = SupervisionPattern::Alternating;
        EnvironmentConfig::new("bakery", rounds, Variant::RuleCompliance(rc))
    }

    fn coop(n: usize, f: impl FnOnce(&mut CooperativeConfig)) -> EnvironmentConfig {
        let mut rules = CooperativeConfig::new(n, ChoiceLabels::new("c", "i"));
        f(&mut rules);
        EnvironmentConfig::new("coop", 2, Variant::Cooperative(rules))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Orchestrator::new(single(0)).err();
        assert_eq!(err, Some(ConfigError::NoRounds));
    }

    #[tokio::test]
    async fn test_state_machine_and_round_limit() {
        let mut orch = Orchestrator::new(single(2)).unwrap();
        let gateway = AgentGateway::new(Arc::new(FixedAgent::new(r#"{"choice": "B"}"#)));
        assert_eq!(orch.state(), RunState::NotStarted);

        let first = orch.run_round(&gateway).await.unwrap();
        assert_eq!(first.rewards, vec![0.0]);
        assert_eq!(orch.state(), RunState::Running { round: 1 });

        let second = orch.run_round(&gateway).await.unwrap();
        assert_eq!(second.rewards, vec![2500.0]);
        assert_eq!(orch.state(), RunState::Complete);

        let err = orch.run_round(&gateway).await.unwrap_err();
        assert!(matches!(err, EngineError::RunComplete { rounds: 2 }));
        assert_eq!(orch.history().len(), 2);
    }

    #[tokio::test]
    async fn test_conversation_carries_windowed_history() {
        let mut config = single(3);
        config.history_window = Some(1);
        let mut orch = Orchestrator::new(config).unwrap();
        let gateway = ScriptedGateway::new(vec![vec!["{\"choice\": \"A\"}"]; 3]);
        orch.run(&gateway).await.unwrap();

        let requests = gateway.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].len(), 2);
        // system + one windowed round (question, answer, feedback) + question
        assert_eq!(requests[2].len(), 5);
        assert_eq!(requests[2][0].role, Role::System);
        assert_eq!(requests[2].last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_batch_rejection_becomes_error_markers() {
        let mut orch = Orchestrator::new(coop(3, |_| {})).unwrap();
        let gateway = RejectingGateway::new(GatewayError::Closed);
        let summary = orch.run(&gateway).await.unwrap();
        assert_eq!(summary.total_rounds, 2);
        let record = &orch.history().records()[0];
        assert!(record.responses.iter().all(|r| r.starts_with("Error: ")));
        assert!(record.decisions.iter().all(Decision::is_unparseable));
        assert_eq!(record.cooperation_succeeded, Some(false));
    }

    struct ShortGateway;

    #[async_trait::async_trait]
    impl InferenceGateway for ShortGateway {
        async fn predict_batch(
            &self,
            _batch: Vec<Conversation>,
        ) -> std::result::Result<Vec<Completion>, GatewayError> {
            Ok(vec![Ok(r#"{"choice": "c"}"#.to_string())])
        }
    }

    #[tokio::test]
    async fn test_short_batch_is_padded() {
        let mut orch = Orchestrator::new(coop(3, |c| c.reward_mode = RewardMode::Additive)).unwrap();
        let record = orch.run_round(&ShortGateway).await.unwrap();
        assert_eq!(record.decisions[0], Decision::Label("c".into()));
        assert!(record.responses[1].starts_with("Error: backend error: gateway returned 1 result(s)"));
        assert!(record.decisions[2].is_unparseable());
        assert!(record.capital_before.is_none());
    }

    #[tokio::test]
    async fn test_fixed_slots_skip_the_gateway() {
        let config = coop(3, |c| {
            c.fixed_cooperators = FixedCooperators {
                count: 2,
                strategy: FixedStrategy::Head,
            }
        });
        let mut orch = Orchestrator::new(config).unwrap();
        let gateway = ScriptedGateway::new(vec![vec![r#"{"choice": "i"}"#]; 2]);
        let record = orch.run_round(&gateway).await.unwrap();

        assert_eq!(gateway.requests().len(), 1);
        assert_eq!(record.fixed_indices, vec![0, 1]);
        assert_eq!(record.predicted_indices, vec![2]);
        assert_eq!(record.responses[0], r#"{"choice": "c"}"#);
        assert_eq!(record.cooperation_succeeded, Some(true));
    }

    #[tokio::test]
    async fn test_capital_carries_between_rounds() {
        let config = coop(2, |c| c.payoffs.high = 2.0);
        let mut orch = Orchestrator::new(config).unwrap();
        let gateway = ScriptedGateway::new(vec![vec![r#"{"choice": "c"}"#; 2]; 2]);
        let summary = orch.run(&gateway).await.unwrap();

        let records = orch.history().records();
        assert_eq!(records[1].capital_before, Some(vec![2.0, 2.0]));
        assert_eq!(records[1].rewards, vec![2.0, 2.0]);
        assert_eq!(summary.final_capitals, Some(vec![4.0, 4.0]));
        assert_eq!(summary.total_wealth, Some(8.0));
        assert_eq!(summary.start_capital, Some(1.0));
    }
}
