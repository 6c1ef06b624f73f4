//! Structured lifecycle events for simulation runs.
//!
//! [`run_span`] scopes every event of a run under one span; the `emit_*`
//! functions log the milestones at `info!` (failures at `warn!`).

use tracing::{info, warn};

/// The run-scoped span. The orchestrator instruments each run's future
/// with it, so events from every round carry `run_id`.
pub fn run_span(run_id: &str, environment: &str) -> tracing::Span {
    tracing::info_span!("evolve.run", run_id = %run_id, environment = %environment)
}

/// Run validated and about to play its first round.
pub fn emit_run_started(run_id: &str, environment: &str, num_agents: usize, max_rounds: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        environment = %environment,
        num_agents = num_agents,
        max_rounds = max_rounds,
    );
}

/// One round committed to history, with its outcome text.
pub fn emit_round_completed(round: usize, outcome: &str, unparseable: usize) {
    info!(
        event = "round.completed",
        round = round,
        unparseable = unparseable,
        outcome = %outcome,
    );
}

/// One request of a batch failed and was replaced by an error marker.
pub fn emit_inference_failed(round: usize, agent: usize, error: &dyn std::fmt::Display) {
    warn!(event = "inference.failed", round = round, agent = agent, error = %error);
}

/// The gateway could not serve a batch at all.
pub fn emit_batch_failed(round: usize, requests: usize, error: &dyn std::fmt::Display) {
    warn!(event = "batch.failed", round = round, requests = requests, error = %error);
}

/// All rounds played; `total_reward` sums every agent's rewards.
pub fn emit_run_finished(run_id: &str, rounds: usize, duration_ms: u64, total_reward: f64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        rounds = rounds,
        duration_ms = duration_ms,
        total_reward = total_reward,
    );
}
