//! Error taxonomy for the simulation engine.
//!
//! Only [`ConfigError`] ever reaches a caller of a run: inference failures are
//! folded into error-marker responses and unparseable decisions are ordinary
//! [`crate::choice::Decision`] values.

use std::time::Duration;

/// Invalid environment configuration, detected before any round executes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing choice label: {0}")]
    MissingLabel(&'static str),

    #[error("choice labels must differ, both are '{0}'")]
    DuplicateLabels(String),

    #[error("max_rounds must be at least 1")]
    NoRounds,

    #[error("environment must contain at least one agent")]
    NoAgents,

    #[error("cooperation threshold fraction {0} must lie in (0, 1]")]
    ThresholdFraction(f64),

    #[error("cooperation threshold of {count} agents is invalid for n = {n}")]
    ThresholdCount { count: usize, n: usize },

    #[error("{fixed} fixed cooperators exceed the {n} agents in the environment")]
    TooManyFixedCooperators { fixed: usize, n: usize },

    #[error("payoff '{name}' must be finite, got {value}")]
    NonFinitePayoff { name: &'static str, value: f64 },

    #[error("start capital must be positive for compounding rewards, got {0}")]
    StartCapital(f64),
}

/// A single inference request failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        InferenceError::Http(err.to_string())
    }
}

/// A whole batch could not be served.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("worker pool is closed; no new batches are accepted")]
    Closed,

    #[error("all workers exited with {outstanding} request(s) still outstanding")]
    WorkersLost { outstanding: usize },

    #[error("worker pool must have at least one worker")]
    NoWorkers,
}

/// Dataset loading and mapping failures.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("dataset must be a non-empty list of items")]
    Empty,

    #[error("invalid dataset json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset item produced an invalid environment: {0}")]
    Config(#[from] ConfigError),
}

/// Engine-level errors surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("run already complete after {rounds} round(s)")]
    RunComplete { rounds: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
