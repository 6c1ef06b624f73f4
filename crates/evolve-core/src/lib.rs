//! Evolve Core Library
//!
//! Round-based simulation of repeated-interaction games played by language
//! model agents: environments, reward rules, history, and the batched
//! inference path that feeds them.

pub mod backend;
pub mod choice;
pub mod config;
pub mod dataset;
pub mod environment;
pub mod error;
pub mod fakes;
pub mod gateway;
pub mod history;
pub mod message;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod reward;
pub mod summary;
pub mod telemetry;

pub use backend::{HttpAgentFactory, HttpBackendConfig, HttpChatAgent};
pub use choice::{canonical_response, extract_choice, ChoiceLabels, Decision};
pub use config::{
    CooperativeConfig, EnvironmentConfig, FixedCooperators, FixedStrategy, RuleComplianceConfig,
    Variant,
};
pub use dataset::{
    cooperative_config, load_items, rule_compliance_config, ConfigOverrides, DatasetItem,
};
pub use environment::{Environment, Outcome};
pub use error::{ConfigError, DatasetError, EngineError, GatewayError, InferenceError, Result};
pub use gateway::{Agent, AgentGateway, Completion, InferenceGateway, RetryPolicy};
pub use history::{HistoryLayout, HistoryStore, PeerVisibility, RoundRecord, Transcript};
pub use message::{Conversation, Message, Role};
pub use orchestrator::{Orchestrator, RunState};
pub use pool::{visible_devices, AgentFactory, PoolConfig, WorkerPool};
pub use report::{CellReport, RewardSet, SingleReport, SweepCell, SweepGrid};
pub use reward::{
    supervision_for_round, CapitalState, CooperationThreshold, RewardMode, Supervision,
    SupervisionPattern, TierPayoffs,
};
pub use summary::RunSummary;

pub use metrics::METRICS;
pub use obs::{emit_run_finished, emit_run_started, run_span};
pub use telemetry::{init_tracing, LOG_ENV};

/// Evolve version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
