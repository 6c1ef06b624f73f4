//! Run settings loaded from TOML, with command-line overrides applied on top.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use evolve_core::fakes::{ScriptedAgent, SharedFactory};
use evolve_core::report::RewardSet;
use evolve_core::{
    visible_devices, AgentFactory, HttpAgentFactory, HttpBackendConfig, PeerVisibility,
    PoolConfig, RetryPolicy, SupervisionPattern,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub dataset_path: PathBuf,
    pub results_dir: PathBuf,
    pub max_rounds: usize,
    pub history_window: Option<usize>,
    pub supervision_pattern: SupervisionPattern,
    pub peer_visibility: PeerVisibility,
    pub num_agents: usize,
    pub thresholds_abs: Vec<usize>,
    pub reward_sets: Vec<[f64; 3]>,
    pub backend: BackendSettings,
    pub pool: PoolSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("data/dataset.json"),
            results_dir: PathBuf::from("results"),
            max_rounds: 6,
            history_window: None,
            supervision_pattern: SupervisionPattern::AllUnsupervised,
            peer_visibility: PeerVisibility::Full,
            num_agents: 5,
            thresholds_abs: vec![2, 3, 4],
            reward_sets: vec![[1.5, 0.9, 0.5]],
            backend: BackendSettings::default(),
            pool: PoolSettings::default(),
        }
    }
}

/// Which agent backend the workers build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSettings {
    Http {
        endpoint: String,
        model: String,
        /// Environment variable holding the bearer token.
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Offline runs: every agent cycles through `responses`.
    Scripted { responses: Vec<String> },
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings::Http {
            endpoint: "http://localhost:8000/v1".to_string(),
            model: "default".to_string(),
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendSettings {
    pub fn factory(&self) -> Result<Arc<dyn AgentFactory>> {
        match self {
            BackendSettings::Http {
                endpoint,
                model,
                api_key_env,
                temperature,
                max_tokens,
                timeout_secs,
            } => {
                let api_key = match api_key_env {
                    Some(var) => Some(
                        std::env::var(var).with_context(|| format!("read api key from ${var}"))?,
                    ),
                    None => None,
                };
                let config = HttpBackendConfig {
                    endpoint: endpoint.clone(),
                    model: model.clone(),
                    api_key,
                    temperature: *temperature,
                    max_tokens: *max_tokens,
                    timeout_secs: *timeout_secs,
                };
                Ok(Arc::new(HttpAgentFactory::new(config)))
            }
            BackendSettings::Scripted { responses } => {
                if responses.is_empty() {
                    bail!("scripted backend needs at least one response");
                }
                let agent = ScriptedAgent::new(responses.clone());
                Ok(Arc::new(SharedFactory::new(Arc::new(agent))))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Defaults to one worker per agent.
    pub num_workers: Option<usize>,
    /// Defaults to `CUDA_VISIBLE_DEVICES`.
    pub resources: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl PoolSettings {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts.unwrap_or(1),
            Duration::from_millis(self.retry_backoff_ms.unwrap_or(0)),
        )
    }

    pub fn pool_config(&self, default_workers: usize) -> PoolConfig {
        let resources = self.resources.clone().unwrap_or_else(visible_devices);
        let mut config = PoolConfig::new(self.num_workers.unwrap_or(default_workers).max(1))
            .with_resources(resources)
            .with_retry(self.retry());
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}

impl RunSettings {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse settings {}", path.display()))
    }

    pub fn reward_sets(&self) -> Vec<RewardSet> {
        self.reward_sets
            .iter()
            .map(|&[high, normal, low]| RewardSet { high, normal, low })
            .collect()
    }
}
