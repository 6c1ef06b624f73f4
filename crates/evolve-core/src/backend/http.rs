//! OpenAI-compatible chat completion client.
//!
//! `POST {endpoint}/chat/completions` with the conversation as `messages`;
//! the first choice's message content is the agent's response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InferenceError;
use crate::gateway::Agent;
use crate::message::Message;
use crate::pool::AgentFactory;

/// Placeholder in an endpoint template replaced by the worker's resource id.
pub const RESOURCE_PLACEHOLDER: &str = "{resource}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL, for example `http://localhost:8000/v1`. May contain
    /// `{resource}`.
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
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

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Endpoint with `{resource}` substituted; unbound workers get `"0"`.
    pub fn endpoint_for(&self, resource: Option<&str>) -> String {
        self.endpoint
            .replace(RESOURCE_PLACEHOLDER, resource.unwrap_or("0"))
    }

    fn completions_url(endpoint: &str) -> String {
        format!("{}/chat/completions", endpoint.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String, InferenceError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(InferenceError::EmptyResponse)
    }
}

/// Chat agent talking to one endpoint.
pub struct HttpChatAgent {
    client: reqwest::Client,
    url: String,
    config: HttpBackendConfig,
}

impl HttpChatAgent {
    pub fn new(config: HttpBackendConfig) -> Result<Self, InferenceError> {
        Self::bound(config, None)
    }

    fn bound(config: HttpBackendConfig, resource: Option<&str>) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("evolve/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = HttpBackendConfig::completions_url(&config.endpoint_for(resource));
        Ok(Self {
            client,
            url,
            config,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Agent for HttpChatAgent {
    async fn respond(&self, messages: &[Message]) -> Result<String, InferenceError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        debug!(url = %self.url, messages = messages.len(), "chat completion request");

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InferenceError::Backend(format!(
                "{status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }
        response.json::<ChatResponse>().await?.into_text()
    }
}

/// Builds one [`HttpChatAgent`] per worker, pinned to its resource.
#[derive(Debug, Clone)]
pub struct HttpAgentFactory {
    config: HttpBackendConfig,
}

impl HttpAgentFactory {
    pub fn new(config: HttpBackendConfig) -> Self {
        Self { config }
    }
}

impl AgentFactory for HttpAgentFactory {
    fn build(&self, resource: Option<&str>) -> Result<Arc<dyn Agent>, InferenceError> {
        let agent = HttpChatAgent::bound(self.config.clone(), resource)?;
        Ok(Arc::new(agent))
    }
}
