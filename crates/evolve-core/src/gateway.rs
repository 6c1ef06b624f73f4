//! Inference boundary: agents answer conversations, gateways answer batches.
//!
//! The orchestrator only ever sees an [`InferenceGateway`]. [`AgentGateway`]
//! serves a batch with one in-process agent; [`crate::pool::WorkerPool`]
//! spreads it across long-lived workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{GatewayError, InferenceError};
use crate::message::{Conversation, Message};
use crate::metrics::METRICS;

/// Outcome of one request within a batch.
pub type Completion = Result<String, InferenceError>;

/// A backend that turns a conversation into the next assistant turn.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn respond(&self, messages: &[Message]) -> Result<String, InferenceError>;
}

#[async_trait]
impl<A: Agent + ?Sized> Agent for Arc<A> {
    async fn respond(&self, messages: &[Message]) -> Result<String, InferenceError> {
        (**self).respond(messages).await
    }
}

#[async_trait]
impl<A: Agent + ?Sized> Agent for Box<A> {
    async fn respond(&self, messages: &[Message]) -> Result<String, InferenceError> {
        (**self).respond(messages).await
    }
}

/// Batched inference with results aligned to the request order.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Answer every conversation. On `Ok`, the output has the same length
    /// and order as `batch`.
    async fn predict_batch(&self, batch: Vec<Conversation>) -> Result<Vec<Completion>, GatewayError>;
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Ask `agent` once per attempt, honouring `retry` and an optional
/// per-attempt `timeout`.
pub async fn respond_with_policy(
    agent: &dyn Agent,
    messages: &[Message],
    retry: RetryPolicy,
    timeout: Option<Duration>,
) -> Completion {
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, agent.respond(messages)).await {
                Ok(inner) => inner,
                Err(_) => Err(InferenceError::Timeout(limit)),
            },
            None => agent.respond(messages).await,
        };
        match result {
            Ok(text) => return Ok(text),
            Err(err) if attempt < attempts => {
                warn!(attempt, max_attempts = attempts, error = %err, "inference attempt failed, retrying");
                METRICS.inc_retries();
                if !retry.backoff.is_zero() {
                    tokio::time::sleep(retry.backoff).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// The response text the engine records for a failed request.
pub fn error_marker(err: &dyn std::fmt::Display) -> String {
    format!("Error: {err}")
}

/// Serves batches sequentially with a single shared agent.
pub struct AgentGateway {
    agent: Arc<dyn Agent>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl AgentGateway {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            retry: RetryPolicy::none(),
            timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl InferenceGateway for AgentGateway {
    async fn predict_batch(&self, batch: Vec<Conversation>) -> Result<Vec<Completion>, GatewayError> {
        debug!(requests = batch.len(), "agent gateway batch");
        let mut out = Vec::with_capacity(batch.len());
        for messages in &batch {
            out.push(respond_with_policy(self.agent.as_ref(), messages, self.retry, self.timeout).await);
        }
        Ok(out)
    }
}
