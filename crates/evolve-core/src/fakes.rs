//! In-memory agents, factories, and gateways for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GatewayError, InferenceError};
use crate::gateway::{Agent, Completion, InferenceGateway};
use crate::message::{Conversation, Message, Role};
use crate::pool::AgentFactory;

type DelayFn = dyn Fn(&[Message]) -> Duration + Send + Sync;

/// Replies with the content of the last user message.
pub struct EchoAgent {
    delay: Option<Box<DelayFn>>,
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoAgent {
    pub fn new() -> Self {
        Self { delay: None }
    }

    /// Sleep for `delay(messages)` before answering.
    pub fn with_delay(
        mut self,
        delay: impl Fn(&[Message]) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn respond(&self, messages: &[Message]) -> Result<String, InferenceError> {
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(messages)).await;
        }
        Ok(messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct FixedAgent {
    response: String,
}

impl FixedAgent {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl Agent for FixedAgent {
    async fn respond(&self, _messages: &[Message]) -> Result<String, InferenceError> {
        Ok(self.response.clone())
    }
}

/// Cycles through a fixed list of responses.
#[derive(Debug)]
pub struct ScriptedAgent {
    responses: Vec<Completion>,
    next: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self::from_completions(responses.into_iter().map(|s| Ok(s.into())))
    }

    pub fn from_completions(responses: impl IntoIterator<Item = Completion>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn respond(&self, _messages: &[Message]) -> Result<String, InferenceError> {
        if self.responses.is_empty() {
            return Err(InferenceError::EmptyResponse);
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.responses[i % self.responses.len()].clone()
    }
}

/// Fails every request.
#[derive(Debug, Clone)]
pub struct FailingAgent {
    reason: String,
}

impl FailingAgent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    async fn respond(&self, _messages: &[Message]) -> Result<String, InferenceError> {
        Err(InferenceError::Backend(self.reason.clone()))
    }
}

/// Fails the first `failures` calls, then answers with `response`.
#[derive(Debug)]
pub struct FlakyAgent {
    failures: usize,
    response: String,
    calls: AtomicUsize,
}

impl FlakyAgent {
    pub fn new(failures: usize, response: impl Into<String>) -> Self {
        Self {
            failures,
            response: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    async fn respond(&self, _messages: &[Message]) -> Result<String, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(InferenceError::Unavailable(format!("transient failure {call}")))
        } else {
            Ok(self.response.clone())
        }
    }
}

/// Builds agents from a closure, recording the resource each build received.
pub struct FnFactory<F> {
    build: F,
    resources: Mutex<Vec<Option<String>>>,
}

impl<F> FnFactory<F>
where
    F: Fn(Option<&str>) -> Result<Arc<dyn Agent>, InferenceError> + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self {
            build,
            resources: Mutex::new(Vec::new()),
        }
    }

    /// Resources passed to every `build` call so far.
    pub fn resources(&self) -> Vec<Option<String>> {
        self.resources
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl<F> AgentFactory for FnFactory<F>
where
    F: Fn(Option<&str>) -> Result<Arc<dyn Agent>, InferenceError> + Send + Sync,
{
    fn build(&self, resource: Option<&str>) -> Result<Arc<dyn Agent>, InferenceError> {
        if let Ok(mut seen) = self.resources.lock() {
            seen.push(resource.map(str::to_string));
        }
        (self.build)(resource)
    }
}

/// Hands every worker the same shared agent.
pub struct SharedFactory {
    agent: Arc<dyn Agent>,
}

impl SharedFactory {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

impl AgentFactory for SharedFactory {
    fn build(&self, _resource: Option<&str>) -> Result<Arc<dyn Agent>, InferenceError> {
        Ok(Arc::clone(&self.agent))
    }
}

/// Replays one scripted batch per call, by position.
///
/// Each queued batch answers the call's requests in order; missing entries
/// and calls past the script yield [`InferenceError::EmptyResponse`].
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    batches: Mutex<VecDeque<Vec<Completion>>>,
    seen: Mutex<Vec<Conversation>>,
}

impl ScriptedGateway {
    pub fn new<S: Into<String>>(batches: impl IntoIterator<Item = Vec<S>>) -> Self {
        Self::from_completions(
            batches
                .into_iter()
                .map(|batch| batch.into_iter().map(|s| Ok(s.into())).collect()),
        )
    }

    pub fn from_completions(batches: impl IntoIterator<Item = Vec<Completion>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every conversation received so far, in arrival order.
    pub fn requests(&self) -> Vec<Conversation> {
        self.seen
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn predict_batch(&self, batch: Vec<Conversation>) -> Result<Vec<Completion>, GatewayError> {
        let mut script = self
            .batches
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_default()
            .into_iter();
        let out = batch
            .iter()
            .map(|_| script.next().unwrap_or(Err(InferenceError::EmptyResponse)))
            .collect();
        if let Ok(mut seen) = self.seen.lock() {
            seen.extend(batch);
        }
        Ok(out)
    }
}

/// Rejects every batch with the given error.
#[derive(Debug, Clone)]
pub struct RejectingGateway {
    error: GatewayError,
}

impl RejectingGateway {
    pub fn new(error: GatewayError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl InferenceGateway for RejectingGateway {
    async fn predict_batch(&self, _batch: Vec<Conversation>) -> Result<Vec<Completion>, GatewayError> {
        Err(self.error.clone())
    }
}
