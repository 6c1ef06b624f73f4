//! Fixed pool of long-lived inference workers.
//!
//! Each worker is bound to one resource id (round-robin over the configured
//! list), builds its own agent once through an [`AgentFactory`], and then
//! serves a shared job queue until it receives a [`Job::Shutdown`] sentinel.
//! [`WorkerPool::predict_batch`] tags every request with a unique id, drains
//! exactly as many results as it submitted, and reorders them by id.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{GatewayError, InferenceError};
use crate::gateway::{respond_with_policy, Agent, Completion, InferenceGateway, RetryPolicy};
use crate::message::Conversation;
use crate::metrics::METRICS;

/// Builds one agent per worker. Called once by each worker at start-up.
pub trait AgentFactory: Send + Sync {
    fn build(&self, resource: Option<&str>) -> Result<Arc<dyn Agent>, InferenceError>;
}

/// Resource ids listed in `CUDA_VISIBLE_DEVICES`, or none when unset.
pub fn visible_devices() -> Vec<String> {
    std::env::var("CUDA_VISIBLE_DEVICES")
        .map(|value| parse_resource_list(&value))
        .unwrap_or_default()
}

/// Split a comma-separated resource list, dropping blanks.
pub fn parse_resource_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub num_workers: usize,
    /// Worker `i` binds `resources[i % len]`; empty leaves workers unbound.
    pub resources: Vec<String>,
    /// Per-attempt limit; on expiry the request resolves to a timeout error.
    pub request_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl PoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            resources: Vec::new(),
            request_timeout: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resource bound by each worker, in worker order.
    pub fn bindings(&self) -> Vec<Option<String>> {
        (0..self.num_workers)
            .map(|i| {
                if self.resources.is_empty() {
                    None
                } else {
                    Some(self.resources[i % self.resources.len()].clone())
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkRequest {
    pub id: u64,
    pub messages: Conversation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkResult {
    pub id: u64,
    pub worker: usize,
    pub completion: Completion,
}

/// Queue entry: a request, or the sentinel that stops one worker.
#[derive(Debug)]
pub enum Job {
    Work(WorkRequest),
    Shutdown,
}

pub struct WorkerPool {
    jobs: mpsc::UnboundedSender<Job>,
    /// Held for the whole drain, which serializes batches.
    results: Mutex<mpsc::UnboundedReceiver<WorkResult>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    bindings: Vec<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Spawn `config.num_workers` workers on the current tokio runtime.
    pub fn start(factory: Arc<dyn AgentFactory>, config: PoolConfig) -> Result<Self, GatewayError> {
        if config.num_workers == 0 {
            return Err(GatewayError::NoWorkers);
        }
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(jobs_rx));
        let bindings = config.bindings();

        let workers = bindings
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, resource)| {
                let worker = Worker {
                    index,
                    resource,
                    queue: Arc::clone(&queue),
                    results: results_tx.clone(),
                    retry: config.retry,
                    timeout: config.request_timeout,
                };
                tokio::spawn(worker.run(Arc::clone(&factory)))
            })
            .collect();

        info!(
            workers = config.num_workers,
            resources = ?config.resources,
            "worker pool started"
        );

        Ok(Self {
            jobs: jobs_tx,
            results: Mutex::new(results_rx),
            workers: std::sync::Mutex::new(workers),
            bindings,
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.bindings.len()
    }

    pub fn bindings(&self) -> &[Option<String>] {
        &self.bindings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting batches, send one sentinel per worker, and join them.
    ///
    /// Requests already queued are served before the sentinels. Calling
    /// `close` again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.bindings.len() {
            if self.jobs.send(Job::Shutdown).is_err() {
                break;
            }
        }
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        info!(workers = self.bindings.len(), "worker pool closed");
    }
}

#[async_trait]
impl InferenceGateway for WorkerPool {
    #[instrument(skip_all, fields(requests = batch.len()))]
    async fn predict_batch(&self, batch: Vec<Conversation>) -> Result<Vec<Completion>, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = self.results.lock().await;
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }

        let n = batch.len();
        let first = self.next_id.fetch_add(n as u64, Ordering::SeqCst);
        for (offset, messages) in batch.into_iter().enumerate() {
            let request = WorkRequest {
                id: first + offset as u64,
                messages,
            };
            if self.jobs.send(Job::Work(request)).is_err() {
                return Err(GatewayError::WorkersLost { outstanding: n });
            }
        }
        METRICS.inc_batches();

        let mut slots: Vec<Option<Completion>> = (0..n).map(|_| None).collect();
        let mut received = 0;
        while received < n {
            let Some(result) = results.recv().await else {
                return Err(GatewayError::WorkersLost {
                    outstanding: n - received,
                });
            };
            let Some(slot) = result
                .id
                .checked_sub(first)
                .and_then(|offset| slots.get_mut(offset as usize))
            else {
                debug!(id = result.id, "discarding result from an abandoned batch");
                continue;
            };
            if slot.is_none() {
                received += 1;
            }
            *slot = Some(result.completion);
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(InferenceError::EmptyResponse)))
            .collect())
    }
}

struct Worker {
    index: usize,
    resource: Option<String>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    results: mpsc::UnboundedSender<WorkResult>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl Worker {
    async fn run(self, factory: Arc<dyn AgentFactory>) {
        let agent = std::panic::catch_unwind(AssertUnwindSafe(|| {
            factory.build(self.resource.as_deref())
        }))
        .unwrap_or_else(|payload| Err(panicked("agent factory", payload)));
        match &agent {
            Ok(_) => debug!(worker = self.index, resource = ?self.resource, "worker ready"),
            Err(err) => warn!(
                worker = self.index,
                resource = ?self.resource,
                error = %err,
                "worker failed to build its agent; every request it takes will fail"
            ),
        }

        loop {
            let job = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            let request = match job {
                Some(Job::Work(request)) => request,
                Some(Job::Shutdown) | None => break,
            };
            let completion = match &agent {
                Ok(agent) => AssertUnwindSafe(respond_with_policy(
                    agent.as_ref(),
                    &request.messages,
                    self.retry,
                    self.timeout,
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let err = panicked("agent", payload);
                    warn!(worker = self.index, id = request.id, error = %err, "agent panicked");
                    Err(err)
                }),
                Err(err) => Err(err.clone()),
            };
            let result = WorkResult {
                id: request.id,
                worker: self.index,
                completion,
            };
            if self.results.send(result).is_err() {
                break;
            }
        }
        debug!(worker = self.index, "worker stopped");
    }
}

/// A panic inside a worker, reported as that request's error.
fn panicked(what: &str, payload: Box<dyn Any + Send>) -> InferenceError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    InferenceError::Backend(format!("{what} panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{EchoAgent, FnFactory, SharedFactory};
    use crate::message::Message;

    fn numbered(count: usize) -> Vec<Conversation> {
        (0..count)
            .map(|i| vec![Message::system("sys"), Message::user(i.to_string())])
            .collect()
    }

    /// Delay each request by a permutation of `delays_ms` keyed by its content.
    fn delayed_echo(delays_ms: Vec<u64>) -> Arc<dyn AgentFactory> {
        let agent = EchoAgent::new().with_delay(move |messages| {
            let i: usize = messages
                .last()
                .and_then(|m| m.content.parse().ok())
                .unwrap_or(0);
            Duration::from_millis(delays_ms[i % delays_ms.len()])
        });
        Arc::new(SharedFactory::new(Arc::new(agent)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_order_survives_shuffled_delays() {
        let base = [50u64, 10, 40, 20, 30, 0, 60, 5];
        for rotation in 0..base.len() {
            let mut delays = base.to_vec();
            delays.rotate_left(rotation);
            let pool = WorkerPool::start(delayed_echo(delays), PoolConfig::new(4)).unwrap();

            let out = pool.predict_batch(numbered(8)).await.unwrap();
            let texts: Vec<String> = out.into_iter().map(Result::unwrap).collect();
            let expected: Vec<String> = (0..8).map(|i| i.to_string()).collect();
            assert_eq!(texts, expected, "rotation {rotation}");
            pool.close().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_batches_use_fresh_ids() {
        let pool = WorkerPool::start(delayed_echo(vec![3, 1, 2]), PoolConfig::new(2)).unwrap();
        for _ in 0..3 {
            let out = pool.predict_batch(numbered(5)).await.unwrap();
            assert_eq!(out.len(), 5);
            assert_eq!(out[4].as_deref(), Ok("4"));
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty() {
        let pool = WorkerPool::start(delayed_echo(vec![0]), PoolConfig::new(1)).unwrap();
        assert!(pool.predict_batch(Vec::new()).await.unwrap().is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_predict_after_close_fails() {
        let pool = WorkerPool::start(delayed_echo(vec![0]), PoolConfig::new(3)).unwrap();
        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(
            pool.predict_batch(numbered(2)).await,
            Err(GatewayError::Closed)
        );
        // Closing twice is harmless.
        pool.close().await;
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let result = WorkerPool::start(delayed_echo(vec![0]), PoolConfig::new(0));
        assert!(matches!(result, Err(GatewayError::NoWorkers)));
    }

    #[tokio::test]
    async fn test_resources_assigned_round_robin() {
        let factory = Arc::new(FnFactory::new(|_resource: Option<&str>| {
            Ok(Arc::new(EchoAgent::new()) as Arc<dyn Agent>)
        }));
        let config = PoolConfig::new(5).with_resources(vec!["0".into(), "1".into()]);
        let pool = WorkerPool::start(factory.clone(), config).unwrap();

        let expected: Vec<Option<String>> = ["0", "1", "0", "1", "0"]
            .iter()
            .map(|s| Some(s.to_string()))
            .collect();
        assert_eq!(pool.bindings(), expected.as_slice());

        pool.close().await;
        let mut built = factory.resources();
        built.sort();
        let mut expected_sorted = expected;
        expected_sorted.sort();
        assert_eq!(built, expected_sorted);
    }

    #[test]
    fn test_unbound_without_resources() {
        assert_eq!(PoolConfig::new(2).bindings(), vec![None, None]);
    }

    #[tokio::test]
    async fn test_failed_factory_yields_error_results() {
        let factory = Arc::new(FnFactory::new(|_resource: Option<&str>| {
            Err(InferenceError::Unavailable("no device".into()))
        }));
        let pool = WorkerPool::start(factory, PoolConfig::new(2)).unwrap();
        let out = pool.predict_batch(numbered(3)).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out
            .iter()
            .all(|c| matches!(c, Err(InferenceError::Unavailable(_)))));
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_produces_error_result() {
        let factory = delayed_echo(vec![0, 10_000]);
        let config = PoolConfig::new(2).with_timeout(Duration::from_secs(1));
        let pool = WorkerPool::start(factory, config).unwrap();
        let out = pool.predict_batch(numbered(2)).await.unwrap();
        assert_eq!(out[0].as_deref(), Ok("0"));
        assert_eq!(out[1], Err(InferenceError::Timeout(Duration::from_secs(1))));
        pool.close().await;
    }

    struct PanicAgent;

    #[async_trait]
    impl Agent for PanicAgent {
        async fn respond(&self, messages: &[Message]) -> Result<String, InferenceError> {
            match messages.last().map(|m| m.content.as_str()) {
                Some("boom") => panic!("agent blew up"),
                Some(other) => Ok(other.to_string()),
                None => Err(InferenceError::EmptyResponse),
            }
        }
    }

    #[tokio::test]
    async fn test_agent_panic_becomes_error_result() {
        let factory = Arc::new(SharedFactory::new(Arc::new(PanicAgent)));
        let pool = WorkerPool::start(factory, PoolConfig::new(2)).unwrap();
        let batch = vec![vec![Message::user("boom")], vec![Message::user("fine")]];

        let out = tokio::time::timeout(Duration::from_secs(3), pool.predict_batch(batch))
            .await
            .expect("batch must resolve")
            .unwrap();
        assert!(
            matches!(&out[0], Err(InferenceError::Backend(msg)) if msg.contains("agent blew up"))
        );
        assert_eq!(out[1].as_deref(), Ok("fine"));

        // The panicking worker keeps serving later batches.
        let again = pool.predict_batch(numbered(4)).await.unwrap();
        assert!(again.iter().all(Result::is_ok));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_factory_panic_becomes_error_result() {
        let factory = Arc::new(FnFactory::new(
            |_resource: Option<&str>| -> Result<Arc<dyn Agent>, InferenceError> {
                panic!("no driver")
            },
        ));
        let pool = WorkerPool::start(factory, PoolConfig::new(1)).unwrap();
        let out = tokio::time::timeout(Duration::from_secs(3), pool.predict_batch(numbered(2)))
            .await
            .expect("batch must resolve")
            .unwrap();
        assert!(out
            .iter()
            .all(|c| matches!(c, Err(InferenceError::Backend(msg)) if msg.contains("no driver"))));
        pool.close().await;
    }

    #[test]
    fn test_parse_resource_list() {
        assert_eq!(parse_resource_list(" 0, 1,,3 "), vec!["0", "1", "3"]);
        assert!(parse_resource_list("").is_empty());
    }
}
