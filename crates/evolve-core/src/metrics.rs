//! Process-wide simulation counters.
//!
//! Incremented at the call site; [`Metrics::flush`] logs the current
//! values as one `info!` event, typically when a run or sweep finishes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters shared by every run in the process.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    rounds_completed: AtomicU64,
    batches_dispatched: AtomicU64,
    inference_failures: AtomicU64,
    unparseable_decisions: AtomicU64,
    retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            rounds_completed: AtomicU64::new(0),
            batches_dispatched: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            unparseable_decisions: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// One round committed by an orchestrator.
    pub fn inc_rounds(&self) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rounds_completed", "counter incremented");
    }

    /// One batch handed to the worker pool.
    pub fn inc_batches(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_dispatched", "counter incremented");
    }

    /// Requests answered with an error marker.
    pub fn add_inference_failures(&self, count: u64) {
        if count > 0 {
            self.inference_failures.fetch_add(count, Ordering::Relaxed);
            tracing::trace!(metric = "inference_failures", count, "counter incremented");
        }
    }

    /// Decisions the extractor could not map to a label.
    pub fn add_unparseable(&self, count: u64) {
        if count > 0 {
            self.unparseable_decisions.fetch_add(count, Ordering::Relaxed);
            tracing::trace!(metric = "unparseable_decisions", count, "counter incremented");
        }
    }

    /// One extra attempt made by a retry policy.
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            rounds_completed = self.rounds_completed(),
            batches_dispatched = self.batches_dispatched(),
            inference_failures = self.inference_failures(),
            unparseable_decisions = self.unparseable_decisions(),
            retries = self.retries(),
        );
    }

    /// Current rounds completed count.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    /// Current batches dispatched count.
    pub fn batches_dispatched(&self) -> u64 {
        self.batches_dispatched.load(Ordering::Relaxed)
    }

    /// Current inference failure count.
    pub fn inference_failures(&self) -> u64 {
        self.inference_failures.load(Ordering::Relaxed)
    }

    /// Current unparseable decision count.
    pub fn unparseable_decisions(&self) -> u64 {
        self.unparseable_decisions.load(Ordering::Relaxed)
    }

    /// Current retry count.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.rounds_completed.store(0, Ordering::Relaxed);
        self.batches_dispatched.store(0, Ordering::Relaxed);
        self.inference_failures.store(0, Ordering::Relaxed);
        self.unparseable_decisions.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}
