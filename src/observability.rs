//! Build metrics counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every stage of a build
#[derive(Debug, Default)]
pub struct BuildMetrics {
    chains_executed: AtomicU64,
    forks_completed: AtomicU64,
    concatenations: AtomicU64,
    bytes_written: AtomicU64,
    fd_waits: AtomicU64,
    materialized_inputs: AtomicU64,
}

impl BuildMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain_executed(&self) {
        self.chains_executed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "chains_executed", "Metric incremented");
    }

    pub fn fork_completed(&self) {
        self.forks_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "forks_completed", "Metric incremented");
    }

    pub fn concatenated(&self) {
        self.concatenations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "concatenations", "Metric incremented");
    }

    pub fn bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A stage had to wait for a file descriptor permit
    pub fn fd_wait(&self) {
        self.fd_waits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "fd_waits", "Metric incremented");
    }

    /// A stage buffered its whole input instead of reserving descriptors
    pub fn input_materialized(&self) {
        self.materialized_inputs.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "materialized_inputs", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chains_executed: self.chains_executed.load(Ordering::Relaxed),
            forks_completed: self.forks_completed.load(Ordering::Relaxed),
            concatenations: self.concatenations.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            fd_waits: self.fd_waits.load(Ordering::Relaxed),
            materialized_inputs: self.materialized_inputs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chains_executed: u64,
    pub forks_completed: u64,
    pub concatenations: u64,
    pub bytes_written: u64,
    pub fd_waits: u64,
    pub materialized_inputs: u64,
}
