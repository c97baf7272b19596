//! In-process counters and gauges for the proving pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ProverMetrics {
    proofs_generated: AtomicU64,
    generation_time_ms: AtomicU64,
    proofs_aggregated: AtomicU64,
    aggregation_time_ms: AtomicU64,
    proofs_sent: AtomicU64,
    submission_errors: AtomicU64,
    invalid_proofs: AtomicU64,
    requests_cancelled: AtomicU64,
    latest_submitted_id: AtomicU64,
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub proofs_generated: u64,
    pub generation_time_ms: u64,
    pub proofs_aggregated: u64,
    pub aggregation_time_ms: u64,
    pub proofs_sent: u64,
    pub submission_errors: u64,
    pub invalid_proofs: u64,
    pub requests_cancelled: u64,
    pub latest_submitted_id: u64,
}

impl ProverMetrics {
    pub fn record_generated(&self, elapsed: Duration) {
        self.proofs_generated.fetch_add(1, Ordering::Relaxed);
        self.generation_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_aggregated(&self, proofs: usize, elapsed: Duration) {
        self.proofs_aggregated.fetch_add(proofs as u64, Ordering::Relaxed);
        self.aggregation_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, proofs: usize) {
        self.proofs_sent.fetch_add(proofs as u64, Ordering::Relaxed);
    }

    pub fn record_submission_error(&self) {
        self.submission_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self, proofs: usize) {
        self.invalid_proofs.fetch_add(proofs as u64, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// The gauge only moves forward.
    pub fn set_latest_submitted(&self, id: u64) {
        self.latest_submitted_id.fetch_max(id, Ordering::Relaxed);
    }

    pub fn latest_submitted(&self) -> u64 {
        self.latest_submitted_id.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            proofs_generated: self.proofs_generated.load(Ordering::Relaxed),
            generation_time_ms: self.generation_time_ms.load(Ordering::Relaxed),
            proofs_aggregated: self.proofs_aggregated.load(Ordering::Relaxed),
            aggregation_time_ms: self.aggregation_time_ms.load(Ordering::Relaxed),
            proofs_sent: self.proofs_sent.load(Ordering::Relaxed),
            submission_errors: self.submission_errors.load(Ordering::Relaxed),
            invalid_proofs: self.invalid_proofs.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            latest_submitted_id: self.latest_submitted_id.load(Ordering::Relaxed),
        }
    }
}
