//! Prometheus-style metrics for the job pipeline.
//!
//! Atomic counters plus a sliding latency window, exposed via `/metrics`
//! in Prometheus text exposition format.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::jobs::JobStatus;

/// Maximum latency samples to keep for P99 calculation
const LATENCY_WINDOW_SIZE: usize = 1000;

pub struct MetricsCollector {
    /// Submissions accepted since startup
    pub submissions: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    /// Runner tasks currently waiting on the classifier
    pub jobs_in_flight: AtomicI64,
    /// Sliding window of recent classifier round-trips (ms)
    classifier_latencies: RwLock<VecDeque<f64>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            submissions: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_in_flight: AtomicI64::new(0),
            classifier_latencies: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
        }
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        self.jobs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a classifier call and its latency
    pub fn job_finished(&self, success: bool, latency_ms: f64) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut latencies = self.classifier_latencies.write();
        if latencies.len() >= LATENCY_WINDOW_SIZE {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    /// Calculate P99 latency from the sliding window
    pub fn get_p99_latency(&self) -> f64 {
        let latencies = self.classifier_latencies.read();
        if latencies.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let p99_index = ((sorted.len() as f64) * 0.99).ceil() as usize - 1;
        let p99_index = p99_index.min(sorted.len() - 1);
        sorted[p99_index]
    }

    pub fn get_avg_latency(&self) -> f64 {
        let latencies = self.classifier_latencies.read();
        if latencies.is_empty() {
            return 0.0;
        }
        latencies.iter().sum::<f64>() / latencies.len() as f64
    }

    pub fn get_sample_count(&self) -> usize {
        self.classifier_latencies.read().len()
    }

    /// Render everything in Prometheus text format.
    pub fn render(&self, job_counts: &[(JobStatus, usize)], message_count: usize) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP mailsort_submissions_total Submissions accepted");
        let _ = writeln!(out, "# TYPE mailsort_submissions_total counter");
        let _ = writeln!(out, "mailsort_submissions_total {}", self.submissions.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP mailsort_jobs_finished_total Jobs resolved by outcome");
        let _ = writeln!(out, "# TYPE mailsort_jobs_finished_total counter");
        let _ = writeln!(
            out,
            "mailsort_jobs_finished_total{{outcome=\"done\"}} {}",
            self.jobs_completed.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "mailsort_jobs_finished_total{{outcome=\"error\"}} {}",
            self.jobs_failed.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# HELP mailsort_jobs_in_flight Jobs waiting on the classifier");
        let _ = writeln!(out, "# TYPE mailsort_jobs_in_flight gauge");
        let _ = writeln!(out, "mailsort_jobs_in_flight {}", self.jobs_in_flight.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP mailsort_jobs Jobs held in memory by status");
        let _ = writeln!(out, "# TYPE mailsort_jobs gauge");
        for (status, count) in job_counts {
            let _ = writeln!(out, "mailsort_jobs{{status=\"{}\"}} {}", status.as_str(), count);
        }

        let _ = writeln!(out, "# HELP mailsort_messages Messages held in memory");
        let _ = writeln!(out, "# TYPE mailsort_messages gauge");
        let _ = writeln!(out, "mailsort_messages {}", message_count);

        let _ = writeln!(out, "# HELP mailsort_classifier_latency_ms Classifier round-trip latency");
        let _ = writeln!(out, "# TYPE mailsort_classifier_latency_ms summary");
        let _ = writeln!(out, "mailsort_classifier_latency_ms{{quantile=\"0.99\"}} {:.3}", self.get_p99_latency());
        let _ = writeln!(out, "mailsort_classifier_latency_ms_avg {:.3}", self.get_avg_latency());
        let _ = writeln!(out, "mailsort_classifier_latency_ms_count {}", self.get_sample_count());

        out
    }
}
