//! Job runner: creates jobs and resolves them in the background.
//!
//! `submit` only touches the in-memory store and returns the new id right
//! away. The classifier call runs on a spawned task tracked in a `JoinSet`,
//! and that task is the single writer of the job's final state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classifier, ClassifierError};
use crate::jobs::JobStore;
use crate::metrics::MetricsCollector;

struct Shared {
    store: Arc<JobStore>,
    classifier: Arc<dyn Classifier>,
    metrics: Arc<MetricsCollector>,
    timeout: Duration,
}

pub struct JobRunner {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        classifier: Arc<dyn Classifier>,
        metrics: Arc<MetricsCollector>,
        timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                classifier,
                metrics,
                timeout,
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.shared.store
    }

    /// Create a job for `blocks` and start classifying it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, blocks: Vec<String>, message_id: usize) -> String {
        let id = self.shared.store.create(blocks.clone(), message_id);
        debug!("[Jobs] created {} ({} blocks, message {})", id, blocks.len(), message_id);

        let shared = self.shared.clone();
        let job_id = id.clone();

        let mut tasks = self.tasks.lock();
        reap_finished(&mut tasks);
        tasks.spawn(async move { shared.process(job_id, blocks).await });

        id
    }

    /// Tasks spawned and not yet reaped.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Wait for outstanding jobs, aborting whatever is still running after `grace`.
    /// Returns the number of aborted tasks.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return 0;
        }

        info!("[Jobs] waiting up to {:?} for {} job task(s)", grace, tasks.len());
        let waited = tokio::time::timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                log_join_error(res);
            }
        })
        .await;

        if waited.is_ok() {
            return 0;
        }

        let aborted = tasks.len();
        warn!("[Jobs] aborting {} job task(s) still running at shutdown", aborted);
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        aborted
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(res) = tasks.try_join_next() {
        log_join_error(res);
    }
}

fn log_join_error(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("[Jobs] job task panicked: {}", e);
        }
    }
}

impl Shared {
    async fn process(&self, id: String, blocks: Vec<String>) {
        self.store.start(&id);
        self.metrics.job_started();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.classifier.classify(&blocks)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClassifierError::Timeout(self.timeout)),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(results) => {
                info!(
                    "[Jobs] {} done: {} result(s) in {:.0}ms",
                    id,
                    results.results.len(),
                    latency_ms
                );
                self.store.complete(&id, results);
                self.metrics.job_finished(true, latency_ms);
            }
            Err(e) => {
                match &e {
                    ClassifierError::Timeout(_) | ClassifierError::Connect(_) => {
                        warn!("[Jobs] {} failed, no response from classifier ({}): {}", id, e.kind(), e);
                    }
                    ClassifierError::Status { status, body } => {
                        error!("[Jobs] {} failed, classifier answered {}: {}", id, status, body);
                    }
                    _ => {
                        error!("[Jobs] {} failed ({}): {}", id, e.kind(), e);
                    }
                }
                self.store.fail(&id, e.to_string());
                self.metrics.job_finished(false, latency_ms);
            }
        }
    }
}
