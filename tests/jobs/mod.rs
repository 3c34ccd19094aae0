use async_trait::async_trait;
use mailsort::classifier::{ClassificationResponse, ClassificationResult, Classifier, ClassifierError};
use mailsort::jobs::{Job, JobStatus, JobStore};
use mailsort::metrics::MetricsCollector;
use mailsort::runner::JobRunner;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Answers every block with a "greeting" classification, optionally waiting
/// for a gate or a delay first.
struct EchoClassifier {
    gate: Option<Arc<Notify>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl EchoClassifier {
    fn new() -> Self {
        Self { gate: None, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self { gate: Some(gate), ..Self::new() }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::new() }
    }
}

#[async_trait]
impl Classifier for EchoClassifier {
    async fn classify(&self, blocks: &[String]) -> Result<ClassificationResponse, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ClassificationResponse {
            results: blocks
                .iter()
                .map(|b| ClassificationResult {
                    original_text: b.clone(),
                    classification: "greeting".to_string(),
                    processed_text: None,
                    suggestion: "hi!".to_string(),
                })
                .collect(),
        })
    }
}

struct FailingClassifier {
    error: ClassifierError,
    calls: AtomicUsize,
}

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(&self, _blocks: &[String]) -> Result<ClassificationResponse, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

fn setup_runner(classifier: Arc<dyn Classifier>, timeout: Duration) -> (JobRunner, Arc<JobStore>, Arc<MetricsCollector>) {
    let store = Arc::new(JobStore::new());
    let metrics = Arc::new(MetricsCollector::new());
    let runner = JobRunner::new(store.clone(), classifier, metrics.clone(), timeout);
    (runner, store, metrics)
}

async fn wait_for_terminal(store: &JobStore, id: &str) -> Job {
    for _ in 0..2000 {
        let job = store.get(id).expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached a terminal status", id);
}

#[tokio::test]
async fn test_submit_returns_before_classifier_resolves() {
    let gate = Arc::new(Notify::new());
    let classifier = Arc::new(EchoClassifier::gated(gate.clone()));
    let (runner, store, _) = setup_runner(classifier.clone(), Duration::from_secs(10));

    let id = runner.submit(vec!["hello".to_string()], 1);

    let job = store.get(&id).unwrap();
    assert!(matches!(job.status, JobStatus::Pending | JobStatus::Processing));
    assert!(job.results.is_none());
    assert_eq!(job.message_id, 1);

    gate.notify_one();
    let job = wait_for_terminal(&store, &id).await;

    assert_eq!(job.status, JobStatus::Done);
    let results = job.results.unwrap().results;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].original_text, "hello");
    assert_eq!(results[0].classification, "greeting");
    assert!(job.error.is_none());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_call_moves_job_to_error_without_retry() {
    let classifier = Arc::new(FailingClassifier {
        error: ClassifierError::Status { status: 500, body: "model not loaded".to_string() },
        calls: AtomicUsize::new(0),
    });
    let (runner, store, metrics) = setup_runner(classifier.clone(), Duration::from_secs(10));

    let id = runner.submit(vec!["hello".to_string()], 0);
    let job = wait_for_terminal(&store, &id).await;

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.results.is_none());
    let error = job.error.unwrap();
    assert!(error.contains("500"), "got {}", error);
    assert!(error.contains("model not loaded"));

    // Give a would-be retry the chance to happen
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.jobs_failed.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.jobs_in_flight.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_classifier_times_out() {
    let classifier = Arc::new(EchoClassifier::slow(Duration::from_secs(3600)));
    let (runner, store, _) = setup_runner(classifier, Duration::from_secs(10));

    let id = runner.submit(vec!["hello".to_string()], 0);
    let job = wait_for_terminal(&store, &id).await;

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_concurrent_submissions_resolve_independently() {
    let classifier = Arc::new(EchoClassifier::slow(Duration::from_millis(20)));
    let (runner, store, metrics) = setup_runner(classifier, Duration::from_secs(10));

    let ids: Vec<String> = (0..20)
        .map(|i| runner.submit(vec![format!("email {}", i)], i))
        .collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());

    for (i, id) in ids.iter().enumerate() {
        let job = wait_for_terminal(&store, id).await;
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.message_id, i);
        assert_eq!(job.results.unwrap().results[0].original_text, format!("email {}", i));
    }
    assert_eq!(metrics.jobs_completed.load(Ordering::Relaxed), 20);
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_jobs() {
    let classifier = Arc::new(EchoClassifier::slow(Duration::from_millis(50)));
    let (runner, store, _) = setup_runner(classifier, Duration::from_secs(10));

    let id = runner.submit(vec!["hello".to_string()], 0);
    assert_eq!(runner.tracked_tasks(), 1);

    let aborted = runner.drain(Duration::from_secs(5)).await;
    assert_eq!(aborted, 0);
    assert_eq!(runner.tracked_tasks(), 0);
    assert_eq!(store.get(&id).unwrap().status, JobStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn test_drain_aborts_after_grace_period() {
    let gate = Arc::new(Notify::new());
    let classifier = Arc::new(EchoClassifier::gated(gate));
    let (runner, store, _) = setup_runner(classifier, Duration::from_secs(3600));

    let id = runner.submit(vec!["hello".to_string()], 0);
    let aborted = runner.drain(Duration::from_secs(1)).await;

    assert_eq!(aborted, 1);
    assert!(!store.get(&id).unwrap().status.is_terminal());
}
