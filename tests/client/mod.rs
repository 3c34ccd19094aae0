use async_trait::async_trait;
use mailsort::api::{routes, AppState};
use mailsort::classifier::{ClassificationResponse, ClassificationResult, Classifier, ClassifierError};
use mailsort::client::{ClientError, DraftFile, FileStorage, MailsortClient, SubmissionDraft};
use mailsort::config::{UploadLimits, CURRENT_JOB_KEY};
use mailsort::poller::{ClientStorage, MemoryStorage, PageHooks, PollError, PollState, Poller, StatusSource};
use std::sync::Arc;
use std::time::Duration;

// Nothing listens here; a request that got this far would fail with a
// transport error instead of a validation error.
const DEAD_SERVER: &str = "http://127.0.0.1:9";

struct ProductiveClassifier;

#[async_trait]
impl Classifier for ProductiveClassifier {
    async fn classify(&self, blocks: &[String]) -> Result<ClassificationResponse, ClassifierError> {
        Ok(ClassificationResponse {
            results: blocks
                .iter()
                .map(|b| ClassificationResult {
                    original_text: b.clone(),
                    classification: "productive".to_string(),
                    processed_text: None,
                    suggestion: "We are on it.".to_string(),
                })
                .collect(),
        })
    }
}

#[derive(Default)]
struct QuietPage {
    reloads: usize,
    alerts: Vec<String>,
}

#[async_trait]
impl PageHooks for QuietPage {
    fn set_busy(&mut self, _busy: bool) {}

    async fn reload(&mut self) {
        self.reloads += 1;
    }

    fn alert(&mut self, message: &str) {
        self.alerts.push(message.to_string());
    }
}

async fn spawn_mailsort(limits: UploadLimits) -> String {
    let state = AppState::new(Arc::new(ProductiveClassifier), Duration::from_secs(5), limits);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn text_file(name: &str, body: &str) -> DraftFile {
    DraftFile::new(name, "text/plain", body.as_bytes().to_vec())
}

#[tokio::test]
async fn test_empty_draft_is_never_sent() {
    let client = MailsortClient::new(DEAD_SERVER).unwrap();

    let err = client
        .submit(SubmissionDraft::new("alice").with_content("  \n "))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::EmptySubmission));
}

#[tokio::test]
async fn test_limits_are_checked_before_sending() {
    let client = MailsortClient::new(DEAD_SERVER)
        .unwrap()
        .with_limits(UploadLimits { max_files: 2, max_file_size: 8 });

    let mut crowded = SubmissionDraft::new("alice");
    for i in 0..3 {
        crowded = crowded.with_file(text_file(&format!("{}.txt", i), "x"));
    }
    let err = client.submit(crowded).await.unwrap_err();
    assert!(matches!(err, ClientError::TooManyFiles { count: 3, max: 2 }));

    let oversized = SubmissionDraft::new("alice").with_file(text_file("big.txt", "0123456789"));
    let err = client.submit(oversized).await.unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(err, ClientError::FileTooLarge { ref name, size: 10, max: 8 } if name == "big.txt"));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let client = MailsortClient::new(DEAD_SERVER).unwrap();

    let err = client
        .submit(SubmissionDraft::new("alice").with_content("hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)));
    assert!(!err.is_validation());
}

#[tokio::test]
async fn test_submit_and_poll_to_completion() {
    let base = spawn_mailsort(UploadLimits::default()).await;
    let client = MailsortClient::new(&base).unwrap();

    let draft = SubmissionDraft::new("Alice")
        .with_content("Can you check my invoice?")
        .with_file(text_file("note.txt", "Invoice 42 is overdue"));
    let accepted = client.submit(draft).await.unwrap();

    assert!(accepted.success);
    assert_eq!(accepted.count, 2);
    assert!(!accepted.job_id.is_empty());

    let storage = Arc::new(MemoryStorage::new());
    let mut poller = Poller::new(client.clone(), storage.clone(), QuietPage::default())
        .with_interval(Duration::from_millis(20));
    poller.on_submitted(&accepted.job_id).await.unwrap();
    assert_eq!(storage.get(CURRENT_JOB_KEY).as_deref(), Some(accepted.job_id.as_str()));

    let state = poller.resume().await;

    assert_eq!(state, PollState::Succeeded { job_id: accepted.job_id.clone() });
    // One reload after submitting, one after completion
    assert_eq!(poller.page().reloads, 2);
    assert!(poller.page().alerts.is_empty());
    assert!(storage.get(CURRENT_JOB_KEY).is_none());

    let messages = client.messages().await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].author, "Alice");
    assert!(messages[0].content.contains("note.txt"));
    assert!(messages[1].content.contains("Classified as: <b>productive</b>"));
    assert!(messages[1].content.contains("Invoice 42 is overdue"));
}

#[tokio::test]
async fn test_server_side_rejection_is_reported() {
    let base = spawn_mailsort(UploadLimits { max_files: 1, max_file_size: 1024 }).await;
    // Client believes more files are fine; the server disagrees
    let client = MailsortClient::new(&base).unwrap();

    let draft = SubmissionDraft::new("alice")
        .with_file(text_file("a.txt", "a"))
        .with_file(text_file("b.txt", "b"));
    let err = client.submit(draft).await.unwrap_err();

    assert!(matches!(err, ClientError::Rejected { status: 400, .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_unknown_job_status_is_http_error() {
    let base = spawn_mailsort(UploadLimits::default()).await;
    let client = MailsortClient::new(&base).unwrap();

    let err = client.job_status("does-not-exist").await.unwrap_err();

    assert_eq!(err, PollError::Http(404));
}

#[test]
fn test_file_storage_survives_new_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");

    let storage = FileStorage::new(&path);
    assert!(storage.get(CURRENT_JOB_KEY).is_none());

    storage.set(CURRENT_JOB_KEY, "job-9").unwrap();
    assert!(path.exists());

    let reopened = FileStorage::new(&path);
    assert_eq!(reopened.get(CURRENT_JOB_KEY).as_deref(), Some("job-9"));

    reopened.remove(CURRENT_JOB_KEY).unwrap();
    assert!(FileStorage::new(&path).get(CURRENT_JOB_KEY).is_none());
}

#[test]
fn test_draft_file_from_path_guesses_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letter.txt");
    std::fs::write(&path, "Dear team").unwrap();

    let file = DraftFile::from_path(&path).unwrap();
    assert_eq!(file.name, "letter.txt");
    assert_eq!(file.media_type, "text/plain");
    assert_eq!(file.data, b"Dear team");

    let missing = DraftFile::from_path(&dir.path().join("nope.pdf")).unwrap_err();
    assert!(matches!(missing, ClientError::Io { .. }));
}
