use crate::classifier::Classifier;
use crate::config::{UploadLimits, FIELD_AUTHOR, FIELD_CONTENT, FIELD_FILES, SERVER_AUTHOR};
use crate::error::{AppError, Result};
use crate::extract::{extract_all, UploadedFile};
use crate::jobs::{Job, JobStatus, JobStore};
use crate::messages::{render_failure, render_pending, render_results, render_submission, Message, MessageLog};
use crate::metrics::MetricsCollector;
use crate::runner::JobRunner;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::Multipart;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_AUTHOR: &str = "user";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: String,
    pub message: String,
    /// Number of content blocks sent for classification
    pub count: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobStore>,
    pub messages: Arc<MessageLog>,
    pub runner: Arc<JobRunner>,
    pub metrics: Arc<MetricsCollector>,
    pub limits: UploadLimits,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>, api_timeout: Duration, limits: UploadLimits) -> Self {
        let jobs = Arc::new(JobStore::new());
        let metrics = Arc::new(MetricsCollector::new());
        let runner = Arc::new(JobRunner::new(jobs.clone(), classifier, metrics.clone(), api_timeout));
        Self {
            jobs,
            messages: Arc::new(MessageLog::new()),
            runner,
            metrics,
            limits,
        }
    }
}

/// API Routes
pub fn routes(state: AppState) -> Router {
    let body_limit = state.limits.body_limit();
    Router::new()
        .route("/", get(root))
        .route("/message", post(submit_message))
        .route("/job/:id", get(job_status))
        .route("/messages", get(list_messages))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "mailsort",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Submission front-end for the email classification service"
    }))
}

struct SubmissionForm {
    author: String,
    content: String,
    files: Vec<UploadedFile>,
}

/// Read the whole form, enforcing the upload bounds before anything is processed.
async fn read_submission(multipart: &mut Multipart, limits: &UploadLimits) -> Result<SubmissionForm> {
    let mut form = SubmissionForm {
        author: String::new(),
        content: String::new(),
        files: Vec::new(),
    };

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        if name == FIELD_AUTHOR {
            form.author = field.text().await?;
        } else if name == FIELD_CONTENT {
            form.content = field.text().await?;
        } else if name == FIELD_FILES {
            let file_name = field.file_name().unwrap_or("").to_string();
            let declared = field.content_type().map(str::to_string);

            let mut data = BytesMut::new();
            while let Some(chunk) = field.chunk().await? {
                if data.len() + chunk.len() > limits.max_file_size {
                    return Err(AppError::FileTooLarge {
                        name: file_name,
                        max: limits.max_file_size,
                    });
                }
                data.extend_from_slice(&chunk);
            }

            // Browsers send one empty part when the file input is left blank
            if file_name.is_empty() && data.is_empty() {
                continue;
            }
            if form.files.len() >= limits.max_files {
                return Err(AppError::TooManyFiles { max: limits.max_files });
            }

            let file_name = if file_name.is_empty() {
                format!("file_{}", form.files.len() + 1)
            } else {
                file_name
            };
            form.files.push(UploadedFile::new(file_name, declared.as_deref(), data.freeze()));
        } else {
            debug!("[Api] ignoring unknown form field '{}'", name);
        }
    }

    Ok(form)
}

async fn submit_message(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>> {
    let form = read_submission(&mut multipart, &state.limits).await?;

    let has_text = !form.content.trim().is_empty();
    if !has_text && form.files.is_empty() {
        return Err(AppError::EmptySubmission);
    }

    let mut blocks = Vec::with_capacity(form.files.len() + 1);
    if has_text {
        blocks.push(form.content.clone());
    }
    for file in &form.files {
        info!("[Api] processing file: {} ({})", file.name, file.media_type);
    }
    blocks.extend(extract_all(&form.files).await);
    let count = blocks.len();

    let author = match form.author.trim() {
        "" => DEFAULT_AUTHOR.to_string(),
        a => a.to_string(),
    };
    let file_names: Vec<String> = form.files.iter().map(|f| f.name.clone()).collect();
    // The job needs its placeholder's id and the placeholder shows the job id
    let mut job_id = String::new();
    state.messages.append_pair(
        author,
        render_submission(&form.content, &file_names),
        SERVER_AUTHOR,
        |placeholder| {
            job_id = state.runner.submit(blocks, placeholder);
            render_pending(&job_id)
        },
    );
    state.metrics.record_submission();

    info!("[Api] job {} submitted with {} content block(s)", job_id, count);

    Ok(Json(SubmitResponse {
        success: true,
        job_id,
        message: "Content successfully processed.".to_string(),
        count,
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| AppError::JobNotFound(job_id.clone()))?;

    // Results never change once set, so rendering is safe to repeat; `resolve`
    // still keeps it to a single write per placeholder.
    let rendered = match (job.status, &job.results, &job.error) {
        (JobStatus::Done, Some(results), _) => Some(render_results(results)),
        (JobStatus::Error, _, error) => Some(render_failure(
            &job_id,
            error.as_deref().unwrap_or("unknown error"),
        )),
        _ => None,
    };

    if let Some(content) = rendered {
        if state.messages.resolve(job.message_id, content)? {
            info!("[Api] job {} is {}, message {} updated", job_id, job.status.as_str(), job.message_id);
        }
    }

    Ok(Json(job))
}

async fn list_messages(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.messages.all())
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .render(&state.jobs.status_counts(), state.messages.len());
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
