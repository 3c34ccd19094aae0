//! Client for the external classification service.
//!
//! The service takes the content blocks of a submission and answers with one
//! classification and suggested reply per block.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::MAX_ERROR_BODY_BYTES;

/// One classified content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub original_text: String,
    pub classification: String,
    /// Normalized text the model saw; not every deployment returns it.
    #[serde(default)]
    pub processed_text: Option<String>,
    pub suggestion: String,
}

/// Response body of `POST /processText`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub results: Vec<ClassificationResult>,
}

#[derive(Debug, Serialize)]
struct ClassificationRequest<'a> {
    message: &'a [String],
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("classification service timed out after {0:?}")]
    Timeout(Duration),

    /// No response at all: DNS failure, connection refused, reset
    #[error("could not reach classification service: {0}")]
    Connect(String),

    #[error("classification service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable classification response: {0}")]
    Decode(String),

    #[error("invalid classification response: {0}")]
    InvalidResponse(String),

    #[error("classification request failed: {0}")]
    Request(String),
}

impl ClassifierError {
    /// Short machine-friendly label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Timeout(_) => "timeout",
            ClassifierError::Connect(_) => "connect",
            ClassifierError::Status { .. } => "status",
            ClassifierError::Decode(_) => "decode",
            ClassifierError::InvalidResponse(_) => "invalid",
            ClassifierError::Request(_) => "request",
        }
    }
}

impl ClassificationResponse {
    /// Reject payloads the rest of the pipeline cannot render.
    pub fn validate(self, blocks_sent: usize) -> Result<Self, ClassifierError> {
        if self.results.is_empty() {
            return Err(ClassifierError::InvalidResponse(format!(
                "no results for {} content block(s)",
                blocks_sent
            )));
        }
        Ok(self)
    }
}

#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    async fn classify(&self, blocks: &[String]) -> Result<ClassificationResponse, ClassifierError>;
}

/// `reqwest`-backed classifier talking JSON to `{api_base}/processText`
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mailsort/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport(&self, e: reqwest::Error) -> ClassifierError {
        if e.is_timeout() {
            ClassifierError::Timeout(self.timeout)
        } else if e.is_connect() {
            ClassifierError::Connect(e.to_string())
        } else if e.is_decode() {
            ClassifierError::Decode(e.to_string())
        } else {
            ClassifierError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, blocks: &[String]) -> Result<ClassificationResponse, ClassifierError> {
        debug!("[Classifier] POST {} ({} blocks)", self.url, blocks.len());

        let response = self
            .client
            .post(&self.url)
            .json(&ClassificationRequest { message: blocks })
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response, MAX_ERROR_BODY_BYTES).await;
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|e| self.map_transport(e))?;
        let parsed: ClassificationResponse =
            serde_json::from_slice(&body).map_err(|e| ClassifierError::Decode(e.to_string()))?;

        parsed.validate(blocks.len())
    }
}

/// Read at most `max` bytes of an error response body.
async fn read_error_body(mut response: reqwest::Response, max: usize) -> String {
    let mut buf = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        buf.extend_from_slice(&chunk);
        if buf.len() > max {
            break;
        }
    }
    truncate_body(String::from_utf8_lossy(&buf).into_owned(), max)
}

fn truncate_body(mut body: String, max: usize) -> String {
    if body.len() <= max {
        return body;
    }
    let mut cut = max;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    body.push_str("...");
    body
}
