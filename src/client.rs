//! HTTP client for the submission form and the terminal front-end built on it.
//!
//! Validation happens here, before any request leaves the process: an empty
//! draft or one over the upload bounds never reaches the network.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::api::SubmitResponse;
use crate::config::{UploadLimits, FIELD_AUTHOR, FIELD_CONTENT, FIELD_FILES};
use crate::messages::Message;
use crate::poller::{ClientStorage, PageHooks, PollError, StatusReply, StatusSource, StorageError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Send at least a text message or a file")]
    EmptySubmission,

    #[error("Send at most {max} files ({count} selected)")]
    TooManyFiles { count: usize, max: usize },

    #[error("File '{name}' is {size} bytes, the limit is {max}")]
    FileTooLarge { name: String, size: usize, max: usize },

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unreadable server response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Errors raised before anything is sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ClientError::EmptySubmission | ClientError::TooManyFiles { .. } | ClientError::FileTooLarge { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct DraftFile {
    pub name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

impl DraftFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ClientError> {
        let data = fs::read(path).map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let media_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
        Ok(Self { name, media_type, data })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionDraft {
    pub author: String,
    pub content: String,
    pub files: Vec<DraftFile>,
}

impl SubmissionDraft {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_file(mut self, file: DraftFile) -> Self {
        self.files.push(file);
        self
    }

    fn has_text(&self) -> bool {
        !self.content.trim().is_empty()
    }

    pub fn validate(&self, limits: &UploadLimits) -> Result<(), ClientError> {
        if !self.has_text() && self.files.is_empty() {
            return Err(ClientError::EmptySubmission);
        }
        if self.files.len() > limits.max_files {
            return Err(ClientError::TooManyFiles {
                count: self.files.len(),
                max: limits.max_files,
            });
        }
        if let Some(file) = self.files.iter().find(|f| f.data.len() > limits.max_file_size) {
            return Err(ClientError::FileTooLarge {
                name: file.name.clone(),
                size: file.data.len(),
                max: limits.max_file_size,
            });
        }
        Ok(())
    }

    fn into_form(self) -> Result<reqwest::multipart::Form, ClientError> {
        let has_text = self.has_text();
        let mut form = reqwest::multipart::Form::new().text(FIELD_AUTHOR, self.author);
        if has_text {
            form = form.text(FIELD_CONTENT, self.content);
        }
        for file in self.files {
            let part = reqwest::multipart::Part::bytes(file.data)
                .file_name(file.name)
                .mime_str(&file.media_type)
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            form = form.part(FIELD_FILES, part);
        }
        Ok(form)
    }
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Clone)]
pub struct MailsortClient {
    http: reqwest::Client,
    base_url: String,
    limits: UploadLimits,
}

impl MailsortClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mailsort/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limits: UploadLimits::default(),
        })
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validate and send a submission; returns the accepted job.
    pub async fn submit(&self, draft: SubmissionDraft) -> Result<SubmitResponse, ClientError> {
        draft.validate(&self.limits)?;

        let url = format!("{}/message", self.base_url);
        debug!("[Client] POST {} ({} file(s))", url, draft.files.len());
        let response = self
            .http
            .post(&url)
            .multipart(draft.into_form()?)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorReply>().await {
                Ok(ErrorReply { error, details: Some(details) }) => format!("{} ({})", error, details),
                Ok(ErrorReply { error, details: None }) => error,
                Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
            };
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<SubmitResponse>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn messages(&self) -> Result<Vec<Message>, ClientError> {
        let response = self
            .http
            .get(format!("{}/messages", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Rejected {
                status: response.status().as_u16(),
                message: "could not list messages".to_string(),
            });
        }

        response
            .json::<Vec<Message>>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StatusSource for MailsortClient {
    async fn job_status(&self, job_id: &str) -> Result<StatusReply, PollError> {
        let response = self
            .http
            .get(format!("{}/job/{}", self.base_url, job_id))
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PollError::Http(response.status().as_u16()));
        }

        response
            .json::<StatusReply>()
            .await
            .map_err(|e| PollError::Decode(e.to_string()))
    }
}

/// JSON file standing in for browser local storage
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> BTreeMap<String, String> {
        fs::read(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default()
    }

    fn store(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError(e.to_string()))?;
        }
        let raw = serde_json::to_vec_pretty(values).map_err(|e| StorageError(e.to_string()))?;
        fs::write(&self.path, raw).map_err(|e| StorageError(format!("{}: {}", self.path.display(), e)))
    }
}

impl ClientStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.load();
        values.insert(key.to_string(), value.to_string());
        self.store(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.load();
        if values.remove(key).is_some() {
            self.store(&values)?;
        }
        Ok(())
    }
}

/// Terminal rendition of the submission page
pub struct TerminalPage {
    client: MailsortClient,
}

impl TerminalPage {
    pub fn new(client: MailsortClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageHooks for TerminalPage {
    fn set_busy(&mut self, busy: bool) {
        if busy {
            println!("⏳ Waiting for the classifier...");
        } else {
            println!("✅ Ready");
        }
    }

    async fn reload(&mut self) {
        match self.client.messages().await {
            Ok(messages) => {
                println!();
                for message in messages {
                    println!("[{}] {}", message.author, to_terminal_text(&message.content));
                    println!();
                }
            }
            Err(e) => eprintln!("Could not load messages: {}", e),
        }
    }

    fn alert(&mut self, message: &str) {
        eprintln!("❌ {}", message);
    }
}

/// Strip the little HTML the server puts into message content.
pub fn to_terminal_text(content: &str) -> String {
    content
        .replace("<br>", "\n")
        .replace("<b>", "")
        .replace("</b>", "")
}
