/// Runtime configuration and tuning defaults for the mailsort server and client
use std::time::Duration;

// Server defaults
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

// Upload bounds (checked before any extraction or job creation)
pub const MAX_UPLOAD_FILES: usize = 10;
pub const MAX_FILE_SIZE_BYTES: usize = 10 * 1024 * 1024;
// Headroom for the text fields and multipart framing on top of the file payload
pub const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

// External classification API
pub const CLASSIFIER_PATH: &str = "/processText";
pub const CLASSIFIER_TIMEOUT_SECS: u64 = 10;
// Classifier error bodies are cut to this size before they reach a job
pub const MAX_ERROR_BODY_BYTES: usize = 2 * 1024;

// Upper bound for parsing one PDF; pdf-extract can spin on some fonts
pub const PDF_EXTRACT_TIMEOUT_SECS: u64 = 30;

// How long shutdown waits for in-flight jobs before aborting them
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

// Client polling
pub const POLL_INTERVAL_MS: u64 = 2000;
pub const CURRENT_JOB_KEY: &str = "currentJobId";

// Multipart field names of the submission form
pub const FIELD_AUTHOR: &str = "fAuthor";
pub const FIELD_CONTENT: &str = "fContent";
pub const FIELD_FILES: &str = "fUploadedFiles";

pub const SERVER_AUTHOR: &str = "server";

/// Per-request upload bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: MAX_UPLOAD_FILES,
            max_file_size: MAX_FILE_SIZE_BYTES,
        }
    }
}

impl UploadLimits {
    /// Largest request body that can still hold a valid submission.
    pub fn body_limit(&self) -> usize {
        self.max_files
            .saturating_mul(self.max_file_size)
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL of the classification service; `/processText` is appended.
    pub api_base: String,
    pub api_timeout: Duration,
    pub limits: UploadLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_base: DEFAULT_API_BASE.to_string(),
            api_timeout: Duration::from_secs(CLASSIFIER_TIMEOUT_SECS),
            limits: UploadLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn classifier_url(&self) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), CLASSIFIER_PATH)
    }
}
