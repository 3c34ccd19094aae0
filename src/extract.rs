//! Content extraction: turns an uploaded file into a plain-text block.
//!
//! Extraction never fails. Unparseable or unsupported files come back as a
//! bracketed placeholder so a single bad attachment cannot sink the whole
//! submission.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::PDF_EXTRACT_TIMEOUT_SECS;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Supported upload formats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    PlainText,
    Pdf,
    Unsupported(String),
}

impl MediaKind {
    /// Dispatch on a declared media type, ignoring case and parameters.
    pub fn from_media_type(media_type: &str) -> Self {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            MIME_TEXT => MediaKind::PlainText,
            MIME_PDF => MediaKind::Pdf,
            _ => MediaKind::Unsupported(media_type.to_string()),
        }
    }
}

/// A file as received from the multipart form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub media_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    /// Build from a multipart part, falling back to the file extension when the
    /// client sent no usable content type.
    pub fn new(name: String, declared: Option<&str>, data: Bytes) -> Self {
        let media_type = match declared {
            Some(ct) if !ct.trim().is_empty() && !ct.eq_ignore_ascii_case(MIME_OCTET_STREAM) => {
                ct.to_string()
            }
            _ => mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };
        Self { name, media_type, data }
    }
}

/// Convert a file buffer into text according to its declared media type.
pub fn extract_text(data: &[u8], media_type: &str) -> String {
    match MediaKind::from_media_type(media_type) {
        MediaKind::PlainText => String::from_utf8_lossy(data).into_owned(),
        MediaKind::Pdf => match extract_pdf(data) {
            Ok(text) => text.trim().to_string(),
            Err(reason) => {
                warn!("[Extract] PDF parse failed: {}", reason);
                format!("[PDF PARSE ERROR: {}]", reason)
            }
        },
        MediaKind::Unsupported(media_type) => format!("[UNSUPPORTED FILE TYPE: {}]", media_type),
    }
}

fn extract_pdf(data: &[u8]) -> Result<String, String> {
    // pdf-extract panics on some malformed inputs instead of returning an error
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(data))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "parser panicked".to_string()
    }
}

/// Extract every file of a submission concurrently, preserving upload order.
pub async fn extract_all(files: &[UploadedFile]) -> Vec<String> {
    extract_all_within(files, Duration::from_secs(PDF_EXTRACT_TIMEOUT_SECS)).await
}

/// Like [`extract_all`], giving up on any single file after `limit`.
///
/// A parser that overruns keeps its blocking thread until it returns on its
/// own; the submission continues with a placeholder block for that file.
pub async fn extract_all_within(files: &[UploadedFile], limit: Duration) -> Vec<String> {
    extract_files(files, limit, extract_text).await
}

async fn extract_files<F>(files: &[UploadedFile], limit: Duration, extractor: F) -> Vec<String>
where
    F: Fn(&[u8], &str) -> String + Copy + Send + 'static,
{
    let tasks = files.iter().map(|file| {
        let file = file.clone();
        async move {
            debug!("[Extract] {} ({}, {} bytes)", file.name, file.media_type, file.data.len());
            let name = file.name.clone();
            let media_type = file.media_type.clone();
            let handle =
                tokio::task::spawn_blocking(move || extractor(&file.data, &file.media_type));

            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => format!("[EXTRACTION FAILED: {} ({})]", e, media_type),
                Err(_) => {
                    warn!("[Extract] {} still parsing after {:?}, skipped", name, limit);
                    timed_out_placeholder(&media_type, limit)
                }
            }
        }
    });
    futures::future::join_all(tasks).await
}

fn timed_out_placeholder(media_type: &str, limit: Duration) -> String {
    match MediaKind::from_media_type(media_type) {
        MediaKind::Pdf => format!("[PDF PARSE ERROR: extraction timed out after {:?}]", limit),
        _ => format!("[EXTRACTION FAILED: timed out after {:?} ({})]", limit, media_type),
    }
}
