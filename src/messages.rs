//! Append-only chat log shown to the user.
//!
//! A message's index is its permanent id. Jobs point at the server
//! placeholder message they will eventually overwrite.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResponse;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: usize,
    pub author: String,
    pub content: String,
}

struct Entry {
    message: Message,
    resolved: bool,
}

#[derive(Default)]
pub struct MessageLog {
    entries: RwLock<Vec<Entry>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, author: impl Into<String>, content: impl Into<String>) -> usize {
        let mut entries = self.entries.write();
        let id = entries.len();
        entries.push(Entry {
            message: Message {
                id,
                author: author.into(),
                content: content.into(),
            },
            resolved: false,
        });
        id
    }

    /// Append a user message and the server reply that follows it, under one
    /// lock. `reply` receives the reply's id and returns the reply content, so
    /// the pair is never split and the reply is never seen empty.
    pub fn append_pair(
        &self,
        author: impl Into<String>,
        content: impl Into<String>,
        reply_author: impl Into<String>,
        reply: impl FnOnce(usize) -> String,
    ) -> (usize, usize) {
        let mut entries = self.entries.write();
        let user_id = entries.len();
        entries.push(Entry {
            message: Message {
                id: user_id,
                author: author.into(),
                content: content.into(),
            },
            resolved: false,
        });

        let reply_id = entries.len();
        let reply_content = reply(reply_id);
        entries.push(Entry {
            message: Message {
                id: reply_id,
                author: reply_author.into(),
                content: reply_content,
            },
            resolved: false,
        });
        (user_id, reply_id)
    }

    pub fn update(&self, id: usize, content: impl Into<String>) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id).ok_or(AppError::MessageNotFound(id))?;
        entry.message.content = content.into();
        Ok(())
    }

    /// Overwrite a placeholder with its final content, once.
    ///
    /// Returns `Ok(true)` if this call applied the content, `Ok(false)` if the
    /// message was already resolved by an earlier call.
    pub fn resolve(&self, id: usize, content: impl Into<String>) -> Result<bool> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id).ok_or(AppError::MessageNotFound(id))?;
        if entry.resolved {
            return Ok(false);
        }
        entry.message.content = content.into();
        entry.resolved = true;
        Ok(true)
    }

    pub fn get(&self, id: usize) -> Option<Message> {
        self.entries.read().get(id).map(|e| e.message.clone())
    }

    pub fn all(&self) -> Vec<Message> {
        self.entries.read().iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// --- Rendering ---

/// User-visible echo of a submission: the text, then the attached file names.
pub fn render_submission(content: &str, file_names: &[String]) -> String {
    let text = content.trim();
    if file_names.is_empty() {
        return text.to_string();
    }

    let mut listing = String::from("Files:<br>");
    for name in file_names {
        listing.push_str(name);
        listing.push_str("<br>");
    }

    if text.is_empty() {
        listing
    } else {
        format!("{}<br><br>{}", text, listing)
    }
}

pub fn render_pending(job_id: &str) -> String {
    format!("Processing request #{}", job_id)
}

/// Final content of a placeholder once its job is done.
pub fn render_results(results: &ClassificationResponse) -> String {
    let mut out = String::from("<b>Here are the results of your request:</b><br>");
    for result in &results.results {
        out.push_str(&format!("<br>{}<br>", result.original_text));
        out.push_str(&format!("<br>Classified as: <b>{}</b><br>", result.classification));
        out.push_str(&format!("<br>Suggested reply:<br><br>{}<br>", result.suggestion));
    }
    out
}

pub fn render_failure(job_id: &str, error: &str) -> String {
    format!("<b>Request #{} could not be processed.</b><br><br>{}", job_id, error)
}
