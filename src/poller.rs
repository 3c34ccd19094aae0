//! Client-side job poller.
//!
//! Mirrors what the submission page does after a submit: the job id is
//! persisted, the page reloads, and the reloaded page picks the id back up
//! (clearing it immediately) and polls `/job/:id` until the job is terminal.
//!
//! ```text
//! Idle --page load with persisted id--> Polling --done--> Succeeded
//!                                          |
//!                                          +--error / request failure--> Failed
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{CURRENT_JOB_KEY, POLL_INTERVAL_MS};
use crate::jobs::JobStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("status request returned HTTP {0}")]
    Http(u16),

    #[error("status request failed: {0}")]
    Transport(String),

    #[error("unreadable status response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
#[error("client storage error: {0}")]
pub struct StorageError(pub String);

/// The part of the job record the poller cares about
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReply {
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str) -> Result<StatusReply, PollError>;
}

/// Key/value storage that survives a page reload
pub trait ClientStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// The UI surface driven by the poller
#[async_trait]
pub trait PageHooks: Send {
    /// Disable (busy) or re-enable the submission control.
    fn set_busy(&mut self, busy: bool);
    /// Re-render from server state.
    async fn reload(&mut self);
    fn alert(&mut self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { job_id: String },
    Succeeded { job_id: String },
    Failed { job_id: String, reason: String },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollState::Succeeded { .. } | PollState::Failed { .. })
    }
}

pub struct Poller<S, K, P> {
    source: S,
    storage: K,
    page: P,
    interval: Duration,
    state: PollState,
}

impl<S, K, P> Poller<S, K, P>
where
    S: StatusSource,
    K: ClientStorage,
    P: PageHooks,
{
    pub fn new(source: S, storage: K, page: P) -> Self {
        Self {
            source,
            storage,
            page,
            interval: Duration::from_millis(POLL_INTERVAL_MS),
            state: PollState::Idle,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn storage(&self) -> &K {
        &self.storage
    }

    /// Page-load check: consume a persisted job id and start polling for it.
    pub fn on_page_load(&mut self) -> bool {
        if matches!(self.state, PollState::Polling { .. }) {
            return true;
        }

        let Some(job_id) = self.storage.get(CURRENT_JOB_KEY) else {
            return false;
        };
        // Single use: an unrelated reload later must not resume this job
        self.clear_persisted();

        info!("[Poller] page loaded, watching job {}", job_id);
        self.state = PollState::Polling { job_id };
        self.page.set_busy(true);
        true
    }

    /// A submission was accepted: persist its id and reload the page.
    pub async fn on_submitted(&mut self, job_id: &str) -> Result<(), StorageError> {
        self.storage.set(CURRENT_JOB_KEY, job_id)?;
        self.page.reload().await;
        Ok(())
    }

    /// Apply one status response. Returns true once the poller is terminal.
    pub async fn handle_reply(&mut self, reply: Result<StatusReply, PollError>) -> bool {
        let job_id = match &self.state {
            PollState::Polling { job_id } => job_id.clone(),
            _ => return self.state.is_terminal(),
        };

        match reply {
            Ok(StatusReply { status: JobStatus::Done, .. }) => {
                info!("[Poller] job {} is done", job_id);
                self.finish();
                self.state = PollState::Succeeded { job_id };
                self.page.reload().await;
                true
            }
            Ok(StatusReply { status: JobStatus::Pending | JobStatus::Processing, .. }) => {
                debug!("[Poller] job {} still running", job_id);
                false
            }
            Ok(StatusReply { status: JobStatus::Error, error }) => {
                let reason = error.unwrap_or_else(|| "job failed".to_string());
                self.fail(job_id, reason);
                true
            }
            Err(e) => {
                self.fail(job_id, e.to_string());
                true
            }
        }
    }

    /// Poll on a fixed interval until a terminal state. The timer lives only
    /// inside this call.
    pub async fn run(&mut self) -> PollState {
        let job_id = match &self.state {
            PollState::Polling { job_id } => job_id.clone(),
            other => return other.clone(),
        };

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reply = self.source.job_status(&job_id).await;
            if self.handle_reply(reply).await {
                break;
            }
        }

        self.state.clone()
    }

    /// Page-load check followed by polling, if there was anything to resume.
    pub async fn resume(&mut self) -> PollState {
        if self.on_page_load() {
            self.run().await
        } else {
            self.state.clone()
        }
    }

    fn finish(&mut self) {
        self.page.set_busy(false);
        self.clear_persisted();
    }

    fn fail(&mut self, job_id: String, reason: String) {
        warn!("[Poller] stopped watching job {}: {}", job_id, reason);
        self.finish();
        self.page.alert(&reason);
        self.state = PollState::Failed { job_id, reason };
    }

    fn clear_persisted(&self) {
        if let Err(e) = self.storage.remove(CURRENT_JOB_KEY) {
            warn!("[Poller] {}", e);
        }
    }
}

/// Process-local storage, the equivalent of a tab that never reloads.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

impl<T: ClientStorage + ?Sized> ClientStorage for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}
