//! In-memory job registry.
//!
//! Jobs are created by the submit endpoint and resolved exactly once by the
//! runner task spawned for them. Nothing is ever evicted: the registry grows
//! for the lifetime of the process.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::ClassificationResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

/// Wire shape: `{status, input, messageID, results, error}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub status: JobStatus,
    pub input: Vec<String>,
    #[serde(rename = "messageID")]
    pub message_id: usize,
    pub results: Option<ClassificationResponse>,
    pub error: Option<String>,
    #[serde(skip, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(input: Vec<String>, message_id: usize) -> Self {
        Self {
            status: JobStatus::Pending,
            input,
            message_id,
            results: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Wall-clock time from creation to resolution, if resolved.
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.created_at).num_microseconds().unwrap_or(0) as f64 / 1000.0)
    }
}

#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<String, Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending job and return its id.
    pub fn create(&self, input: Vec<String>, message_id: usize) -> String {
        let id = Uuid::new_v4().to_string();
        self.jobs.insert(id.clone(), Job::new(input, message_id));
        id
    }

    /// Snapshot of a job; `None` for ids that were never created.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Count jobs per status, for metrics.
    pub fn status_counts(&self) -> [(JobStatus, usize); 4] {
        let mut counts = [
            (JobStatus::Pending, 0),
            (JobStatus::Processing, 0),
            (JobStatus::Done, 0),
            (JobStatus::Error, 0),
        ];
        for entry in self.jobs.iter() {
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == entry.status) {
                slot.1 += 1;
            }
        }
        counts
    }

    pub(crate) fn start(&self, id: &str) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                true
            }
            _ => false,
        }
    }

    /// Store results and mark done. Refuses to touch an already resolved job.
    pub(crate) fn complete(&self, id: &str, results: ClassificationResponse) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if !job.status.is_terminal() => {
                job.results = Some(results);
                job.status = JobStatus::Done;
                job.finished_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn fail(&self, id: &str, error: String) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if !job.status.is_terminal() => {
                job.error = Some(error);
                job.status = JobStatus::Error;
                job.finished_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }
}
