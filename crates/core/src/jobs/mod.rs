//! In-process tracking of video generation jobs.
//!
//! A job is created next to its durable video record, walks through the fixed
//! [`CHECKPOINTS`] sequence in a background [`JobAdvancer`], and is evicted from
//! the [`JobRegistry`] once it has been terminal for longer than the retention
//! window.

use serde::{Deserialize, Serialize};

mod advancer;
mod registry;

pub use advancer::{simulated_output, AdvanceOutcome, JobAdvancer, RenderOutput};
pub use registry::{run_retention_sweeper, JobRegistry};

/// Progress values a job passes through, in order.
pub const CHECKPOINTS: [u8; 4] = [25, 50, 75, 100];
pub const FINAL_CHECKPOINT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Point-in-time copy of a job handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial mutation applied through [`JobRegistry::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub progress: Option<u8>,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            progress: Some(FINAL_CHECKPOINT),
            status: Some(JobStatus::Completed),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            progress: None,
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
        }
    }
}
