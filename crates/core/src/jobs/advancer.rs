use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{JobRegistry, JobUpdate, CHECKPOINTS, FINAL_CHECKPOINT};
use crate::store::{VideoRecordUpdate, VideoStatus, VideoStore};

const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(2);

/// Output written to the video record when a job completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub url: String,
    pub thumbnail_url: String,
    pub duration_secs: u32,
}

/// Rendering is simulated; outputs are derived from the video id.
pub fn simulated_output(base_url: &str, video_id: &str, duration_secs: u32) -> RenderOutput {
    let base_url = base_url.trim_end_matches('/');
    RenderOutput {
        url: format!("{base_url}/{video_id}.mp4"),
        thumbnail_url: format!("{base_url}/{video_id}.jpg"),
        duration_secs,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Completed,
    Failed,
    /// The job's token fired; whoever cancelled it owns the final status.
    Cancelled,
    /// The registry entry disappeared between checkpoints.
    Evicted,
}

/// Walks one job through [`CHECKPOINTS`] and reconciles the video record on
/// completion. Exactly one advancer exists per job id.
pub struct JobAdvancer {
    registry: Arc<JobRegistry>,
    store: Arc<dyn VideoStore>,
    job_id: String,
    video_id: String,
    output: RenderOutput,
    interval: Duration,
    cancel: CancellationToken,
}

impl JobAdvancer {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn VideoStore>,
        job_id: String,
        video_id: String,
        output: RenderOutput,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            job_id,
            video_id,
            output,
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            cancel,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self) -> AdvanceOutcome {
        for checkpoint in CHECKPOINTS {
            if let Some(stopped) = self.wait_for_checkpoint().await {
                return stopped;
            }
            if checkpoint == FINAL_CHECKPOINT {
                break;
            }

            self.registry
                .update(&self.job_id, JobUpdate::progress(checkpoint));
            debug!(job_id = %self.job_id, progress = checkpoint, "Generation checkpoint reached");
        }

        self.complete().await
    }

    async fn wait_for_checkpoint(&self) -> Option<AdvanceOutcome> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(job_id = %self.job_id, "Generation advancer cancelled");
                return Some(AdvanceOutcome::Cancelled);
            }
            _ = tokio::time::sleep(self.interval) => {}
        }

        if self.registry.get(&self.job_id).is_none() {
            debug!(job_id = %self.job_id, "Generation job no longer registered; stopping advancer");
            return Some(AdvanceOutcome::Evicted);
        }

        None
    }

    /// The durable write lands first while the job still reads as processing;
    /// progress 100 and `completed` are then published in one registry update.
    async fn complete(&self) -> AdvanceOutcome {
        let update = VideoRecordUpdate {
            status: Some(VideoStatus::Completed),
            url: Some(self.output.url.clone()),
            thumbnail_url: Some(self.output.thumbnail_url.clone()),
            duration_secs: Some(self.output.duration_secs),
        };

        match self.store.update_record_by_id(&self.video_id, update).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return self
                    .fail(format!("video record {} no longer exists", self.video_id))
                    .await;
            }
            Err(err) => {
                return self
                    .fail(format!("failed to finalize video record: {err:#}"))
                    .await;
            }
        }

        if self.registry.update(&self.job_id, JobUpdate::completed()) {
            info!(job_id = %self.job_id, video_id = %self.video_id, "Video generation completed");
            return AdvanceOutcome::Completed;
        }

        if self.cancel.is_cancelled() {
            // Cancelled while the record was being finalized; keep the record
            // consistent with the failed job.
            self.mark_record_failed().await;
            AdvanceOutcome::Cancelled
        } else {
            AdvanceOutcome::Evicted
        }
    }

    async fn fail(&self, reason: String) -> AdvanceOutcome {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            error = %reason,
            "Video generation failed"
        );
        self.registry
            .update(&self.job_id, JobUpdate::failed(reason));
        self.mark_record_failed().await;
        AdvanceOutcome::Failed
    }

    async fn mark_record_failed(&self) {
        let update = VideoRecordUpdate::status(VideoStatus::Failed);
        if let Err(err) = self.store.update_record_by_id(&self.video_id, update).await {
            warn!(
                video_id = %self.video_id,
                error = %err,
                "Failed to mark video record as failed"
            );
        }
    }
}
