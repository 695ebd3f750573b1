use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{JobSnapshot, JobStatus, JobUpdate};

struct JobEntry {
    status: JobStatus,
    progress: u8,
    video_id: Option<String>,
    error: Option<String>,
    cancel_token: CancellationToken,
    finished_at: Option<DateTime<Utc>>,
}

impl JobEntry {
    fn snapshot(&self, job_id: &str) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.to_string(),
            status: self.status,
            progress: self.progress,
            video_id: self.video_id.clone(),
            error: self.error.clone(),
        }
    }

    /// Terminal entries are frozen and progress never moves backwards.
    fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.finished_at = Some(now);
            }
        }

        true
    }

    fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let Some(finished_at) = self.finished_at else {
            return false;
        };

        (now - finished_at)
            .to_std()
            .map(|elapsed| elapsed >= retention)
            .unwrap_or(false)
    }
}

/// Job id → status table shared by the generation service and its advancers.
///
/// Every read-modify-write happens under a single DashMap shard guard with no
/// suspension point inside, which serves as the per-job lock.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processing job at progress 0 and returns its id.
    pub fn create(&self, video_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.jobs.insert(
            id.clone(),
            JobEntry {
                status: JobStatus::Processing,
                progress: 0,
                video_id: Some(video_id.to_string()),
                error: None,
                cancel_token: CancellationToken::new(),
                finished_at: None,
            },
        );
        id
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|entry| entry.snapshot(job_id))
    }

    pub fn cancel_token(&self, job_id: &str) -> Option<CancellationToken> {
        self.jobs.get(job_id).map(|entry| entry.cancel_token.clone())
    }

    /// Applies `update` and reports whether it took effect. Unknown ids and
    /// terminal jobs are left untouched.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(mut entry) => entry.apply(update, Utc::now()),
            None => false,
        }
    }

    /// Fails a processing job with `reason` and signals its advancer.
    /// Terminal jobs are returned as they are.
    pub fn cancel(&self, job_id: &str, reason: &str) -> Option<JobSnapshot> {
        let mut entry = self.jobs.get_mut(job_id)?;
        if entry.apply(JobUpdate::failed(reason), Utc::now()) {
            entry.cancel_token.cancel();
        }
        Some(entry.snapshot(job_id))
    }

    /// Signals every advancer to stop. Statuses are left as they are.
    pub fn cancel_all(&self) {
        for entry in self.jobs.iter() {
            entry.cancel_token.cancel();
        }
    }

    /// Drops an entry without signalling its advancer; the advancer notices
    /// the missing entry at its next checkpoint.
    pub fn remove(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs
            .remove(job_id)
            .map(|(id, entry)| entry.snapshot(&id))
    }

    /// Removes terminal jobs that finished at least `retention` before `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, entry| !entry.is_expired(now, retention));
        before.saturating_sub(self.jobs.len())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Periodically evicts expired jobs until `shutdown` fires.
pub async fn run_retention_sweeper(
    registry: Arc<JobRegistry>,
    retention: Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = registry.evict_expired(Utc::now(), retention);
                if evicted > 0 {
                    info!(evicted, remaining = registry.len(), "Evicted expired generation jobs");
                }
            }
        }
    }

    debug!("Retention sweeper stopped");
}
