//! Accept-and-track entry points for video generation.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::JobsConfig;
use crate::jobs::{
    run_retention_sweeper, simulated_output, JobAdvancer, JobRegistry, JobSnapshot,
};
use crate::store::{NewVideoRecord, VideoRecord, VideoRecordUpdate, VideoStatus, VideoStore};
use crate::templates::{Template, TemplateCatalog};

pub const CANCELLED_ERROR: &str = "generation cancelled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductData {
    pub name: String,
    pub price: f64,
    pub images: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub template_id: String,
    pub product: ProductData,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

pub struct GenerationService {
    registry: Arc<JobRegistry>,
    store: Arc<dyn VideoStore>,
    templates: TemplateCatalog,
    config: JobsConfig,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl GenerationService {
    pub fn new(store: Arc<dyn VideoStore>, templates: TemplateCatalog, config: JobsConfig) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            store,
            templates,
            config,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn get_available_templates(&self) -> &[Template] {
        self.templates.all()
    }

    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    /// Creates the video record, registers a job for it, and starts the
    /// advancer without waiting for it. A record-creation failure is returned
    /// before any job exists.
    pub async fn start_video_generation(
        &self,
        request: GenerationRequest,
        user_id: &str,
    ) -> Result<String> {
        let template = self.templates.find(&request.template_id);
        let template_label = template
            .map(|t| t.name.as_str())
            .unwrap_or(request.template_id.as_str());
        let duration_secs = template.map(|t| t.duration_secs).unwrap_or_default();

        let video_id = self
            .store
            .create_record(NewVideoRecord {
                title: format!("{} · {}", request.product.name.trim(), template_label),
                description: request.product.description.clone(),
                template_id: request.template_id.clone(),
                settings: request
                    .settings
                    .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
                owner_id: user_id.to_string(),
                status: VideoStatus::Processing,
            })
            .await
            .context("failed to create video record")?;

        let job_id = self.registry.create(&video_id);
        let cancel = self
            .registry
            .cancel_token(&job_id)
            .context("job vanished right after registration")?;

        let advancer = JobAdvancer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            job_id.clone(),
            video_id.clone(),
            simulated_output(&self.config.output_base_url, &video_id, duration_secs),
            cancel,
        )
        .with_interval(self.config.checkpoint_interval());

        let job_id_for_task = job_id.clone();
        self.tracker.spawn(async move {
            let outcome = advancer.run().await;
            debug!(job_id = %job_id_for_task, ?outcome, "Generation advancer finished");
        });

        info!(
            job_id = %job_id,
            video_id = %video_id,
            template_id = %request.template_id,
            user_id,
            "Video generation started"
        );

        Ok(job_id)
    }

    /// Returns the job only when its video record belongs to `user_id`.
    ///
    /// Unknown jobs and jobs owned by someone else both come back as `None`.
    /// Callers must not turn the second case into a distinct "forbidden"
    /// answer; that would reveal which job ids exist.
    pub async fn get_generation_status(
        &self,
        job_id: &str,
        user_id: &str,
    ) -> Result<Option<JobSnapshot>> {
        let Some(snapshot) = self.registry.get(job_id) else {
            return Ok(None);
        };

        if !self.owns(&snapshot, user_id).await? {
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    /// Fails a processing job on behalf of its owner and stops its advancer.
    /// Same visibility rules as [`Self::get_generation_status`].
    pub async fn cancel_generation(
        &self,
        job_id: &str,
        user_id: &str,
    ) -> Result<Option<JobSnapshot>> {
        let Some(snapshot) = self.registry.get(job_id) else {
            return Ok(None);
        };
        if !self.owns(&snapshot, user_id).await? {
            return Ok(None);
        }
        if snapshot.status.is_terminal() {
            return Ok(Some(snapshot));
        }

        let Some(cancelled) = self.registry.cancel(job_id, CANCELLED_ERROR) else {
            return Ok(None);
        };

        if let Some(video_id) = cancelled.video_id.as_deref() {
            let update = VideoRecordUpdate::status(VideoStatus::Failed);
            if let Err(err) = self.store.update_record_by_id(video_id, update).await {
                warn!(job_id, video_id, error = %err, "Failed to mark cancelled video record");
            }
        }

        info!(job_id, user_id, "Video generation cancelled");
        Ok(Some(cancelled))
    }

    pub async fn list_videos(&self, user_id: &str) -> Result<Vec<VideoRecord>> {
        self.store
            .list_records_by_owner(user_id)
            .await
            .with_context(|| format!("failed to list videos for user {user_id}"))
    }

    pub fn spawn_retention_sweeper(&self) {
        self.tracker.spawn(run_retention_sweeper(
            Arc::clone(&self.registry),
            self.config.retention(),
            self.config.sweep_interval(),
            self.shutdown.clone(),
        ));
    }

    /// Stops the sweeper and every advancer, then waits for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.cancel_all();
        self.tracker.close();
        self.tracker.wait().await;
        info!(remaining_jobs = self.registry.len(), "Generation service stopped");
    }

    async fn owns(&self, snapshot: &JobSnapshot, user_id: &str) -> Result<bool> {
        let Some(video_id) = snapshot.video_id.as_deref() else {
            return Ok(false);
        };

        let record = self
            .store
            .find_record_by_id_and_owner(video_id, user_id)
            .await
            .with_context(|| format!("failed to check ownership of job {}", snapshot.job_id))?;
        Ok(record.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use crate::store::testing::FlakyVideoStore;
    use crate::store::{MemoryVideoStore, SqliteVideoStore};
    use std::time::Duration;

    const INTERVAL_MS: u64 = 100;

    fn jobs_config() -> JobsConfig {
        JobsConfig {
            checkpoint_interval_ms: INTERVAL_MS,
            retention_secs: 0,
            sweep_interval_secs: 1,
            output_base_url: "https://cdn.test/videos".to_string(),
        }
    }

    fn service_with(store: Arc<dyn VideoStore>) -> GenerationService {
        GenerationService::new(store, TemplateCatalog::builtin(), jobs_config())
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            template_id: "product-showcase".to_string(),
            product: ProductData {
                name: "Trail Runner 2".to_string(),
                price: 129.0,
                images: vec!["https://img.test/shoe.png".to_string()],
                description: Some("Lightweight trail shoe".to_string()),
            },
            settings: Some(serde_json::json!({ "music": "upbeat" })),
        }
    }

    async fn wait_for_terminal(service: &GenerationService, job_id: &str) -> JobSnapshot {
        for _ in 0..100 {
            let snapshot = service
                .get_generation_status(job_id, "alice")
                .await
                .expect("status query")
                .expect("job visible to owner");
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(INTERVAL_MS / 2)).await;
        }
        panic!("job {job_id} did not reach a terminal status");
    }

    #[tokio::test(start_paused = true)]
    async fn new_job_is_immediately_processing_at_zero() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        let snapshot = service
            .get_generation_status(&job_id, "alice")
            .await
            .expect("status query")
            .expect("job visible");

        assert_eq!(snapshot.job_id, job_id);
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.video_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn record_is_created_with_derived_title_and_owner() {
        let store = Arc::new(MemoryVideoStore::new());
        let service = service_with(store.clone());
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        let video_id = service
            .registry()
            .get(&job_id)
            .and_then(|s| s.video_id)
            .expect("video id linked");
        let record = store
            .find_record_by_id(&video_id)
            .await
            .expect("lookup")
            .expect("record created");

        assert_eq!(record.title, "Trail Runner 2 · Product Showcase");
        assert_eq!(record.owner_id, "alice");
        assert_eq!(record.status, VideoStatus::Processing);
        assert_eq!(record.description.as_deref(), Some("Lightweight trail shoe"));
        assert_eq!(record.settings["music"], "upbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn job_completes_and_terminal_snapshot_is_stable() {
        let store = Arc::new(MemoryVideoStore::new());
        let service = service_with(store.clone());
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        let terminal = wait_for_terminal(&service, &job_id).await;
        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(terminal.progress, 100);
        assert!(terminal.error.is_none());

        tokio::time::sleep(Duration::from_millis(INTERVAL_MS * 10)).await;
        for _ in 0..3 {
            let again = service
                .get_generation_status(&job_id, "alice")
                .await
                .expect("status query");
            assert_eq!(again.as_ref(), Some(&terminal));
        }

        let video_id = terminal.video_id.expect("video id");
        let record = store
            .find_record_by_id(&video_id)
            .await
            .expect("lookup")
            .expect("record");
        assert_eq!(record.status, VideoStatus::Completed);
        assert_eq!(record.duration_secs, Some(30));
        assert_eq!(
            record.thumbnail_url,
            Some(format!("https://cdn.test/videos/{video_id}.jpg"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_and_foreign_owner_are_indistinguishable() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        let unknown = service
            .get_generation_status("no-such-job", "alice")
            .await
            .expect("status query");
        let foreign = service
            .get_generation_status(&job_id, "mallory")
            .await
            .expect("status query");
        let owned = service
            .get_generation_status(&job_id, "alice")
            .await
            .expect("status query");

        assert!(unknown.is_none());
        assert!(foreign.is_none());
        assert!(owned.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn record_creation_failure_registers_no_job() {
        let store = Arc::new(FlakyVideoStore::new());
        store.fail_creates(true);
        let service = service_with(store);

        let err = service
            .start_video_generation(request(), "alice")
            .await
            .expect_err("creation failure must propagate");

        assert!(format!("{err:#}").contains("injected create failure"));
        assert!(service.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_failure_is_reported_through_status() {
        let store = Arc::new(FlakyVideoStore::new());
        store.fail_updates(true);
        let service = service_with(store);
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        let terminal = wait_for_terminal(&service, &job_id).await;

        assert_eq!(terminal.status, JobStatus::Failed);
        assert_eq!(terminal.progress, 75);
        assert!(terminal.error.as_deref().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_respects_ownership_and_fails_record() {
        let store = Arc::new(MemoryVideoStore::new());
        let service = service_with(store.clone());
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        let foreign = service
            .cancel_generation(&job_id, "mallory")
            .await
            .expect("cancel call");
        assert!(foreign.is_none());

        let cancelled = service
            .cancel_generation(&job_id, "alice")
            .await
            .expect("cancel call")
            .expect("job visible to owner");
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_ERROR));

        tokio::time::sleep(Duration::from_millis(INTERVAL_MS * 10)).await;
        let snapshot = service
            .get_generation_status(&job_id, "alice")
            .await
            .expect("status query");
        assert_eq!(snapshot.as_ref(), Some(&cancelled));

        let video_id = cancelled.video_id.expect("video id");
        let record = store
            .find_record_by_id(&video_id)
            .await
            .expect("lookup")
            .expect("record");
        assert_eq!(record.status, VideoStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_finished_jobs() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        service.spawn_retention_sweeper();
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        tokio::time::sleep(Duration::from_millis(INTERVAL_MS * 4 + 2_000)).await;

        assert!(service.registry().get(&job_id).is_none());
        assert!(service
            .get_generation_status(&job_id, "alice")
            .await
            .expect("status query")
            .is_none());
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn list_videos_is_scoped_to_user() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");
        service
            .start_video_generation(request(), "bob")
            .await
            .expect("start generation");

        let videos = service.list_videos("alice").await.expect("list videos");
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].owner_id, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_advancers() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        service.spawn_retention_sweeper();
        let job_id = service
            .start_video_generation(request(), "alice")
            .await
            .expect("start generation");

        service.shutdown().await;

        let snapshot = service.registry().get(&job_id).expect("job kept");
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert!(service
            .registry()
            .cancel_token(&job_id)
            .is_some_and(|t| t.is_cancelled()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_jobs_on_sqlite_all_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteVideoStore::open(&dir.path().join("videos.db")).expect("open store");
        let config = JobsConfig {
            checkpoint_interval_ms: 20,
            ..jobs_config()
        };
        let service = GenerationService::new(Arc::new(store), TemplateCatalog::builtin(), config);

        let mut job_ids = Vec::new();
        for _ in 0..8 {
            job_ids.push(
                service
                    .start_video_generation(request(), "alice")
                    .await
                    .expect("start generation"),
            );
        }

        let mut pending = job_ids.clone();
        for _ in 0..250 {
            pending.retain(|job_id| {
                service
                    .registry()
                    .get(job_id)
                    .is_some_and(|snapshot| !snapshot.status.is_terminal())
            });
            if pending.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pending.is_empty(), "jobs still processing: {pending:?}");

        for job_id in &job_ids {
            let snapshot = service.registry().get(job_id).expect("job kept");
            assert_eq!(snapshot.status, JobStatus::Completed, "{snapshot:?}");
            assert_eq!(snapshot.progress, 100);
        }
        let videos = service.list_videos("alice").await.expect("list videos");
        assert_eq!(videos.len(), job_ids.len());
        assert!(videos.iter().all(|v| v.status == VideoStatus::Completed));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_without_video_is_owned_by_nobody() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        let orphan = JobSnapshot {
            job_id: "orphan".to_string(),
            status: JobStatus::Processing,
            progress: 0,
            video_id: None,
            error: None,
        };

        assert!(!service.owns(&orphan, "alice").await.expect("ownership check"));
    }

    #[test]
    fn available_templates_come_from_catalog() {
        let service = service_with(Arc::new(MemoryVideoStore::new()));
        assert_eq!(
            service.get_available_templates(),
            TemplateCatalog::builtin().all()
        );
    }
}
