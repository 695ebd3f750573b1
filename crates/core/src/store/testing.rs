//! Fault-injecting store used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{MemoryVideoStore, NewVideoRecord, VideoRecord, VideoRecordUpdate, VideoStore};

#[derive(Default)]
pub(crate) struct FlakyVideoStore {
    inner: MemoryVideoStore,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    fail_next_updates: AtomicUsize,
    update_calls: AtomicUsize,
    forgotten: dashmap::DashSet<String>,
}

impl FlakyVideoStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_updates(&self, count: usize) {
        self.fail_next_updates.store(count, Ordering::SeqCst);
    }

    /// Makes the record invisible, as if it had been deleted out of band.
    pub(crate) fn forget(&self, id: &str) {
        self.forgotten.insert(id.to_string());
    }

    pub(crate) fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn visible(&self, record: Option<VideoRecord>) -> Option<VideoRecord> {
        record.filter(|record| !self.forgotten.contains(&record.id))
    }
}

#[async_trait]
impl VideoStore for FlakyVideoStore {
    async fn create_record(&self, record: NewVideoRecord) -> Result<String> {
        if self.fail_creates.load(Ordering::SeqCst) {
            bail!("injected create failure");
        }
        self.inner.create_record(record).await
    }

    async fn find_record_by_id(&self, id: &str) -> Result<Option<VideoRecord>> {
        Ok(self.visible(self.inner.find_record_by_id(id).await?))
    }

    async fn find_record_by_id_and_owner(
        &self,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<VideoRecord>> {
        Ok(self.visible(self.inner.find_record_by_id_and_owner(id, owner_id).await?))
    }

    async fn update_record_by_id(
        &self,
        id: &str,
        update: VideoRecordUpdate,
    ) -> Result<Option<VideoRecord>> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let scheduled_failure = self
            .fail_next_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled_failure || self.fail_updates.load(Ordering::SeqCst) {
            bail!("injected update failure");
        }

        if self.forgotten.contains(id) {
            return Ok(None);
        }
        self.inner.update_record_by_id(id, update).await
    }

    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<VideoRecord>> {
        let records = self.inner.list_records_by_owner(owner_id).await?;
        Ok(records
            .into_iter()
            .filter(|record| !self.forgotten.contains(&record.id))
            .collect())
    }
}
