use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{NewVideoRecord, VideoRecord, VideoRecordUpdate, VideoStore};

/// Process-local record store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryVideoStore {
    records: DashMap<String, VideoRecord>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn create_record(&self, record: NewVideoRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.records.insert(
            id.clone(),
            VideoRecord {
                id: id.clone(),
                title: record.title,
                description: record.description,
                template_id: record.template_id,
                settings: record.settings,
                owner_id: record.owner_id,
                status: record.status,
                url: None,
                thumbnail_url: None,
                duration_secs: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn find_record_by_id(&self, id: &str) -> Result<Option<VideoRecord>> {
        Ok(self.records.get(id).map(|record| record.value().clone()))
    }

    async fn find_record_by_id_and_owner(
        &self,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<VideoRecord>> {
        Ok(self
            .records
            .get(id)
            .filter(|record| record.owner_id == owner_id)
            .map(|record| record.value().clone()))
    }

    async fn update_record_by_id(
        &self,
        id: &str,
        update: VideoRecordUpdate,
    ) -> Result<Option<VideoRecord>> {
        Ok(self.records.get_mut(id).map(|mut record| {
            update.apply_to(record.value_mut(), Utc::now());
            record.value().clone()
        }))
    }

    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<VideoRecord>> {
        let mut records: Vec<VideoRecord> = self
            .records
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }
}
