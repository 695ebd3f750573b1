//! Durable video records.
//!
//! The job tracker only talks to [`VideoStore`]; the SQLite and in-memory
//! adapters own the actual layout.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, StorageBackend};

mod memory;
mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryVideoStore;
pub use sqlite::SqliteVideoStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub template_id: String,
    pub settings: serde_json::Value,
    pub owner_id: String,
    pub status: VideoStatus,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewVideoRecord {
    pub title: String,
    pub description: Option<String>,
    pub template_id: String,
    pub settings: serde_json::Value,
    pub owner_id: String,
    pub status: VideoStatus,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoRecordUpdate {
    pub status: Option<VideoStatus>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<u32>,
}

impl VideoRecordUpdate {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn apply_to(&self, record: &mut VideoRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(url) = &self.url {
            record.url = Some(url.clone());
        }
        if let Some(thumbnail_url) = &self.thumbnail_url {
            record.thumbnail_url = Some(thumbnail_url.clone());
        }
        if let Some(duration_secs) = self.duration_secs {
            record.duration_secs = Some(duration_secs);
        }
        record.updated_at = now;
    }
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Persists a new record and returns its id.
    async fn create_record(&self, record: NewVideoRecord) -> Result<String>;

    async fn find_record_by_id(&self, id: &str) -> Result<Option<VideoRecord>>;

    async fn find_record_by_id_and_owner(
        &self,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<VideoRecord>>;

    /// Returns the updated record, or `None` when no record has this id.
    async fn update_record_by_id(
        &self,
        id: &str,
        update: VideoRecordUpdate,
    ) -> Result<Option<VideoRecord>>;

    /// Records owned by `owner_id`, newest first.
    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<VideoRecord>>;
}

pub fn open_store(config: &AppConfig, data_dir: &Path) -> Result<Arc<dyn VideoStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = SqliteVideoStore::open(&config.database_path(data_dir))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryVideoStore::new())),
    }
}
