use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use super::{NewVideoRecord, VideoRecord, VideoRecordUpdate, VideoStatus, VideoStore};

const STATUS_PROCESSING: &str = "processing";
const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";

const SELECT_COLUMNS: &str = "SELECT
        id,
        title,
        description,
        template_id,
        settings_json,
        owner_id,
        status,
        url,
        thumbnail_url,
        duration_secs,
        created_at,
        updated_at
     FROM videos";

#[derive(Debug)]
struct PersistedVideoRow {
    id: String,
    title: String,
    description: Option<String>,
    template_id: String,
    settings_json: String,
    owner_id: String,
    status: String,
    url: Option<String>,
    thumbnail_url: Option<String>,
    duration_secs: Option<u32>,
    created_at: String,
    updated_at: String,
}

impl PersistedVideoRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            template_id: row.get(3)?,
            settings_json: row.get(4)?,
            owner_id: row.get(5)?,
            status: row.get(6)?,
            url: row.get(7)?,
            thumbnail_url: row.get(8)?,
            duration_secs: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<VideoRecord> {
        let status = parse_status(&self.status)
            .with_context(|| format!("unknown persisted video status: {}", self.status))?;
        let settings = serde_json::from_str(&self.settings_json)
            .with_context(|| format!("invalid settings snapshot for video {}", self.id))?;

        Ok(VideoRecord {
            status,
            settings,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            title: self.title,
            description: self.description,
            template_id: self.template_id,
            owner_id: self.owner_id,
            url: self.url,
            thumbnail_url: self.thumbnail_url,
            duration_secs: self.duration_secs,
        })
    }
}

/// SQLite-backed record store. Each operation opens its own connection on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteVideoStore {
    db_path: PathBuf,
}

impl SqliteVideoStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create directory for videos db: {}",
                    parent.display()
                )
            })?;
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS videos (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    template_id TEXT NOT NULL,
                    settings_json TEXT NOT NULL,
                    owner_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    url TEXT,
                    thumbnail_url TEXT,
                    duration_secs INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_videos_owner_id ON videos(owner_id);
                 CREATE INDEX IF NOT EXISTS idx_videos_created_at ON videos(created_at DESC);",
            )
            .with_context(|| {
                format!(
                    "failed to initialize videos schema: {}",
                    self.db_path.display()
                )
            })?;
            Ok(())
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open videos db: {}", self.db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("failed to set videos db busy timeout")?;
        op(&mut conn)
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_connection(op))
            .await
            .context("videos db task failed to complete")?
    }
}

fn select_one(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Option<VideoRecord>> {
    conn.query_row(sql, args, PersistedVideoRow::from_row)
        .optional()?
        .map(PersistedVideoRow::into_record)
        .transpose()
}

fn write_record(conn: &Connection, record: &VideoRecord) -> Result<()> {
    let settings_json =
        serde_json::to_string(&record.settings).context("failed to serialize video settings")?;

    conn.execute(
        "INSERT INTO videos (
            id,
            title,
            description,
            template_id,
            settings_json,
            owner_id,
            status,
            url,
            thumbnail_url,
            duration_secs,
            created_at,
            updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            template_id = excluded.template_id,
            settings_json = excluded.settings_json,
            owner_id = excluded.owner_id,
            status = excluded.status,
            url = excluded.url,
            thumbnail_url = excluded.thumbnail_url,
            duration_secs = excluded.duration_secs,
            updated_at = excluded.updated_at",
        params![
            record.id,
            record.title,
            record.description,
            record.template_id,
            settings_json,
            record.owner_id,
            status_to_str(record.status),
            record.url,
            record.thumbnail_url,
            record.duration_secs,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to write video record {}", record.id))?;

    Ok(())
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    async fn create_record(&self, record: NewVideoRecord) -> Result<String> {
        let now = Utc::now();
        let record = VideoRecord {
            id: Uuid::new_v4().to_string(),
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
        };

        self.run_blocking(move |conn| {
            write_record(conn, &record)?;
            Ok(record.id)
        })
        .await
    }

    async fn find_record_by_id(&self, id: &str) -> Result<Option<VideoRecord>> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
            select_one(conn, &sql, &[&id])
        })
        .await
    }

    async fn find_record_by_id_and_owner(
        &self,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<VideoRecord>> {
        let id = id.to_string();
        let owner_id = owner_id.to_string();
        self.run_blocking(move |conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE id = ?1 AND owner_id = ?2");
            select_one(conn, &sql, &[&id, &owner_id])
        })
        .await
    }

    async fn update_record_by_id(
        &self,
        id: &str,
        update: VideoRecordUpdate,
    ) -> Result<Option<VideoRecord>> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            // Take the write lock up front; a deferred read upgraded to a
            // write fails immediately when another connection committed first.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to begin video update transaction")?;

            let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
            let Some(mut record) = select_one(&tx, &sql, &[&id])? else {
                return Ok(None);
            };

            update.apply_to(&mut record, Utc::now());
            write_record(&tx, &record)?;
            tx.commit()
                .with_context(|| format!("failed to commit update of video {id}"))?;
            Ok(Some(record))
        })
        .await
    }

    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<VideoRecord>> {
        let owner_id = owner_id.to_string();
        self.run_blocking(move |conn| {
            let sql =
                format!("{SELECT_COLUMNS} WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![owner_id], PersistedVideoRow::from_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?.into_record()?);
            }
            Ok(records)
        })
        .await
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
        .map(|ts| ts.with_timezone(&Utc))
}

fn status_to_str(status: VideoStatus) -> &'static str {
    match status {
        VideoStatus::Processing => STATUS_PROCESSING,
        VideoStatus::Completed => STATUS_COMPLETED,
        VideoStatus::Failed => STATUS_FAILED,
    }
}

fn parse_status(value: &str) -> Option<VideoStatus> {
    match value {
        STATUS_PROCESSING => Some(VideoStatus::Processing),
        STATUS_COMPLETED => Some(VideoStatus::Completed),
        STATUS_FAILED => Some(VideoStatus::Failed),
        _ => None,
    }
}
