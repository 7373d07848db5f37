//! Record persistence for the catalogue.
//!
//! `VideoRecord` is the only entity. The `RecordStore` trait is the narrow
//! contract the service layer depends on; `MetadataStore` implements it on top
//! of a local libsql (SQLite-compatible) database.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

/// One catalogue entry. `id`, `media_url` and `external_id` are written once at
/// creation and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub media_url: String,
    pub external_id: String,
    #[serde(default)]
    pub thumbnail_url: String,
    /// Missing counters are read as zero.
    #[serde(default)]
    pub views: u64,
    pub created_at: DateTime<Utc>,
}

/// Editable metadata supplied on upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDraft {
    pub title: String,
    pub description: String,
    pub duration: String,
    pub category: String,
    pub subcategory: String,
}

/// Partial metadata update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

impl VideoPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.duration.is_none()
            && self.category.is_none()
            && self.subcategory.is_none()
    }
}

/// Exact-match filter for `list`. Empty strings are treated as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl ListFilter {
    pub fn is_empty(&self) -> bool {
        self.category().is_none() && self.subcategory().is_none()
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref().filter(|value| !value.is_empty())
    }

    fn subcategory(&self) -> Option<&str> {
        self.subcategory.as_deref().filter(|value| !value.is_empty())
    }
}

/// Where the media bytes of a record live, as reported by the media origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub media_url: String,
    pub thumbnail_url: String,
    pub external_id: String,
}

/// Persistence contract consumed by the service layer. `Ok(None)` means the
/// id does not exist.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<VideoRecord>>;
    async fn get(&self, id: &str) -> Result<Option<VideoRecord>>;
    async fn create(&self, draft: &VideoDraft, media: &MediaRef) -> Result<VideoRecord>;
    async fn update(&self, id: &str, patch: &VideoPatch) -> Result<Option<VideoRecord>>;
    /// Removes the record and hands it back so its media can be released.
    async fn delete(&self, id: &str) -> Result<Option<VideoRecord>>;
    async fn increment_view(&self, id: &str) -> Result<Option<u64>>;
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            duration TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            subcategory TEXT NOT NULL DEFAULT '',
            media_url TEXT NOT NULL,
            external_id TEXT NOT NULL,
            thumbnail_url TEXT NOT NULL DEFAULT '',
            views INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_videos_category ON videos(category, subcategory);
        CREATE INDEX IF NOT EXISTS idx_videos_created_at ON videos(created_at);
        "#,
    )
    .await?;
    Ok(())
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, title, description, duration, category, subcategory,
           media_url, external_id, thumbnail_url, views, created_at
    FROM videos
"#;

/// libsql-backed record store. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Opens (and if necessary creates) the database and ensures the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Changes whenever another connection commits a write; used to invalidate
    /// in-memory snapshots.
    pub async fn data_version(&self) -> Result<i64> {
        let mut rows = self.conn.query("PRAGMA data_version", params![]).await?;
        let row = rows
            .next()
            .await?
            .context("missing data_version row")?;
        Ok(row.get(0)?)
    }

    /// Removes every record. Returns how many were deleted.
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.conn.execute("DELETE FROM videos", params![]).await?;
        Ok(removed)
    }

    /// Inserts a fixture record with a preset view count.
    pub async fn insert_seeded(
        &self,
        draft: &VideoDraft,
        media: &MediaRef,
        views: u64,
    ) -> Result<VideoRecord> {
        self.insert(draft, media, views, Utc::now()).await
    }

    async fn insert(
        &self,
        draft: &VideoDraft,
        media: &MediaRef,
        views: u64,
        created_at: DateTime<Utc>,
    ) -> Result<VideoRecord> {
        let record = VideoRecord {
            id: uuid::Uuid::new_v4().to_string(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            duration: draft.duration.clone(),
            category: draft.category.clone(),
            subcategory: draft.subcategory.clone(),
            media_url: media.media_url.clone(),
            external_id: media.external_id.clone(),
            thumbnail_url: media.thumbnail_url.clone(),
            views,
            // Stored with microsecond precision; keep the returned copy equal.
            created_at: created_at.trunc_subsecs(6),
        };

        self.conn
            .execute(
                r#"
                INSERT INTO videos (
                    id, title, description, duration, category, subcategory,
                    media_url, external_id, thumbnail_url, views, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    record.id.as_str(),
                    record.title.as_str(),
                    record.description.as_str(),
                    record.duration.as_str(),
                    record.category.as_str(),
                    record.subcategory.as_str(),
                    record.media_url.as_str(),
                    record.external_id.as_str(),
                    record.thumbnail_url.as_str(),
                    i64::try_from(views).unwrap_or(i64::MAX),
                    format_timestamp(&record.created_at),
                ],
            )
            .await
            .with_context(|| format!("inserting video {}", record.id))?;

        Ok(record)
    }

    async fn fetch_single(&self, id: &str) -> Result<Option<VideoRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video_record(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RecordStore for MetadataStore {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<VideoRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                r#"
                {SELECT_COLUMNS}
                WHERE (?1 IS NULL OR category = ?1)
                  AND (?2 IS NULL OR subcategory = ?2)
                ORDER BY created_at DESC, rowid DESC
                "#
            ))
            .await?;

        let mut rows = stmt
            .query(params![filter.category(), filter.subcategory()])
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_video_record(&row)?);
        }
        Ok(records)
    }

    async fn get(&self, id: &str) -> Result<Option<VideoRecord>> {
        self.fetch_single(id).await
    }

    async fn create(&self, draft: &VideoDraft, media: &MediaRef) -> Result<VideoRecord> {
        self.insert(draft, media, 0, Utc::now()).await
    }

    async fn update(&self, id: &str, patch: &VideoPatch) -> Result<Option<VideoRecord>> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE videos SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    duration = COALESCE(?4, duration),
                    category = COALESCE(?5, category),
                    subcategory = COALESCE(?6, subcategory)
                WHERE id = ?1
                "#,
                params![
                    id,
                    patch.title.as_deref(),
                    patch.description.as_deref(),
                    patch.duration.as_deref(),
                    patch.category.as_deref(),
                    patch.subcategory.as_deref(),
                ],
            )
            .await
            .with_context(|| format!("updating video {id}"))?;

        if changed == 0 {
            return Ok(None);
        }
        self.fetch_single(id).await
    }

    async fn delete(&self, id: &str) -> Result<Option<VideoRecord>> {
        let Some(record) = self.fetch_single(id).await? else {
            return Ok(None);
        };
        let removed = self
            .conn
            .execute("DELETE FROM videos WHERE id = ?1", params![id])
            .await
            .with_context(|| format!("deleting video {id}"))?;
        // A concurrent delete may have won between the read and the write.
        if removed == 0 {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn increment_view(&self, id: &str) -> Result<Option<u64>> {
        let mut rows = self
            .conn
            .query(
                "UPDATE videos SET views = views + 1 WHERE id = ?1 RETURNING views",
                params![id],
            )
            .await
            .with_context(|| format!("incrementing views of {id}"))?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let views: i64 = row.get(0)?;
        Ok(Some(views.max(0) as u64))
    }
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Converts a SQL row into a `VideoRecord`. Column order must match
/// `SELECT_COLUMNS`. NULL or negative view counters load as zero.
fn row_to_video_record(row: &Row) -> Result<VideoRecord> {
    let views: Option<i64> = row.get(9)?;
    let created_raw: String = row.get(10)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .with_context(|| format!("parsing stored timestamp {created_raw}"))?
        .with_timezone(&Utc);

    Ok(VideoRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        duration: row.get(3)?,
        category: row.get(4)?,
        subcategory: row.get(5)?,
        media_url: row.get(6)?,
        external_id: row.get(7)?,
        thumbnail_url: row.get(8)?,
        views: views.unwrap_or(0).max(0) as u64,
        created_at,
    })
}
