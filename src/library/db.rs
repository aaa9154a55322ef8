//! Library schema and row mapping.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{Channel, ChannelPriority, Manifest, Video};
use crate::error::LibraryError;

/// Creates the catalog schema. Idempotent, performed once at start.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), LibraryError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            claim_id TEXT NOT NULL UNIQUE,
            priority TEXT NOT NULL DEFAULT 'normal',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sd_hash TEXT NOT NULL UNIQUE,
            remote_storage TEXT NOT NULL,
            manifest TEXT NOT NULL,
            created_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            accessed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct VideoRow {
    pub id: i64,
    pub sd_hash: String,
    pub remote_storage: String,
    pub manifest: String,
    pub created_at: DateTime<Utc>,
    pub access_count: i64,
    pub accessed_at: Option<DateTime<Utc>>,
}

impl VideoRow {
    pub fn into_video(self) -> Result<Video, LibraryError> {
        let manifest: Manifest = serde_json::from_str(&self.manifest)
            .map_err(|e| LibraryError::SerializationFailed(e.to_string()))?;
        Ok(Video {
            id: self.id,
            sd_hash: self.sd_hash,
            remote_storage: self.remote_storage,
            manifest,
            created_at: self.created_at,
            access_count: self.access_count,
            accessed_at: self.accessed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct ChannelRow {
    pub id: i64,
    pub url: String,
    pub claim_id: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel, LibraryError> {
        let priority = ChannelPriority::parse(&self.priority)
            .ok_or_else(|| LibraryError::UnknownPriority(self.priority.clone()))?;
        Ok(Channel {
            id: self.id,
            url: self.url,
            claim_id: self.claim_id,
            priority,
            created_at: self.created_at,
        })
    }
}
