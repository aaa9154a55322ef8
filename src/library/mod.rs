//! Catalog of transcoded streams and enabled channels.

pub mod db;
pub mod models;

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::LibraryError;
use crate::resolve::{canonicalize_channel_url, ChannelResolver};
use db::{ChannelRow, VideoRow};
pub use db::init_schema;
pub use models::{Channel, ChannelPriority, Manifest, RemoteStream, Tier, Video};

/// Catalog of transcoded streams. Insertion is idempotent per sd hash.
pub struct Library {
    pool: SqlitePool,
    storages: Vec<StorageConfig>,
    resolver: Arc<dyn ChannelResolver>,
}

impl Library {
    pub fn new(
        pool: SqlitePool,
        storages: Vec<StorageConfig>,
        resolver: Arc<dyn ChannelResolver>,
    ) -> Self {
        Self {
            pool,
            storages,
            resolver,
        }
    }

    /// Records a completed remote stream in the catalog.
    ///
    /// Re-inserting an identical stream succeeds silently; a stream with a
    /// different manifest under the same sd hash fails with
    /// [`LibraryError::DuplicateStream`]. The manifest's `transcoded_at` is
    /// stamped here.
    pub async fn add_remote_stream(&self, stream: RemoteStream) -> Result<(), LibraryError> {
        if !self.storages.iter().any(|s| s.name == stream.remote_storage) {
            return Err(LibraryError::StorageUnknown {
                name: stream.remote_storage,
            });
        }

        let mut manifest = stream.manifest.ok_or(LibraryError::MissingManifest)?;
        manifest.transcoded_at = Utc::now();
        let manifest_json = serde_json::to_string(&manifest)
            .map_err(|e| LibraryError::SerializationFailed(e.to_string()))?;

        let res = sqlx::query(
            r#"
            INSERT INTO videos (sd_hash, remote_storage, manifest, created_at, access_count)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(&stream.sd_hash)
        .bind(&stream.remote_storage)
        .bind(&manifest_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => {
                info!(sd_hash = %stream.sd_hash, tid = %manifest.tid, "remote stream added");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing = self.fetch_video(&stream.sd_hash).await?;
                if existing.manifest.matches(&manifest) {
                    Ok(())
                } else {
                    Err(LibraryError::DuplicateStream {
                        sd_hash: stream.sd_hash,
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetches a video and records the access. `access_count` advances and
    /// `accessed_at` is set to now, atomically with the read.
    pub async fn get_video(&self, sd_hash: &str) -> Result<Video, LibraryError> {
        let row = sqlx::query_as::<_, VideoRow>(
            r#"
            UPDATE videos SET access_count = access_count + 1, accessed_at = ?
            WHERE sd_hash = ?
            RETURNING id, sd_hash, remote_storage, manifest, created_at, access_count, accessed_at
            "#,
        )
        .bind(Utc::now())
        .bind(sd_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LibraryError::StreamNotFound)?;
        row.into_video()
    }

    /// Derived playback URL. Does not count as an access.
    pub async fn get_video_url(&self, sd_hash: &str) -> Result<String, LibraryError> {
        let video = self.fetch_video(sd_hash).await?;
        Ok(video.url())
    }

    /// Enables a channel for transcoding. The URL is canonicalized and
    /// resolved against the upstream network; an empty priority defaults to
    /// [`ChannelPriority::Normal`].
    pub async fn add_channel(
        &self,
        url: &str,
        priority: &str,
    ) -> Result<Channel, LibraryError> {
        let canonical = canonicalize_channel_url(url);
        let resolved = self.resolver.resolve_channel(&canonical).await?;

        let priority = if priority.trim().is_empty() {
            ChannelPriority::Normal
        } else {
            ChannelPriority::parse(priority)
                .ok_or_else(|| LibraryError::UnknownPriority(priority.to_string()))?
        };

        let res = sqlx::query_as::<_, ChannelRow>(
            r#"
            INSERT INTO channels (url, claim_id, priority, created_at) VALUES (?, ?, ?, ?)
            RETURNING id, url, claim_id, priority, created_at
            "#,
        )
        .bind(&resolved.canonical_url)
        .bind(&resolved.claim_id)
        .bind(priority.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(row) => {
                info!(url = %resolved.canonical_url, claim_id = %resolved.claim_id, "channel added");
                row.into_channel()
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LibraryError::DuplicateChannel {
                    message: db.message().to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lists all enabled channels, newest first.
    pub async fn get_all_channels(&self) -> Result<Vec<Channel>, LibraryError> {
        let rows = sqlx::query_as::<_, ChannelRow>(
            "SELECT * FROM channels ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChannelRow::into_channel).collect()
    }

    /// Plain read without touching access metadata.
    async fn fetch_video(&self, sd_hash: &str) -> Result<Video, LibraryError> {
        sqlx::query_as::<_, VideoRow>("SELECT * FROM videos WHERE sd_hash = ?")
            .bind(sd_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LibraryError::StreamNotFound)?
            .into_video()
    }
}
