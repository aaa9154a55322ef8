//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use transcode_conductor::config::StorageConfig;
use transcode_conductor::error::ResolveError;
use transcode_conductor::library::{self, Library, Manifest, RemoteStream, Tier};
use transcode_conductor::resolve::{ChannelResolver, ResolvedChannel};
use transcode_conductor::taskqueue;

pub const KNOWN_CHANNEL: &str = "lbry://@specialoperationstest#3";
pub const KNOWN_CLAIM_ID: &str = "395b0f23dcd07212c3e956b697ba5ba89578ca54";

/// Resolver answering from a fixture instead of the upstream network.
pub struct StubResolver;

#[async_trait]
impl ChannelResolver for StubResolver {
    async fn resolve_channel(&self, url: &str) -> Result<ResolvedChannel, ResolveError> {
        if url == KNOWN_CHANNEL {
            Ok(ResolvedChannel {
                canonical_url: url.to_string(),
                claim_id: KNOWN_CLAIM_ID.to_string(),
            })
        } else {
            Err(ResolveError::ChannelNotFound)
        }
    }
}

/// In-memory database with the full schema applied.
pub async fn mem_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory database");
    taskqueue::init_schema(&pool).await.expect("tasks schema");
    library::init_schema(&pool).await.expect("library schema");
    pool
}

/// File-backed database, for tests that survive a simulated restart.
pub async fn file_pool(path: &std::path::Path) -> SqlitePool {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect file database");
    taskqueue::init_schema(&pool).await.expect("tasks schema");
    library::init_schema(&pool).await.expect("library schema");
    pool
}

/// Library over `storage1` with the stub resolver.
pub fn make_library(pool: SqlitePool) -> Arc<Library> {
    Arc::new(Library::new(
        pool,
        vec![StorageConfig {
            name: "storage1".to_string(),
            endpoint: None,
        }],
        Arc::new(StubResolver),
    ))
}

/// A completed stream with a two-tier ladder.
pub fn sample_stream(sd_hash: &str, tid: &str, storage: &str) -> RemoteStream {
    RemoteStream {
        sd_hash: sd_hash.to_string(),
        remote_storage: storage.to_string(),
        manifest: Some(Manifest {
            tid: tid.to_string(),
            sd_hash: sd_hash.to_string(),
            transcoded_by: "worker-1".to_string(),
            transcoded_at: Utc::now(),
            ladder: vec![
                Tier {
                    definition: "720p".to_string(),
                    width: 1280,
                    height: 720,
                    video_bitrate: 2_500_000,
                    audio_bitrate: "128k".to_string(),
                    framerate: 0,
                },
                Tier {
                    definition: "144p".to_string(),
                    width: 256,
                    height: 144,
                    video_bitrate: 100_000,
                    audio_bitrate: "64k".to_string(),
                    framerate: 15,
                },
            ],
        }),
    }
}
