mod support;

use chrono::Utc;

use support::{make_library, mem_pool, sample_stream, KNOWN_CHANNEL, KNOWN_CLAIM_ID};
use transcode_conductor::error::LibraryError;
use transcode_conductor::library::ChannelPriority;

const SD_HASH: &str = "d8512cc95f1069d241d18f9e1eea4e3b70fe3124";

#[tokio::test]
async fn add_channel_resolves_claim() {
    let lib = make_library(mem_pool().await);

    let channel = lib.add_channel(KNOWN_CHANNEL, "").await.expect("add channel");
    assert_eq!(channel.claim_id, KNOWN_CLAIM_ID);
    assert_eq!(channel.url, KNOWN_CHANNEL);
    assert_eq!(channel.priority, ChannelPriority::Normal);

    let channels = lib.get_all_channels().await.expect("list channels");
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].claim_id, KNOWN_CLAIM_ID);
}

#[tokio::test]
async fn add_channel_rejects_duplicates() {
    let lib = make_library(mem_pool().await);

    lib.add_channel(KNOWN_CHANNEL, "").await.expect("first add");
    let err = lib
        .add_channel("@specialoperationstest:3", "")
        .await
        .expect_err("duplicate must fail");
    assert!(matches!(err, LibraryError::DuplicateChannel { .. }));
    assert!(err.to_string().contains("UNIQUE constraint"));
}

#[tokio::test]
async fn add_channel_unknown_handle() {
    let lib = make_library(mem_pool().await);

    let err = lib
        .add_channel("@nosuchchannelanywhere", "")
        .await
        .expect_err("unknown channel must fail");
    assert!(err.to_string().contains("channel not found"));
}

#[tokio::test]
async fn video_url_before_ingest() {
    let lib = make_library(mem_pool().await);

    let err = lib.get_video_url(SD_HASH).await.expect_err("no row yet");
    assert!(matches!(err, LibraryError::StreamNotFound));
}

#[tokio::test]
async fn add_and_get_video() {
    let lib = make_library(mem_pool().await);
    let stream = sample_stream(SD_HASH, "abc123", "storage1");
    let expected_manifest = stream.manifest.clone().unwrap();

    lib.add_remote_stream(stream).await.expect("add stream");

    let url = lib.get_video_url(SD_HASH).await.expect("url");
    assert_eq!(url, "remote://storage1/abc123/");

    let video = lib.get_video(SD_HASH).await.expect("video");
    assert_eq!(video.access_count, 1);
    let accessed_at = video.accessed_at.expect("accessed_at set");
    assert!((Utc::now() - accessed_at).num_seconds() < 2);

    // Round-trip modulo the server-stamped transcoded_at.
    assert!(video.manifest.matches(&expected_manifest));

    let again = lib.get_video(SD_HASH).await.expect("second read");
    assert_eq!(again.access_count, 2);
}

#[tokio::test]
async fn duplicate_stream_is_idempotent() {
    let lib = make_library(mem_pool().await);

    lib.add_remote_stream(sample_stream(SD_HASH, "abc123", "storage1"))
        .await
        .expect("first add");

    // Identical payload succeeds silently.
    lib.add_remote_stream(sample_stream(SD_HASH, "abc123", "storage1"))
        .await
        .expect("identical re-insert is a no-op");

    // A different manifest under the same hash is rejected.
    let err = lib
        .add_remote_stream(sample_stream(SD_HASH, "other-tid", "storage1"))
        .await
        .expect_err("conflicting manifest must fail");
    assert!(matches!(err, LibraryError::DuplicateStream { .. }));

    let video = lib.get_video(SD_HASH).await.expect("video");
    assert_eq!(video.manifest.tid, "abc123");
}

#[tokio::test]
async fn unknown_storage_is_rejected() {
    let lib = make_library(mem_pool().await);

    let err = lib
        .add_remote_stream(sample_stream(SD_HASH, "abc123", "storage9"))
        .await
        .expect_err("unknown storage must fail");
    assert!(matches!(err, LibraryError::StorageUnknown { .. }));
}

#[tokio::test]
async fn missing_manifest_is_rejected() {
    let lib = make_library(mem_pool().await);
    let mut stream = sample_stream(SD_HASH, "abc123", "storage1");
    stream.manifest = None;

    let err = lib
        .add_remote_stream(stream)
        .await
        .expect_err("missing manifest must fail");
    assert!(matches!(err, LibraryError::MissingManifest));
}
