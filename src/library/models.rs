//! Library catalog entities and remote stream payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single resolution/bitrate row in the encoding ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Human-readable tier name, e.g. "720p".
    pub definition: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u64,
    /// Audio bitrate in encoder notation, e.g. "96k".
    pub audio_bitrate: String,
    /// Output framerate. Zero follows the source.
    #[serde(default)]
    pub framerate: u32,
}

/// JSON descriptor of a completed remote stream. Schema is pinned, the
/// document is stored verbatim in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub tid: String,
    pub sd_hash: String,
    /// Worker that produced the stream.
    pub transcoded_by: String,
    /// Stamped by the library at ingestion time.
    pub transcoded_at: DateTime<Utc>,
    pub ladder: Vec<Tier>,
}

impl Manifest {
    /// Equality modulo the server-stamped `transcoded_at`.
    pub fn matches(&self, other: &Manifest) -> bool {
        self.tid == other.tid
            && self.sd_hash == other.sd_hash
            && self.transcoded_by == other.transcoded_by
            && self.ladder == other.ladder
    }
}

/// A completed stream reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStream {
    pub sd_hash: String,
    /// Logical storage name the stream was uploaded to.
    pub remote_storage: String,
    /// Missing manifests are treated as task errors, never ingested.
    pub manifest: Option<Manifest>,
}

impl RemoteStream {
    /// Derived playback URL, `remote://<storage>/<tid>/`.
    pub fn url(&self) -> Option<String> {
        self.manifest
            .as_ref()
            .map(|m| format!("remote://{}/{}/", self.remote_storage, m.tid))
    }
}

/// A catalog row mapping a source hash to its transcoded manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub sd_hash: String,
    pub remote_storage: String,
    pub manifest: Manifest,
    pub created_at: DateTime<Utc>,
    /// Number of reads, monotonically non-decreasing.
    pub access_count: i64,
    pub accessed_at: Option<DateTime<Utc>>,
}

impl Video {
    /// Playback URL for this video.
    pub fn url(&self) -> String {
        format!("remote://{}/{}/", self.remote_storage, self.manifest.tid)
    }
}

/// Scheduling priority of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl ChannelPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content channel enabled for transcoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    /// Canonical channel URL.
    pub url: String,
    /// Claim identifier resolved against the upstream network.
    pub claim_id: String,
    pub priority: ChannelPriority,
    pub created_at: DateTime<Utc>,
}
