//! Durable and in-memory data shapes for monitored streams.
//!
//! Everything that leaves the process (records on the wire, event payloads,
//! metrics samples) serializes in camelCase so existing dashboard consumers
//! keep working unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a monitored stream, derived on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Online,
    Offline,
    Error,
    Stale,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Category of a ledger entry.
///
/// `SequenceJump` and `SequenceReset` are never produced by the evaluator
/// (which files both under `MediaSequence`) but remain recognized so that
/// entries written by external tooling classify correctly in the
/// sliding-window reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "Manifest Retrieval")]
    ManifestRetrieval,
    #[serde(rename = "Media Sequence")]
    MediaSequence,
    #[serde(rename = "Playlist Size")]
    PlaylistSize,
    #[serde(rename = "Playlist Content")]
    PlaylistContent,
    #[serde(rename = "Segment Continuity")]
    SegmentContinuity,
    #[serde(rename = "Discontinuity Sequence")]
    DiscontinuitySequence,
    #[serde(rename = "Stale Manifest")]
    StaleManifest,
    #[serde(rename = "SEQUENCE_JUMP")]
    SequenceJump,
    #[serde(rename = "SEQUENCE_RESET")]
    SequenceReset,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestRetrieval => write!(f, "Manifest Retrieval"),
            Self::MediaSequence => write!(f, "Media Sequence"),
            Self::PlaylistSize => write!(f, "Playlist Size"),
            Self::PlaylistContent => write!(f, "Playlist Content"),
            Self::SegmentContinuity => write!(f, "Segment Continuity"),
            Self::DiscontinuitySequence => write!(f, "Discontinuity Sequence"),
            Self::StaleManifest => write!(f, "Stale Manifest"),
            Self::SequenceJump => write!(f, "SEQUENCE_JUMP"),
            Self::SequenceReset => write!(f, "SEQUENCE_RESET"),
        }
    }
}

/// One entry in a stream's error ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamError {
    pub eid: String,
    pub date: DateTime<Utc>,
    pub error_type: ErrorKind,
    pub media_type: String,
    /// Bandwidth of the active variant as a decimal string, or "unknown".
    pub variant: String,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

/// Per-stream health bookkeeping, updated by the playlist evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHealth {
    pub is_stale: bool,
    pub last_manifest_update: Option<DateTime<Utc>>,
    /// Milliseconds since the manifest last advanced. 0 right after an update.
    pub time_since_last_update: i64,
    /// Per-stream staleness threshold in milliseconds.
    pub stale_threshold: u64,
    /// -1 until the first successful poll.
    pub media_sequence: i64,
    pub previous_media_sequence: i64,
    pub sequence_jumps: u64,
    pub sequence_resets: u64,
    pub discontinuity_sequence: i64,
    pub discontinuity_count: u64,
    pub segment_count: usize,
    pub target_duration: u64,
    pub playlist_type: String,
    pub total_errors: u64,
    /// Informational only: reset to 0 on each ledger append, never advanced.
    pub time_since_last_error: i64,
    pub last_error_time: Option<DateTime<Utc>>,
    pub recent_errors: u64,
    pub recent_sequence_jumps: u64,
    pub recent_sequence_resets: u64,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self {
            is_stale: false,
            last_manifest_update: None,
            time_since_last_update: 0,
            stale_threshold: 7000,
            media_sequence: -1,
            previous_media_sequence: -1,
            sequence_jumps: 0,
            sequence_resets: 0,
            discontinuity_sequence: 0,
            discontinuity_count: 0,
            segment_count: 0,
            target_duration: 0,
            playlist_type: "LIVE".to_string(),
            total_errors: 0,
            time_since_last_error: 0,
            last_error_time: None,
            recent_errors: 0,
            recent_sequence_jumps: 0,
            recent_sequence_resets: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStats {
    pub codec: Option<String>,
    pub profile: String,
    pub level: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub color_space: String,
    pub bitrate: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStats {
    pub codec: Option<String>,
    pub channels: u32,
    pub sample_rate: u32,
    pub bitrate: u64,
    pub peak_db: Option<f64>,
    pub avg_db: Option<f64>,
    pub channel_layout: String,
    pub is_silent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub format: String,
    pub duration: f64,
    pub size: u64,
    pub bitrate: u64,
}

/// Media characterization gathered from the master playlist and the
/// analysis pipeline. Absent sub-blocks mean "not yet probed".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub bandwidth: u64,
    pub resolution: String,
    pub fps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerStats>,
}

/// Durable record for one monitored stream. Records are created and deleted
/// externally; the monitor only mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: StreamStatus,
    pub health: StreamHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StreamStats>,
    #[serde(default)]
    pub stream_errors: Vec<StreamError>,
    /// Base64 JPEG data URL, or empty until the first sprite extraction.
    #[serde(default)]
    pub thumbnail: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic counter for optimistic concurrency, bumped by the store.
    pub version: u64,
}

impl StreamRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            status: StreamStatus::Offline,
            health: StreamHealth::default(),
            stats: None,
            stream_errors: Vec::new(),
            thumbnail: String::new(),
            last_checked: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Stats block, materializing an empty one on first touch.
    pub fn stats_mut(&mut self) -> &mut StreamStats {
        self.stats.get_or_insert_with(StreamStats::default)
    }
}

/// One health sample, appended per poll per stream. Retention is enforced
/// by the metrics store (7-day TTL on `timestamp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    pub stream_id: String,
    pub health_score: f64,
    pub video_score: f64,
    pub audio_score: f64,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub video_level: f64,
    pub audio_level: f64,
    pub fps: f64,
    pub status: StreamStatus,
    pub media_sequence: i64,
    pub segment_count: usize,
    pub error_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// Non-durable per-stream poll state, owned by the scheduler and rebuilt
/// from scratch on process restart.
#[derive(Debug, Clone, Copy)]
pub struct PollState {
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_media_sequence: i64,
    pub consecutive_stales: u32,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            last_poll_time: None,
            last_media_sequence: -1,
            consecutive_stales: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&StreamStatus::Online).unwrap(), "\"online\"");
        assert_eq!(serde_json::to_string(&StreamStatus::Stale).unwrap(), "\"stale\"");
    }

    #[test]
    fn error_kind_uses_display_names() {
        let json = serde_json::to_string(&ErrorKind::ManifestRetrieval).unwrap();
        assert_eq!(json, "\"Manifest Retrieval\"");
        let back: ErrorKind = serde_json::from_str("\"SEQUENCE_RESET\"").unwrap();
        assert_eq!(back, ErrorKind::SequenceReset);
    }

    #[test]
    fn record_serializes_camel_case() {
        let rec = StreamRecord::new("s1", "Channel 1", "https://example.com/master.m3u8");
        let value = serde_json::to_value(&rec).unwrap();
        assert!(value["health"]["isStale"].is_boolean());
        assert_eq!(value["health"]["mediaSequence"], -1);
        assert_eq!(value["health"]["playlistType"], "LIVE");
        assert_eq!(value["health"]["staleThreshold"], 7000);
        assert!(value.get("streamErrors").is_some());
        assert!(value.get("lastChecked").is_some());
    }

    #[test]
    fn default_poll_state_is_unseen() {
        let ps = PollState::default();
        assert_eq!(ps.last_media_sequence, -1);
        assert_eq!(ps.consecutive_stales, 0);
        assert!(ps.last_poll_time.is_none());
    }

    #[test]
    fn stats_mut_materializes_block() {
        let mut rec = StreamRecord::new("s1", "n", "u");
        assert!(rec.stats.is_none());
        rec.stats_mut().bandwidth = 1_200_000;
        assert_eq!(rec.stats.as_ref().unwrap().bandwidth, 1_200_000);
    }
}
