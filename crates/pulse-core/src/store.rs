//! Persistence contracts and the in-memory document store.
//!
//! Stream records live in a document store with optimistic concurrency:
//! every save carries the version the writer read, and a mismatch is a
//! [`StoreError::VersionConflict`]. The monitor's policy for conflicts is
//! drop-don't-retry; that policy lives with the callers, not here.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{MetricsSample, StreamRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict saving stream {id}: wrote {attempted}, store has {current}")]
    VersionConflict {
        id: String,
        attempted: u64,
        current: u64,
    },
    #[error("stream {0} not found")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Durable store for stream records.
#[async_trait]
pub trait StreamStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<StreamRecord>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<StreamRecord>, StoreError>;

    /// Save with an optimistic version check. On success the record's
    /// `version` is bumped and `updated_at` refreshed in place.
    async fn save(&self, record: &mut StreamRecord) -> Result<(), StoreError>;
}

/// Append-only store for per-poll metrics samples. Retention (7-day TTL on
/// `timestamp`) is the store's responsibility; the monitor never deletes.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn append(&self, sample: MetricsSample) -> Result<(), StoreError>;
}

/// Save under the drop-on-conflict policy: a version conflict means another
/// writer won the race and this update is discarded; any other failure is
/// logged and likewise swallowed so the caller's sweep continues.
pub async fn save_best_effort(store: &dyn StreamStore, record: &mut StreamRecord) {
    if let Err(e) = store.save(record).await {
        if e.is_conflict() {
            tracing::debug!(stream_id = %record.id, error = %e, "Dropping update after version conflict");
        } else {
            tracing::warn!(stream_id = %record.id, error = %e, "Failed to persist stream record");
        }
    }
}

/// In-memory implementation of both stores, backing tests and the CLI.
pub struct MemoryStore {
    streams: DashMap<String, StreamRecord>,
    samples: Mutex<Vec<MetricsSample>>,
    sample_retention: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            samples: Mutex::new(Vec::new()),
            sample_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Seed a record, e.g. from CLI configuration. Replaces any existing
    /// record with the same id.
    pub fn insert(&self, record: StreamRecord) {
        self.streams.insert(record.id.clone(), record);
    }

    pub async fn samples(&self) -> Vec<MetricsSample> {
        self.samples.lock().await.clone()
    }

    pub async fn samples_for(&self, stream_id: &str) -> Vec<MetricsSample> {
        self.samples
            .lock()
            .await
            .iter()
            .filter(|s| s.stream_id == stream_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn find_all(&self) -> Result<Vec<StreamRecord>, StoreError> {
        let mut all: Vec<StreamRecord> = self.streams.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<StreamRecord>, StoreError> {
        Ok(self.streams.get(id).map(|e| e.value().clone()))
    }

    async fn save(&self, record: &mut StreamRecord) -> Result<(), StoreError> {
        let mut entry = self
            .streams
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;

        if entry.version != record.version {
            return Err(StoreError::VersionConflict {
                id: record.id.clone(),
                attempted: record.version,
                current: entry.version,
            });
        }

        record.version += 1;
        record.updated_at = Utc::now();
        *entry = record.clone();
        Ok(())
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn append(&self, sample: MetricsSample) -> Result<(), StoreError> {
        let horizon = Utc::now()
            - ChronoDuration::from_std(self.sample_retention)
                .unwrap_or_else(|_| ChronoDuration::days(7));
        let mut samples = self.samples.lock().await;
        samples.retain(|s| s.timestamp >= horizon);
        samples.push(sample);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamStatus;

    fn store_with(id: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(StreamRecord::new(id, "Channel", "https://example.com/master.m3u8"));
        store
    }

    #[tokio::test]
    async fn save_bumps_version() {
        let store = store_with("s1");
        let mut rec = store.find_by_id("s1").await.unwrap().unwrap();
        assert_eq!(rec.version, 0);

        rec.status = StreamStatus::Online;
        store.save(&mut rec).await.unwrap();
        assert_eq!(rec.version, 1);

        let persisted = store.find_by_id("s1").await.unwrap().unwrap();
        assert_eq!(persisted.version, 1);
        assert_eq!(persisted.status, StreamStatus::Online);
    }

    #[tokio::test]
    async fn concurrent_writer_hits_version_conflict() {
        let store = store_with("s1");
        let mut sweep_copy = store.find_by_id("s1").await.unwrap().unwrap();
        let mut task_copy = store.find_by_id("s1").await.unwrap().unwrap();

        store.save(&mut sweep_copy).await.unwrap();

        let err = store.save(&mut task_copy).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn save_unknown_stream_is_not_found() {
        let store = MemoryStore::new();
        let mut rec = StreamRecord::new("ghost", "g", "u");
        let err = store.save(&mut rec).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn find_all_is_sorted_by_id() {
        let store = MemoryStore::new();
        store.insert(StreamRecord::new("b", "B", "u1"));
        store.insert(StreamRecord::new("a", "A", "u2"));
        let all = store.find_all().await.unwrap();
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "b");
    }

    #[tokio::test]
    async fn metrics_append_prunes_expired_samples() {
        let store = MemoryStore::new();
        let mut old = sample("s1");
        old.timestamp = Utc::now() - ChronoDuration::days(8);
        store.append(old).await.unwrap();
        store.append(sample("s1")).await.unwrap();

        let samples = store.samples().await;
        assert_eq!(samples.len(), 1);
    }

    fn sample(stream_id: &str) -> MetricsSample {
        MetricsSample {
            stream_id: stream_id.to_string(),
            health_score: 100.0,
            video_score: 100.0,
            audio_score: 100.0,
            video_bitrate: 0,
            audio_bitrate: 0,
            video_level: 0.0,
            audio_level: 0.0,
            fps: 0.0,
            status: StreamStatus::Online,
            media_sequence: 0,
            segment_count: 0,
            error_count: 0,
            timestamp: Utc::now(),
        }
    }
}
