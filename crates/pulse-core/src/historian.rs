//! Per-poll score samples written into the metrics store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::model::{MetricsSample, StreamRecord};
use crate::scoring::{self, RecentIssues};
use crate::store::MetricsStore;

/// Writes one sample per poll per stream. Write failures never affect the
/// stream update path.
#[derive(Clone)]
pub struct Historian {
    store: Arc<dyn MetricsStore>,
}

impl Historian {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    /// Derive a sample from the record's current state. The health score is
    /// rounded here, once, half away from zero.
    pub fn build_sample(
        record: &StreamRecord,
        recent: &RecentIssues,
        decay: f64,
        now: DateTime<Utc>,
    ) -> MetricsSample {
        let stats = record.stats.as_ref();
        let video_bitrate = stats
            .and_then(|s| s.video.as_ref())
            .map(|v| v.bitrate)
            .unwrap_or(0);
        let audio_bitrate = stats
            .and_then(|s| s.audio.as_ref())
            .map(|a| a.bitrate)
            .unwrap_or(0);

        MetricsSample {
            stream_id: record.id.clone(),
            health_score: scoring::health_score(record, Some(recent), decay).round(),
            video_score: scoring::video_score(record),
            audio_score: scoring::audio_score(record),
            video_bitrate,
            audio_bitrate,
            video_level: scoring::video_level(video_bitrate),
            audio_level: scoring::audio_level(audio_bitrate),
            fps: stats.map(|s| s.fps).unwrap_or(0.0),
            status: record.status,
            media_sequence: record.health.media_sequence,
            segment_count: record.health.segment_count,
            error_count: record.health.total_errors,
            timestamp: now,
        }
    }

    pub async fn record(&self, sample: MetricsSample) {
        let stream_id = sample.stream_id.clone();
        if let Err(e) = self.store.append(sample).await {
            warn!(stream_id = %stream_id, error = %e, "Failed to write metrics sample");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StreamStats, StreamStatus, VideoStats};

    #[test]
    fn sample_carries_scores_and_levels() {
        let mut record = StreamRecord::new("s1", "Channel 1", "https://example.com/master.m3u8");
        record.status = StreamStatus::Online;
        record.health.media_sequence = 100;
        record.health.segment_count = 5;
        record.stats = Some(StreamStats {
            fps: 25.0,
            video: Some(VideoStats {
                codec: Some("h264".into()),
                width: 1280,
                bitrate: 2_500_000,
                ..Default::default()
            }),
            ..Default::default()
        });

        let recent = RecentIssues::default();
        let sample = Historian::build_sample(&record, &recent, 1.0, Utc::now());

        assert_eq!(sample.stream_id, "s1");
        assert_eq!(sample.health_score, 100.0);
        assert_eq!(sample.video_score, 100.0);
        assert_eq!(sample.audio_score, 50.0);
        assert_eq!(sample.video_bitrate, 2_500_000);
        assert_eq!(sample.video_level, 50.0);
        assert_eq!(sample.audio_level, 0.0);
        assert_eq!(sample.fps, 25.0);
        assert_eq!(sample.media_sequence, 100);
        assert_eq!(sample.segment_count, 5);
    }

    #[test]
    fn boundary_health_rounds_half_away_from_zero() {
        let mut record = StreamRecord::new("s1", "n", "u");
        record.status = StreamStatus::Online;
        let recent = RecentIssues { jumps: 2, resets: 1, errors: 3 };
        // decay 0.75 -> 100 - 26 * 0.25 = 93.5
        let sample = Historian::build_sample(&record, &recent, 0.75, Utc::now());
        assert_eq!(sample.health_score, 94.0);
    }
}
