//! Sliding-window issue classification and health scoring.
//!
//! Scores start at 100 and lose points for status degradation and for
//! recent ledger activity, with recent penalties weighted by a forgiveness
//! factor that grows with the time elapsed since the last error.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::model::{ErrorKind, StreamRecord, StreamStatus};

/// Counts of windowed ledger entries, classified for scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecentIssues {
    pub jumps: u64,
    pub resets: u64,
    pub errors: u64,
}

/// Classify the stream's ledger entries inside the sliding window.
///
/// A reset is an entry typed `SEQUENCE_RESET` or whose details mention
/// "reset"; a jump is typed `SEQUENCE_JUMP` or mentions "Sequence jumped".
/// Every windowed entry counts toward `errors` regardless of class.
pub fn recent_issues(record: &StreamRecord, now: DateTime<Utc>, window: Duration) -> RecentIssues {
    let horizon =
        now - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(12));
    let mut out = RecentIssues::default();

    for e in record.stream_errors.iter().filter(|e| e.date >= horizon) {
        out.errors += 1;
        if e.error_type == ErrorKind::SequenceReset || e.details.contains("reset") {
            out.resets += 1;
        }
        if e.error_type == ErrorKind::SequenceJump || e.details.contains("Sequence jumped") {
            out.jumps += 1;
        }
    }

    out
}

/// Forgiveness factor in [0, 1] as a function of hours since the last error.
/// A stream with no recorded error is fully forgiven; anything inside the
/// last hour gets none.
pub fn decay_factor(last_error_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(t) = last_error_time else {
        return 1.0;
    };

    let hours = (now - t).num_milliseconds() as f64 / 3_600_000.0;
    if !hours.is_finite() || hours < 0.0 {
        return 0.0;
    }

    if hours < 1.0 {
        0.0
    } else if hours < 6.0 {
        0.25
    } else if hours < 24.0 {
        0.5
    } else if hours < 72.0 {
        0.75
    } else {
        0.9
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Overall health score in [0, 100].
///
/// Status penalties are additive. Recent-issue penalties are capped per
/// class and scaled by `1 - decay`; when no window snapshot is supplied the
/// all-time counters are used with the same caps and no decay.
pub fn health_score(record: &StreamRecord, recent: Option<&RecentIssues>, decay: f64) -> f64 {
    let mut score = 100.0;

    if record.health.is_stale {
        score -= 30.0;
    }
    if record.status == StreamStatus::Error {
        score -= 40.0;
    }
    if record.status == StreamStatus::Offline {
        score -= 50.0;
    }

    match recent {
        Some(r) => {
            let pen = 1.0 - decay;
            score -= ((r.jumps * 5).min(20)) as f64 * pen;
            score -= ((r.resets * 10).min(30)) as f64 * pen;
            score -= ((r.errors * 2).min(20)) as f64 * pen;
        }
        None => {
            score -= ((record.health.sequence_jumps * 5).min(20)) as f64;
            score -= ((record.health.sequence_resets * 10).min(30)) as f64;
            score -= ((record.health.total_errors * 2).min(20)) as f64;
        }
    }

    clamp_score(score)
}

/// Video quality score in [0, 100]. An unprobed stream sits at 50.
pub fn video_score(record: &StreamRecord) -> f64 {
    let Some(video) = record.stats.as_ref().and_then(|s| s.video.as_ref()) else {
        return 50.0;
    };

    let mut score = 100.0;
    if video.codec.is_none() {
        score -= 20.0;
    }
    if video.width < 720 {
        score -= 10.0;
    }
    clamp_score(score)
}

/// Audio quality score in [0, 100]. An unprobed stream sits at 50.
pub fn audio_score(record: &StreamRecord) -> f64 {
    let Some(audio) = record.stats.as_ref().and_then(|s| s.audio.as_ref()) else {
        return 50.0;
    };

    let mut score = 100.0;
    if audio.codec.is_none() {
        score -= 20.0;
    }
    if audio.sample_rate < 44_100 {
        score -= 10.0;
    }
    if audio.is_silent {
        score -= 15.0;
    }
    clamp_score(score)
}

/// Signal meter for the video track: 5 Mbps maps to 100.
pub fn video_level(bitrate: u64) -> f64 {
    clamp_score(bitrate as f64 / 5_000_000.0 * 100.0)
}

/// Signal meter for the audio track: 320 kbps maps to 100.
pub fn audio_level(bitrate: u64) -> f64 {
    clamp_score(bitrate as f64 / 320_000.0 * 100.0)
}
