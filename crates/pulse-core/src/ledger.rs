//! Per-stream error ledger: append bookkeeping and retention-based age-out.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;

use crate::model::{ErrorKind, StreamError, StreamRecord};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Build a ledger entry id of the form `eid-<unix-ms>-<9-char-base36>`.
pub fn new_error_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("eid-{}-{}", now.timestamp_millis(), suffix)
}

/// Append an error to the stream's ledger and update the derived counters.
pub fn append(
    record: &mut StreamRecord,
    error_type: ErrorKind,
    details: impl Into<String>,
    media_type: &str,
    code: Option<u16>,
    now: DateTime<Utc>,
) {
    let variant = match record.stats.as_ref() {
        Some(stats) => stats.bandwidth.to_string(),
        None => "unknown".to_string(),
    };

    record.stream_errors.push(StreamError {
        eid: new_error_id(now),
        date: now,
        error_type,
        media_type: media_type.to_string(),
        variant,
        details: details.into(),
        code,
    });

    record.health.total_errors += 1;
    record.health.time_since_last_error = 0;
    record.health.last_error_time = Some(now);
}

/// Drop ledger entries older than the retention horizon. Runs before every
/// persist and must never fail the save; with typed entries the filter is
/// infallible, so the original's malformed-date sweep reduces to this.
pub fn age_out(errors: &mut Vec<StreamError>, now: DateTime<Utc>, retention: Duration) {
    let horizon = now
        - ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::days(7));
    errors.retain(|e| e.date >= horizon);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamStats;

    fn record() -> StreamRecord {
        StreamRecord::new("s1", "Channel 1", "https://example.com/master.m3u8")
    }

    #[test]
    fn eid_has_expected_shape() {
        let now = Utc::now();
        let eid = new_error_id(now);
        let parts: Vec<&str> = eid.splitn(3, '-').collect();
        assert_eq!(parts[0], "eid");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn append_updates_counters() {
        let mut rec = record();
        let now = Utc::now();
        append(&mut rec, ErrorKind::MediaSequence, "Sequence reset from 100 to 50", "VIDEO", None, now);

        assert_eq!(rec.stream_errors.len(), 1);
        assert_eq!(rec.health.total_errors, 1);
        assert_eq!(rec.health.time_since_last_error, 0);
        assert_eq!(rec.health.last_error_time, Some(now));

        let e = &rec.stream_errors[0];
        assert_eq!(e.error_type, ErrorKind::MediaSequence);
        assert_eq!(e.variant, "unknown");
        assert_eq!(e.media_type, "VIDEO");
    }

    #[test]
    fn append_uses_bandwidth_as_variant() {
        let mut rec = record();
        rec.stats = Some(StreamStats {
            bandwidth: 1_212_000,
            ..Default::default()
        });
        append(&mut rec, ErrorKind::StaleManifest, "stale", "VIDEO", None, Utc::now());
        assert_eq!(rec.stream_errors[0].variant, "1212000");
    }

    #[test]
    fn append_keeps_total_monotonic_across_age_out() {
        let mut rec = record();
        let old = Utc::now() - ChronoDuration::days(8);
        append(&mut rec, ErrorKind::MediaSequence, "old", "VIDEO", None, old);
        append(&mut rec, ErrorKind::MediaSequence, "new", "VIDEO", None, Utc::now());
        assert_eq!(rec.health.total_errors, 2);

        age_out(&mut rec.stream_errors, Utc::now(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(rec.stream_errors.len(), 1);
        assert_eq!(rec.stream_errors[0].details, "new");
        // total_errors >= ledger size even after aging
        assert!(rec.health.total_errors as usize >= rec.stream_errors.len());
    }

    #[test]
    fn age_out_keeps_entries_inside_horizon() {
        let mut rec = record();
        let now = Utc::now();
        append(&mut rec, ErrorKind::MediaSequence, "recent", "VIDEO", None, now - ChronoDuration::days(6));
        age_out(&mut rec.stream_errors, now, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(rec.stream_errors.len(), 1);
    }
}
