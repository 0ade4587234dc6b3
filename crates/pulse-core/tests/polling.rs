use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use pulse_core::analysis::{AnalysisError, LoudnessReport, MediaAnalyzer, ProbeReport};
use pulse_core::{
    ErrorKind, EventHub, LoadError, ManifestLoader, MemoryStore, MetricsStore, Monitor,
    MonitorConfig, StreamEvent, StreamRecord, StreamStatus, StreamStore,
};

const MEDIA_URL: &str = "https://mock.mock.com/channels/1xx/level_0.m3u8";
const MASTER_URL: &str = "https://mock.mock.com/channels/1xx/master.m3u8";

const MASTER_PLAYLIST: &str = "\
#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=1212000,RESOLUTION=1280x720,FRAME-RATE=30.000
level_0.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2424000,RESOLUTION=1920x1080,FRAME-RATE=30.000
level_1.m3u8
";

fn media_playlist(mseq: i64, segment_count: usize) -> String {
    use std::fmt::Write;
    let mut out = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:{}\n",
        mseq
    );
    for i in 0..segment_count {
        writeln!(out, "#EXTINF:6.000,\nseg_{}.ts", mseq + i as i64).unwrap();
    }
    out
}

/// Serves a fixed response sequence per URL; the active index is advanced
/// by the test between sweeps. URLs with no script fail like a dead CDN.
struct ScriptedLoader {
    step: Arc<AtomicUsize>,
    responses: HashMap<String, Vec<String>>,
}

#[async_trait]
impl ManifestLoader for ScriptedLoader {
    async fn load(&self, uri: &str) -> Result<String, LoadError> {
        let Some(responses) = self.responses.get(uri) else {
            return Err(LoadError::Network {
                url: uri.to_string(),
                reason: "connection refused".to_string(),
            });
        };
        let step = self.step.load(Ordering::SeqCst);
        Ok(responses[step.min(responses.len() - 1)].clone())
    }
}

/// Analyzer whose tool is unavailable: every job fails and is swallowed,
/// keeping scenario polls deterministic.
struct UnavailableAnalyzer;

#[async_trait]
impl MediaAnalyzer for UnavailableAnalyzer {
    async fn probe(&self, _url: &str) -> Result<ProbeReport, AnalysisError> {
        Err(AnalysisError::Tool { tool: "ffprobe", message: "not installed".into() })
    }

    async fn measure_loudness(&self, _url: &str) -> Result<LoudnessReport, AnalysisError> {
        Err(AnalysisError::Tool { tool: "ffmpeg", message: "not installed".into() })
    }

    async fn extract_thumbnail(&self, _url: &str, _output: &Path) -> Result<(), AnalysisError> {
        Err(AnalysisError::Tool { tool: "ffmpeg", message: "not installed".into() })
    }
}

struct Harness {
    monitor: Monitor,
    store: Arc<MemoryStore>,
    step: Arc<AtomicUsize>,
}

fn harness(url: &str, responses: HashMap<String, Vec<String>>, stale_threshold_ms: u64) -> Harness {
    let step = Arc::new(AtomicUsize::new(0));
    let loader = Arc::new(ScriptedLoader {
        step: Arc::clone(&step),
        responses,
    });

    let store = Arc::new(MemoryStore::new());
    let mut record = StreamRecord::new("s1", "Channel 1", url);
    record.health.stale_threshold = stale_threshold_ms;
    store.insert(record);

    let monitor = Monitor::new(
        MonitorConfig::default(),
        loader,
        Arc::clone(&store) as Arc<dyn StreamStore>,
        Arc::clone(&store) as Arc<dyn MetricsStore>,
        Arc::new(UnavailableAnalyzer),
        EventHub::new(64),
    );

    Harness { monitor, store, step }
}

fn media_harness(steps: Vec<String>) -> Harness {
    let mut responses = HashMap::new();
    responses.insert(MEDIA_URL.to_string(), steps);
    harness(MEDIA_URL, responses, 7000)
}

impl Harness {
    async fn poll(&self, step: usize) -> StreamRecord {
        self.step.store(step, Ordering::SeqCst);
        self.monitor.sweep_once().await;
        self.store.find_by_id("s1").await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn fresh_stream_comes_online_clean() {
    let h = media_harness(vec![media_playlist(100, 5)]);
    let rec = h.poll(0).await;

    assert_eq!(rec.status, StreamStatus::Online);
    assert_eq!(rec.health.media_sequence, 100);
    assert_eq!(rec.health.previous_media_sequence, -1);
    assert_eq!(rec.health.segment_count, 5);
    assert_eq!(rec.health.target_duration, 6);
    assert_eq!(rec.health.playlist_type, "LIVE");
    assert!(rec.stream_errors.is_empty());
    assert_eq!(rec.health.recent_errors, 0);
    assert!(!rec.health.is_stale);

    let samples = h.store.samples_for("s1").await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].health_score, 100.0);
    assert_eq!(samples[0].media_sequence, 100);
}

#[tokio::test]
async fn normal_advance_stays_quiet() {
    let h = media_harness(vec![media_playlist(100, 5), media_playlist(101, 5)]);
    h.poll(0).await;
    let rec = h.poll(1).await;

    assert_eq!(rec.status, StreamStatus::Online);
    assert_eq!(rec.health.media_sequence, 101);
    assert_eq!(rec.health.previous_media_sequence, 100);
    assert_eq!(rec.health.sequence_jumps, 0);
    assert!(rec.stream_errors.is_empty());
}

#[tokio::test]
async fn small_gap_is_tolerated() {
    let h = media_harness(vec![media_playlist(100, 5), media_playlist(102, 5)]);
    h.poll(0).await;
    let rec = h.poll(1).await;

    assert_eq!(rec.health.media_sequence, 102);
    assert_eq!(rec.health.sequence_jumps, 0);
    assert!(rec.stream_errors.is_empty());
}

#[tokio::test]
async fn significant_jump_is_recorded() {
    let h = media_harness(vec![media_playlist(100, 5), media_playlist(105, 5)]);
    h.poll(0).await;
    let rec = h.poll(1).await;

    assert_eq!(rec.health.sequence_jumps, 1);
    assert_eq!(rec.stream_errors.len(), 1);
    let e = &rec.stream_errors[0];
    assert_eq!(e.error_type, ErrorKind::MediaSequence);
    assert_eq!(e.details, "Sequence jumped from 100 to 105 (gap: 4)");
    assert!(e.eid.starts_with("eid-"));
    assert_eq!(rec.health.recent_sequence_jumps, 1);
    assert_eq!(rec.health.recent_errors, 1);
}

#[tokio::test]
async fn sequence_reset_is_recorded_and_adopted() {
    let h = media_harness(vec![media_playlist(100, 5), media_playlist(50, 5)]);
    h.poll(0).await;
    let rec = h.poll(1).await;

    assert_eq!(rec.health.sequence_resets, 1);
    assert_eq!(rec.health.media_sequence, 50);
    assert_eq!(rec.stream_errors.len(), 1);
    assert_eq!(rec.stream_errors[0].details, "Sequence reset from 100 to 50");
    assert_eq!(rec.health.recent_sequence_resets, 1);
}

#[tokio::test]
async fn stalled_playlist_goes_stale_past_threshold() {
    let mut responses = HashMap::new();
    responses.insert(MEDIA_URL.to_string(), vec![media_playlist(100, 5)]);
    let h = harness(MEDIA_URL, responses, 5);

    h.poll(0).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let rec = h.poll(0).await;

    assert!(rec.health.is_stale);
    assert_eq!(rec.status, StreamStatus::Stale);
    assert!(rec.health.time_since_last_update > 5);
    assert_eq!(rec.stream_errors.len(), 1);
    let e = &rec.stream_errors[0];
    assert_eq!(e.error_type, ErrorKind::StaleManifest);
    assert!(e.details.contains("ms"));
    assert_eq!(rec.health.recent_errors, 1);
}

#[tokio::test]
async fn stale_stream_recovers_on_advance() {
    let mut responses = HashMap::new();
    responses.insert(
        MEDIA_URL.to_string(),
        vec![media_playlist(100, 5), media_playlist(100, 5), media_playlist(101, 5)],
    );
    let h = harness(MEDIA_URL, responses, 5);

    h.poll(0).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let stale = h.poll(1).await;
    assert_eq!(stale.status, StreamStatus::Stale);

    let recovered = h.poll(2).await;
    assert_eq!(recovered.status, StreamStatus::Online);
    assert!(!recovered.health.is_stale);
    assert_eq!(recovered.health.time_since_last_update, 0);
    // The stale ledger entry stays until it ages out of retention.
    assert_eq!(recovered.health.total_errors, 1);
}

#[tokio::test]
async fn master_playlist_captures_variant_zero() {
    let mut responses = HashMap::new();
    responses.insert(MASTER_URL.to_string(), vec![MASTER_PLAYLIST.to_string()]);
    responses.insert(MEDIA_URL.to_string(), vec![media_playlist(42, 3)]);
    let h = harness(MASTER_URL, responses, 7000);

    let rec = h.poll(0).await;
    assert_eq!(rec.status, StreamStatus::Online);
    assert_eq!(rec.health.media_sequence, 42);

    let stats = rec.stats.unwrap();
    assert_eq!(stats.bandwidth, 1_212_000);
    assert_eq!(stats.resolution, "1280x720");
}

#[tokio::test]
async fn fetch_failure_marks_stream_error() {
    let h = harness(MEDIA_URL, HashMap::new(), 7000);
    let mut rx = h.monitor.hub().subscribe();

    let rec = h.poll(0).await;
    assert_eq!(rec.status, StreamStatus::Error);
    assert_eq!(rec.stream_errors.len(), 1);
    let e = &rec.stream_errors[0];
    assert_eq!(e.error_type, ErrorKind::ManifestRetrieval);
    assert!(e.details.contains("connection refused"));
    assert_eq!(e.variant, "unknown");

    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.topic(), "stream:update");
}

#[tokio::test]
async fn variant_fetch_failure_marks_stream_error() {
    let mut responses = HashMap::new();
    responses.insert(MASTER_URL.to_string(), vec![MASTER_PLAYLIST.to_string()]);
    // level_0.m3u8 is not scripted, so the variant fetch fails.
    let h = harness(MASTER_URL, responses, 7000);

    let rec = h.poll(0).await;
    assert_eq!(rec.status, StreamStatus::Error);
    assert!(rec.stream_errors[0].details.contains("variant"));
    // Bandwidth was captured before the variant fetch failed.
    assert_eq!(rec.stream_errors[0].variant, "1212000");
}

#[tokio::test]
async fn empty_playlist_is_a_content_error() {
    let empty = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:10\n";
    let h = media_harness(vec![empty.to_string()]);

    let rec = h.poll(0).await;
    assert_eq!(rec.status, StreamStatus::Error);
    assert_eq!(rec.stream_errors[0].error_type, ErrorKind::PlaylistContent);
}

#[tokio::test]
async fn unparseable_manifest_is_a_retrieval_error() {
    let h = media_harness(vec!["<html>502 Bad Gateway</html>".to_string()]);
    let rec = h.poll(0).await;
    assert_eq!(rec.status, StreamStatus::Error);
    assert_eq!(rec.stream_errors[0].error_type, ErrorKind::ManifestRetrieval);
}

#[tokio::test]
async fn total_errors_is_monotonic_and_covers_ledger() {
    let h = media_harness(vec![
        media_playlist(100, 5),
        media_playlist(50, 5),
        media_playlist(55, 5),
        media_playlist(10, 5),
    ]);

    let mut last_total = 0;
    for step in 0..4 {
        let rec = h.poll(step).await;
        assert!(rec.health.total_errors >= last_total);
        assert!(rec.health.total_errors as usize >= rec.stream_errors.len());
        last_total = rec.health.total_errors;
    }
    // Three entries recorded: reset 100->50, jump 50->55 (gap 4), reset 55->10.
    assert_eq!(last_total, 3);
}

#[tokio::test]
async fn one_sample_per_poll_per_stream() {
    let h = media_harness(vec![media_playlist(100, 5), media_playlist(101, 5)]);
    h.poll(0).await;
    h.poll(1).await;

    let samples = h.store.samples_for("s1").await;
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| (0.0..=100.0).contains(&s.health_score)));
}

#[tokio::test]
async fn update_event_carries_full_record() {
    let h = media_harness(vec![media_playlist(100, 5)]);
    let mut rx = h.monitor.hub().subscribe();

    h.poll(0).await;

    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.topic(), "stream:update");
    match ev {
        StreamEvent::Update(rec) => {
            assert_eq!(rec.id, "s1");
            assert_eq!(rec.health.media_sequence, 100);
        }
        other => panic!("expected update event, got {}", other.topic()),
    }
}

#[tokio::test]
async fn previous_sequence_tracks_cached_state() {
    let h = media_harness(vec![media_playlist(100, 5), media_playlist(101, 5)]);
    h.poll(0).await;

    // First observation commits with the unseen sentinel as predecessor.
    let rec_before = h.store.find_by_id("s1").await.unwrap().unwrap();
    assert_eq!(rec_before.health.previous_media_sequence, -1);

    let rec = h.poll(1).await;
    assert_eq!(rec.health.previous_media_sequence, 100);
}
