//! Bounded-concurrency media analysis.
//!
//! Every successful poll hands the newest segment URL to this pipeline,
//! which fans it out into three independent jobs (probe, loudness,
//! thumbnail). At most four external-tool invocations run at once across
//! the whole process; excess jobs queue FIFO behind the semaphore. Job
//! failures are logged and never reach the scheduler.

pub mod ffmpeg;

use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::events::{EventHub, SignalPayload, SpritePayload, StreamEvent};
use crate::ledger;
use crate::model::{AudioStats, ContainerStats, StreamRecord, VideoStats};
use crate::scoring;
use crate::store::{save_best_effort, StreamStore};

pub use ffmpeg::{
    channel_layout_name, parse_frame_rate, parse_probe_json, parse_volume, AnalysisError,
    AudioStreamReport, FfmpegAnalyzer, FormatReport, LoudnessReport, MediaAnalyzer, ProbeReport,
    VideoStreamReport,
};

/// Peak level below which a track counts as silent, in dB.
const SILENCE_FLOOR_DB: f64 = -50.0;

/// Process-wide bounded task queue. tokio's semaphore is fair, so queued
/// jobs start in submission order as permits free up.
#[derive(Clone)]
pub struct AnalysisPipeline {
    semaphore: Arc<Semaphore>,
}

impl AnalysisPipeline {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.max_concurrent_analysis)
    }

    /// Submit a job. Never blocks the caller; the returned handle resolves
    /// once the job has actually run. Errors are logged and swallowed.
    pub fn submit<F>(&self, label: &'static str, stream_id: String, job: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), AnalysisError>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if let Err(e) = job.await {
                warn!(stream_id = %stream_id, job = label, error = %e, "Analysis job failed");
            }
        })
    }

    /// Free slots right now; used by tests to observe the bound.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Everything an analysis job needs besides the segment itself.
#[derive(Clone)]
pub struct AnalysisContext {
    pub analyzer: Arc<dyn MediaAnalyzer>,
    pub store: Arc<dyn StreamStore>,
    pub hub: EventHub,
    pub config: MonitorConfig,
}

/// Fan a freshly polled segment out into the three analysis jobs.
/// The handles are returned for tests; the scheduler drops them.
pub fn dispatch_segment(
    pipeline: &AnalysisPipeline,
    ctx: &AnalysisContext,
    stream_id: &str,
    segment_url: &str,
) -> Vec<JoinHandle<()>> {
    let jobs: [(&'static str, _); 3] = [
        ("probe", JobKind::Probe),
        ("loudness", JobKind::Loudness),
        ("thumbnail", JobKind::Thumbnail),
    ];

    jobs.into_iter()
        .map(|(label, kind)| {
            let ctx = ctx.clone();
            let id = stream_id.to_string();
            let url = segment_url.to_string();
            pipeline.submit(label, id.clone(), async move {
                match kind {
                    JobKind::Probe => run_probe(ctx, id, url).await,
                    JobKind::Loudness => run_loudness(ctx, id, url).await,
                    JobKind::Thumbnail => run_thumbnail(ctx, id, url).await,
                }
            })
        })
        .collect()
}

#[derive(Clone, Copy)]
enum JobKind {
    Probe,
    Loudness,
    Thumbnail,
}

async fn run_probe(ctx: AnalysisContext, stream_id: String, url: String) -> Result<(), AnalysisError> {
    let report = ctx.analyzer.probe(&url).await?;

    let Some(mut record) = load_record(&*ctx.store, &stream_id).await else {
        return Ok(());
    };

    apply_probe(&mut record, &report);
    ctx.hub.publish(StreamEvent::Signal(build_signal(&record)));

    ledger::age_out(&mut record.stream_errors, Utc::now(), ctx.config.error_retention);
    save_best_effort(&*ctx.store, &mut record).await;
    Ok(())
}

async fn run_loudness(ctx: AnalysisContext, stream_id: String, url: String) -> Result<(), AnalysisError> {
    let report = match ctx.analyzer.measure_loudness(&url).await {
        Ok(r) => r,
        // Null-sink warnings are routine for this filter chain.
        Err(e) if e.to_string().contains("null") => {
            debug!(stream_id = %stream_id, "Ignoring null-sink loudness noise");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let Some(mut record) = load_record(&*ctx.store, &stream_id).await else {
        return Ok(());
    };

    let audio = record.stats_mut().audio.get_or_insert_with(AudioStats::default);
    audio.avg_db = report.mean_db;
    audio.peak_db = report.max_db;
    audio.is_silent = matches!(report.max_db, Some(peak) if peak < SILENCE_FLOOR_DB);

    ledger::age_out(&mut record.stream_errors, Utc::now(), ctx.config.error_retention);
    save_best_effort(&*ctx.store, &mut record).await;
    Ok(())
}

async fn run_thumbnail(ctx: AnalysisContext, stream_id: String, url: String) -> Result<(), AnalysisError> {
    let path = std::env::temp_dir().join(format!(
        "sprite-{}-{}.jpg",
        stream_id,
        Utc::now().timestamp_millis()
    ));

    ctx.analyzer.extract_thumbnail(&url, &path).await?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) => {
            warn!(stream_id = %stream_id, path = %path.display(), error = %e, "Failed to read extracted thumbnail");
            return Ok(());
        }
    };

    let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(&bytes));

    if let Some(mut record) = load_record(&*ctx.store, &stream_id).await {
        record.thumbnail = data_url.clone();
        ledger::age_out(&mut record.stream_errors, Utc::now(), ctx.config.error_retention);
        save_best_effort(&*ctx.store, &mut record).await;
    }

    ctx.hub.publish(StreamEvent::Sprite(SpritePayload {
        id: stream_id.clone(),
        url: data_url,
    }));

    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(stream_id = %stream_id, path = %path.display(), error = %e, "Failed to delete thumbnail temp file");
    }
    Ok(())
}

async fn load_record(store: &dyn StreamStore, id: &str) -> Option<StreamRecord> {
    match store.find_by_id(id).await {
        Ok(Some(record)) => Some(record),
        Ok(None) => {
            debug!(stream_id = id, "Stream removed before analysis completed");
            None
        }
        Err(e) => {
            warn!(stream_id = id, error = %e, "Failed to load stream for analysis update");
            None
        }
    }
}

/// Fold a probe report into the record's stats block.
pub fn apply_probe(record: &mut StreamRecord, report: &ProbeReport) {
    let format_bitrate = report.format.as_ref().map(|f| f.bit_rate).unwrap_or(0);
    let stats = record.stats_mut();

    if let Some(f) = &report.format {
        stats.container = Some(ContainerStats {
            format: f.format_name.clone(),
            duration: f.duration,
            size: f.size,
            bitrate: f.bit_rate,
        });
    }

    if let Some(v) = &report.video {
        // Segment containers frequently omit the per-stream rate.
        let bitrate = v
            .bit_rate
            .unwrap_or_else(|| (format_bitrate as f64 * 0.85) as u64);
        stats.video = Some(VideoStats {
            codec: v.codec_name.clone(),
            profile: v.profile.clone(),
            level: v.level.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()),
            width: v.width,
            height: v.height,
            pixel_format: v.pix_fmt.clone(),
            color_space: v
                .color_space
                .clone()
                .or_else(|| v.color_primaries.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            bitrate,
        });
        stats.fps = v.r_frame_rate.as_deref().map(parse_frame_rate).unwrap_or(0.0);
    }

    if let Some(a) = &report.audio {
        // Loudness figures arrive from a separate job; carry them across.
        let prev = stats.audio.take().unwrap_or_default();
        stats.audio = Some(AudioStats {
            codec: a.codec_name.clone(),
            channels: a.channels.unwrap_or(0),
            sample_rate: a.sample_rate.unwrap_or(0),
            bitrate: a.bit_rate.unwrap_or(128_000),
            peak_db: prev.peak_db,
            avg_db: prev.avg_db,
            channel_layout: channel_layout_name(a.channels),
            is_silent: prev.is_silent,
        });
    }
}

/// Live signal payload: the derived levels with a ±5 jitter, re-clamped.
fn build_signal(record: &StreamRecord) -> SignalPayload {
    let stats = record.stats.as_ref();
    let video_bitrate = stats.and_then(|s| s.video.as_ref()).map(|v| v.bitrate).unwrap_or(0);
    let audio_bitrate = stats.and_then(|s| s.audio.as_ref()).map(|a| a.bitrate).unwrap_or(0);
    let audio = stats.and_then(|s| s.audio.as_ref());

    let mut rng = rand::thread_rng();
    let jitter = |level: f64, rng: &mut rand::rngs::ThreadRng| {
        (level + rng.gen_range(-5.0..=5.0)).clamp(0.0, 100.0)
    };

    SignalPayload {
        id: record.id.clone(),
        timestamp: Utc::now(),
        video: jitter(scoring::video_level(video_bitrate), &mut rng),
        audio: jitter(scoring::audio_level(audio_bitrate), &mut rng),
        video_bitrate,
        audio_bitrate,
        fps: stats.map(|s| s.fps).unwrap_or(0.0),
        peak_db: audio.and_then(|a| a.peak_db),
        avg_db: audio.and_then(|a| a.avg_db),
        is_silent: audio.map(|a| a.is_silent).unwrap_or(false),
    }
}
