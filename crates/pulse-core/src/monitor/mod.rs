//! The monitor engine: a reentry-guarded sweep over all stream records,
//! the per-stream playlist state machine, and the fixed-delay scheduler.
//!
//! Each sweep loads the fleet, polls every stream sequentially, and
//! schedules the next sweep `poll_interval` after completion, so sweeps
//! never overlap or queue up. Media analysis fans out through the bounded
//! pipeline and is never awaited here.

pub mod evaluator;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::analysis::{self, AnalysisContext, AnalysisPipeline, MediaAnalyzer};
use crate::config::MonitorConfig;
use crate::events::{EventHub, StreamEvent};
use crate::historian::Historian;
use crate::ledger;
use crate::loader::ManifestLoader;
use crate::manifest::{self, ParsedManifest};
use crate::model::{ErrorKind, PollState, StreamRecord, StreamStatus};
use crate::monitor::evaluator::SequenceChange;
use crate::scoring::{self, RecentIssues};
use crate::store::{save_best_effort, MetricsStore, StreamStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The fleet monitor. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Monitor {
    config: MonitorConfig,
    loader: Arc<dyn ManifestLoader>,
    store: Arc<dyn StreamStore>,
    historian: Historian,
    hub: EventHub,
    pipeline: AnalysisPipeline,
    analysis_ctx: AnalysisContext,
    poll_states: Arc<RwLock<HashMap<String, PollState>>>,
    state: Arc<RwLock<MonitorState>>,
    sweeping: Arc<AtomicBool>,
    last_sweep: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        loader: Arc<dyn ManifestLoader>,
        store: Arc<dyn StreamStore>,
        metrics: Arc<dyn MetricsStore>,
        analyzer: Arc<dyn MediaAnalyzer>,
        hub: EventHub,
    ) -> Self {
        let pipeline = AnalysisPipeline::from_config(&config);
        let analysis_ctx = AnalysisContext {
            analyzer,
            store: Arc::clone(&store),
            hub: hub.clone(),
            config: config.clone(),
        };
        Self {
            config,
            loader,
            store,
            historian: Historian::new(metrics),
            hub,
            pipeline,
            analysis_ctx,
            poll_states: Arc::new(RwLock::new(HashMap::new())),
            state: Arc::new(RwLock::new(MonitorState::Idle)),
            sweeping: Arc::new(AtomicBool::new(false)),
            last_sweep: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    pub async fn last_sweep(&self) -> Option<DateTime<Utc>> {
        *self.last_sweep.read().await
    }

    /// Start the polling loop. Idempotent while already active.
    pub async fn start(&self) {
        {
            let mut state = self.state.write().await;
            if *state == MonitorState::Active {
                return;
            }
            *state = MonitorState::Active;
        }

        info!(poll_interval_ms = self.config.poll_interval.as_millis() as u64, "Starting monitor");

        let monitor = self.clone();
        tokio::spawn(async move {
            loop {
                {
                    let current = *monitor.state.read().await;
                    if current != MonitorState::Active {
                        *monitor.state.write().await = MonitorState::Stopped;
                        info!("Monitor stopped");
                        break;
                    }
                }

                monitor.sweep_once().await;

                // Fixed delay after completion, not fixed rate.
                tokio::time::sleep(monitor.config.poll_interval).await;
            }
        });
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == MonitorState::Active {
            *state = MonitorState::Stopping;
            info!("Stopping monitor");
        }
    }

    /// Run one sweep over every stream record. Guarded so that at most one
    /// sweep is ever in flight.
    pub async fn sweep_once(&self) {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            warn!("Sweep already in flight; skipping");
            return;
        }

        *self.last_sweep.write().await = Some(Utc::now());

        let records = match self.store.find_all().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Failed to load stream records for sweep");
                self.sweeping.store(false, Ordering::SeqCst);
                return;
            }
        };

        for record in records {
            self.poll_stream(record).await;
        }

        self.sweeping.store(false, Ordering::SeqCst);
    }

    /// One full pass of the playlist state machine for a single stream.
    async fn poll_stream(&self, mut record: StreamRecord) {
        let now = Utc::now();
        let stream_id = record.id.clone();
        let cached = self
            .poll_states
            .read()
            .await
            .get(&stream_id)
            .copied()
            .unwrap_or_default();

        let body = match self.loader.load(&record.url).await {
            Ok(b) => b,
            Err(e) => {
                let code = e.status_code();
                self.record_failure(
                    &mut record,
                    ErrorKind::ManifestRetrieval,
                    format!("Failed to fetch manifest: {}", e),
                    code,
                    now,
                )
                .await;
                return;
            }
        };

        let mut playlist = match manifest::parse(body.as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                self.record_failure(
                    &mut record,
                    ErrorKind::ManifestRetrieval,
                    format!("Failed to parse manifest: {}", e),
                    None,
                    now,
                )
                .await;
                return;
            }
        };

        // Master playlist: adopt variant 0 and refetch as a media playlist.
        let mut media_url = record.url.clone();
        if playlist.is_master() {
            match self.follow_variant(&mut record, &playlist, now).await {
                Some((url, media)) => {
                    media_url = url;
                    playlist = media;
                }
                None => return,
            }
        }

        if playlist.segments.is_empty() {
            self.record_failure(
                &mut record,
                ErrorKind::PlaylistContent,
                "Media playlist contains no segments",
                None,
                now,
            )
            .await;
            return;
        }

        let seq = playlist.media_sequence;
        let mut consecutive_stales = cached.consecutive_stales;

        if seq == cached.last_media_sequence {
            consecutive_stales += 1;
            let elapsed = cached
                .last_poll_time
                .map(|t| (now - t).num_milliseconds())
                .unwrap_or(0);
            record.health.time_since_last_update = elapsed;

            if elapsed > record.health.stale_threshold as i64 {
                record.health.is_stale = true;
                record.status = StreamStatus::Stale;
                let stale_threshold = record.health.stale_threshold;
                ledger::append(
                    &mut record,
                    ErrorKind::StaleManifest,
                    evaluator::stale_details(elapsed, stale_threshold),
                    "VIDEO",
                    None,
                    now,
                );
            }
        } else {
            record.health.is_stale = false;
            record.health.last_manifest_update = Some(now);
            record.health.time_since_last_update = 0;
            consecutive_stales = 0;
            record.status = StreamStatus::Online;
        }

        if cached.last_media_sequence != -1 {
            match evaluator::classify_sequence(cached.last_media_sequence, seq) {
                SequenceChange::Jump { from, to, gap } => {
                    record.health.sequence_jumps += 1;
                    warn!(stream_id = %stream_id, from, to, gap, "Media sequence jumped");
                    ledger::append(
                        &mut record,
                        ErrorKind::MediaSequence,
                        evaluator::jump_details(from, to),
                        "VIDEO",
                        None,
                        now,
                    );
                }
                SequenceChange::Reset { from, to } => {
                    record.health.sequence_resets += 1;
                    warn!(stream_id = %stream_id, from, to, "Media sequence reset");
                    ledger::append(
                        &mut record,
                        ErrorKind::MediaSequence,
                        evaluator::reset_details(from, to),
                        "VIDEO",
                        None,
                        now,
                    );
                }
                SequenceChange::SilentGap { gap } => {
                    debug!(stream_id = %stream_id, gap, "Tolerating small sequence gap");
                }
                SequenceChange::Steady => {}
            }
        }

        record.health.discontinuity_count =
            playlist.segments.iter().filter(|s| s.discontinuity).count() as u64;
        if playlist.discontinuity_sequence != record.health.discontinuity_sequence {
            debug!(
                stream_id = %stream_id,
                from = record.health.discontinuity_sequence,
                to = playlist.discontinuity_sequence,
                "Adopting new discontinuity sequence"
            );
            record.health.discontinuity_sequence = playlist.discontinuity_sequence;
        }

        record.health.previous_media_sequence = cached.last_media_sequence;
        record.health.media_sequence = seq;
        record.health.segment_count = playlist.segments.len();
        record.health.target_duration = playlist.target_duration;
        record.health.playlist_type = playlist
            .playlist_type
            .clone()
            .unwrap_or_else(|| "LIVE".to_string());

        self.poll_states.write().await.insert(
            stream_id.clone(),
            PollState {
                last_poll_time: Some(now),
                last_media_sequence: seq,
                consecutive_stales,
            },
        );

        // Hand the newest segment to the analysis pipeline; not awaited.
        if let Some(newest) = playlist.segments.last() {
            let segment_url = manifest::resolve_sibling(&media_url, &newest.uri);
            analysis::dispatch_segment(&self.pipeline, &self.analysis_ctx, &stream_id, &segment_url);
        }

        record.last_checked = Some(now);
        self.persist(&mut record).await;

        let recent = self.recent_issues(&stream_id).await;
        let decay = scoring::decay_factor(record.health.last_error_time, now);
        record.health.recent_errors = recent.errors;
        record.health.recent_sequence_jumps = recent.jumps;
        record.health.recent_sequence_resets = recent.resets;

        let sample = Historian::build_sample(&record, &recent, decay, now);
        self.historian.record(sample).await;

        self.persist(&mut record).await;
        self.hub.publish(StreamEvent::Update(Box::new(record)));
    }

    /// Resolve and fetch variant 0 of a master playlist, capturing its
    /// bandwidth and resolution on the record. `None` means the poll ended
    /// in a recorded failure.
    async fn follow_variant(
        &self,
        record: &mut StreamRecord,
        master: &ParsedManifest,
        now: DateTime<Utc>,
    ) -> Option<(String, ParsedManifest)> {
        let variant = &master.variants[0];
        {
            let stats = record.stats_mut();
            stats.bandwidth = variant.bandwidth;
            if let Some((w, h)) = variant.resolution {
                stats.resolution = format!("{}x{}", w, h);
            }
        }

        let url = manifest::resolve_sibling(&record.url, &variant.uri);
        let body = match self.loader.load(&url).await {
            Ok(b) => b,
            Err(e) => {
                let code = e.status_code();
                self.record_failure(
                    record,
                    ErrorKind::ManifestRetrieval,
                    format!("Failed to fetch variant manifest: {}", e),
                    code,
                    now,
                )
                .await;
                return None;
            }
        };

        match manifest::parse(body.as_bytes()) {
            Ok(media) => Some((url, media)),
            Err(e) => {
                self.record_failure(
                    record,
                    ErrorKind::ManifestRetrieval,
                    format!("Failed to parse variant manifest {}: {}", url, e),
                    None,
                    now,
                )
                .await;
                None
            }
        }
    }

    /// Terminal failure for this poll: ledger entry, error status, persist,
    /// publish. The stream gets another chance on the next sweep.
    async fn record_failure(
        &self,
        record: &mut StreamRecord,
        kind: ErrorKind,
        details: impl Into<String>,
        code: Option<u16>,
        now: DateTime<Utc>,
    ) {
        let details = details.into();
        warn!(stream_id = %record.id, error_type = %kind, details = %details, "Poll failed");
        ledger::append(record, kind, details, "VIDEO", code, now);
        record.status = StreamStatus::Error;
        record.last_checked = Some(now);
        self.persist(record).await;
        self.hub.publish(StreamEvent::Update(Box::new(record.clone())));
    }

    /// Age out the ledger and save under the drop-on-conflict policy.
    async fn persist(&self, record: &mut StreamRecord) {
        ledger::age_out(&mut record.stream_errors, Utc::now(), self.config.error_retention);
        save_best_effort(&*self.store, record).await;
    }

    /// Windowed issue counts read back from the store; zeros on any failure.
    async fn recent_issues(&self, stream_id: &str) -> RecentIssues {
        match self.store.find_by_id(stream_id).await {
            Ok(Some(record)) => {
                scoring::recent_issues(&record, Utc::now(), self.config.recent_window)
            }
            Ok(None) => RecentIssues::default(),
            Err(e) => {
                warn!(stream_id, error = %e, "Failed to load stream for window read");
                RecentIssues::default()
            }
        }
    }
}
