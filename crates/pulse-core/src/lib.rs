#![forbid(unsafe_code)]

pub mod analysis;
pub mod config;
pub mod events;
pub mod historian;
pub mod ledger;
pub mod loader;
pub mod manifest;
pub mod model;
pub mod monitor;
pub mod scoring;
pub mod store;

pub use analysis::{
    AnalysisContext, AnalysisError, AnalysisPipeline, FfmpegAnalyzer, LoudnessReport,
    MediaAnalyzer, ProbeReport,
};
pub use config::MonitorConfig;
pub use events::{EventHub, SignalPayload, SpritePayload, StreamEvent};
pub use historian::Historian;
pub use loader::{HttpLoader, LoadError, ManifestLoader};
pub use model::{
    ErrorKind, MetricsSample, PollState, StreamError, StreamHealth, StreamRecord, StreamStats,
    StreamStatus,
};
pub use monitor::{Monitor, MonitorState};
pub use scoring::RecentIssues;
pub use store::{MemoryStore, MetricsStore, StoreError, StreamStore};
