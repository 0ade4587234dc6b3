//! Live update fan-out.
//!
//! The engine and the analysis pipeline publish onto a broadcast channel;
//! any number of observers (CLI watch view, future socket bridges) can
//! subscribe. Publishing never blocks and a missing audience is not an
//! error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::StreamRecord;

/// Payload for `stream:signal`: jittered live meters after a probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub video: f64,
    pub audio: f64,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub fps: f64,
    pub peak_db: Option<f64>,
    pub avg_db: Option<f64>,
    pub is_silent: bool,
}

/// Payload for `stream:sprite`: a freshly extracted thumbnail data URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpritePayload {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Update(Box<StreamRecord>),
    Signal(SignalPayload),
    Sprite(SpritePayload),
}

impl StreamEvent {
    /// Topic name the payload is published under.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Update(_) => "stream:update",
            Self::Signal(_) => "stream:signal",
            Self::Sprite(_) => "stream:sprite",
        }
    }

    pub fn stream_id(&self) -> &str {
        match self {
            Self::Update(r) => &r.id,
            Self::Signal(s) => &s.id,
            Self::Sprite(s) => &s.id,
        }
    }
}

/// Topic-style broadcast hub. Cheap to clone; all clones share one channel.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StreamEvent) {
        // Err means no receivers; live updates are fire-and-forget.
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
