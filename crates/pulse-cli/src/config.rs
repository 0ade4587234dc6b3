//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [defaults]
//! poll_interval_ms = 7000
//! stale_threshold_ms = 7000
//! max_concurrent_analysis = 4
//!
//! [[stream]]
//! id = "live-1"
//! name = "Main channel"
//! url = "https://cdn1.example.com/live/master.m3u8"
//!
//! [[stream]]
//! url = "https://cdn2.example.com/live/master.m3u8"
//! stale_threshold_ms = 12000
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use pulse_core::{MonitorConfig, StreamRecord};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub stream: Vec<StreamDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default)]
    pub stale_threshold_ms: Option<u64>,

    #[serde(default)]
    pub recent_window_secs: Option<u64>,

    #[serde(default)]
    pub max_concurrent_analysis: Option<usize>,

    #[serde(default)]
    pub error_retention_secs: Option<u64>,

    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl DefaultsConfig {
    pub fn to_monitor_config(&self) -> MonitorConfig {
        let mut c = MonitorConfig::default();
        if let Some(v) = self.poll_interval_ms {
            c = c.with_poll_interval(v);
        }
        if let Some(v) = self.stale_threshold_ms {
            c = c.with_stale_threshold(v);
        }
        if let Some(v) = self.recent_window_secs {
            c = c.with_recent_window(v);
        }
        if let Some(v) = self.max_concurrent_analysis {
            c = c.with_max_concurrent_analysis(v);
        }
        if let Some(v) = self.error_retention_secs {
            c = c.with_error_retention(v);
        }
        if let Some(v) = self.request_timeout_ms {
            c = c.with_request_timeout(v);
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDef {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: String,
    pub stale_threshold_ms: Option<u64>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stream.is_empty() {
            return Err("Config declares no [[stream]] entries".into());
        }

        for (i, s) in self.stream.iter().enumerate() {
            let parsed = url::Url::parse(&s.url)
                .map_err(|e| format!("Invalid stream URL at index {}: {} ({})", i, s.url, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!("Stream URL must use http or https: {}", s.url));
            }
        }

        let urls: Vec<&str> = self.stream.iter().map(|s| s.url.as_str()).collect();
        let unique: std::collections::HashSet<&str> = urls.iter().copied().collect();
        if unique.len() != urls.len() {
            return Err("Duplicate stream URLs in config".into());
        }

        let mut ids = std::collections::HashSet::new();
        for s in &self.stream {
            if let Some(ref id) = s.id {
                if id.is_empty() {
                    return Err("Stream ID must not be empty".into());
                }
                if !ids.insert(id.as_str()) {
                    return Err(format!("Duplicate stream ID: {}", id));
                }
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }

    /// Seed stream records from the config. The monitor itself never
    /// creates records; this is the administrative step done at startup.
    pub fn to_records(&self, defaults: &MonitorConfig) -> Vec<StreamRecord> {
        self.stream
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let id = s.id.clone().unwrap_or_else(|| format!("stream_{}", i + 1));
                let name = s.name.clone().unwrap_or_else(|| id.clone());
                let mut record = StreamRecord::new(id, name, s.url.clone());
                record.health.stale_threshold = s
                    .stale_threshold_ms
                    .unwrap_or(defaults.stale_threshold.as_millis() as u64);
                record
            })
            .collect()
    }
}
