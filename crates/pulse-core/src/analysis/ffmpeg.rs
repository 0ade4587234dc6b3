//! External media-tool invocation: container/codec probing, loudness
//! measurement, and thumbnail extraction over a segment URL.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },
    #[error("unparseable {tool} output: {message}")]
    Parse { tool: &'static str, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Format block of a probe result.
#[derive(Debug, Clone, Default)]
pub struct FormatReport {
    pub format_name: String,
    pub duration: f64,
    pub size: u64,
    pub bit_rate: u64,
}

/// First video stream of a probe result.
#[derive(Debug, Clone, Default)]
pub struct VideoStreamReport {
    pub codec_name: Option<String>,
    pub profile: String,
    pub level: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub pix_fmt: String,
    pub color_space: Option<String>,
    pub color_primaries: Option<String>,
    pub r_frame_rate: Option<String>,
    pub bit_rate: Option<u64>,
}

/// First audio stream of a probe result.
#[derive(Debug, Clone, Default)]
pub struct AudioStreamReport {
    pub codec_name: Option<String>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub format: Option<FormatReport>,
    pub video: Option<VideoStreamReport>,
    pub audio: Option<AudioStreamReport>,
}

/// Loudness figures parsed from a volume-detection pass. `None` means the
/// tool printed nothing usable for that figure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoudnessReport {
    pub mean_db: Option<f64>,
    pub max_db: Option<f64>,
}

/// Contract for the external media-analysis tool.
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeReport, AnalysisError>;

    async fn measure_loudness(&self, url: &str) -> Result<LoudnessReport, AnalysisError>;

    async fn extract_thumbnail(&self, url: &str, output: &Path) -> Result<(), AnalysisError>;
}

/// ffprobe/ffmpeg-backed analyzer. Binary paths are overridable through
/// `FFPROBE_PATH` / `FFMPEG_PATH`.
pub struct FfmpegAnalyzer {
    ffprobe_path: String,
    ffmpeg_path: String,
}

impl FfmpegAnalyzer {
    pub fn new() -> Self {
        Self {
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }

    pub fn with_paths(ffprobe: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe.into(),
            ffmpeg_path: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaAnalyzer for FfmpegAnalyzer {
    async fn probe(&self, url: &str) -> Result<ProbeReport, AnalysisError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(AnalysisError::Tool {
                tool: "ffprobe",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let data: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| AnalysisError::Parse {
                tool: "ffprobe",
                message: e.to_string(),
            })?;

        Ok(parse_probe_json(&data))
    }

    async fn measure_loudness(&self, url: &str) -> Result<LoudnessReport, AnalysisError> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-i", url, "-af", "volumedetect", "-f", "null", "-"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(AnalysisError::Tool {
                tool: "ffmpeg",
                message: stderr.trim().to_string(),
            });
        }

        debug!(url, "volumedetect pass complete");
        Ok(LoudnessReport {
            mean_db: parse_volume(&stderr, "mean_volume"),
            max_db: parse_volume(&stderr, "max_volume"),
        })
    }

    async fn extract_thumbnail(&self, url: &str, output_path: &Path) -> Result<(), AnalysisError> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .args(["-hide_banner", "-loglevel", "warning"])
            .args(["-ss", "0.5"])
            .args(["-i", url])
            .args(["-vframes", "1"])
            .args(["-vf", "scale=320:-1"])
            .args(["-q:v", "5"])
            .arg(output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(AnalysisError::Tool {
                tool: "ffmpeg",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Map ffprobe's JSON into a report, taking the first stream of each type.
/// ffprobe emits numerics as strings in several places, so every numeric
/// field goes through a tolerant conversion.
pub fn parse_probe_json(data: &serde_json::Value) -> ProbeReport {
    let format = data.get("format").map(|f| FormatReport {
        format_name: f["format_name"].as_str().unwrap_or("unknown").to_string(),
        duration: json_f64(&f["duration"]).unwrap_or(0.0),
        size: json_u64(&f["size"]).unwrap_or(0),
        bit_rate: json_u64(&f["bit_rate"]).unwrap_or(0),
    });

    let mut video = None;
    let mut audio = None;

    if let Some(streams) = data["streams"].as_array() {
        for stream in streams {
            match stream["codec_type"].as_str() {
                Some("video") if video.is_none() => {
                    video = Some(VideoStreamReport {
                        codec_name: stream["codec_name"].as_str().map(str::to_string),
                        profile: stream["profile"].as_str().unwrap_or("unknown").to_string(),
                        level: stream["level"].as_i64(),
                        width: stream["width"].as_u64().unwrap_or(0) as u32,
                        height: stream["height"].as_u64().unwrap_or(0) as u32,
                        pix_fmt: stream["pix_fmt"].as_str().unwrap_or("unknown").to_string(),
                        color_space: stream["color_space"].as_str().map(str::to_string),
                        color_primaries: stream["color_primaries"].as_str().map(str::to_string),
                        r_frame_rate: stream["r_frame_rate"].as_str().map(str::to_string),
                        bit_rate: json_u64(&stream["bit_rate"]),
                    });
                }
                Some("audio") if audio.is_none() => {
                    audio = Some(AudioStreamReport {
                        codec_name: stream["codec_name"].as_str().map(str::to_string),
                        channels: stream["channels"].as_u64().map(|v| v as u32),
                        sample_rate: json_u64(&stream["sample_rate"]).map(|v| v as u32),
                        bit_rate: json_u64(&stream["bit_rate"]),
                    });
                }
                _ => {}
            }
        }
    }

    ProbeReport { format, video, audio }
}

fn json_u64(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn json_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Evaluate a `"num/den"` frame-rate expression. A zero or absent
/// denominator falls back to the numeric value; garbage yields 0.
pub fn parse_frame_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den == 0.0 {
                num
            } else {
                num / den
            }
        }
        None => rate.trim().parse().unwrap_or(0.0),
    }
}

/// Human channel-layout name from a channel count.
pub fn channel_layout_name(channels: Option<u32>) -> String {
    match channels {
        None => "Unknown".to_string(),
        Some(1) => "Mono".to_string(),
        Some(2) => "Stereo".to_string(),
        Some(6) => "5.1 Surround".to_string(),
        Some(8) => "7.1 Surround".to_string(),
        Some(n) => format!("{} channels", n),
    }
}

/// Case-sensitive extraction of `<label>: <N> dB` from volumedetect output.
/// Non-finite or unparseable readings are discarded.
pub fn parse_volume(stderr: &str, label: &str) -> Option<f64> {
    let needle = format!("{}: ", label);
    let start = stderr.find(&needle)? + needle.len();
    let rest = &stderr[start..];
    let end = rest.find(" dB")?;
    let value: f64 = rest[..end].trim().parse().ok()?;
    value.is_finite().then_some(value)
}
