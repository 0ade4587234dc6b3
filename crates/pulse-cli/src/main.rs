#![forbid(unsafe_code)]

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use pulse_core::{
    EventHub, FfmpegAnalyzer, HttpLoader, MemoryStore, MetricsStore, Monitor, MonitorConfig,
    StreamEvent, StreamRecord, StreamStatus, StreamStore,
};

/// Fleet monitor for live HLS streams: health scoring plus per-segment
/// media analysis.
#[derive(Parser)]
#[command(name = "streampulse", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the configured fleet and serve the observation API.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Poll a stream once and print its health report.
    Check {
        /// Master or media playlist URL.
        url: String,

        /// Output the full stream record as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Stale threshold in milliseconds [default: 7000].
        #[arg(long)]
        stale_threshold: Option<u64>,
    },
    /// Monitor a single stream with a live console view (no API server).
    Watch {
        /// Master or media playlist URL.
        url: String,

        /// Poll interval in milliseconds [default: 7000].
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Stale threshold in milliseconds [default: 7000].
        #[arg(long)]
        stale_threshold: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Check { url, json, stale_threshold } => {
            init_tracing_with_default("warn");
            run_check(url, json, stale_threshold).await;
        }
        Commands::Watch { url, poll_interval, stale_threshold } => {
            init_tracing_with_default("warn");
            run_watch(url, poll_interval, stale_threshold).await;
        }
    }
}

/// Build a monitor over an in-memory store seeded with the given records.
fn build_monitor(config: MonitorConfig, records: Vec<StreamRecord>) -> (Monitor, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    for record in records {
        store.insert(record);
    }

    let loader = Arc::new(HttpLoader::from_config(&config));
    let monitor = Monitor::new(
        config,
        loader,
        Arc::clone(&store) as Arc<dyn StreamStore>,
        Arc::clone(&store) as Arc<dyn MetricsStore>,
        Arc::new(FfmpegAnalyzer::new()),
        EventHub::default(),
    );
    (monitor, store)
}

fn single_stream(url: &str, config: &MonitorConfig, stale_threshold: Option<u64>) -> StreamRecord {
    let mut record = StreamRecord::new("stream_1", "stream_1", url);
    record.health.stale_threshold =
        stale_threshold.unwrap_or(config.stale_threshold.as_millis() as u64);
    record
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: PathBuf) {
    let app_config = match config::AppConfig::load(&config_path) {
        Ok(c) => {
            init_tracing(&c.server.log_format);
            tracing::info!(path = %config_path.display(), "Loaded config file");
            c
        }
        Err(e) => {
            init_tracing("pretty");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let listen = listen_override.unwrap_or(app_config.server.listen);
    let monitor_config = app_config.defaults.to_monitor_config();
    let records = app_config.to_records(&monitor_config);

    tracing::info!(streams = records.len(), "Seeding stream records");
    let (monitor, store) = build_monitor(monitor_config.clone(), records);

    monitor.start().await;

    let state = pulse_api::state::AppState::new(Arc::clone(&store) as Arc<dyn StreamStore>)
        .with_config(monitor_config);

    tracing::info!(%listen, "Starting observation API");
    if let Err(e) = pulse_api::serve_with_state(listen, state, pulse_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping monitor...");
    monitor.stop().await;
    tracing::info!("Shutdown complete");
}

async fn run_check(url: String, json: bool, stale_threshold: Option<u64>) {
    let config = MonitorConfig::default();
    let record = single_stream(&url, &config, stale_threshold);
    let (monitor, store) = build_monitor(config, vec![record]);

    monitor.sweep_once().await;

    let record = store
        .find_by_id("stream_1")
        .await
        .ok()
        .flatten()
        .expect("seeded stream exists");

    if json {
        println!("{}", serde_json::to_string_pretty(&record).expect("record is Serialize"));
    } else {
        print_report(&record);
    }

    match record.status {
        StreamStatus::Online => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

fn print_report(record: &StreamRecord) {
    let status = match record.status {
        StreamStatus::Online => style("online").green().bold(),
        StreamStatus::Stale => style("stale").yellow().bold(),
        _ => style("error").red().bold(),
    };

    eprintln!("{} {}", style("stream:").dim(), record.url);
    eprintln!("{} {}", style("status:").dim(), status);
    eprintln!(
        "{} mseq={} segments={} target={}s type={}",
        style("playlist:").dim(),
        record.health.media_sequence,
        record.health.segment_count,
        record.health.target_duration,
        record.health.playlist_type,
    );

    if let Some(stats) = &record.stats {
        if stats.bandwidth > 0 {
            eprintln!(
                "{} bandwidth={} resolution={}",
                style("variant:").dim(),
                stats.bandwidth,
                if stats.resolution.is_empty() { "?" } else { &stats.resolution },
            );
        }
    }

    if record.stream_errors.is_empty() {
        eprintln!("\n{}", style("No issues found.").green().bold());
    } else {
        eprintln!(
            "\n{} {} issue(s) found:\n",
            style("!").red().bold(),
            record.stream_errors.len()
        );
        for e in &record.stream_errors {
            eprintln!(
                "  {} {:<20} {}  {}",
                style(e.date.format("%H:%M:%S")).dim(),
                style(format!("{}", e.error_type)).red(),
                style(&e.variant).dim(),
                e.details,
            );
        }
    }
}

async fn run_watch(url: String, poll_interval: Option<u64>, stale_threshold: Option<u64>) {
    let config = {
        let mut c = MonitorConfig::default();
        if let Some(pi) = poll_interval {
            c = c.with_poll_interval(pi);
        }
        c
    };

    let record = single_stream(&url, &config, stale_threshold);
    let stale_ms = record.health.stale_threshold;
    let (monitor, _store) = build_monitor(config.clone(), vec![record]);

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{msg}").expect("valid template");

    multi
        .println(format!(
            "{} {}",
            style("streampulse").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
    multi
        .println(format!("  {} {}", style("url:  ").dim(), style(&url).bold()))
        .ok();
    multi
        .println(format!(
            "  {} {}ms",
            style("poll: ").dim(),
            config.poll_interval.as_millis()
        ))
        .ok();
    multi
        .println(format!("  {} {}ms", style("stale:").dim(), stale_ms))
        .ok();
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    let mut rx = monitor.hub().subscribe();
    monitor.start().await;

    let status_bar = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status_bar.set_message(format!(
        "  {}",
        style("Waiting for first manifest fetch...").dim()
    ));

    let mut seen_errors = 0usize;

    let shutdown = pulse_api::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                status_bar.finish_and_clear();
                multi.println(format!("\n{}", style("Monitor stopped.").dim())).ok();
                monitor.stop().await;
                return;
            }
            event = rx.recv() => match event {
                Ok(StreamEvent::Update(record)) => {
                    if record.health.total_errors as usize > seen_errors {
                        let new = record.stream_errors.len().min(
                            record.health.total_errors as usize - seen_errors,
                        );
                        for e in record.stream_errors.iter().rev().take(new).rev() {
                            multi
                                .println(format!(
                                    "  {}  {} {:<20} {}",
                                    style(e.date.format("%H:%M:%S")).dim(),
                                    style("ERROR").red().bold(),
                                    style(format!("{}", e.error_type)).red(),
                                    e.details,
                                ))
                                .ok();
                        }
                        seen_errors = record.health.total_errors as usize;
                    }

                    let status = match record.status {
                        StreamStatus::Online => style(format!("{}", record.status)).green(),
                        StreamStatus::Stale => style(format!("{}", record.status)).yellow(),
                        _ => style(format!("{}", record.status)).red(),
                    };
                    status_bar.set_message(format!(
                        "  {}  mseq={:<10} segs={:<4} errors={} recent={}/{}/{}",
                        status,
                        record.health.media_sequence,
                        record.health.segment_count,
                        record.health.total_errors,
                        record.health.recent_sequence_jumps,
                        record.health.recent_sequence_resets,
                        record.health.recent_errors,
                    ));
                }
                Ok(StreamEvent::Signal(signal)) => {
                    multi
                        .println(format!(
                            "  {}  {} video={:>5.1} audio={:>5.1} fps={:.1}{}",
                            style(signal.timestamp.format("%H:%M:%S")).dim(),
                            style("SIGNAL").cyan(),
                            signal.video,
                            signal.audio,
                            signal.fps,
                            if signal.is_silent {
                                format!("  {}", style("SILENT").yellow().bold())
                            } else {
                                String::new()
                            },
                        ))
                        .ok();
                }
                Ok(StreamEvent::Sprite(sprite)) => {
                    multi
                        .println(format!(
                            "  {} thumbnail updated ({} bytes)",
                            style("SPRITE").magenta(),
                            sprite.url.len(),
                        ))
                        .ok();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event consumer lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    status_bar.finish_and_clear();
                    return;
                }
            }
        }
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

fn init_tracing_with_default(level: &str) {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}
