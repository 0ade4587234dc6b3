use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;

use pulse_core::scoring;

use crate::state::AppState;

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::with_capacity(4096);

    let records = match state.store.find_all().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load streams for metrics exposition");
            Vec::new()
        }
    };

    let now = Utc::now();

    writeln!(out, "# TYPE pulse_stream_status stateset").unwrap();
    writeln!(out, "# HELP pulse_stream_status Current status of the stream").unwrap();
    for r in &records {
        let current = r.status.to_string();
        for variant in &["online", "offline", "error", "stale"] {
            writeln!(
                out,
                "pulse_stream_status{{stream_id=\"{}\",status=\"{}\"}} {}",
                r.id,
                variant,
                if current == *variant { 1 } else { 0 }
            )
            .unwrap();
        }
    }

    writeln!(out, "# TYPE pulse_stream_health_score gauge").unwrap();
    writeln!(out, "# HELP pulse_stream_health_score Overall health score in [0, 100]").unwrap();
    for r in &records {
        let recent = scoring::recent_issues(r, now, state.config.recent_window);
        let decay = scoring::decay_factor(r.health.last_error_time, now);
        writeln!(
            out,
            "pulse_stream_health_score{{stream_id=\"{}\"}} {}",
            r.id,
            scoring::health_score(r, Some(&recent), decay).round()
        )
        .unwrap();
    }

    writeln!(out, "# TYPE pulse_stream_video_score gauge").unwrap();
    writeln!(out, "# HELP pulse_stream_video_score Video quality score in [0, 100]").unwrap();
    for r in &records {
        writeln!(
            out,
            "pulse_stream_video_score{{stream_id=\"{}\"}} {}",
            r.id,
            scoring::video_score(r)
        )
        .unwrap();
    }

    writeln!(out, "# TYPE pulse_stream_audio_score gauge").unwrap();
    writeln!(out, "# HELP pulse_stream_audio_score Audio quality score in [0, 100]").unwrap();
    for r in &records {
        writeln!(
            out,
            "pulse_stream_audio_score{{stream_id=\"{}\"}} {}",
            r.id,
            scoring::audio_score(r)
        )
        .unwrap();
    }

    writeln!(out, "# TYPE pulse_stream_total_errors counter").unwrap();
    writeln!(out, "# HELP pulse_stream_total_errors Total errors recorded for the stream").unwrap();
    for r in &records {
        writeln!(
            out,
            "pulse_stream_total_errors{{stream_id=\"{}\"}} {}",
            r.id, r.health.total_errors
        )
        .unwrap();
    }

    writeln!(out, "# TYPE pulse_stream_media_sequence gauge").unwrap();
    writeln!(out, "# HELP pulse_stream_media_sequence Last observed media sequence").unwrap();
    for r in &records {
        writeln!(
            out,
            "pulse_stream_media_sequence{{stream_id=\"{}\"}} {}",
            r.id, r.health.media_sequence
        )
        .unwrap();
    }

    writeln!(out, "# TYPE pulse_stream_last_checked_timestamp_seconds gauge").unwrap();
    writeln!(
        out,
        "# HELP pulse_stream_last_checked_timestamp_seconds Unix timestamp of the last poll"
    )
    .unwrap();
    for r in &records {
        if let Some(t) = r.last_checked {
            let secs = t.timestamp() as f64 + (t.timestamp_subsec_millis() as f64 / 1000.0);
            writeln!(
                out,
                "pulse_stream_last_checked_timestamp_seconds{{stream_id=\"{}\"}} {:.3}",
                r.id, secs
            )
            .unwrap();
        }
    }

    writeln!(out, "# EOF").unwrap();

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}
