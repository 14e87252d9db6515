//! Build information and uptime for health checks

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use super::DataResponse;

static SERVER_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Call once when the web server starts
pub fn init_server_start_time() {
    SERVER_START_TIME.get_or_init(Instant::now);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub status: &'static str,
    /// `git describe --tags --always --dirty` at build time
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub uptime_seconds: u64,
    pub uptime_human: String,
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;

    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", seconds),
        (0, 0, _) => format!("{}m {}s", minutes, seconds % 60),
        (0, _, _) => format!("{}h {}m", hours, minutes),
        _ => format!("{}d {}h", days, hours),
    }
}

/// GET /data/status
#[tracing::instrument]
pub async fn get_status() -> impl IntoResponse {
    let uptime_seconds = SERVER_START_TIME
        .get_or_init(Instant::now)
        .elapsed()
        .as_secs();

    let status = StatusInfo {
        status: "ok",
        version: env!("VERGEN_GIT_DESCRIBE"),
        git_commit: env!("VERGEN_GIT_SHA"),
        build_timestamp: env!("VERGEN_BUILD_TIMESTAMP"),
        target: env!("VERGEN_CARGO_TARGET_TRIPLE"),
        uptime_seconds,
        uptime_human: format_uptime(uptime_seconds),
    };

    (StatusCode::OK, Json(DataResponse { data: status }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(45), "45s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(3725), "1h 2m");
        assert_eq!(format_uptime(90125), "1d 1h");
    }
}
