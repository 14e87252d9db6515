use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; later calls
/// are no-ops.
pub fn init_metrics() -> Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    // Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .context("Failed to set buckets for http_request_duration_seconds")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let _ = METRICS_HANDLE.set(handle);
    initialize_marketplace_metrics();
    Ok(())
}

/// GET /data/metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics are not enabled").into_response(),
    }
}

/// Record request latency by method and status
pub async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "status" => response.status().as_u16().to_string()
    )
    .record(start.elapsed().as_secs_f64());

    response
}

/// Background task to update process metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                for line in status.lines() {
                    if line.starts_with("VmRSS:") {
                        if let Some(kb_str) = line.split_whitespace().nth(1)
                            && let Ok(kb) = kb_str.parse::<f64>()
                        {
                            metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
                        }
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Register marketplace counters at zero so they show up before the first event
pub fn initialize_marketplace_metrics() {
    metrics::counter!("rentals.created").absolute(0);
    metrics::counter!("rentals.transition").absolute(0);
    metrics::counter!("rentals.expired").absolute(0);
    metrics::counter!("rentals.refunded").absolute(0);
    metrics::counter!("stripe.api.errors").absolute(0);
    metrics::counter!("stripe.webhook.received").absolute(0);
    metrics::counter!("stripe.webhook.signature_invalid").absolute(0);
    metrics::counter!("stripe.checkout.created").absolute(0);
    metrics::counter!("stripe.connect.onboarding_started").absolute(0);
    metrics::counter!("stripe.connect.onboarding_completed").absolute(0);
    metrics::counter!("withdrawals.paid").absolute(0);
    metrics::counter!("withdrawals.failed").absolute(0);
}
