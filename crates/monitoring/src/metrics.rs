//! Prometheus metrics for the deployment platform services.
//!
//! Metrics live in `OnceLock` statics so handler code can bump them without
//! threading a registry around; `init_metrics` must run once at startup.
//! `start_metrics_server` exposes the default registry on `GET /metrics`.

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::{response::Response, routing::get, Router};
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge,
};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::info;

static BUILDS_STARTED: OnceLock<IntCounter> = OnceLock::new();
static BUILDS_SUCCEEDED: OnceLock<IntCounter> = OnceLock::new();
static BUILDS_FAILED: OnceLock<IntCounter> = OnceLock::new();
static LOG_BATCHES_POSTED: OnceLock<IntCounter> = OnceLock::new();
static LOG_BATCHES_DROPPED: OnceLock<IntCounter> = OnceLock::new();
static SSE_CLIENTS: OnceLock<IntGauge> = OnceLock::new();
static SSE_EVENTS_DROPPED: OnceLock<IntCounter> = OnceLock::new();

/// Register all platform metrics with the default registry.
pub fn init_metrics() -> Result<()> {
    BUILDS_STARTED
        .set(register_int_counter!(
            "platform_builds_started_total",
            "Builds that entered the pipeline"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    BUILDS_SUCCEEDED
        .set(register_int_counter!(
            "platform_builds_succeeded_total",
            "Builds that uploaded an artifact successfully"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    BUILDS_FAILED
        .set(register_int_counter!(
            "platform_builds_failed_total",
            "Builds that terminated in a failed stage"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    LOG_BATCHES_POSTED
        .set(register_int_counter!(
            "platform_log_batches_posted_total",
            "Log batches delivered to the control plane"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    LOG_BATCHES_DROPPED
        .set(register_int_counter!(
            "platform_log_batches_dropped_total",
            "Log batches dropped after a delivery failure"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    SSE_CLIENTS
        .set(register_int_gauge!(
            "platform_sse_clients",
            "Currently connected SSE subscribers"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    SSE_EVENTS_DROPPED
        .set(register_int_counter!(
            "platform_sse_events_dropped_total",
            "Events dropped because a subscriber queue was full"
        )?)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    info!("Metrics registered");
    Ok(())
}

pub fn record_build_started() {
    if let Some(c) = BUILDS_STARTED.get() {
        c.inc();
    }
}

pub fn record_build_succeeded() {
    if let Some(c) = BUILDS_SUCCEEDED.get() {
        c.inc();
    }
}

pub fn record_build_failed() {
    if let Some(c) = BUILDS_FAILED.get() {
        c.inc();
    }
}

pub fn record_log_batch_posted() {
    if let Some(c) = LOG_BATCHES_POSTED.get() {
        c.inc();
    }
}

pub fn record_log_batch_dropped() {
    if let Some(c) = LOG_BATCHES_DROPPED.get() {
        c.inc();
    }
}

pub fn sse_client_connected() {
    if let Some(g) = SSE_CLIENTS.get() {
        g.inc();
    }
}

pub fn sse_client_disconnected() {
    if let Some(g) = SSE_CLIENTS.get() {
        g.dec();
    }
}

pub fn record_sse_event_dropped() {
    if let Some(c) = SSE_EVENTS_DROPPED.get() {
        c.inc();
    }
}

/// Router exposing the Prometheus text endpoint.
pub fn create_metrics_server() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve `GET /metrics` on the given address until the process exits.
pub async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = create_metrics_server();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Started metrics server on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Result<Response<String>, StatusCode> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => {
            let response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, encoder.format_type())
                .body(metrics)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(response)
        }
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
