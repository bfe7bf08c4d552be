use anyhow::{Context, Result};
use axum::{routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ps_requests_total",
        "Total PandaScore REST requests",
        &["endpoint"]
    )
    .unwrap()
});

pub static REQUESTS_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ps_requests_errors_total",
        "PandaScore REST errors",
        &["endpoint", "status"]
    )
    .unwrap()
});

pub static REQUEST_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ps_request_latency_seconds",
        "PandaScore REST latency",
        &["endpoint"]
    )
    .unwrap()
});

pub static EVENTS_OUT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("ingestion_events_out_total", "Events published", &["type"]).unwrap()
});

pub static BUS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "bus_events_dropped_total",
        "Events dropped by the full in-process bus"
    )
    .unwrap()
});

pub static SINK_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("sink_errors_total", "Per-sink write failures", &["sink"]).unwrap()
});

async fn render() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

/// Serve the Prometheus text exposition on `/metrics`.
pub async fn serve(port: u16) -> Result<()> {
    let app = Router::new().route("/metrics", get(render));
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics listener")?;
    info!("Metrics exposed on http://{}/metrics", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
