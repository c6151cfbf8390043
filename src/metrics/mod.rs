//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Event delivery and pointer updates
//! - Remote reads and cache invalidations
//! - Mutation submissions and their outcomes
//! - Local store failures and the current lifecycle stage

use crate::error::{CoordinatorError, CoordinatorResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::info;

lazy_static! {
    // Event metrics
    pub static ref EVENTS_RECEIVED: IntCounter = register_int_counter!(
        "heartsync_events_received_total",
        "Total MatchCreated events delivered to the coordinator"
    ).unwrap();

    pub static ref EVENTS_DROPPED: CounterVec = register_counter_vec!(
        "heartsync_events_dropped_total",
        "Total events dropped by reason",
        &["reason"]
    ).unwrap();

    pub static ref POINTER_UPDATES: IntCounter = register_int_counter!(
        "heartsync_match_pointer_updates_total",
        "Total changes to the active match pointer"
    ).unwrap();

    // Read metrics
    pub static ref READS: CounterVec = register_counter_vec!(
        "heartsync_reads_total",
        "Remote reads by entity and outcome",
        &["entity", "outcome"]
    ).unwrap();

    pub static ref INVALIDATIONS: CounterVec = register_counter_vec!(
        "heartsync_invalidations_total",
        "Cache invalidations by entity",
        &["entity"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "heartsync_transactions_submitted_total",
        "Total mutations submitted",
        &["kind"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "heartsync_transactions_confirmed_total",
        "Total mutations confirmed",
        &["kind"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "heartsync_transactions_failed_total",
        "Total mutations rejected or reverted",
        &["kind"]
    ).unwrap();

    // Store metrics
    pub static ref STORE_FAILURES: CounterVec = register_counter_vec!(
        "heartsync_store_failures_total",
        "Local store failures by operation",
        &["operation"]
    ).unwrap();

    // Lifecycle metrics
    pub static ref LIFECYCLE_STAGE: IntGauge = register_int_gauge!(
        "heartsync_lifecycle_stage",
        "Current lifecycle stage ordinal (0=signed out)"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoordinatorError::Config(format!("Cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// Helper functions to record metrics

pub fn record_events_received(count: usize) {
    EVENTS_RECEIVED.inc_by(count as u64);
}

pub fn record_event_dropped(reason: &str) {
    EVENTS_DROPPED.with_label_values(&[reason]).inc();
}

pub fn record_pointer_update() {
    POINTER_UPDATES.inc();
}

pub fn record_read(entity: &str, outcome: &str) {
    READS.with_label_values(&[entity, outcome]).inc();
}

pub fn record_invalidation(entity: &str) {
    INVALIDATIONS.with_label_values(&[entity]).inc();
}

pub fn record_tx_submitted(kind: &str) {
    TX_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_tx_confirmed(kind: &str) {
    TX_CONFIRMED.with_label_values(&[kind]).inc();
}

pub fn record_tx_failed(kind: &str) {
    TX_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_store_failure(operation: &str) {
    STORE_FAILURES.with_label_values(&[operation]).inc();
}

pub fn record_stage(ordinal: i64) {
    LIFECYCLE_STAGE.set(ordinal);
}
