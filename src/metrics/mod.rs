//! Metrics module
//!
//! Prometheus counters for chunk uploads and channel snapshots.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    pub static ref CHUNKS_FLUSHED: CounterVec = register_counter_vec!(
        "cirrus_chunks_flushed_total",
        "Chunks acknowledged by the upload sink",
        &["kind"]  // "intermediate" or "final"
    ).unwrap();

    pub static ref BYTES_FLUSHED: Counter = register_counter!(
        "cirrus_bytes_flushed_total",
        "Bytes acknowledged by the upload sink"
    ).unwrap();

    pub static ref CHUNK_SIZE: Histogram = register_histogram!(
        "cirrus_chunk_size_bytes",
        "Size of flushed chunks",
        vec![262144.0, 1048576.0, 2097152.0, 8388608.0, 33554432.0, 134217728.0]
    ).unwrap();

    pub static ref FLUSH_FAILURES: Counter = register_counter!(
        "cirrus_flush_failures_total",
        "Chunk flushes that returned an error"
    ).unwrap();

    pub static ref RETRIES: Counter = register_counter!(
        "cirrus_retries_total",
        "Retried transport operations"
    ).unwrap();

    pub static ref STATE_EVENTS: CounterVec = register_counter_vec!(
        "cirrus_channel_state_total",
        "Write channel captures and restores",
        &["event"]
    ).unwrap();
}

/// Record an acknowledged chunk
pub fn record_chunk_flushed(bytes: u64, last: bool) {
    let kind = if last { "final" } else { "intermediate" };
    CHUNKS_FLUSHED.with_label_values(&[kind]).inc();
    BYTES_FLUSHED.inc_by(bytes as f64);
    CHUNK_SIZE.observe(bytes as f64);
}

/// Record a failed chunk flush
pub fn record_flush_failure() {
    FLUSH_FAILURES.inc();
}

/// Record a retried operation
pub fn record_retry() {
    RETRIES.inc();
}

pub fn record_state_capture() {
    STATE_EVENTS.with_label_values(&["capture"]).inc();
}

pub fn record_state_restore() {
    STATE_EVENTS.with_label_values(&["restore"]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
