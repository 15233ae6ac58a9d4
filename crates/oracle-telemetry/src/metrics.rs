//! Prometheus metrics for oracle feed handlers.
//!
//! Covers:
//! - Session state machine
//! - Classified errors per lifecycle phase
//! - Frames read, batches emitted, frames written
//! - Session duration
//!
//! # Panics
//!
//! Registration panics on first use if a metric name is registered twice.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

/// Session states, in lifecycle order.
pub const SESSION_STATES: [&str; 7] = [
    "created",
    "dialing",
    "subscribing",
    "handshaking",
    "streaming",
    "closing",
    "terminated",
];

/// Session state machine current state.
/// Labels: provider, state
pub static SESSION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "oracle_ws_session_state",
        "Query handler session state (1=active, 0=inactive)",
        &["provider", "state"]
    )
    .unwrap()
});

/// Classified session errors.
/// Labels: provider, kind (dial/build_subscription/write/read/parse/close)
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_ws_errors_total",
        "Total classified query handler errors",
        &["provider", "kind"]
    )
    .unwrap()
});

/// Batches delivered to the consumer.
pub static BATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_ws_batches_total",
        "Total result batches sent to the consumer",
        &["provider"]
    )
    .unwrap()
});

/// Frames read from the transport.
pub static FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_ws_frames_total",
        "Total frames read from the transport",
        &["provider"]
    )
    .unwrap()
});

/// Frames written to the transport.
/// Labels: provider, purpose (subscribe/reply/heartbeat)
pub static WRITES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_ws_writes_total",
        "Total frames written to the transport",
        &["provider", "purpose"]
    )
    .unwrap()
});

/// Session lifetime in milliseconds, observed at teardown.
pub static SESSION_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "oracle_ws_session_duration_ms",
        "Query handler session duration in milliseconds",
        &["provider"],
        vec![100.0, 1_000.0, 10_000.0, 60_000.0, 600_000.0, 3_600_000.0, 86_400_000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the session state. Only the active state is 1.
    pub fn session_state_set(provider: &str, state: &str) {
        for s in SESSION_STATES {
            SESSION_STATE.with_label_values(&[provider, s]).set(0.0);
        }
        SESSION_STATE.with_label_values(&[provider, state]).set(1.0);
    }

    /// Record a classified error.
    pub fn error(provider: &str, kind: &str) {
        ERRORS_TOTAL.with_label_values(&[provider, kind]).inc();
    }

    /// Record a batch sent to the consumer.
    pub fn batch_sent(provider: &str) {
        BATCHES_TOTAL.with_label_values(&[provider]).inc();
    }

    /// Record a frame read from the transport.
    pub fn frame_read(provider: &str) {
        FRAMES_TOTAL.with_label_values(&[provider]).inc();
    }

    /// Record a frame written to the transport.
    pub fn frame_written(provider: &str, purpose: &str) {
        WRITES_TOTAL.with_label_values(&[provider, purpose]).inc();
    }

    /// Record session duration at teardown.
    pub fn session_duration(provider: &str, duration_ms: f64) {
        SESSION_DURATION_MS
            .with_label_values(&[provider])
            .observe(duration_ms);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_single_active() {
        Metrics::session_state_set("state_test", "dialing");
        Metrics::session_state_set("state_test", "streaming");

        for s in SESSION_STATES {
            let value = SESSION_STATE.with_label_values(&["state_test", s]).get();
            let expected = if s == "streaming" { 1.0 } else { 0.0 };
            assert_eq!(value, expected, "state {s}");
        }
    }

    #[test]
    fn test_error_counter() {
        let before = ERRORS_TOTAL
            .with_label_values(&["error_test", "parse"])
            .get();
        Metrics::error("error_test", "parse");
        Metrics::error("error_test", "parse");

        let after = ERRORS_TOTAL
            .with_label_values(&["error_test", "parse"])
            .get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_encode_contains_metrics() {
        Metrics::batch_sent("encode_test");
        let text = Metrics::encode().unwrap();
        assert!(text.contains("oracle_ws_batches_total"));
    }
}
