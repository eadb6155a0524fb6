//! Metric definitions for the relay node.
//!
//! Prometheus naming: `relay_` prefix, `_total` suffix for counters.
//!
//! # Cardinality
//!
//! - `direction`: 2 values (sent, received)
//! - `role`: 2 values (producer, consumer)
//! - `outcome`: 6 values, see [`SESSION_OUTCOMES`]

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::session::phase::{PeerRole, SessionPhase};

/// Which way frames flow on this node's data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
///
/// Must be called before any metrics are recorded and from within a tokio
/// runtime.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed
/// or the address cannot be bound).
pub fn init_metrics_recorder(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the most recent bitrate report.
///
/// Metric: `relay_bitrate_bits_per_second`
/// Labels: `direction`
pub fn set_bitrate(direction: Direction, bits_per_second: f64) {
    gauge!("relay_bitrate_bits_per_second", "direction" => direction.as_str())
        .set(bits_per_second);
}

/// Record one frame on the data channel.
///
/// Metrics: `relay_frames_total`, `relay_bytes_total`
/// Labels: `direction`
///
/// `wire_bytes` includes the 8-byte length prefix.
pub fn record_frame(direction: Direction, wire_bytes: usize) {
    counter!("relay_frames_total", "direction" => direction.as_str()).increment(1);
    counter!("relay_bytes_total", "direction" => direction.as_str())
        .increment(wire_bytes as u64);
}

/// Every `outcome` label `relay_sessions_total` may carry.
pub const SESSION_OUTCOMES: [&str; 6] = [
    "local_stop",
    "peer_stop",
    "peer_closed",
    "capture_ended",
    "failed",
    "rejected",
];

/// Record a finished session.
///
/// Metric: `relay_sessions_total`
/// Labels: `role`, `outcome`
pub fn record_session(role: PeerRole, outcome: &'static str) {
    counter!("relay_sessions_total", "role" => role.as_str(), "outcome" => outcome).increment(1);
}

/// Record a discovery listen timeout.
///
/// Metric: `relay_discovery_timeouts_total`
pub fn record_discovery_timeout() {
    counter!("relay_discovery_timeouts_total").increment(1);
}

/// Record a failed presence broadcast.
///
/// Metric: `relay_broadcast_failures_total`
pub fn record_broadcast_failure() {
    counter!("relay_broadcast_failures_total").increment(1);
}

/// Set the current lifecycle phase.
///
/// Metric: `relay_session_phase`
///
/// Values follow [`SessionPhase::code`].
pub fn set_session_phase(phase: SessionPhase) {
    gauge!("relay_session_phase").set(f64::from(phase.code()));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use metrics_util::MetricKind;

    /// Run `f` against a local recorder and return its snapshot.
    ///
    /// A local recorder keeps these tests independent of the global one.
    fn capture(f: impl FnOnce()) -> Snapshotter {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);
        snapshotter
    }

    fn find(
        snapshotter: &Snapshotter,
        kind: MetricKind,
        name: &str,
        labels: &[(&str, &str)],
    ) -> Option<DebugValue> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| {
                key.kind() == kind
                    && key.key().name() == name
                    && labels.iter().all(|(k, v)| {
                        key.key()
                            .labels()
                            .any(|label| label.key() == *k && label.value() == *v)
                    })
            })
            .map(|(_, _, _, value)| value)
    }

    #[test]
    fn test_record_frame_counts_frames_and_bytes() {
        let snapshotter = capture(|| {
            record_frame(Direction::Sent, 100);
            record_frame(Direction::Sent, 50);
            record_frame(Direction::Received, 10);
        });

        assert_eq!(
            find(&snapshotter, MetricKind::Counter, "relay_frames_total", &[("direction", "sent")]),
            Some(DebugValue::Counter(2))
        );
        assert_eq!(
            find(&snapshotter, MetricKind::Counter, "relay_bytes_total", &[("direction", "sent")]),
            Some(DebugValue::Counter(150))
        );
        assert_eq!(
            find(
                &snapshotter,
                MetricKind::Counter,
                "relay_frames_total",
                &[("direction", "received")]
            ),
            Some(DebugValue::Counter(1))
        );
    }

    #[test]
    fn test_session_outcome_labels() {
        let snapshotter = capture(|| {
            record_session(PeerRole::Consumer, "peer_closed");
            record_session(PeerRole::Consumer, "peer_closed");
            record_session(PeerRole::Producer, "local_stop");
        });

        assert_eq!(
            find(
                &snapshotter,
                MetricKind::Counter,
                "relay_sessions_total",
                &[("role", "consumer"), ("outcome", "peer_closed")]
            ),
            Some(DebugValue::Counter(2))
        );
        assert_eq!(
            find(
                &snapshotter,
                MetricKind::Counter,
                "relay_sessions_total",
                &[("role", "producer"), ("outcome", "local_stop")]
            ),
            Some(DebugValue::Counter(1))
        );
    }

    #[test]
    fn test_gauges() {
        let snapshotter = capture(|| {
            set_bitrate(Direction::Received, 12_500_000.0);
            set_session_phase(SessionPhase::Streaming);
        });

        let bitrate = find(
            &snapshotter,
            MetricKind::Gauge,
            "relay_bitrate_bits_per_second",
            &[("direction", "received")],
        );
        assert!(matches!(bitrate, Some(DebugValue::Gauge(v)) if (v.into_inner() - 12_500_000.0).abs() < 1e-6));

        let phase = find(&snapshotter, MetricKind::Gauge, "relay_session_phase", &[]);
        assert!(matches!(phase, Some(DebugValue::Gauge(v)) if (v.into_inner() - 4.0).abs() < 1e-9));
    }

    #[test]
    fn test_discovery_counters() {
        let snapshotter = capture(|| {
            record_discovery_timeout();
            record_discovery_timeout();
            record_broadcast_failure();
        });

        assert_eq!(
            find(&snapshotter, MetricKind::Counter, "relay_discovery_timeouts_total", &[]),
            Some(DebugValue::Counter(2))
        );
        assert_eq!(
            find(&snapshotter, MetricKind::Counter, "relay_broadcast_failures_total", &[]),
            Some(DebugValue::Counter(1))
        );
    }
}
