//! Observability for the relay node.
//!
//! Logging goes through `tracing` with one target per component:
//! `relay.discovery`, `relay.control`, `relay.transport`, `relay.session`.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_bitrate_bits_per_second` | Gauge | `direction` | Last bitrate report |
//! | `relay_frames_total` | Counter | `direction` | Frames sent or received |
//! | `relay_bytes_total` | Counter | `direction` | Wire bytes, prefix included |
//! | `relay_sessions_total` | Counter | `role`, `outcome` | Finished sessions by stop reason |
//! | `relay_discovery_timeouts_total` | Counter | none | Listen timeouts while discovering |
//! | `relay_broadcast_failures_total` | Counter | none | Failed presence broadcasts |
//! | `relay_session_phase` | Gauge | none | Current lifecycle phase code |
//!
//! All labels are bounded enums; no addresses or session ids appear in labels.

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_broadcast_failure, record_discovery_timeout, record_frame,
    record_session, set_bitrate, set_session_phase, Direction,
};
