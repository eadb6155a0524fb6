//! Session orchestration.
//!
//! Each role runs one loop that repeats `Idle -> (Discovering | Advertising)
//! -> Handshaking -> Streaming -> Stopping -> Idle` until the node is
//! stopped or hits a configuration-fatal error. Everything a session opens
//! is parked in [`resources::SessionResources`] and released in
//! [`finish_session`] on every exit path.

pub mod consumer;
pub mod lifecycle;
pub mod phase;
pub mod producer;
pub mod resources;
pub mod stream;

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::devices::{CaptureBackend, SinkBackend};
use crate::observability::metrics::{self, Direction};
use crate::status::{NodeStatus, StatusReporter};
use lifecycle::SessionLifecycle;
use phase::SessionPhase;
use resources::SessionResources;
use stream::StopReason;

/// Everything a role loop shares with the node handle.
#[derive(Clone)]
pub struct NodeContext {
    pub config: Arc<Config>,
    pub local_ip: Ipv4Addr,
    pub lifecycle: Arc<SessionLifecycle>,
    pub status: Arc<StatusReporter>,
    pub capture_backend: Arc<dyn CaptureBackend>,
    pub sink_backend: Arc<dyn SinkBackend>,
    /// Cancelled when the node stops.
    pub cancel: CancellationToken,
}

/// Tear a session down and return to Idle.
///
/// Moves through Stopping, releases every held resource, records the
/// outcome and publishes the reason to the operator.
pub async fn finish_session(
    ctx: &NodeContext,
    resources: &mut SessionResources,
    reason: &StopReason,
) {
    let phase = ctx.lifecycle.phase();
    let attempted = matches!(phase, SessionPhase::Handshaking | SessionPhase::Streaming);

    if phase != SessionPhase::Idle {
        if let Err(e) = ctx.lifecycle.transition(SessionPhase::Stopping) {
            warn!(target: "relay.session", error = %e, "Could not enter Stopping");
        }
    }

    let summary = resources.release().await;
    metrics::set_bitrate(Direction::Sent, 0.0);
    metrics::set_bitrate(Direction::Received, 0.0);

    if attempted {
        metrics::record_session(ctx.lifecycle.role(), reason.outcome());
        info!(
            target: "relay.session",
            session_id = %resources.session_id,
            outcome = reason.outcome(),
            released = summary.released,
            "Session ended"
        );
        ctx.status.publish(NodeStatus::Disconnected {
            reason: reason.to_string(),
        });
    }

    if let Err(e) = ctx.lifecycle.transition(SessionPhase::Idle) {
        warn!(target: "relay.session", error = %e, "Could not return to Idle");
    }
}
