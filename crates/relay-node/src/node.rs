//! The running relay node and its operator handle.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::devices::{CaptureBackend, SinkBackend};
use crate::errors::RelayError;
use crate::net::detect_local_ipv4;
use crate::session::consumer::run_consumer;
use crate::session::lifecycle::{PhaseReceiver, SessionLifecycle};
use crate::session::phase::{PeerRole, PhaseTransition, SessionPhase};
use crate::session::producer::run_producer;
use crate::session::NodeContext;
use crate::status::{NodeStatus, StatusReporter};

/// Entry point for starting a node.
pub struct RelayNode;

impl RelayNode {
    /// Resolve the local address and start the role loop on a new task.
    pub async fn spawn(
        config: Config,
        capture_backend: Arc<dyn CaptureBackend>,
        sink_backend: Arc<dyn SinkBackend>,
    ) -> RelayNodeHandle {
        let local_ip = match config.local_ip {
            Some(ip) => ip,
            None => detect_local_ipv4().await,
        };
        let role = config.role;
        let lifecycle = Arc::new(SessionLifecycle::new(role));
        let status = Arc::new(StatusReporter::new());
        let cancel = CancellationToken::new();

        info!(
            target: "relay.session",
            %role,
            %local_ip,
            capture_role = %config.capture_role,
            data_port = config.data_port,
            control_port = config.control_port,
            discovery_port = config.discovery_port,
            "Starting relay node"
        );

        let ctx = NodeContext {
            config: Arc::new(config),
            local_ip,
            lifecycle: Arc::clone(&lifecycle),
            status: Arc::clone(&status),
            capture_backend,
            sink_backend,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_node(ctx));

        RelayNodeHandle {
            role,
            local_ip,
            lifecycle,
            status,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }
}

async fn run_node(ctx: NodeContext) -> Result<(), RelayError> {
    let result = match ctx.lifecycle.role() {
        PeerRole::Producer => run_producer(&ctx).await,
        PeerRole::Consumer => run_consumer(&ctx).await,
    };

    // A stop can land between phases; settle in Idle either way
    if ctx.lifecycle.phase() != SessionPhase::Idle {
        let _ = ctx.lifecycle.transition(SessionPhase::Stopping);
        let _ = ctx.lifecycle.transition(SessionPhase::Idle);
    }

    match &result {
        Ok(()) => {
            info!(target: "relay.session", "Relay node stopped");
            ctx.status.publish(NodeStatus::Stopped);
        }
        Err(e) => {
            error!(target: "relay.session", error = %e, class = e.class().as_str(), "Relay node failed");
            ctx.status.publish(NodeStatus::Failed {
                message: e.status_message(),
            });
        }
    }
    result
}

/// Operator handle to a running node.
///
/// Dropping the handle stops the node.
pub struct RelayNodeHandle {
    role: PeerRole,
    local_ip: Ipv4Addr,
    lifecycle: Arc<SessionLifecycle>,
    status: Arc<StatusReporter>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<(), RelayError>>>>,
}

impl RelayNodeHandle {
    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Address this node advertises or filters out.
    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.lifecycle.phase()
    }

    #[must_use]
    pub fn subscribe_phase(&self) -> PhaseReceiver {
        self.lifecycle.subscribe()
    }

    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.lifecycle.subscribe_transitions()
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.status.current()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<NodeStatus> {
        self.status.subscribe()
    }

    /// End the current session; the node goes back to discovering or
    /// advertising.
    ///
    /// Returns `false` if no session was active.
    pub fn end_session(&self) -> bool {
        self.lifecycle.end_session()
    }

    /// Stop the node and wait for teardown to finish.
    ///
    /// Idempotent. The node's error, if it failed, is returned to the first
    /// caller only.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the node.
    pub async fn stop(&self) -> Result<(), RelayError> {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the node to finish without asking it to stop.
    ///
    /// Cancel-safe.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the node.
    pub async fn wait(&self) -> Result<(), RelayError> {
        let mut task = self.task.lock().await;
        let Some(handle) = task.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        *task = None;
        match joined {
            Ok(result) => result,
            Err(e) => Err(RelayError::Internal(format!("node task failed: {e}"))),
        }
    }
}

impl Drop for RelayNodeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
