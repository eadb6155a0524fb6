//! Operator-facing node status.
//!
//! The session loops publish a [`NodeStatus`] whenever something an
//! operator would want to see changes; a front end subscribes and renders
//! it. The text form matches what a status bar would show.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::watch;

/// What the node is doing, in operator terms.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    Initializing,
    /// Consumer waiting for a producer announcement.
    Searching,
    /// Producer announcing itself and waiting for a consumer.
    Advertising,
    /// Control handshake with `peer` in progress.
    Connecting { peer: SocketAddr },
    /// Frames flowing with `peer`.
    Streaming {
        peer: SocketAddr,
        megabits_per_second: f64,
    },
    /// The last session ended.
    Disconnected { reason: String },
    /// The node was stopped by the operator.
    Stopped,
    /// The node stopped on a fatal error.
    Failed { message: String },
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Initializing => f.write_str("Starting..."),
            NodeStatus::Searching => f.write_str("Searching for server..."),
            NodeStatus::Advertising => f.write_str("Waiting for client..."),
            NodeStatus::Connecting { peer } => write!(f, "Connecting to {}...", peer.ip()),
            NodeStatus::Streaming {
                peer,
                megabits_per_second,
            } => write!(
                f,
                "Streaming with {} - Bitrate: {megabits_per_second:.2} Mbps",
                peer.ip()
            ),
            NodeStatus::Disconnected { reason } => write!(f, "Disconnected: {reason}"),
            NodeStatus::Stopped => f.write_str("Stopped"),
            NodeStatus::Failed { message } => write!(f, "Error: {message}"),
        }
    }
}

/// Publishes [`NodeStatus`] values to any number of observers.
#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<NodeStatus>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(NodeStatus::Initializing);
        Self { tx }
    }

    /// Replace the current status. Observers are woken only on change.
    pub fn publish(&self, status: NodeStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    #[must_use]
    pub fn current(&self) -> NodeStatus {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_text() {
        let peer: SocketAddr = "192.168.1.20:9997".parse().unwrap();
        assert_eq!(NodeStatus::Searching.to_string(), "Searching for server...");
        assert_eq!(
            NodeStatus::Connecting { peer }.to_string(),
            "Connecting to 192.168.1.20..."
        );
        assert_eq!(
            NodeStatus::Streaming {
                peer,
                megabits_per_second: 147.456
            }
            .to_string(),
            "Streaming with 192.168.1.20 - Bitrate: 147.46 Mbps"
        );
        assert_eq!(
            NodeStatus::Failed {
                message: "Could not open control port 9997".to_string()
            }
            .to_string(),
            "Error: Could not open control port 9997"
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let reporter = StatusReporter::new();
        let mut rx = reporter.subscribe();
        assert_eq!(*rx.borrow(), NodeStatus::Initializing);

        reporter.publish(NodeStatus::Searching);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), NodeStatus::Searching);
        assert_eq!(reporter.current(), NodeStatus::Searching);
    }

    #[tokio::test]
    async fn test_republishing_same_status_does_not_wake() {
        let reporter = StatusReporter::new();
        reporter.publish(NodeStatus::Advertising);
        let mut rx = reporter.subscribe();
        rx.borrow_and_update();

        reporter.publish(NodeStatus::Advertising);
        assert!(!rx.has_changed().unwrap());
    }
}
