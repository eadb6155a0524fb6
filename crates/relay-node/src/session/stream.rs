//! The streaming phase of a session.
//!
//! While streaming, the frame loop and the control loop run concurrently in
//! one `select!`. Whichever finishes first decides the [`StopReason`]; the
//! other is dropped.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use media_protocol::bitrate::BitrateSample;
use media_protocol::control::ControlCommand;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resources::{DataLink, SessionResources};
use crate::control::ControlChannel;
use crate::devices::{CaptureDevice, OutputSink, SinkBackend};
use crate::errors::{Channel, HandshakeError, RelayError};
use crate::status::{NodeStatus, StatusReporter};
use crate::transport::{run_receive_loop, run_send_loop, FrameLoopEnd};

/// How long a node that asked to stop waits for the peer's acknowledgement.
pub const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Debug)]
pub enum StopReason {
    /// This node's session token was cancelled.
    LocalRequest,
    /// The peer sent `STOP_STREAMING`.
    PeerRequested,
    /// The peer closed a channel.
    PeerClosed(Channel),
    /// The capture device reached end of stream.
    CaptureEnded,
    /// Setup or streaming failed.
    Failed(RelayError),
}

impl StopReason {
    /// Outcome label for `relay_sessions_total`.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            StopReason::LocalRequest => "local_stop",
            StopReason::PeerRequested => "peer_stop",
            StopReason::PeerClosed(_) => "peer_closed",
            StopReason::CaptureEnded => "capture_ended",
            StopReason::Failed(RelayError::Handshake(HandshakeError::AlreadyStreaming)) => {
                "rejected"
            }
            StopReason::Failed(_) => "failed",
        }
    }

    /// The error that ended the session, if any.
    #[must_use]
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            StopReason::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::LocalRequest => f.write_str("Streaming stopped"),
            StopReason::PeerRequested => f.write_str("Peer stopped streaming"),
            StopReason::PeerClosed(channel) => write!(f, "Connection lost ({channel} channel)"),
            StopReason::CaptureEnded => f.write_str("Capture ended"),
            StopReason::Failed(e) => f.write_str(&e.status_message()),
        }
    }
}

/// What the streaming phase needs besides the session's resources.
pub struct StreamContext<'a> {
    pub peer: SocketAddr,
    pub frame_rate: u32,
    pub sink_backend: &'a dyn SinkBackend,
    pub status: &'a StatusReporter,
}

/// Run the frame loop and the control loop until one of them ends or the
/// session is cancelled.
pub async fn stream_until_stopped(
    resources: &mut SessionResources,
    ctx: &StreamContext<'_>,
    session: &CancellationToken,
) -> StopReason {
    let SessionResources {
        control,
        data,
        capture,
        sink,
        ..
    } = resources;

    let publish = |sample: &BitrateSample| {
        ctx.status.publish(NodeStatus::Streaming {
            peer: ctx.peer,
            megabits_per_second: sample.megabits_per_second(),
        });
    };

    tokio::select! {
        biased;

        () = session.cancelled() => StopReason::LocalRequest,
        reason = watch_control(control) => reason,
        end = run_frame_loop(data, capture, sink, ctx, publish) => match end {
            Ok(FrameLoopEnd::CaptureEnded) => StopReason::CaptureEnded,
            Ok(FrameLoopEnd::PeerClosed) => StopReason::PeerClosed(Channel::Data),
            Err(e) => StopReason::Failed(e),
        },
    }
}

async fn run_frame_loop(
    data: &mut Option<DataLink>,
    capture: &mut Option<Box<dyn CaptureDevice>>,
    sink: &mut Option<Box<dyn OutputSink>>,
    ctx: &StreamContext<'_>,
    on_bitrate: impl FnMut(&BitrateSample) + Send,
) -> Result<FrameLoopEnd, RelayError> {
    match data {
        Some(DataLink::Sending(sender)) => {
            let Some(capture) = capture.as_mut() else {
                return Err(RelayError::Internal("capture device missing".to_string()));
            };
            run_send_loop(sender, &mut **capture, ctx.frame_rate, on_bitrate).await
        }
        Some(DataLink::Receiving(receiver)) => {
            run_receive_loop(receiver, sink, ctx.sink_backend, ctx.frame_rate, on_bitrate).await
        }
        None => Err(RelayError::Internal("data channel missing".to_string())),
    }
}

/// Wait for the peer to stop the session or drop the control connection.
async fn watch_control(control: &mut Option<ControlChannel>) -> StopReason {
    let Some(channel) = control.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match channel.recv().await {
            Ok(Some(ControlCommand::Stop)) => {
                info!(target: "relay.control", peer = %channel.peer(), "Peer requested stop");
                return StopReason::PeerRequested;
            }
            Ok(Some(other)) => {
                warn!(
                    target: "relay.control",
                    command = other.as_str(),
                    "Ignoring command while streaming"
                );
            }
            Ok(None) => {
                info!(target: "relay.control", peer = %channel.peer(), "Peer closed the control channel");
                return StopReason::PeerClosed(Channel::Control);
            }
            Err(e) => return StopReason::Failed(e),
        }
    }
}

/// Tell the peer how the session ended, where that is still possible.
///
/// A local stop sends `STOP_STREAMING` and waits up to
/// [`STOP_ACK_TIMEOUT`] for the peer to answer or hang up. A peer stop is
/// acknowledged with `STOP_STREAMING`. Other endings close silently.
pub async fn close_control(resources: &mut SessionResources, reason: &StopReason) {
    let Some(channel) = resources.control.as_mut() else {
        return;
    };
    match reason {
        StopReason::LocalRequest | StopReason::CaptureEnded => {
            if let Err(e) = channel.send(&ControlCommand::Stop).await {
                debug!(target: "relay.control", error = %e, "Could not send stop");
                return;
            }
            match channel.recv_within(STOP_ACK_TIMEOUT).await {
                Ok(Some(ControlCommand::Stop)) => {
                    debug!(target: "relay.control", "Peer acknowledged stop");
                }
                Ok(Some(other)) => {
                    debug!(target: "relay.control", command = other.as_str(), "Unexpected reply to stop");
                }
                Ok(None) => debug!(target: "relay.control", "Peer closed after stop"),
                Err(e) => debug!(target: "relay.control", error = %e, "No stop acknowledgement"),
            }
        }
        StopReason::PeerRequested => {
            if let Err(e) = channel.send(&ControlCommand::Stop).await {
                debug!(target: "relay.control", error = %e, "Could not acknowledge stop");
            }
        }
        StopReason::PeerClosed(_) | StopReason::Failed(_) => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::devices::synthetic::{LoggingSinkBackend, TestPatternBackend};
    use crate::devices::CaptureBackend;
    use crate::observability::metrics;
    use crate::transport::{FrameReceiver, FrameSender};
    use media_protocol::frame::FrameShape;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const WINDOW: Duration = Duration::from_secs(1);

    async fn tcp_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server, addr)
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(StopReason::LocalRequest.outcome(), "local_stop");
        assert_eq!(StopReason::PeerClosed(Channel::Data).outcome(), "peer_closed");
        assert_eq!(
            StopReason::Failed(HandshakeError::AlreadyStreaming.into()).outcome(),
            "rejected"
        );
        assert_eq!(
            StopReason::Failed(RelayError::Internal("x".to_string())).outcome(),
            "failed"
        );
    }

    #[test]
    fn test_outcomes_stay_within_metric_labels() {
        let reasons = [
            StopReason::LocalRequest,
            StopReason::PeerRequested,
            StopReason::PeerClosed(Channel::Control),
            StopReason::CaptureEnded,
            StopReason::Failed(RelayError::Internal("x".to_string())),
            StopReason::Failed(HandshakeError::AlreadyStreaming.into()),
        ];
        let outcomes: Vec<&str> = reasons.iter().map(StopReason::outcome).collect();
        assert_eq!(outcomes, metrics::SESSION_OUTCOMES);
    }

    #[test]
    fn test_display_is_operator_text() {
        assert_eq!(
            StopReason::PeerClosed(Channel::Control).to_string(),
            "Connection lost (control channel)"
        );
        assert_eq!(
            StopReason::Failed(HandshakeError::AlreadyStreaming.into()).to_string(),
            "Server is already streaming to another client"
        );
    }

    #[tokio::test]
    async fn test_peer_stop_ends_receiving_session() {
        let (control_local, mut control_peer, peer) = tcp_pair().await;
        let (_data_peer, data_local, _) = tcp_pair().await;

        let mut resources = SessionResources::new();
        resources.control = Some(ControlChannel::new(control_local, peer));
        resources.data = Some(DataLink::Receiving(FrameReceiver::new(
            data_local, 1 << 20, WINDOW, None,
        )));

        let status = StatusReporter::new();
        let sinks = LoggingSinkBackend;
        let ctx = StreamContext {
            peer,
            frame_rate: 20,
            sink_backend: &sinks,
            status: &status,
        };

        control_peer.write_all(b"STOP_STREAMING").await.unwrap();
        let reason = stream_until_stopped(&mut resources, &ctx, &CancellationToken::new()).await;
        assert!(matches!(reason, StopReason::PeerRequested));

        close_control(&mut resources, &reason).await;
        let mut ack = [0u8; 14];
        control_peer.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"STOP_STREAMING");

        resources.release().await;
    }

    #[tokio::test]
    async fn test_data_close_ends_session() {
        let (control_local, _control_peer, peer) = tcp_pair().await;
        let (data_peer, data_local, _) = tcp_pair().await;

        let mut resources = SessionResources::new();
        resources.control = Some(ControlChannel::new(control_local, peer));
        resources.data = Some(DataLink::Receiving(FrameReceiver::new(
            data_local, 1 << 20, WINDOW, None,
        )));
        drop(data_peer);

        let status = StatusReporter::new();
        let sinks = LoggingSinkBackend;
        let ctx = StreamContext {
            peer,
            frame_rate: 20,
            sink_backend: &sinks,
            status: &status,
        };
        let reason = stream_until_stopped(&mut resources, &ctx, &CancellationToken::new()).await;
        assert!(matches!(reason, StopReason::PeerClosed(Channel::Data)));
        resources.release().await;
    }

    #[tokio::test]
    async fn test_local_cancel_sends_stop_and_waits_for_ack() {
        let (control_local, mut control_peer, peer) = tcp_pair().await;
        let (data_local, _data_peer, _) = tcp_pair().await;

        let backend = TestPatternBackend::new(FrameShape::new(8, 8, 3));
        let mut resources = SessionResources::new();
        resources.control = Some(ControlChannel::new(control_local, peer));
        resources.capture = Some(backend.open(0).await.unwrap());
        resources.data = Some(DataLink::Sending(FrameSender::new(data_local, WINDOW)));

        let status = StatusReporter::new();
        let sinks = LoggingSinkBackend;
        let ctx = StreamContext {
            peer,
            frame_rate: 50,
            sink_backend: &sinks,
            status: &status,
        };
        let session = CancellationToken::new();
        let canceller = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let peer_side = tokio::spawn(async move {
            let mut buf = [0u8; 14];
            control_peer.read_exact(&mut buf).await.unwrap();
            control_peer.write_all(b"STOP_STREAMING").await.unwrap();
            buf
        });

        let reason = stream_until_stopped(&mut resources, &ctx, &session).await;
        assert!(matches!(reason, StopReason::LocalRequest));
        close_control(&mut resources, &reason).await;
        assert_eq!(&peer_side.await.unwrap(), b"STOP_STREAMING");

        let summary = resources.release().await;
        assert_eq!(summary.released, 3);
    }

    #[tokio::test]
    async fn test_capture_end_ends_session() {
        let (control_local, _control_peer, peer) = tcp_pair().await;
        let (data_local, _data_peer, _) = tcp_pair().await;

        let backend = TestPatternBackend::new(FrameShape::new(4, 4, 1)).with_frame_limit(2);
        let mut resources = SessionResources::new();
        resources.control = Some(ControlChannel::new(control_local, peer));
        resources.capture = Some(backend.open(0).await.unwrap());
        resources.data = Some(DataLink::Sending(FrameSender::new(data_local, WINDOW)));

        let status = StatusReporter::new();
        let sinks = LoggingSinkBackend;
        let ctx = StreamContext {
            peer,
            frame_rate: 100,
            sink_backend: &sinks,
            status: &status,
        };
        let reason = stream_until_stopped(&mut resources, &ctx, &CancellationToken::new()).await;
        assert!(matches!(reason, StopReason::CaptureEnded));
        resources.release().await;
    }
}
