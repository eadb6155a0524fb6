//! Consumer role loop.
//!
//! Discover a producer (or use the configured one), request a session over
//! the control channel, open the data channel, stream, tear down, pause,
//! and go around again.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::phase::SessionPhase;
use super::resources::{DataLink, SessionResources};
use super::stream::{close_control, stream_until_stopped, StopReason, StreamContext};
use super::{finish_session, NodeContext};
use crate::control::{request_session, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::devices::open_capture;
use crate::discovery::DiscoveryListener;
use crate::errors::{Channel, RelayError};
use crate::status::NodeStatus;
use crate::transport::{FrameReceiver, FrameSender};

/// Run consumer sessions until the node is cancelled.
///
/// # Errors
///
/// Returns the first configuration-fatal error.
#[instrument(skip_all, fields(role = "consumer", local_ip = %ctx.local_ip))]
pub async fn run_consumer(ctx: &NodeContext) -> Result<(), RelayError> {
    info!(target: "relay.session", "Consumer started");

    while !ctx.cancel.is_cancelled() {
        let session = ctx.lifecycle.begin_session(&ctx.cancel);
        let mut resources = SessionResources::new();

        let reason = run_session(ctx, &session, &mut resources).await;
        close_control(&mut resources, &reason).await;
        finish_session(ctx, &mut resources, &reason).await;

        if let StopReason::Failed(e) = reason {
            if e.is_fatal_to_node() {
                error!(target: "relay.session", error = %e, "Consumer cannot continue");
                return Err(e);
            }
            info!(target: "relay.session", error = %e, class = e.class().as_str(), "Session failed");
        }

        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            () = tokio::time::sleep(ctx.config.rediscovery_delay) => {}
        }
    }

    info!(target: "relay.session", "Consumer stopped");
    Ok(())
}

async fn run_session(
    ctx: &NodeContext,
    session: &CancellationToken,
    resources: &mut SessionResources,
) -> StopReason {
    let peer = match establish(ctx, session, resources).await {
        Ok(Some(peer)) => peer,
        Ok(None) => return StopReason::LocalRequest,
        Err(e) => return StopReason::Failed(e),
    };

    let stream_ctx = StreamContext {
        peer,
        frame_rate: ctx.config.frame_rate,
        sink_backend: ctx.sink_backend.as_ref(),
        status: &ctx.status,
    };
    stream_until_stopped(resources, &stream_ctx, session).await
}

/// Drive the session from Idle to Streaming.
///
/// Returns the producer's control address, or `None` if the session was
/// cancelled on the way.
#[instrument(skip_all, fields(session_id = %resources.session_id))]
async fn establish(
    ctx: &NodeContext,
    session: &CancellationToken,
    resources: &mut SessionResources,
) -> Result<Option<SocketAddr>, RelayError> {
    let config = &ctx.config;

    ctx.lifecycle.transition(SessionPhase::Discovering)?;
    ctx.status.publish(NodeStatus::Searching);

    let producer_ip = match config.peer_ip {
        Some(ip) => {
            info!(target: "relay.discovery", producer = %ip, "Using configured producer");
            ip
        }
        None => {
            let listener = DiscoveryListener::bind(
                config.discovery_bind_address(),
                ctx.local_ip,
                config.discovery_timeout,
            )
            .await?;
            match listener.next_producer(session).await {
                Some(ip) => ip,
                None => return Ok(None),
            }
        }
    };

    let control_addr = SocketAddr::V4(SocketAddrV4::new(producer_ip, config.control_port));
    let data_addr = SocketAddr::V4(SocketAddrV4::new(producer_ip, config.data_port));

    ctx.lifecycle.transition(SessionPhase::Handshaking)?;
    ctx.status.publish(NodeStatus::Connecting { peer: control_addr });

    let reply_timeout = config.read_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
    let control = tokio::select! {
        () = session.cancelled() => return Ok(None),
        control = request_session(control_addr, reply_timeout) => control?,
    };
    resources.control = Some(control);

    let data = if config.captures() {
        let capture = tokio::select! {
            () = session.cancelled() => return Ok(None),
            capture = open_capture(
                ctx.capture_backend.as_ref(),
                config.capture_device,
                config.capture_warmup,
            ) => capture?,
        };
        resources.capture = Some(capture);
        let Some(stream) = connect_data(data_addr, session).await? else {
            return Ok(None);
        };
        DataLink::Sending(FrameSender::new(stream, config.bitrate_window))
    } else {
        let Some(stream) = connect_data(data_addr, session).await? else {
            return Ok(None);
        };
        DataLink::Receiving(FrameReceiver::new(
            stream,
            config.max_frame_bytes,
            config.bitrate_window,
            config.read_timeout,
        ))
    };
    resources.data = Some(data);

    ctx.lifecycle.transition(SessionPhase::Streaming)?;
    ctx.status.publish(NodeStatus::Streaming {
        peer: control_addr,
        megabits_per_second: 0.0,
    });
    info!(
        target: "relay.session",
        producer = %producer_ip,
        sending = config.captures(),
        "Streaming"
    );
    Ok(Some(control_addr))
}

async fn connect_data(
    addr: SocketAddr,
    session: &CancellationToken,
) -> Result<Option<TcpStream>, RelayError> {
    let stream = tokio::select! {
        () = session.cancelled() => return Ok(None),
        stream = TcpStream::connect(addr) => stream.map_err(|source| RelayError::Io {
            channel: Channel::Data,
            source,
        })?,
    };
    let _ = stream.set_nodelay(true);
    Ok(Some(stream))
}
