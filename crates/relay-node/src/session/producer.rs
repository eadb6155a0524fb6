//! Producer role loop.
//!
//! The control and data ports are bound once for the life of the node. The
//! control listener runs on its own task and claims sessions by moving the
//! phase `Advertising -> Handshaking`; the loop here picks the claimed
//! connection up, answers the handshake, accepts the data connection from
//! the same host, streams, tears down and advertises again.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use media_protocol::control::ControlCommand;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::phase::SessionPhase;
use super::resources::{DataLink, SessionResources};
use super::stream::{close_control, stream_until_stopped, StopReason, StreamContext};
use super::{finish_session, NodeContext};
use crate::control::{run_control_listener, ControlChannel};
use crate::devices::open_capture;
use crate::discovery::Broadcaster;
use crate::errors::{Channel, HandshakeError, RelayError};
use crate::status::NodeStatus;
use crate::transport::{FrameReceiver, FrameSender};

/// How long an accepted consumer has to open the data channel.
pub const DATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

async fn bind(what: &'static str, addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind { what, addr, source })
}

/// Run producer sessions until the node is cancelled.
///
/// # Errors
///
/// Returns the first configuration-fatal error, including failure to bind
/// the control or data port.
#[instrument(skip_all, fields(role = "producer", local_ip = %ctx.local_ip))]
pub async fn run_producer(ctx: &NodeContext) -> Result<(), RelayError> {
    let config = &ctx.config;
    let control_listener = bind("control", config.control_bind_address()).await?;
    let data_listener = bind("data", config.data_bind_address()).await?;

    let (handoff_tx, mut handoff) = mpsc::channel(1);
    let listener_cancel = ctx.cancel.child_token();
    let listener_task = tokio::spawn(run_control_listener(
        control_listener,
        Arc::clone(&ctx.lifecycle),
        handoff_tx,
        listener_cancel.clone(),
    ));

    let mut broadcaster = Broadcaster::new(
        ctx.local_ip,
        config.broadcast_destination(),
        config.broadcast_interval,
    );
    info!(target: "relay.session", "Producer started");

    let result = advertise_and_serve(ctx, &data_listener, &mut handoff, &mut broadcaster).await;

    broadcaster.stop().await;
    listener_cancel.cancel();
    if let Err(e) = listener_task.await {
        warn!(target: "relay.session", error = %e, "Control listener task failed");
    }
    info!(target: "relay.session", "Producer stopped");
    result
}

async fn advertise_and_serve(
    ctx: &NodeContext,
    data_listener: &TcpListener,
    handoff: &mut mpsc::Receiver<ControlChannel>,
    broadcaster: &mut Broadcaster,
) -> Result<(), RelayError> {
    loop {
        // A connection claimed during a previous cycle is stale
        while let Ok(stale) = handoff.try_recv() {
            debug!(target: "relay.session", peer = %stale.peer(), "Dropping stale session request");
        }

        ctx.lifecycle.transition(SessionPhase::Advertising)?;
        ctx.status.publish(NodeStatus::Advertising);
        broadcaster.start(&ctx.cancel).await?;

        let channel = tokio::select! {
            biased;

            () = ctx.cancel.cancelled() => return Ok(()),
            channel = handoff.recv() => match channel {
                Some(channel) => channel,
                None => return Err(RelayError::Internal("control listener stopped".to_string())),
            },
        };
        broadcaster.stop().await;

        let session = ctx.lifecycle.begin_session(&ctx.cancel);
        let mut resources = SessionResources::new();
        resources.control = Some(channel);

        let reason = run_session(ctx, data_listener, &session, &mut resources).await;
        close_control(&mut resources, &reason).await;
        finish_session(ctx, &mut resources, &reason).await;

        if let StopReason::Failed(e) = reason {
            if e.is_fatal_to_node() {
                error!(target: "relay.session", error = %e, "Producer cannot continue");
                return Err(e);
            }
            info!(target: "relay.session", error = %e, class = e.class().as_str(), "Session failed");
        }
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
    }
}

async fn run_session(
    ctx: &NodeContext,
    data_listener: &TcpListener,
    session: &CancellationToken,
    resources: &mut SessionResources,
) -> StopReason {
    let peer = match establish(ctx, data_listener, session, resources).await {
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

/// Answer a claimed handshake and drive the session to Streaming.
///
/// Returns the consumer's control address, or `None` if the session was
/// cancelled on the way.
#[instrument(skip_all, fields(session_id = %resources.session_id))]
async fn establish(
    ctx: &NodeContext,
    data_listener: &TcpListener,
    session: &CancellationToken,
    resources: &mut SessionResources,
) -> Result<Option<SocketAddr>, RelayError> {
    let config = &ctx.config;
    let Some(control) = resources.control.as_mut() else {
        return Err(RelayError::Internal("control channel missing".to_string()));
    };
    let peer = control.peer();
    ctx.status.publish(NodeStatus::Connecting { peer });

    control.send(&ControlCommand::Start).await?;
    info!(target: "relay.session", consumer = %peer, "Session accepted");

    let stream = tokio::select! {
        () = session.cancelled() => return Ok(None),
        stream = accept_data(data_listener, peer, control) => stream?,
    };

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
        DataLink::Sending(FrameSender::new(stream, config.bitrate_window))
    } else {
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
        peer,
        megabits_per_second: 0.0,
    });
    info!(
        target: "relay.session",
        consumer = %peer,
        sending = config.captures(),
        "Streaming"
    );
    Ok(Some(peer))
}

/// Accept the data connection from the host that owns `control`.
///
/// Gives up after [`DATA_CONNECT_TIMEOUT`], or as soon as the consumer
/// stops or drops the control channel.
async fn accept_data(
    listener: &TcpListener,
    peer: SocketAddr,
    control: &mut ControlChannel,
) -> Result<TcpStream, RelayError> {
    let abandoned = async {
        loop {
            match control.recv().await {
                Ok(Some(ControlCommand::Unknown(bytes))) => {
                    debug!(target: "relay.control", len = bytes.len(), "Ignoring unknown command");
                }
                Ok(Some(command)) => {
                    debug!(target: "relay.control", command = command.as_str(), "Consumer gave up");
                    return HandshakeError::Abandoned;
                }
                Ok(None) | Err(_) => return HandshakeError::Abandoned,
            }
        }
    };

    let accepted = tokio::time::timeout(DATA_CONNECT_TIMEOUT, async {
        tokio::select! {
            stream = accept_from(listener, peer) => stream,
            e = abandoned => Err(e.into()),
        }
    })
    .await
    .map_err(|_| HandshakeError::DataConnectTimeout(DATA_CONNECT_TIMEOUT))?;

    let stream = accepted?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn accept_from(listener: &TcpListener, peer: SocketAddr) -> Result<TcpStream, RelayError> {
    loop {
        let (stream, from) = listener.accept().await.map_err(|source| RelayError::Io {
            channel: Channel::Data,
            source,
        })?;
        if from.ip() == peer.ip() {
            debug!(target: "relay.transport", %from, "Data channel accepted");
            return Ok(stream);
        }
        warn!(
            target: "relay.transport",
            %from,
            expected = %peer.ip(),
            "Ignoring data connection from another host"
        );
    }
}
