//! Control channel.
//!
//! One TCP connection per session, opened by the consumer to the producer's
//! control port:
//!
//! 1. Consumer connects and sends `START_STREAMING`.
//! 2. An advertising producer claims the session (`Advertising ->
//!    Handshaking`), hands the connection to its session loop, and that loop
//!    replies `START_STREAMING`. A busy producer replies `ALREADY_STREAMING`
//!    and closes.
//! 3. Either side may send `STOP_STREAMING` while streaming. A zero-length
//!    read means the peer is gone.
//!
//! A fresh connection whose first command is `STOP_STREAMING` asks the
//! producer to end whatever session is active; the producer replies
//! `STOP_STREAMING` and closes that connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use media_protocol::control::{ControlCommand, ControlDecoder};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Channel, HandshakeError, RelayError};
use crate::session::lifecycle::SessionLifecycle;
use crate::session::phase::SessionPhase;
use crate::transport::read_chunk;

/// Control reads are tiny; tokens are at most 17 bytes.
const CONTROL_READ_SIZE: usize = 1024;

/// How long to wait for a reply to `START_STREAMING` when no read deadline
/// is configured.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a fresh producer-side connection may take to send its first
/// command.
const FIRST_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// An established control connection.
#[derive(Debug)]
pub struct ControlChannel {
    stream: TcpStream,
    decoder: ControlDecoder,
    peer: SocketAddr,
}

impl ControlChannel {
    /// Wrap an accepted or connected stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            decoder: ControlDecoder::new(),
            peer,
        }
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one command token.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the write fails.
    pub async fn send(&mut self, command: &ControlCommand) -> Result<(), RelayError> {
        self.stream
            .write_all(command.as_bytes())
            .await
            .map_err(|source| RelayError::Io {
                channel: Channel::Control,
                source,
            })?;
        debug!(target: "relay.control", peer = %self.peer, command = command.as_str(), "Sent");
        Ok(())
    }

    /// Next command, or `None` once the peer has closed the connection.
    ///
    /// Blocks until a command or end of stream; there is no idle deadline
    /// because a healthy control channel is silent while streaming.
    /// Cancel-safe.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] on read failure.
    pub async fn recv(&mut self) -> Result<Option<ControlCommand>, RelayError> {
        loop {
            if let Some(command) = self.decoder.next_command() {
                debug!(
                    target: "relay.control",
                    peer = %self.peer,
                    command = command.as_str(),
                    "Received"
                );
                return Ok(Some(command));
            }
            let mut chunk = [0u8; CONTROL_READ_SIZE];
            let n = read_chunk(&mut self.stream, &mut chunk, None, Channel::Control).await?;
            if n == 0 {
                return Ok(self.decoder.take_remainder());
            }
            self.decoder.push(chunk.get(..n).unwrap_or_default());
        }
    }

    /// [`recv`](Self::recv) with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ReadTimeout`] if nothing arrives in time.
    pub async fn recv_within(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ControlCommand>, RelayError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RelayError::ReadTimeout {
                channel: Channel::Control,
                timeout,
            })?
    }

    /// Close the write side. Errors mean the peer is already gone.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Consumer side of the handshake: connect, send START, expect START back.
///
/// # Errors
///
/// Connection failures and any reply other than `START_STREAMING` are
/// [`HandshakeError`]s.
#[instrument(skip_all, fields(producer = %addr))]
pub async fn request_session(
    addr: SocketAddr,
    reply_timeout: Duration,
) -> Result<ControlChannel, RelayError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| HandshakeError::Connect { addr, source })?;
    let _ = stream.set_nodelay(true);
    let mut channel = ControlChannel::new(stream, addr);

    channel.send(&ControlCommand::Start).await?;

    let reply = match channel.recv_within(reply_timeout).await {
        Ok(reply) => reply,
        Err(RelayError::ReadTimeout { timeout, .. }) => {
            return Err(HandshakeError::ReplyTimeout(timeout).into())
        }
        Err(e) => return Err(e),
    };

    match reply {
        Some(ControlCommand::Start) => {
            info!(target: "relay.control", "Producer accepted the session");
            Ok(channel)
        }
        Some(ControlCommand::AlreadyStreaming) => {
            info!(target: "relay.control", "Producer is already streaming");
            Err(HandshakeError::AlreadyStreaming.into())
        }
        Some(other) => Err(HandshakeError::UnexpectedReply(
            String::from_utf8_lossy(other.as_bytes()).into_owned(),
        )
        .into()),
        None => Err(HandshakeError::NoReply.into()),
    }
}

/// Producer side: accept control connections until cancelled.
///
/// Each connection is handled on its own task so a slow or hostile client
/// cannot hold up the next one. Accepted sessions are passed to the
/// producer loop through `handoff`.
pub async fn run_control_listener(
    listener: TcpListener,
    lifecycle: Arc<SessionLifecycle>,
    handoff: mpsc::Sender<ControlChannel>,
    cancel: CancellationToken,
) {
    info!(
        target: "relay.control",
        addr = ?listener.local_addr().ok(),
        "Control listener started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(handle_control_connection(
                        ControlChannel::new(stream, peer),
                        Arc::clone(&lifecycle),
                        handoff.clone(),
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    warn!(target: "relay.control", error = %e, "Control accept failed");
                }
            }
        }
    }

    info!(target: "relay.control", "Control listener stopped");
}

/// Act on the first command of a fresh control connection.
#[instrument(skip_all, fields(peer = %channel.peer()))]
async fn handle_control_connection(
    mut channel: ControlChannel,
    lifecycle: Arc<SessionLifecycle>,
    handoff: mpsc::Sender<ControlChannel>,
    cancel: CancellationToken,
) {
    let first = tokio::select! {
        () = cancel.cancelled() => return,
        first = channel.recv_within(FIRST_COMMAND_TIMEOUT) => first,
    };

    match first {
        Ok(Some(ControlCommand::Start)) => {
            if lifecycle.compare_and_transition(SessionPhase::Advertising, SessionPhase::Handshaking)
            {
                info!(target: "relay.control", "Session requested");
                if handoff.send(channel).await.is_err() {
                    debug!(target: "relay.control", "Producer loop gone, dropping session");
                }
            } else {
                info!(
                    target: "relay.control",
                    phase = %lifecycle.phase(),
                    "Rejecting session, already streaming"
                );
                if let Err(e) = channel.send(&ControlCommand::AlreadyStreaming).await {
                    debug!(target: "relay.control", error = %e, "Could not send rejection");
                }
                let _ = channel.shutdown().await;
            }
        }
        Ok(Some(ControlCommand::Stop)) => {
            let ended = lifecycle.end_session();
            info!(target: "relay.control", ended, "Stop requested on a new connection");
            if let Err(e) = channel.send(&ControlCommand::Stop).await {
                debug!(target: "relay.control", error = %e, "Could not acknowledge stop");
            }
            let _ = channel.shutdown().await;
        }
        Ok(Some(other)) => {
            warn!(
                target: "relay.control",
                command = other.as_str(),
                "Unexpected first command, closing"
            );
        }
        Ok(None) => {
            debug!(target: "relay.control", "Closed before sending a command");
        }
        Err(e) => {
            debug!(target: "relay.control", error = %e, "Control connection failed");
        }
    }
}
