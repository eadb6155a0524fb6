//! Peer discovery over UDP broadcast.
//!
//! A producer announces itself by broadcasting its IPv4 address as UTF-8
//! text to the discovery port once per interval. A consumer binds the
//! discovery port and takes the first announcement that is not its own.
//! Announcements carry no authentication; any well-formed address that
//! differs from the local one is trusted.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::RelayError;
use crate::observability::metrics;

/// Largest datagram the listener reads.
const ANNOUNCEMENT_BUFFER_SIZE: usize = 1024;

/// Interpret one announcement.
///
/// Returns `Ok(None)` for this node's own announcement.
///
/// # Errors
///
/// Returns [`RelayError::Discovery`] if the payload is not a UTF-8 IPv4
/// address.
pub fn parse_announcement(
    payload: &[u8],
    local_ip: Ipv4Addr,
) -> Result<Option<Ipv4Addr>, RelayError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| RelayError::Discovery(format!("{} bytes of non-UTF-8", payload.len())))?;
    let ip: Ipv4Addr = text
        .trim()
        .parse()
        .map_err(|_| RelayError::Discovery(format!("'{}' is not an IPv4 address", text.trim())))?;
    if ip == local_ip {
        Ok(None)
    } else {
        Ok(Some(ip))
    }
}

/// Periodic presence broadcaster for a producer.
///
/// [`start`](Self::start) and [`stop`](Self::stop) are idempotent.
#[derive(Debug)]
pub struct Broadcaster {
    local_ip: Ipv4Addr,
    destination: SocketAddr,
    interval: Duration,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(local_ip: Ipv4Addr, destination: SocketAddr, interval: Duration) -> Self {
        Self {
            local_ip,
            destination,
            interval,
            running: None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }

    /// Begin broadcasting under `parent`. No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the sending socket cannot be created.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<(), RelayError> {
        if self.is_running() {
            return Ok(());
        }
        self.stop().await;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                what: "broadcast",
                addr: bind_addr,
                source,
            })?;
        socket
            .set_broadcast(true)
            .map_err(|source| RelayError::Bind {
                what: "broadcast",
                addr: bind_addr,
                source,
            })?;

        let token = parent.child_token();
        let handle = tokio::spawn(run_broadcast_loop(
            socket,
            self.local_ip.to_string(),
            self.destination,
            self.interval,
            token.clone(),
        ));
        self.running = Some((token, handle));
        info!(
            target: "relay.discovery",
            local_ip = %self.local_ip,
            destination = %self.destination,
            "Broadcasting presence"
        );
        Ok(())
    }

    /// Stop broadcasting and wait for the loop to exit. No-op if stopped.
    pub async fn stop(&mut self) {
        if let Some((token, handle)) = self.running.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(target: "relay.discovery", error = %e, "Broadcast task failed");
            }
            debug!(target: "relay.discovery", "Broadcasting stopped");
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Some((token, _)) = self.running.take() {
            token.cancel();
        }
    }
}

async fn run_broadcast_loop(
    socket: UdpSocket,
    payload: String,
    destination: SocketAddr,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match socket.send_to(payload.as_bytes(), destination).await {
                    Ok(_) => trace!(target: "relay.discovery", %destination, "Broadcast sent"),
                    Err(e) => {
                        let err = RelayError::Broadcast(e);
                        warn!(target: "relay.discovery", error = %err, "Broadcast failed, will retry");
                        metrics::record_broadcast_failure();
                    }
                }
            }
        }
    }
}

/// Bind a UDP socket with `SO_REUSEADDR`, so several listeners on one host
/// can share the discovery port and a restart does not wait on the old one.
fn bind_reusable(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Consumer side: a bound discovery socket.
///
/// Bound per discovery phase and dropped once a producer is found, so
/// announcements are only read while discovering.
#[derive(Debug)]
pub struct DiscoveryListener {
    socket: UdpSocket,
    local_ip: Ipv4Addr,
    timeout: Duration,
}

impl DiscoveryListener {
    /// Bind the discovery port.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the port cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        local_ip: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let socket = bind_reusable(addr).map_err(|source| RelayError::Bind {
            what: "discovery",
            addr,
            source,
        })?;
        debug!(target: "relay.discovery", %addr, "Listening for producers");
        Ok(Self {
            socket,
            local_ip,
            timeout,
        })
    }

    /// Address the socket is actually bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error, if any.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for one announcement.
    ///
    /// Returns `Ok(None)` for this node's own announcement.
    ///
    /// # Errors
    ///
    /// All errors are transient: [`RelayError::DiscoveryTimeout`] when the
    /// listen timeout expires, [`RelayError::Discovery`] for a malformed
    /// payload or a failed receive.
    pub async fn recv_announcement(&self) -> Result<Option<Ipv4Addr>, RelayError> {
        let mut buf = [0u8; ANNOUNCEMENT_BUFFER_SIZE];
        let (n, from) = tokio::time::timeout(self.timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| RelayError::DiscoveryTimeout(self.timeout))?
            .map_err(|e| RelayError::Discovery(format!("receive failed: {e}")))?;
        trace!(target: "relay.discovery", %from, bytes = n, "Announcement received");
        parse_announcement(buf.get(..n).unwrap_or_default(), self.local_ip)
    }

    /// Listen until a producer other than this node announces itself.
    ///
    /// Timeouts and malformed datagrams are logged and the listen continues.
    /// Returns `None` if `cancel` fires first.
    pub async fn next_producer(&self, cancel: &CancellationToken) -> Option<Ipv4Addr> {
        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => return None,
                result = self.recv_announcement() => result,
            };
            match result {
                Ok(Some(ip)) => {
                    info!(target: "relay.discovery", producer = %ip, "Producer found");
                    return Some(ip);
                }
                Ok(None) => {
                    trace!(target: "relay.discovery", "Ignoring own announcement");
                }
                Err(RelayError::DiscoveryTimeout(_)) => {
                    info!(target: "relay.discovery", "No broadcast received. Retrying...");
                    metrics::record_discovery_timeout();
                }
                Err(e) => {
                    warn!(target: "relay.discovery", error = %e, "Ignoring announcement");
                }
            }
        }
    }
}
