//! Local address resolution.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Public address used to pick the outbound interface. Nothing is sent to it.
const ROUTE_PROBE_ADDRESS: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// The IPv4 address other hosts on the LAN can reach this node at.
///
/// "Connects" an unbound UDP socket to a public address, which makes the OS
/// choose a route without sending anything, and reads back the local end.
/// Falls back to loopback when there is no route.
pub async fn detect_local_ipv4() -> Ipv4Addr {
    match probe_route().await {
        Ok(ip) => {
            debug!(target: "relay.discovery", local_ip = %ip, "Detected local address");
            ip
        }
        Err(e) => {
            warn!(
                target: "relay.discovery",
                error = %e,
                "Could not detect local address, falling back to loopback"
            );
            Ipv4Addr::LOCALHOST
        }
    }
}

async fn probe_route() -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(ROUTE_PROBE_ADDRESS).await?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        other => Err(io::Error::other(format!("unusable local address {other}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detect_never_returns_unspecified() {
        let ip = detect_local_ipv4().await;
        assert!(!ip.is_unspecified());
        assert!(!ip.is_broadcast());
    }
}
