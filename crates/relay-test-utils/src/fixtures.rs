//! Test fixtures: frames, ports and node configurations.

use std::collections::HashMap;
use std::net::{TcpListener, UdpSocket};

use media_protocol::frame::{FrameShape, VideoFrame};

/// Address a loopback producer advertises.
pub const LOOPBACK_PRODUCER_IP: &str = "127.0.0.1";

/// Address a loopback consumer claims, so it does not filter out the
/// producer's announcement as its own.
pub const LOOPBACK_CONSUMER_IP: &str = "127.0.0.2";

/// A `width` x `height` x `channels` frame whose bytes depend on `seed`.
#[must_use]
pub fn test_frame(width: u32, height: u32, channels: u8, seed: u8) -> VideoFrame {
    let shape = FrameShape::new(width, height, channels);
    let len = shape.pixel_len().unwrap();
    let pixels: Vec<u8> = (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    VideoFrame::new(shape, pixels).unwrap()
}

/// An unused TCP port on loopback.
#[must_use]
pub fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// An unused UDP port on loopback.
#[must_use]
pub fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// The three ports one producer/consumer pair shares.
#[derive(Debug, Clone, Copy)]
pub struct PortSet {
    pub data: u16,
    pub control: u16,
    pub discovery: u16,
}

impl PortSet {
    /// Pick free ports.
    #[must_use]
    pub fn allocate() -> Self {
        let data = free_tcp_port();
        let mut control = free_tcp_port();
        while control == data {
            control = free_tcp_port();
        }
        Self {
            data,
            control,
            discovery: free_udp_port(),
        }
    }
}

/// Builder for the variables `Config::from_vars` reads.
#[derive(Debug, Clone, Default)]
pub struct NodeVars {
    vars: HashMap<String, String>,
}

impl NodeVars {
    /// Only the role set.
    #[must_use]
    pub fn new(role: &str) -> Self {
        Self::default().set("RELAY_ROLE", role)
    }

    /// A producer on loopback, broadcasting to loopback, with short timers.
    #[must_use]
    pub fn loopback_producer(ports: PortSet) -> Self {
        Self::new("producer")
            .ports(ports)
            .set("RELAY_BIND_IP", LOOPBACK_PRODUCER_IP)
            .set("RELAY_LOCAL_IP", LOOPBACK_PRODUCER_IP)
            .set("RELAY_BROADCAST_ADDRESS", LOOPBACK_PRODUCER_IP)
            .set("RELAY_BROADCAST_INTERVAL_MS", "50")
            .fast_timers()
    }

    /// A consumer discovering on loopback, with short timers.
    #[must_use]
    pub fn loopback_consumer(ports: PortSet) -> Self {
        Self::new("consumer")
            .ports(ports)
            .set("RELAY_BIND_IP", LOOPBACK_PRODUCER_IP)
            .set("RELAY_LOCAL_IP", LOOPBACK_CONSUMER_IP)
            .fast_timers()
    }

    /// Use `ports` for all three channels.
    #[must_use]
    pub fn ports(self, ports: PortSet) -> Self {
        self.set("RELAY_DATA_PORT", ports.data.to_string())
            .set("RELAY_CONTROL_PORT", ports.control.to_string())
            .set("RELAY_DISCOVERY_PORT", ports.discovery.to_string())
    }

    fn fast_timers(self) -> Self {
        self.set("RELAY_CAPTURE_WARMUP_MS", "0")
            .set("RELAY_DISCOVERY_TIMEOUT_MS", "200")
            .set("RELAY_REDISCOVERY_DELAY_MS", "50")
            .set("RELAY_FRAME_RATE", "50")
            .set("RELAY_TEST_PATTERN", "8x8x3")
    }

    /// Set one variable.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Remove one variable.
    #[must_use]
    pub fn unset(mut self, key: &str) -> Self {
        self.vars.remove(key);
        self
    }

    #[must_use]
    pub fn build(self) -> HashMap<String, String> {
        self.vars
    }
}
