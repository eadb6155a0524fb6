//! Relay node configuration.
//!
//! Configuration is loaded from environment variables and is immutable for
//! the lifetime of the node.

use std::collections::HashMap;
use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use media_protocol::codec::HEADER_SIZE;
use media_protocol::frame::FrameShape;
use media_protocol::framing::DEFAULT_MAX_MESSAGE_SIZE;
use thiserror::Error;

use crate::session::phase::PeerRole;

/// Default data channel port.
pub const DEFAULT_DATA_PORT: u16 = 9999;

/// Default control channel port.
pub const DEFAULT_CONTROL_PORT: u16 = 9997;

/// Default discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9998;

/// Default bind address for listeners.
pub const DEFAULT_BIND_IP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Default discovery destination.
pub const DEFAULT_BROADCAST_ADDRESS: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Default capture device index.
pub const DEFAULT_CAPTURE_DEVICE: u32 = 0;

/// Default capture pacing and output frame rate.
pub const DEFAULT_FRAME_RATE: u32 = 20;

/// Default delay after opening the capture device, in milliseconds.
pub const DEFAULT_CAPTURE_WARMUP_MS: u64 = 1000;

/// Default presence broadcast interval, in milliseconds.
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 1000;

/// Default discovery listen timeout, in milliseconds.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5000;

/// Default pause between consumer sessions, in milliseconds.
pub const DEFAULT_REDISCOVERY_DELAY_MS: u64 = 1000;

/// Default bitrate report window, in milliseconds.
pub const DEFAULT_BITRATE_WINDOW_MS: u64 = 1000;

/// Default synthetic capture shape.
pub const DEFAULT_TEST_PATTERN: FrameShape = FrameShape {
    width: 640,
    height: 480,
    channels: 3,
};

/// Relay node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Producer or consumer.
    pub role: PeerRole,

    /// Data channel port (default: 9999).
    pub data_port: u16,

    /// Control channel port (default: 9997).
    pub control_port: u16,

    /// Discovery port (default: 9998).
    pub discovery_port: u16,

    /// Producer listen address and consumer discovery bind address.
    pub bind_ip: Ipv4Addr,

    /// Where presence broadcasts are sent (default: 255.255.255.255).
    pub broadcast_address: Ipv4Addr,

    /// Address advertised by a producer and filtered out by a consumer.
    /// Detected at startup when unset.
    pub local_ip: Option<Ipv4Addr>,

    /// Consumer only: connect to this producer without discovery.
    pub peer_ip: Option<Ipv4Addr>,

    /// Capture device index (default: 0).
    pub capture_device: u32,

    /// Which role owns the capture device and sends frames (default: consumer).
    pub capture_role: PeerRole,

    /// Capture pacing and output sink frame rate (default: 20).
    pub frame_rate: u32,

    /// Delay after opening the capture device.
    pub capture_warmup: Duration,

    /// Presence broadcast interval.
    pub broadcast_interval: Duration,

    /// Discovery listen timeout.
    pub discovery_timeout: Duration,

    /// Consumer pause between the end of one session and the next discovery.
    pub rediscovery_delay: Duration,

    /// Bitrate report window.
    pub bitrate_window: Duration,

    /// Optional deadline on data channel reads and handshake replies.
    pub read_timeout: Option<Duration>,

    /// Largest accepted framed payload in bytes.
    pub max_frame_bytes: usize,

    /// Prometheus exporter listen address. No exporter when unset.
    pub metrics_bind_address: Option<SocketAddr>,

    /// Shape of the synthetic test pattern capture.
    pub test_pattern: FrameShape,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let role: PeerRole = vars
            .get("RELAY_ROLE")
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_ROLE".to_string()))?
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("RELAY_ROLE: {e}")))?;

        let data_port = parse_port(vars, "RELAY_DATA_PORT", DEFAULT_DATA_PORT)?;
        let control_port = parse_port(vars, "RELAY_CONTROL_PORT", DEFAULT_CONTROL_PORT)?;
        let discovery_port = parse_port(vars, "RELAY_DISCOVERY_PORT", DEFAULT_DISCOVERY_PORT)?;

        if data_port == control_port {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_DATA_PORT and RELAY_CONTROL_PORT must differ (both {data_port})"
            )));
        }

        let bind_ip = parse_or(vars, "RELAY_BIND_IP", DEFAULT_BIND_IP)?;
        let broadcast_address = parse_or(vars, "RELAY_BROADCAST_ADDRESS", DEFAULT_BROADCAST_ADDRESS)?;
        let local_ip = parse_optional(vars, "RELAY_LOCAL_IP")?;
        let peer_ip = parse_optional(vars, "RELAY_PEER_IP")?;

        let capture_device = parse_or(vars, "RELAY_CAPTURE_DEVICE", DEFAULT_CAPTURE_DEVICE)?;
        let capture_role = parse_or(vars, "RELAY_CAPTURE_ROLE", PeerRole::Consumer)?;

        let frame_rate = parse_or(vars, "RELAY_FRAME_RATE", DEFAULT_FRAME_RATE)?;
        if frame_rate == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_FRAME_RATE must be greater than zero".to_string(),
            ));
        }

        let capture_warmup = parse_millis(vars, "RELAY_CAPTURE_WARMUP_MS", DEFAULT_CAPTURE_WARMUP_MS)?;
        let broadcast_interval =
            parse_positive_millis(vars, "RELAY_BROADCAST_INTERVAL_MS", DEFAULT_BROADCAST_INTERVAL_MS)?;
        let discovery_timeout =
            parse_positive_millis(vars, "RELAY_DISCOVERY_TIMEOUT_MS", DEFAULT_DISCOVERY_TIMEOUT_MS)?;
        let rediscovery_delay =
            parse_millis(vars, "RELAY_REDISCOVERY_DELAY_MS", DEFAULT_REDISCOVERY_DELAY_MS)?;
        let bitrate_window =
            parse_positive_millis(vars, "RELAY_BITRATE_WINDOW_MS", DEFAULT_BITRATE_WINDOW_MS)?;

        // Zero and unset both mean "no deadline"
        let read_timeout = parse_optional::<u64>(vars, "RELAY_READ_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let max_frame_bytes = parse_or(vars, "RELAY_MAX_FRAME_BYTES", DEFAULT_MAX_MESSAGE_SIZE)?;
        if max_frame_bytes < HEADER_SIZE {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_MAX_FRAME_BYTES must be at least {HEADER_SIZE}"
            )));
        }

        let metrics_bind_address = parse_optional(vars, "RELAY_METRICS_BIND_ADDRESS")?;

        let test_pattern = match vars.get("RELAY_TEST_PATTERN") {
            Some(raw) => parse_shape(raw)
                .map_err(|e| ConfigError::InvalidValue(format!("RELAY_TEST_PATTERN: {e}")))?,
            None => DEFAULT_TEST_PATTERN,
        };

        Ok(Config {
            role,
            data_port,
            control_port,
            discovery_port,
            bind_ip,
            broadcast_address,
            local_ip,
            peer_ip,
            capture_device,
            capture_role,
            frame_rate,
            capture_warmup,
            broadcast_interval,
            discovery_timeout,
            rediscovery_delay,
            bitrate_window,
            read_timeout,
            max_frame_bytes,
            metrics_bind_address,
            test_pattern,
        })
    }

    /// Whether this node owns the capture device.
    #[must_use]
    pub fn captures(&self) -> bool {
        self.role == self.capture_role
    }

    /// Where presence broadcasts go.
    #[must_use]
    pub fn broadcast_destination(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.broadcast_address, self.discovery_port))
    }

    /// Producer control listen address.
    #[must_use]
    pub fn control_bind_address(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_ip, self.control_port))
    }

    /// Producer data listen address.
    #[must_use]
    pub fn data_bind_address(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_ip, self.data_port))
    }

    /// Consumer discovery bind address.
    #[must_use]
    pub fn discovery_bind_address(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_ip, self.discovery_port))
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(vars, key)?.unwrap_or(default))
}

fn parse_optional<T>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|raw| raw.trim()).filter(|raw| !raw.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("{key}='{raw}': {e}"))),
        None => Ok(None),
    }
}

fn parse_port(vars: &HashMap<String, String>, key: &str, default: u16) -> Result<u16, ConfigError> {
    let port = parse_or(vars, key, default)?;
    if port == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must not be 0")));
    }
    Ok(port)
}

fn parse_millis(
    vars: &HashMap<String, String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_or(vars, key, default_ms).map(Duration::from_millis)
}

fn parse_positive_millis(
    vars: &HashMap<String, String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let duration = parse_millis(vars, key, default_ms)?;
    if duration.is_zero() {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(duration)
}

/// Parse `WIDTHxHEIGHTxCHANNELS`.
fn parse_shape(raw: &str) -> Result<FrameShape, String> {
    let parts: Vec<&str> = raw.trim().split(['x', 'X']).collect();
    let [width, height, channels] = parts.as_slice() else {
        return Err(format!("expected WIDTHxHEIGHTxCHANNELS, got '{raw}'"));
    };
    let shape = FrameShape::new(
        width.parse().map_err(|e| format!("width: {e}"))?,
        height.parse().map_err(|e| format!("height: {e}"))?,
        channels.parse().map_err(|e| format!("channels: {e}"))?,
    );
    shape.validate().map_err(|e| e.to_string())?;
    Ok(shape)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([("RELAY_ROLE".to_string(), "consumer".to_string())])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.role, PeerRole::Consumer);
        assert_eq!(config.data_port, 9999);
        assert_eq!(config.control_port, 9997);
        assert_eq!(config.discovery_port, 9998);
        assert_eq!(config.bind_ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.broadcast_address, Ipv4Addr::BROADCAST);
        assert_eq!(config.local_ip, None);
        assert_eq!(config.peer_ip, None);
        assert_eq!(config.capture_device, 0);
        assert_eq!(config.capture_role, PeerRole::Consumer);
        assert_eq!(config.frame_rate, 20);
        assert_eq!(config.capture_warmup, Duration::from_secs(1));
        assert_eq!(config.broadcast_interval, Duration::from_secs(1));
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.rediscovery_delay, Duration::from_secs(1));
        assert_eq!(config.bitrate_window, Duration::from_secs(1));
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.max_frame_bytes, 64 * 1024 * 1024);
        assert_eq!(config.metrics_bind_address, None);
        assert_eq!(config.test_pattern, FrameShape::new(640, 480, 3));
        assert!(config.captures());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("RELAY_ROLE".to_string(), "producer".to_string());
        vars.insert("RELAY_DATA_PORT".to_string(), "19999".to_string());
        vars.insert("RELAY_CONTROL_PORT".to_string(), "19997".to_string());
        vars.insert("RELAY_DISCOVERY_PORT".to_string(), "19998".to_string());
        vars.insert("RELAY_BIND_IP".to_string(), "127.0.0.1".to_string());
        vars.insert("RELAY_BROADCAST_ADDRESS".to_string(), "192.168.1.255".to_string());
        vars.insert("RELAY_LOCAL_IP".to_string(), "192.168.1.20".to_string());
        vars.insert("RELAY_CAPTURE_DEVICE".to_string(), "2".to_string());
        vars.insert("RELAY_CAPTURE_ROLE".to_string(), "producer".to_string());
        vars.insert("RELAY_FRAME_RATE".to_string(), "30".to_string());
        vars.insert("RELAY_CAPTURE_WARMUP_MS".to_string(), "0".to_string());
        vars.insert("RELAY_BROADCAST_INTERVAL_MS".to_string(), "250".to_string());
        vars.insert("RELAY_DISCOVERY_TIMEOUT_MS".to_string(), "800".to_string());
        vars.insert("RELAY_READ_TIMEOUT_MS".to_string(), "3000".to_string());
        vars.insert("RELAY_MAX_FRAME_BYTES".to_string(), "1048576".to_string());
        vars.insert(
            "RELAY_METRICS_BIND_ADDRESS".to_string(),
            "127.0.0.1:9464".to_string(),
        );
        vars.insert("RELAY_TEST_PATTERN".to_string(), "320x240x1".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.role, PeerRole::Producer);
        assert_eq!(config.data_bind_address(), "127.0.0.1:19999".parse().unwrap());
        assert_eq!(config.control_bind_address(), "127.0.0.1:19997".parse().unwrap());
        assert_eq!(
            config.broadcast_destination(),
            "192.168.1.255:19998".parse().unwrap()
        );
        assert_eq!(config.local_ip, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(config.capture_device, 2);
        assert!(config.captures());
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.capture_warmup, Duration::ZERO);
        assert_eq!(config.broadcast_interval, Duration::from_millis(250));
        assert_eq!(config.discovery_timeout, Duration::from_millis(800));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.max_frame_bytes, 1_048_576);
        assert_eq!(
            config.metrics_bind_address,
            Some("127.0.0.1:9464".parse().unwrap())
        );
        assert_eq!(config.test_pattern, FrameShape::new(320, 240, 1));
    }

    #[test]
    fn test_from_vars_missing_role() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "RELAY_ROLE"));
    }

    #[test]
    fn test_from_vars_invalid_role() {
        let mut vars = base_vars();
        vars.insert("RELAY_ROLE".to_string(), "observer".to_string());
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(v)) if v.contains("RELAY_ROLE")));
    }

    #[test]
    fn test_from_vars_rejects_bad_numbers() {
        for (key, value) in [
            ("RELAY_DATA_PORT", "70000"),
            ("RELAY_DATA_PORT", "0"),
            ("RELAY_FRAME_RATE", "0"),
            ("RELAY_FRAME_RATE", "fast"),
            ("RELAY_DISCOVERY_TIMEOUT_MS", "0"),
            ("RELAY_BITRATE_WINDOW_MS", "-5"),
            ("RELAY_MAX_FRAME_BYTES", "8"),
            ("RELAY_PEER_IP", "not-an-ip"),
        ] {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_vars_rejects_shared_port() {
        let mut vars = base_vars();
        vars.insert("RELAY_DATA_PORT".to_string(), "9997".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_read_timeout_zero_means_off() {
        let mut vars = base_vars();
        vars.insert("RELAY_READ_TIMEOUT_MS".to_string(), "0".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("RELAY_LOCAL_IP".to_string(), String::new());
        vars.insert("RELAY_DATA_PORT".to_string(), "  ".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.local_ip, None);
        assert_eq!(config.data_port, DEFAULT_DATA_PORT);
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("1280x720x3").unwrap(), FrameShape::new(1280, 720, 3));
        assert_eq!(parse_shape("64X48X4").unwrap(), FrameShape::new(64, 48, 4));
        assert!(parse_shape("1280x720").is_err());
        assert!(parse_shape("0x720x3").is_err());
        assert!(parse_shape("64x48x5").is_err());
    }

    #[test]
    fn test_consumer_receives_when_producer_captures() {
        let mut vars = base_vars();
        vars.insert("RELAY_CAPTURE_ROLE".to_string(), "producer".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(!config.captures());
    }
}
