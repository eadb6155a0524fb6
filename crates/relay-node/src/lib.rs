//! Relay Node Library
//!
//! A relay node streams raw video frames between two hosts on a LAN with no
//! manual setup:
//!
//! - A **producer** broadcasts its address over UDP and answers session
//!   requests on a TCP control port.
//! - A **consumer** listens for the broadcast, requests a session and opens
//!   a TCP data connection.
//!
//! Frames flow one way per session, from whichever role owns the capture
//! device to the one that owns the output sink. The control connection
//! stays open alongside to carry an out-of-band stop. When a session ends
//! for any reason the node tears it down and goes back to discovering or
//! advertising; it only exits when stopped or when it hits an error no
//! retry can fix (a port it cannot bind, a capture device it cannot open).
//!
//! # Modules
//!
//! - [`config`] - Configuration from environment
//! - [`discovery`] - UDP presence broadcast and listen
//! - [`control`] - Control channel handshake and commands
//! - [`transport`] - Length-prefixed frame send and receive loops
//! - [`session`] - Lifecycle state machine and the role loops
//! - [`node`] - Spawning a node and operating it through a handle
//! - [`devices`] - Capture and output sink collaborator traits
//! - [`status`] - Operator-facing status feed
//! - [`observability`] - Metrics

pub mod config;
pub mod control;
pub mod devices;
pub mod discovery;
pub mod errors;
pub mod net;
pub mod node;
pub mod observability;
pub mod session;
pub mod status;
pub mod transport;
