//! Wire protocol for Camlink.
//!
//! This crate implements the byte-level pieces shared by both ends of a
//! Camlink session, with no I/O of its own:
//!
//! - [`frame`] - raw video frame type and its shape metadata
//! - [`codec`] - self-describing frame payload encoding
//! - [`framing`] - `[u64 length][payload]` messages and the receive accumulator
//! - [`control`] - control channel command tokens and their incremental decoder
//! - [`bitrate`] - throughput accounting for one direction of a data channel

#![warn(clippy::pedantic)]

pub mod bitrate;
pub mod codec;
pub mod control;
pub mod frame;
pub mod framing;
