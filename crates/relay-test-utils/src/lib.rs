//! # Relay Test Utilities
//!
//! Shared test utilities for the relay node.
//!
//! ## Modules
//!
//! - `mock_capture` - Scripted capture backend with open/close accounting
//! - `mock_sink` - Recording output sink backend
//! - `fixtures` - Test frames, free ports, loopback node configurations
//! - `assertions` - Waiting on phases, transitions and recorded frames
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let capture = MockCaptureBackend::builder()
//!         .frames((1..=3).map(|seed| test_frame(8, 8, 3, seed)))
//!         .then_hold()
//!         .build();
//!     let sink = RecordingSinkBackend::new();
//!
//!     let ports = PortSet::allocate();
//!     let producer = Config::from_vars(&NodeVars::loopback_producer(ports).build()).unwrap();
//!
//!     // Spawn nodes, then:
//!     sink.wait_for_frames(3, Duration::from_secs(5)).await.unwrap();
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_capture;
pub mod mock_sink;

// Re-export commonly used items
pub use assertions::*;
pub use fixtures::*;
pub use mock_capture::*;
pub use mock_sink::*;
