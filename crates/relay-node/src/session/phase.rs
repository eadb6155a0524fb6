//! Roles, lifecycle phases, and the transition table.
//!
//! ```text
//!            consumer               producer
//! Idle ──▶ Discovering          Idle ──▶ Advertising
//!              │                              │
//!              └──────▶ Handshaking ◀─────────┘
//!                            │
//!                            ▼
//!                        Streaming
//!                            │
//!   (any non-idle phase) ──▶ Stopping ──▶ Idle
//! ```
//!
//! [`PhaseMachine`] is pure: it only answers whether a transition is legal
//! for a role. Applying transitions is [`SessionLifecycle`]'s job.
//!
//! [`SessionLifecycle`]: super::lifecycle::SessionLifecycle

use std::fmt;
use std::str::FromStr;

use crate::errors::RelayError;

/// Which side of the relay a node plays. Fixed for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Advertises itself, binds the control and data ports, answers handshakes.
    Producer,
    /// Discovers a producer and connects the control and data channels.
    Consumer,
}

impl PeerRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PeerRole::Producer => "producer",
            PeerRole::Consumer => "consumer",
        }
    }

    /// The other side of the relay.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            PeerRole::Producer => PeerRole::Consumer,
            PeerRole::Consumer => PeerRole::Producer,
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "producer" | "server" => Ok(PeerRole::Producer),
            "consumer" | "client" => Ok(PeerRole::Consumer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No sockets, no devices.
    Idle,
    /// Producer: broadcasting presence, control listener accepting.
    Advertising,
    /// Consumer: listening for broadcasts.
    Discovering,
    /// Control handshake in flight.
    Handshaking,
    /// Control and data channels open, frames flowing.
    Streaming,
    /// Tearing the session down.
    Stopping,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Advertising => "advertising",
            SessionPhase::Discovering => "discovering",
            SessionPhase::Handshaking => "handshaking",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Stopping => "stopping",
        }
    }

    /// Stable numeric code for the phase gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            SessionPhase::Idle => 0,
            SessionPhase::Advertising => 1,
            SessionPhase::Discovering => 2,
            SessionPhase::Handshaking => 3,
            SessionPhase::Streaming => 4,
            SessionPhase::Stopping => 5,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied phase change, as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// Transition table for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseMachine {
    role: PeerRole,
}

impl PhaseMachine {
    #[must_use]
    pub const fn new(role: PeerRole) -> Self {
        Self { role }
    }

    #[must_use]
    pub const fn role(&self) -> PeerRole {
        self.role
    }

    /// Whether `from -> to` is a legal change for this role.
    ///
    /// Staying in the same phase is not a transition and is never "allowed";
    /// callers treat it as a no-op.
    #[must_use]
    pub fn is_allowed(&self, from: SessionPhase, to: SessionPhase) -> bool {
        use SessionPhase::{Advertising, Discovering, Handshaking, Idle, Stopping, Streaming};

        match (from, to) {
            (Idle, Discovering) | (Discovering, Handshaking) => self.role == PeerRole::Consumer,
            (Idle, Advertising) | (Advertising, Handshaking) => self.role == PeerRole::Producer,
            (Handshaking, Streaming) | (Stopping, Idle) => true,
            (Advertising | Discovering | Handshaking | Streaming, Stopping) => true,
            _ => false,
        }
    }

    /// Validate `from -> to`.
    ///
    /// Returns `Ok(None)` when `from == to`, `Ok(Some(transition))` when the
    /// change is legal.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::IllegalTransition`] for anything the table rejects.
    pub fn transition(
        &self,
        from: SessionPhase,
        to: SessionPhase,
    ) -> Result<Option<PhaseTransition>, RelayError> {
        if from == to {
            return Ok(None);
        }
        if self.is_allowed(from, to) {
            Ok(Some(PhaseTransition { from, to }))
        } else {
            Err(RelayError::IllegalTransition { from, to })
        }
    }
}
