//! Shared lifecycle state for one node.
//!
//! The phase and the cancellation token of the active session live in a
//! single `watch` channel. Every change goes through `send_if_modified`, so
//! check-and-set is atomic: the producer's control listener and its session
//! loop can both move the phase without racing each other.
//!
//! Applied transitions are also pushed to a `broadcast` channel, in commit
//! order, so observers that must not miss short-lived phases (tests, status
//! bars) can follow the full sequence.

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::phase::{PeerRole, PhaseMachine, PhaseTransition, SessionPhase};
use crate::errors::RelayError;
use crate::observability::metrics;

/// Transition history kept for slow observers.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct LifecycleState {
    phase: SessionPhase,
    session: Option<CancellationToken>,
}

/// Phase, active session token, and transition feed for one node.
#[derive(Debug)]
pub struct SessionLifecycle {
    machine: PhaseMachine,
    state: watch::Sender<LifecycleState>,
    transitions: broadcast::Sender<PhaseTransition>,
}

impl SessionLifecycle {
    /// Start in [`SessionPhase::Idle`] with no session.
    #[must_use]
    pub fn new(role: PeerRole) -> Self {
        let (state, _rx) = watch::channel(LifecycleState {
            phase: SessionPhase::Idle,
            session: None,
        });
        let (transitions, _rx) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            machine: PhaseMachine::new(role),
            state,
            transitions,
        }
    }

    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.machine.role()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.phase() == SessionPhase::Streaming
    }

    /// Move to `to` from whatever the current phase is.
    ///
    /// Staying in the current phase is a no-op. Entering
    /// [`SessionPhase::Idle`] forgets the session token.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::IllegalTransition`] if the table rejects the
    /// change; the phase is left untouched.
    pub fn transition(&self, to: SessionPhase) -> Result<(), RelayError> {
        let mut outcome = Ok(None);
        self.state.send_if_modified(|state| {
            outcome = self.machine.transition(state.phase, to);
            match outcome {
                Ok(Some(transition)) => {
                    Self::apply(state, to);
                    self.announce(transition);
                    true
                }
                _ => false,
            }
        });
        outcome.map(|_| ())
    }

    /// Move `expected -> to` only if the phase is currently `expected`.
    ///
    /// Returns whether the transition happened.
    pub fn compare_and_transition(&self, expected: SessionPhase, to: SessionPhase) -> bool {
        self.state.send_if_modified(|state| {
            if state.phase != expected {
                return false;
            }
            match self.machine.transition(expected, to) {
                Ok(Some(transition)) => {
                    Self::apply(state, to);
                    self.announce(transition);
                    true
                }
                _ => false,
            }
        })
    }

    /// Register a new session whose token is a child of `parent`.
    ///
    /// A previous session token, if any, is cancelled.
    pub fn begin_session(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.state.send_if_modified(|state| {
            if let Some(previous) = state.session.replace(token.clone()) {
                previous.cancel();
            }
            false
        });
        token
    }

    /// Ask the active session to end. The node keeps running.
    ///
    /// Returns `false` if there was no live session to end.
    pub fn end_session(&self) -> bool {
        let mut ended = false;
        self.state.send_if_modified(|state| {
            if let Some(token) = state.session.as_ref().filter(|t| !t.is_cancelled()) {
                token.cancel();
                ended = true;
            }
            false
        });
        ended
    }

    /// Watch the current phase.
    #[must_use]
    pub fn subscribe(&self) -> PhaseReceiver {
        PhaseReceiver {
            rx: self.state.subscribe(),
        }
    }

    /// Every applied transition, in order.
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.transitions.subscribe()
    }

    fn apply(state: &mut LifecycleState, to: SessionPhase) {
        state.phase = to;
        if to == SessionPhase::Idle {
            state.session = None;
        }
    }

    /// Runs while the state lock is held, so the feed order is the commit order.
    fn announce(&self, transition: PhaseTransition) {
        metrics::set_session_phase(transition.to);
        debug!(
            target: "relay.session",
            role = %self.role(),
            from = %transition.from,
            to = %transition.to,
            "Phase transition"
        );
        // No receivers is fine
        let _ = self.transitions.send(transition);
    }
}

/// Read side of the lifecycle phase.
///
/// Only the latest phase is visible; use
/// [`SessionLifecycle::subscribe_transitions`] to see every step.
#[derive(Debug, Clone)]
pub struct PhaseReceiver {
    rx: watch::Receiver<LifecycleState>,
}

impl PhaseReceiver {
    #[must_use]
    pub fn current(&self) -> SessionPhase {
        self.rx.borrow().phase
    }

    /// Wait until the phase satisfies `predicate`.
    ///
    /// Returns `None` if the lifecycle was dropped first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(SessionPhase) -> bool,
    ) -> Option<SessionPhase> {
        self.rx
            .wait_for(|state| predicate(state.phase))
            .await
            .ok()
            .map(|state| state.phase)
    }
}
