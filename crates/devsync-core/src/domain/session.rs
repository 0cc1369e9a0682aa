//! Sync session lifecycle state
//!
//! This module defines the session state machine and the events a running
//! session publishes on its status channel. The state machine is strict:
//! a session moves forward through
//! `Initializing → InitialReconciling → Watching → Stopping → Stopped`,
//! with the only shortcut being an early jump to `Stopping` from any
//! pre-terminal state (explicit stop or transport failure).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// SessionId
// ============================================================================

/// Identifier for one sync session, carried in log spans and status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random `SessionId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Validating roots, establishing the transport channel, loading the index
    Initializing,
    /// One-time full-tree comparison before steady state
    InitialReconciling,
    /// Steady state: collectors and pipelines running
    Watching,
    /// Stop requested; collectors and transfers winding down
    Stopping,
    /// Terminal state
    Stopped,
}

impl SessionState {
    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Forward-only, except that `Stopping` is reachable from every
    /// non-terminal state.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Initializing, InitialReconciling)
                | (InitialReconciling, Watching)
                | (Initializing, Stopping)
                | (InitialReconciling, Stopping)
                | (Watching, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Perform a checked transition.
    pub fn transition_to(self, next: SessionState) -> Result<SessionState, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidState {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// True once the session can no longer make progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Initializing => "initializing",
            SessionState::InitialReconciling => "initial-reconciling",
            SessionState::Watching => "watching",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Event published on a session's status channel.
///
/// Per-file errors are reported here as diagnostics and do not terminate the
/// session; only `Fatal` precedes a forced stop.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The initial reconciliation finished and steady-state watching began
    InitialSyncComplete {
        /// Files and directories pushed to the remote side
        uploaded: u64,
        /// Files and directories pulled from the remote side
        downloaded: u64,
    },
    /// A single path failed this cycle and will be retried on a later cycle
    FileError {
        /// The affected path, relative to the sync root
        path: String,
        /// Human-readable cause
        message: String,
        /// When the error was observed
        at: DateTime<Utc>,
    },
    /// Unrecoverable failure; the session is transitioning to `Stopping`
    Fatal(String),
    /// The session reached `Stopped`
    Stopped,
}

impl SessionEvent {
    /// Build a [`SessionEvent::FileError`] stamped with the current time.
    #[must_use]
    pub fn file_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        SessionEvent::FileError {
            path: path.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        use SessionState::*;
        assert!(Initializing.can_transition_to(InitialReconciling));
        assert!(InitialReconciling.can_transition_to(Watching));
        assert!(Watching.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn early_stop_is_allowed_from_non_terminal_states() {
        use SessionState::*;
        assert!(Initializing.can_transition_to(Stopping));
        assert!(InitialReconciling.can_transition_to(Stopping));
    }

    #[test]
    fn backward_and_skipping_transitions_are_rejected() {
        use SessionState::*;
        assert!(!Watching.can_transition_to(Initializing));
        assert!(!Initializing.can_transition_to(Watching));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Watching.can_transition_to(Stopped));
    }

    #[test]
    fn transition_to_returns_domain_error() {
        let err = SessionState::Stopped
            .transition_to(SessionState::Watching)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
    }

    #[test]
    fn terminal_state() {
        assert!(SessionState::Stopped.is_terminal());
        assert!(!SessionState::Stopping.is_terminal());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
