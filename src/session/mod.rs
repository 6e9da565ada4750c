//! Per-node session lifecycle.
//!
//! One [`SessionRunner`] drives one device from connect to logout, writing
//! every received byte to the node's [`Transcript`] and announcing each state
//! change as a [`StatusEvent`]. Whatever goes wrong, the runner ends with a
//! single [`SessionResult`]; errors never escape it.
//!
//! # Main Components
//!
//! - [`SessionState`] - forward-only lifecycle marker
//! - [`StatusEvent`] - transition notice sent to the orchestrator
//! - [`SessionResult`] / [`Outcome`] - final record for one node
//! - [`Transcript`] - append-only log of received bytes
//! - [`SessionRunner`] - the state machine itself

use log::{debug, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::{FailureKind, SessionError};
use crate::node::{NodeProfile, Protocol, TimeoutBudget};
use crate::prompt::PromptDetector;
use crate::transport::{Chunk, Transport, remaining};

pub use runner::SessionRunner;
pub use transcript::Transcript;

/// Lifecycle position of a session.
///
/// States only move forward in declaration order; `Succeeded` and `Failed`
/// are terminal and reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Ready,
    ExecutingCommands,
    LoggingOut,
    Succeeded,
    Failed(FailureKind),
}

impl SessionState {
    fn rank(&self) -> u8 {
        match self {
            SessionState::Connecting => 0,
            SessionState::Authenticating => 1,
            SessionState::Ready => 2,
            SessionState::ExecutingCommands => 3,
            SessionState::LoggingOut => 4,
            SessionState::Succeeded | SessionState::Failed(_) => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed(_))
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// One-letter status code used in progress lines.
    pub fn code(&self) -> char {
        match self {
            SessionState::Connecting | SessionState::Authenticating => 'C',
            SessionState::Ready | SessionState::ExecutingCommands | SessionState::LoggingOut => {
                'E'
            }
            SessionState::Succeeded => 'S',
            SessionState::Failed(FailureKind::OverallTimeout) => 'T',
            SessionState::Failed(FailureKind::PromptTimeout) => 'P',
            SessionState::Failed(FailureKind::LogoutFailed) => 'L',
            SessionState::Failed(_) => 'F',
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Authenticating => f.write_str("authenticating"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::ExecutingCommands => f.write_str("executing_commands"),
            SessionState::LoggingOut => f.write_str("logging_out"),
            SessionState::Succeeded => f.write_str("succeeded"),
            SessionState::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// A state transition of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StatusEvent {
    pub node: String,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusEvent {
    pub fn new(node: impl Into<String>, state: SessionState, message: Option<String>) -> Self {
        Self {
            node: node.into(),
            state,
            message,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn terminal_state(&self) -> SessionState {
        match self {
            Outcome::Succeeded => SessionState::Succeeded,
            Outcome::Failed { kind, .. } => SessionState::Failed(*kind),
        }
    }
}

/// Final record of one node's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub node: String,
    /// Set when the session produced a transcript worth keeping.
    pub log_path: Option<PathBuf>,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded)
    }
}

mod runner;
mod transcript;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_moves_forward() {
        use SessionState::*;
        assert!(Connecting.can_advance_to(Authenticating));
        assert!(Ready.can_advance_to(ExecutingCommands));
        assert!(Authenticating.can_advance_to(Failed(FailureKind::AuthError)));
        assert!(!ExecutingCommands.can_advance_to(Ready));
        assert!(!Ready.can_advance_to(Ready));
        assert!(!Succeeded.can_advance_to(Failed(FailureKind::ProtocolError)));
        assert!(!Failed(FailureKind::ConnectError).can_advance_to(Succeeded));
    }

    #[test]
    fn status_codes_follow_outcome() {
        assert_eq!(SessionState::Connecting.code(), 'C');
        assert_eq!(SessionState::ExecutingCommands.code(), 'E');
        assert_eq!(SessionState::Succeeded.code(), 'S');
        assert_eq!(SessionState::Failed(FailureKind::OverallTimeout).code(), 'T');
        assert_eq!(SessionState::Failed(FailureKind::PromptTimeout).code(), 'P');
        assert_eq!(SessionState::Failed(FailureKind::LogoutFailed).code(), 'L');
        assert_eq!(SessionState::Failed(FailureKind::AuthError).code(), 'F');
    }

    #[test]
    fn status_event_serializes_state_tag() {
        let event = StatusEvent::new(
            "r1",
            SessionState::Failed(FailureKind::PromptTimeout),
            Some("no prompt".to_string()),
        );
        let json = serde_json::to_value(&event).expect("encode event");
        assert_eq!(json["node"], "r1");
        assert_eq!(json["state"]["state"], "failed");
        assert_eq!(json["state"]["kind"], "prompt_timeout");

        let back: StatusEvent = serde_json::from_value(json).expect("decode event");
        assert_eq!(back, event);
    }

    #[test]
    fn outcome_maps_to_terminal_state() {
        let failed = Outcome::Failed {
            kind: FailureKind::LogoutFailed,
            message: "still open".to_string(),
        };
        assert_eq!(
            failed.terminal_state(),
            SessionState::Failed(FailureKind::LogoutFailed)
        );
        assert_eq!(Outcome::Succeeded.failure_kind(), None);
    }
}
