//! Error types for device sessions and batch setup.
//!
//! Every fault raised while driving a device is a [`SessionError`]. The session
//! runner converts it into a [`FailureKind`] at its boundary, so a single node's
//! error never escapes into the orchestrator.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while connecting to, driving or logging out of a device.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The TCP/SSH connection could not be established.
    ///
    /// Covers refusal, name resolution failure and connect timeouts.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Credentials were rejected or the login dialogue did not complete.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No data arrived within a single read window.
    #[error("read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),

    /// The device never presented a prompt after a command.
    ///
    /// The error contains the tail of the output received before the timeout.
    #[error("timeout waiting for prompt: {0}")]
    PromptTimeout(String),

    /// No logout phrase made the peer close the connection.
    #[error("logout failed: {0}")]
    LogoutFailed(String),

    /// The peer closed the connection at a point where that is not allowed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Catch-all for transport faults and illegal state transitions.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transcript or socket I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    Ssh(#[from] russh::Error),

    /// Engine configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A node profile violates its invariants.
    #[error("invalid node profile: {0}")]
    InvalidProfile(String),
}

impl SessionError {
    /// Maps this error onto the terminal failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SessionError::Connect(_) => FailureKind::ConnectError,
            SessionError::Auth(_) => FailureKind::AuthError,
            SessionError::ReadTimeout(_) | SessionError::PromptTimeout(_) => {
                FailureKind::PromptTimeout
            }
            SessionError::LogoutFailed(_) => FailureKind::LogoutFailed,
            SessionError::ChannelClosed(_)
            | SessionError::Protocol(_)
            | SessionError::Io(_)
            | SessionError::Ssh(_)
            | SessionError::Config(_)
            | SessionError::InvalidProfile(_) => FailureKind::ProtocolError,
        }
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ConnectError,
    AuthError,
    PromptTimeout,
    OverallTimeout,
    LogoutFailed,
    ProtocolError,
}

impl FailureKind {
    /// Whether a session failing this way still leaves a transcript worth archiving.
    pub fn keeps_transcript(&self) -> bool {
        !matches!(self, FailureKind::ConnectError | FailureKind::AuthError)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::ConnectError => "connect_error",
            FailureKind::AuthError => "auth_error",
            FailureKind::PromptTimeout => "prompt_timeout",
            FailureKind::OverallTimeout => "overall_timeout",
            FailureKind::LogoutFailed => "logout_failed",
            FailureKind::ProtocolError => "protocol_error",
        };
        f.write_str(name)
    }
}
