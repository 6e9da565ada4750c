//! Byte transports to a device.
//!
//! A [`Transport`] hides whether a node is reached over SSH or Telnet. The
//! session runner only ever connects, authenticates, writes lines and reads
//! chunks; everything protocol specific (Telnet option negotiation, SSH channel
//! setup, line terminators) lives behind the trait.
//!
//! # Main Components
//!
//! - [`Transport`] - the capability set shared by both protocols
//! - [`SshTransport`] - russh client with a PTY-backed interactive shell
//! - [`TelnetTransport`] - raw TCP with IAC negotiation and cue-driven login
//! - [`open_transport`] - picks the variant for a node

use async_trait::async_trait;
use log::{debug, trace, warn};
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{self, EngineConfig};
use crate::error::SessionError;
use crate::node::{Credential, NodeProfile, Protocol};
use crate::session::Transcript;

pub use security::{HostKeyPolicy, SecurityLevel, SshOptions};
pub use ssh::SshTransport;
pub use telnet::TelnetTransport;

/// One read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    /// The peer closed the connection.
    Eof,
}

/// Capability set of a connection to one device.
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection. Refusal, resolution failure and timeout all map to
    /// [`SessionError::Connect`].
    async fn connect(
        &mut self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    /// Logs in. Text the device sends during the exchange is appended to
    /// `transcript` as it arrives.
    ///
    /// Returns the text that arrived after the last login cue. It is already in
    /// the transcript and belongs to the post-login banner.
    async fn authenticate(
        &mut self,
        credential: &Credential,
        timeout: Duration,
        transcript: &mut Transcript,
    ) -> Result<String, SessionError>;

    /// Sends `text` followed by the transport's line terminator.
    async fn write_line(&mut self, text: &str) -> Result<(), SessionError>;

    /// Waits up to `timeout` for data, returning [`SessionError::ReadTimeout`]
    /// if nothing arrives.
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Chunk, SessionError>;

    /// Releases the connection. Failures are logged, never returned.
    async fn close(&mut self);
}

/// Builds an unconnected transport for `profile`.
pub fn open_transport(profile: &NodeProfile, config: &EngineConfig) -> Box<dyn Transport> {
    match profile.protocol {
        Protocol::Ssh => Box::new(SshTransport::new(
            config.ssh.clone(),
            config.ssh_line_ending.clone(),
        )),
        Protocol::Telnet => Box::new(TelnetTransport::new(
            config.telnet_line_ending.clone(),
            config.poll_interval(),
            config.username_cues.clone(),
            config.password_cues.clone(),
        )),
    }
}

/// Time left until `deadline`, or `None` once it has passed.
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    (!left.is_zero()).then_some(left)
}

mod security;
mod ssh;
mod telnet;
