//! # rtrun - Concurrent command runner for network devices
//!
//! `rtrun` logs into many routers and switches at once over SSH or Telnet, runs
//! a short command script on each, and writes everything each device sent back
//! to a per-device log file. Unreachable, slow or hung devices only cost their
//! own time budget; the batch always finishes with one result per device.
//!
//! ## Features
//!
//! - **Both protocols**: russh-based SSH shells and plain Telnet with option refusal
//! - **Prompt detection**: output is complete once the last line looks like a prompt
//! - **Per-node budgets**: `base + per_command * commands`, enforced per session
//! - **Live progress**: every state change reaches a [`ProgressSink`] as it happens
//! - **Legacy SSH**: algorithm tiers down to SHA-1 key exchange and CBC ciphers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtrun::{Credential, EngineConfig, LogSink, NodeProfile, Protocol};
//! use rtrun::collector::Collected;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let nodes = vec![NodeProfile::new(
//!         "core-sw1",
//!         Protocol::Telnet,
//!         "192.0.2.10",
//!         Credential::new("admin", "secret"),
//!         vec!["terminal length 0".to_string(), "show version".to_string()],
//!     )?];
//!
//!     let results = rtrun::run(nodes, "output", EngineConfig::default(), &mut LogSink)?;
//!     let collected: Collected = results.into_iter().collect();
//!     println!("{}", collected.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`orchestrator::Orchestrator`] - runs sessions concurrently and streams events
//! - [`session::SessionRunner`] - the per-node connect/login/command/logout state machine
//! - [`transport::Transport`] - SSH and Telnet behind one trait
//! - [`prompt::PromptDetector`] - decides when a response is complete
//! - [`collector::ResultCollector`] - groups results and lists logs to archive
//! - [`error::SessionError`] - error type for sessions and setup

pub mod collector;
pub mod config;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod telnet;
pub mod transport;

pub use config::{EngineConfig, TimeoutPolicy};
pub use error::{FailureKind, SessionError};
pub use node::{Credential, FollowUp, NodeProfile, Protocol, TimeoutBudget};
pub use orchestrator::{JsonlSink, LogSink, Orchestrator, Progress, ProgressSink, run};
pub use session::{Outcome, SessionResult, SessionState, StatusEvent};
