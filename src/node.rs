//! Node profiles: what to connect to and what to run there.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::TimeoutPolicy;
use crate::error::SessionError;

/// Wire protocol used to reach a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Telnet,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ssh => 22,
            Protocol::Telnet => 23,
        }
    }
}

impl FromStr for Protocol {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Protocol::Ssh),
            "telnet" => Ok(Protocol::Telnet),
            other => Err(SessionError::InvalidProfile(format!(
                "unknown protocol '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ssh => f.write_str("ssh"),
            Protocol::Telnet => f.write_str("telnet"),
        }
    }
}

/// Login identifier and secret.
///
/// `Debug` never prints the secret, only a short SHA-256 fingerprint so two
/// credentials can still be told apart in diagnostics.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Credential {
    pub id: String,
    pub secret: String,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// First eight hex digits of the secret's SHA-256 digest.
    pub fn fingerprint(&self) -> String {
        let digest: [u8; 32] = Sha256::digest(self.secret.as_bytes()).into();
        digest[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &format_args!("sha256:{}", self.fingerprint()))
            .finish()
    }
}

/// A command sent only when the previous response contains `marker`.
///
/// Typical use is privilege escalation: send `enable` when the login prompt
/// ends in `>`, then the enable password when the device asks for it with `:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FollowUp {
    pub command: String,
    pub marker: String,
    /// Redact the command in diagnostics (passwords).
    #[serde(default)]
    pub secret: bool,
}

impl FollowUp {
    pub fn new(command: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            marker: marker.into(),
            secret: false,
        }
    }

    pub fn secret(command: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            secret: true,
            ..Self::new(command, marker)
        }
    }

    pub fn triggered_by(&self, response: &[u8]) -> bool {
        !self.marker.is_empty()
            && response
                .windows(self.marker.len())
                .any(|w| w == self.marker.as_bytes())
    }

    /// The command text as it may appear in diagnostics.
    pub fn display_command(&self) -> &str {
        if self.secret { "********" } else { &self.command }
    }
}

/// Immutable description of one target device and its command script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeProfile {
    pub name: String,
    pub protocol: Protocol,
    pub address: String,
    /// Overrides the protocol's well-known port.
    #[serde(default)]
    pub port: Option<u16>,
    pub credential: Credential,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUp>,
}

impl NodeProfile {
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        address: impl Into<String>,
        credential: Credential,
        commands: Vec<String>,
    ) -> Result<Self, SessionError> {
        let profile = Self {
            name: name.into(),
            protocol,
            address: address.into(),
            port: None,
            credential,
            commands,
            follow_ups: Vec::new(),
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_ups.push(follow_up);
        self
    }

    /// Checks the invariants external loaders must uphold.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.name.trim().is_empty() {
            return Err(SessionError::InvalidProfile(
                "node name must not be empty".to_string(),
            ));
        }
        if self.name.contains(['/', '\\']) {
            return Err(SessionError::InvalidProfile(format!(
                "node name '{}' must not contain path separators",
                self.name
            )));
        }
        if self.address.trim().is_empty() {
            return Err(SessionError::InvalidProfile(format!(
                "node '{}' has an empty address",
                self.name
            )));
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Scripted commands plus follow-ups, whether or not the follow-ups fire.
    pub fn command_count(&self) -> usize {
        self.commands.len() + self.follow_ups.len()
    }
}

/// Time allowance for one node's whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeoutBudget(Duration);

impl TimeoutBudget {
    /// `base + per_command * command_count`, computed once per node before launch.
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn for_node(profile: &NodeProfile, policy: &TimeoutPolicy) -> Self {
        let seconds =
            policy.base_seconds + policy.per_command_seconds * profile.command_count() as f64;
        let duration = if seconds.is_nan() {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
        };
        Self::fixed(duration)
    }

    /// A budget of exactly `duration`, never less than one millisecond.
    pub fn fixed(duration: Duration) -> Self {
        Self(duration.max(Duration::from_millis(1)))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(commands: usize) -> NodeProfile {
        NodeProfile::new(
            "r1",
            Protocol::Telnet,
            "10.0.0.1",
            Credential::new("admin", "secret"),
            (0..commands).map(|i| format!("show {i}")).collect(),
        )
        .expect("valid profile")
    }

    #[test]
    fn protocol_parse_is_case_insensitive() {
        assert_eq!("SSH".parse::<Protocol>().expect("ssh"), Protocol::Ssh);
        assert_eq!(" Telnet ".parse::<Protocol>().expect("telnet"), Protocol::Telnet);
        assert!(matches!(
            "rlogin".parse::<Protocol>(),
            Err(SessionError::InvalidProfile(_))
        ));
    }

    #[test]
    fn empty_name_or_address_is_rejected() {
        let cred = Credential::new("a", "b");
        assert!(NodeProfile::new("", Protocol::Ssh, "h", cred.clone(), vec![]).is_err());
        assert!(NodeProfile::new("n", Protocol::Ssh, "  ", cred, vec![]).is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let cred = Credential::new("admin", "hunter2");
        let rendered = format!("{cred:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains(&cred.fingerprint()));
    }

    #[test]
    fn budget_counts_follow_ups() {
        let policy = TimeoutPolicy {
            base_seconds: 30.0,
            per_command_seconds: 5.0,
        };
        let node = profile(2)
            .with_follow_up(FollowUp::new("enable", ">"))
            .with_follow_up(FollowUp::secret("s3cret", ":"));
        let budget = TimeoutBudget::for_node(&node, &policy);
        assert_eq!(budget.duration(), Duration::from_secs(50));
    }

    #[test]
    fn budget_is_monotonic_in_command_count() {
        let policy = TimeoutPolicy::default();
        let mut previous = TimeoutBudget::for_node(&profile(0), &policy);
        assert!(previous.duration() > Duration::ZERO);
        for n in 1..20 {
            let next = TimeoutBudget::for_node(&profile(n), &policy);
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn oversized_budget_saturates() {
        let policy = TimeoutPolicy {
            base_seconds: 1e20,
            per_command_seconds: 1e20,
        };
        let budget = TimeoutBudget::for_node(&profile(3), &policy);
        assert_eq!(budget.duration(), Duration::MAX);
    }

    #[test]
    fn follow_up_marker_matches_substring() {
        let follow_up = FollowUp::new("enable", ">");
        assert!(follow_up.triggered_by(b"\r\nRouter>"));
        assert!(!follow_up.triggered_by(b"\r\nRouter#"));
        assert_eq!(FollowUp::secret("pw", ":").display_command(), "********");
    }

    #[test]
    fn profile_deserializes_with_defaults() {
        let json = r#"{"name":"sw1","protocol":"ssh","address":"192.0.2.7",
            "credential":{"id":"ops","secret":"x"}}"#;
        let node: NodeProfile = serde_json::from_str(json).expect("parse profile");
        assert_eq!(node.port(), 22);
        assert!(node.commands.is_empty());
        assert!(node.follow_ups.is_empty());
    }
}
