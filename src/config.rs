//! Engine configuration and SSH algorithm preference lists.
//!
//! [`EngineConfig`] carries every tunable the engine uses: timeouts, poll
//! slices, login cues, logout phrases and the prompt pattern. It deserializes
//! from JSON with defaults for every missing field, so a config file only needs
//! to name what it changes.
//!
//! The algorithm lists are grouped into three tiers. Network devices in the
//! field often run old SSH stacks, so the legacy tier keeps SHA-1 key exchange,
//! CBC ciphers and DSA host keys available.

use std::path::Path;
use std::time::Duration;

use regex::bytes::Regex;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::transport::SshOptions;

/// Modern key exchange only.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

/// Secure list plus group-exchange and SHA-1 group 14.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_GEX_SHA256,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
];

/// Everything russh can speak, for devices stuck on old firmware.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::NONE,
];

pub const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub const BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CLEAR,
    cipher::NONE,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::NONE,
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
];

/// Matches the common shell prompt shapes: `Router>`, `Switch#`, `user@host$`.
pub const DEFAULT_PROMPT_PATTERN: &str = r"\S+[>#$]\s*$";

/// Upper limit for every configured time window, one week.
pub const MAX_TIMEOUT_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Per-node time allowance: `base_seconds + per_command_seconds * command_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub base_seconds: f64,
    pub per_command_seconds: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base_seconds: 30.0,
            per_command_seconds: 5.0,
        }
    }
}

impl TimeoutPolicy {
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.base_seconds.is_finite() || self.base_seconds <= 0.0 {
            return Err(SessionError::Config(format!(
                "timeouts.base_seconds must be positive, got {}",
                self.base_seconds
            )));
        }
        if !self.per_command_seconds.is_finite() || self.per_command_seconds < 0.0 {
            return Err(SessionError::Config(format!(
                "timeouts.per_command_seconds must not be negative, got {}",
                self.per_command_seconds
            )));
        }
        for (name, value) in [
            ("timeouts.base_seconds", self.base_seconds),
            ("timeouts.per_command_seconds", self.per_command_seconds),
        ] {
            if value > MAX_TIMEOUT_SECS {
                return Err(SessionError::Config(format!(
                    "{name} must be at most {MAX_TIMEOUT_SECS}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Tunables for one batch run.
///
/// All `*_secs` fields are fractional seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    /// Overall per-node budget formula.
    pub timeouts: TimeoutPolicy,
    /// Ceiling for opening the TCP/SSH connection.
    pub connect_timeout_secs: f64,
    /// Ceiling for each login cue scan (Telnet) or the credential exchange (SSH).
    pub login_timeout_secs: f64,
    /// Slice length for the short repeated polls during login and logout.
    pub poll_interval_secs: f64,
    /// Ceiling for the initial banner read after login.
    pub banner_timeout_secs: f64,
    /// Ceiling for each individual read while waiting for a command's prompt.
    pub command_timeout_secs: f64,
    /// How long to wait for the peer to close after each logout phrase.
    pub logout_timeout_secs: f64,
    /// Phrases tried in order until the peer closes the connection.
    pub logout_phrases: Vec<String>,
    /// Regex matched against the last non-blank output line.
    pub prompt_pattern: String,
    /// Case-insensitive cues announcing the Telnet username prompt.
    pub username_cues: Vec<String>,
    /// Case-insensitive cues announcing the Telnet password prompt.
    pub password_cues: Vec<String>,
    /// Line terminator appended to every line sent over Telnet.
    pub telnet_line_ending: String,
    /// Line terminator appended to every line sent over SSH.
    pub ssh_line_ending: String,
    /// Limit on simultaneously running sessions. `None` runs every node at once.
    pub max_concurrency: Option<usize>,
    /// SSH algorithm and host key policy.
    pub ssh: SshOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            connect_timeout_secs: 10.0,
            login_timeout_secs: 10.0,
            poll_interval_secs: 0.5,
            banner_timeout_secs: 20.0,
            command_timeout_secs: 40.0,
            logout_timeout_secs: 5.0,
            logout_phrases: vec!["exit".to_string(), "logout".to_string()],
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            username_cues: vec!["username:".to_string(), "login:".to_string()],
            password_cues: vec!["password:".to_string()],
            telnet_line_ending: "\r\n".to_string(),
            ssh_line_ending: "\n".to_string(),
            max_concurrency: None,
            ssh: SshOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| SessionError::Config(format!("config decode error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Checks every field the engine relies on before any session starts.
    pub fn validate(&self) -> Result<(), SessionError> {
        self.timeouts.validate()?;
        let windows = [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("login_timeout_secs", self.login_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("banner_timeout_secs", self.banner_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("logout_timeout_secs", self.logout_timeout_secs),
        ];
        for (name, value) in windows {
            if !value.is_finite() || value <= 0.0 {
                return Err(SessionError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
            if value > MAX_TIMEOUT_SECS {
                return Err(SessionError::Config(format!(
                    "{name} must be at most {MAX_TIMEOUT_SECS}, got {value}"
                )));
            }
        }
        if self.logout_phrases.is_empty() {
            return Err(SessionError::Config(
                "logout_phrases must name at least one phrase".to_string(),
            ));
        }
        if self.username_cues.iter().all(|c| c.is_empty())
            || self.password_cues.iter().all(|c| c.is_empty())
        {
            return Err(SessionError::Config(
                "username_cues and password_cues must be non-empty".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(SessionError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Regex::new(&self.prompt_pattern).map_err(|e| {
            SessionError::Config(format!("invalid prompt_pattern '{}': {e}", self.prompt_pattern))
        })?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.login_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.banner_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout_secs)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.logout_timeout_secs)
    }
}
