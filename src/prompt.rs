//! Heuristic detection of a completed response.
//!
//! Devices give no protocol-level signal that a command has finished, so the
//! engine waits until the last non-blank line of output looks like a shell
//! prompt. Devices whose prompt does not fit the pattern simply run into the
//! read timeout.

use log::trace;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::config::DEFAULT_PROMPT_PATTERN;
use crate::error::SessionError;

/// Carriage returns, backspace runs and NUL padding that devices emit at the
/// start of a line when they redraw it.
static REDRAW_PREFIX: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^\x00*(?:\r+(?:[ \t]+\r+)*|\x08+(?:[ \t]+\x08+)*)?") {
        Ok(re) => re,
        Err(err) => panic!("invalid REDRAW_PREFIX regex: {err}"),
    }
});

/// Decides whether accumulated output ends in a prompt.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    pattern: Regex,
}

impl PromptDetector {
    pub fn new(pattern: &str) -> Result<Self, SessionError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| SessionError::Config(format!("invalid prompt pattern '{pattern}': {e}")))?;
        Ok(Self { pattern })
    }

    /// Returns true when the last non-blank line of `buffer` matches the prompt pattern.
    pub fn is_complete(&self, buffer: &[u8]) -> bool {
        let Some(line) = last_non_blank_line(buffer) else {
            return false;
        };
        let matched = self.pattern.is_match(line);
        trace!(
            "Prompt check on {:?}: {}",
            String::from_utf8_lossy(line),
            matched
        );
        matched
    }

    /// The last non-blank line, decoded for display.
    pub fn last_line(&self, buffer: &[u8]) -> Option<String> {
        last_non_blank_line(buffer).map(|line| String::from_utf8_lossy(line).into_owned())
    }
}

impl Default for PromptDetector {
    fn default() -> Self {
        match Self::new(DEFAULT_PROMPT_PATTERN) {
            Ok(detector) => detector,
            Err(err) => panic!("default prompt pattern must compile: {err}"),
        }
    }
}

fn last_non_blank_line(buffer: &[u8]) -> Option<&[u8]> {
    buffer
        .split(|b| *b == b'\n')
        .rev()
        .map(strip_redraw)
        .find(|line| !line.iter().all(|b| b.is_ascii_whitespace() || *b == 0))
}

fn strip_redraw(line: &[u8]) -> &[u8] {
    match REDRAW_PREFIX.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_prompts() {
        let detector = PromptDetector::default();
        assert!(detector.is_complete(b"show clock\r\n12:00:00 UTC\r\nRouter#"));
        assert!(detector.is_complete(b"Switch> "));
        assert!(detector.is_complete(b"uptime\n up 3 days\nops@host:~$ "));
    }

    #[test]
    fn ignores_trailing_blank_lines() {
        let detector = PromptDetector::default();
        assert!(detector.is_complete(b"output\r\nRouter#\r\n\r\n  \r\n"));
    }

    #[test]
    fn rejects_unfinished_output() {
        let detector = PromptDetector::default();
        assert!(!detector.is_complete(b""));
        assert!(!detector.is_complete(b"\r\n\r\n"));
        assert!(!detector.is_complete(b"Building configuration...\r\n"));
        assert!(!detector.is_complete(b" --More-- "));
        assert!(!detector.is_complete(b"Password:"));
    }

    #[test]
    fn strips_redraw_noise_before_matching() {
        let detector = PromptDetector::default();
        assert!(detector.is_complete(b"output\r\n\x00\r  \rRouter#"));
        assert!(detector.is_complete(b"output\n\x08\x08\x08Router>"));
    }

    #[test]
    fn custom_pattern_accepts_colon_prompts() {
        let detector = PromptDetector::new(r"\S+[>#:$]\s*$").expect("pattern");
        assert!(detector.is_complete(b"Password:"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        assert!(matches!(
            PromptDetector::new("(["),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn verdict_is_idempotent() {
        let detector = PromptDetector::default();
        let buffer = b"show ver\r\nIOS 15.2\r\nR1#";
        assert_eq!(detector.is_complete(buffer), detector.is_complete(buffer));
    }

    #[test]
    fn incremental_feed_matches_whole_buffer() {
        let detector = PromptDetector::default();
        let whole = b"term len 0\r\nR1#\r\nshow run | i host\r\nhostname R1\r\nR1#".to_vec();
        for split in 0..whole.len() {
            let mut acc = Vec::new();
            acc.extend_from_slice(&whole[..split]);
            let _ = detector.is_complete(&acc);
            acc.extend_from_slice(&whole[split..]);
            assert_eq!(detector.is_complete(&acc), detector.is_complete(&whole));
        }
    }

    #[test]
    fn last_line_reports_prompt_text() {
        let detector = PromptDetector::default();
        assert_eq!(
            detector.last_line(b"x\r\nR1#\r\n").as_deref(),
            Some("R1#\r")
        );
    }
}
