//! Partitioning of a run's results for reporting and archiving.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::FailureKind;
use crate::session::{Outcome, SessionResult};

/// Results of one run, grouped by how each session ended.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Collected {
    pub succeeded: Vec<SessionResult>,
    /// Sessions that ran out of their overall budget.
    pub timed_out: Vec<SessionResult>,
    pub prompt_timeouts: Vec<SessionResult>,
    pub logout_failures: Vec<SessionResult>,
    /// Connect, auth and protocol failures.
    pub errors: Vec<SessionResult>,
}

impl Collected {
    pub fn total(&self) -> usize {
        self.succeeded.len()
            + self.timed_out.len()
            + self.prompt_timeouts.len()
            + self.logout_failures.len()
            + self.errors.len()
    }

    /// Log files worth handing to an archiver.
    ///
    /// Partial transcripts (timeouts, failed logout) are included; sessions that
    /// never got past connect or login are not.
    pub fn archive_paths(&self) -> Vec<PathBuf> {
        self.iter()
            .filter(|result| {
                result
                    .outcome
                    .failure_kind()
                    .is_none_or(|kind| kind.keeps_transcript())
            })
            .filter_map(|result| result.log_path.clone())
            .collect()
    }

    /// One-line run summary, e.g. `5 node(s): 3 ok, 1 timeout, 0 prompt, 0 logout, 1 error`.
    pub fn summary(&self) -> String {
        format!(
            "{} node(s): {} ok, {} timeout, {} prompt, {} logout, {} error",
            self.total(),
            self.succeeded.len(),
            self.timed_out.len(),
            self.prompt_timeouts.len(),
            self.logout_failures.len(),
            self.errors.len()
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionResult> {
        self.succeeded
            .iter()
            .chain(&self.timed_out)
            .chain(&self.prompt_timeouts)
            .chain(&self.logout_failures)
            .chain(&self.errors)
    }
}

/// Sorts results into a [`Collected`] as they arrive.
#[derive(Debug, Default)]
pub struct ResultCollector {
    collected: Collected,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: SessionResult) {
        let bucket = match result.outcome {
            Outcome::Succeeded => &mut self.collected.succeeded,
            Outcome::Failed { kind, .. } => match kind {
                FailureKind::OverallTimeout => &mut self.collected.timed_out,
                FailureKind::PromptTimeout => &mut self.collected.prompt_timeouts,
                FailureKind::LogoutFailed => &mut self.collected.logout_failures,
                FailureKind::ConnectError | FailureKind::AuthError | FailureKind::ProtocolError => {
                    &mut self.collected.errors
                }
            },
        };
        bucket.push(result);
    }

    pub fn finish(self) -> Collected {
        self.collected
    }
}

impl Extend<SessionResult> for ResultCollector {
    fn extend<I: IntoIterator<Item = SessionResult>>(&mut self, iter: I) {
        for result in iter {
            self.push(result);
        }
    }
}

impl FromIterator<SessionResult> for Collected {
    fn from_iter<I: IntoIterator<Item = SessionResult>>(iter: I) -> Self {
        let mut collector = ResultCollector::new();
        collector.extend(iter);
        collector.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(node: &str, kind: Option<FailureKind>, log: bool) -> SessionResult {
        SessionResult {
            node: node.to_string(),
            log_path: log.then(|| PathBuf::from(format!("out/{node}_20240101_000000.txt"))),
            outcome: match kind {
                None => Outcome::Succeeded,
                Some(kind) => Outcome::Failed {
                    kind,
                    message: kind.to_string(),
                },
            },
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn partitions_by_outcome() {
        let collected: Collected = vec![
            result("ok", None, true),
            result("slow", Some(FailureKind::OverallTimeout), true),
            result("quiet", Some(FailureKind::PromptTimeout), true),
            result("sticky", Some(FailureKind::LogoutFailed), true),
            result("down", Some(FailureKind::ConnectError), false),
            result("denied", Some(FailureKind::AuthError), false),
        ]
        .into_iter()
        .collect();

        assert_eq!(collected.total(), 6);
        assert_eq!(collected.succeeded.len(), 1);
        assert_eq!(collected.timed_out.len(), 1);
        assert_eq!(collected.prompt_timeouts.len(), 1);
        assert_eq!(collected.logout_failures.len(), 1);
        assert_eq!(collected.errors.len(), 2);
        assert_eq!(
            collected.summary(),
            "6 node(s): 1 ok, 1 timeout, 1 prompt, 1 logout, 2 error"
        );
    }

    #[test]
    fn archive_skips_sessions_without_usable_logs() {
        let collected: Collected = vec![
            result("ok", None, true),
            result("slow", Some(FailureKind::OverallTimeout), true),
            result("nolog", Some(FailureKind::PromptTimeout), false),
            // Only possible if a caller built the result by hand.
            result("denied", Some(FailureKind::AuthError), true),
        ]
        .into_iter()
        .collect();

        let paths = collected.archive_paths();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("out/ok_20240101_000000.txt"),
                PathBuf::from("out/slow_20240101_000000.txt"),
            ]
        );
    }
}
