//! Concurrent execution of many node sessions.
//!
//! The [`Orchestrator`] spawns one task per node, forwards every
//! [`StatusEvent`] to a [`ProgressSink`] as it arrives and returns once every
//! session has settled. A node that fails or hangs only ever costs its own
//! budget.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::{FailureKind, SessionError};
use crate::node::{NodeProfile, TimeoutBudget};
use crate::prompt::PromptDetector;
use crate::session::{
    Outcome, SessionResult, SessionRunner, SessionState, StatusEvent, Transcript,
};
use crate::transport::{Transport, open_transport};

/// Run-level view of all nodes, updated on every event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    latest: BTreeMap<String, Option<SessionState>>,
}

impl Progress {
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a str>) -> Self {
        let latest: BTreeMap<_, _> = nodes.into_iter().map(|n| (n.to_string(), None)).collect();
        Self {
            total: latest.len(),
            completed: 0,
            latest,
        }
    }

    pub fn record(&mut self, event: &StatusEvent) {
        let slot = self.latest.entry(event.node.clone()).or_insert(None);
        let was_terminal = slot.is_some_and(|state| state.is_terminal());
        *slot = Some(event.state);
        if event.state.is_terminal() && !was_terminal {
            self.completed += 1;
        }
    }

    /// Latest known state; `None` while the node is still queued.
    pub fn state_of(&self, node: &str) -> Option<SessionState> {
        self.latest.get(node).copied().flatten()
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total
    }

    /// `[completed/total] node:code ...`, with `.` for queued nodes.
    pub fn line(&self) -> String {
        let mut line = format!("[{}/{}]", self.completed, self.total);
        for (node, state) in &self.latest {
            let code = state.map_or('.', |s| s.code());
            line.push_str(&format!(" {node}:{code}"));
        }
        line
    }
}

/// Receives every status event of a run, in arrival order.
///
/// Each node produces exactly one terminal event.
pub trait ProgressSink {
    fn on_event(&mut self, event: &StatusEvent, progress: &Progress);
}

/// Collects events in memory.
impl ProgressSink for Vec<StatusEvent> {
    fn on_event(&mut self, event: &StatusEvent, _progress: &Progress) {
        self.push(event.clone());
    }
}

/// Reports progress through the `log` facade, one line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_event(&mut self, event: &StatusEvent, progress: &Progress) {
        let detail = event
            .message
            .as_deref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default();
        match event.state {
            SessionState::Failed(_) => warn!(
                "[{}/{}] {} {} {}{detail}",
                progress.completed,
                progress.total,
                event.state.code(),
                event.node,
                event.state
            ),
            _ => info!(
                "[{}/{}] {} {} {}{detail}",
                progress.completed,
                progress.total,
                event.state.code(),
                event.node,
                event.state
            ),
        }
    }
}

/// Writes one JSON object per event to `W`.
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressSink for JsonlSink<W> {
    fn on_event(&mut self, event: &StatusEvent, _progress: &Progress) {
        let written = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(err) = written {
            warn!("status event for {} not written: {err}", event.node);
        }
    }
}

/// Runs node sessions concurrently under one [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    detector: PromptDetector,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let detector = PromptDetector::new(&config.prompt_pattern)?;
        Ok(Self {
            config: Arc::new(config),
            detector,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every node and returns one result per node, in completion order.
    ///
    /// Errors are reserved for setup faults found before any session starts.
    pub async fn run<S>(
        &self,
        nodes: Vec<NodeProfile>,
        output_dir: &Path,
        sink: &mut S,
    ) -> Result<Vec<SessionResult>, SessionError>
    where
        S: ProgressSink + ?Sized,
    {
        self.run_with(nodes, output_dir, sink, open_transport).await
    }

    /// [`Orchestrator::run`] with a caller-supplied transport factory.
    pub async fn run_with<S, F>(
        &self,
        nodes: Vec<NodeProfile>,
        output_dir: &Path,
        sink: &mut S,
        connector: F,
    ) -> Result<Vec<SessionResult>, SessionError>
    where
        S: ProgressSink + ?Sized,
        F: Fn(&NodeProfile, &EngineConfig) -> Box<dyn Transport>,
    {
        let mut names = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            node.validate()?;
            if !names.insert(node.name.as_str()) {
                return Err(SessionError::Config(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            SessionError::Config(format!(
                "cannot create output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        let run_stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let started = Instant::now();
        let mut progress = Progress::new(nodes.iter().map(|n| n.name.as_str()));
        info!(
            "Running {} node(s) into {} (run {run_stamp})",
            nodes.len(),
            output_dir.display()
        );

        let semaphore = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for profile in &nodes {
            let budget = TimeoutBudget::for_node(profile, &self.config.timeouts);
            let runner = SessionRunner::new(
                profile.clone(),
                Arc::clone(&self.config),
                self.detector.clone(),
                connector(profile, self.config.as_ref()),
                Transcript::for_node(output_dir, &profile.name, &run_stamp),
                events_tx.clone(),
            );
            let semaphore = semaphore.clone();
            let name = profile.name.clone();
            tasks.spawn(async move {
                // The budget only starts once a slot is granted.
                let _permit = match semaphore {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(err) => {
                            warn!("{name} runs unthrottled: {err}");
                            None
                        }
                    },
                    None => None,
                };
                runner.run(budget).await
            });
        }
        drop(events_tx);

        let mut results: Vec<SessionResult> = Vec::with_capacity(nodes.len());
        loop {
            tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    progress.record(&event);
                    sink.on_event(&event, &progress);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(result)) => results.push(result),
                    Some(Err(err)) => warn!("session task ended abnormally: {err}"),
                    None => break,
                },
            }
        }
        while let Ok(event) = events_rx.try_recv() {
            progress.record(&event);
            sink.on_event(&event, &progress);
        }

        for profile in &nodes {
            if results.iter().any(|r| r.node == profile.name) {
                continue;
            }
            let result = self
                .orphaned_result(profile, output_dir, &run_stamp, started)
                .await;
            if !progress
                .state_of(&profile.name)
                .is_some_and(|state| state.is_terminal())
            {
                let event = StatusEvent::new(
                    profile.name.clone(),
                    result.outcome.terminal_state(),
                    Some("session task died".to_string()),
                );
                progress.record(&event);
                sink.on_event(&event, &progress);
            }
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            "Run {run_stamp} finished in {:?}: {succeeded}/{} succeeded",
            started.elapsed(),
            results.len()
        );
        Ok(results)
    }

    /// Stands in for a node whose task died before producing a result.
    async fn orphaned_result(
        &self,
        profile: &NodeProfile,
        output_dir: &Path,
        run_stamp: &str,
        started: Instant,
    ) -> SessionResult {
        let transcript = Transcript::for_node(output_dir, &profile.name, run_stamp);
        let log_path = match tokio::fs::try_exists(transcript.path()).await {
            Ok(true) => Some(transcript.path().to_path_buf()),
            Ok(false) => None,
            Err(err) => {
                debug!("{} transcript check failed: {err}", profile.name);
                None
            }
        };
        SessionResult {
            node: profile.name.clone(),
            log_path,
            outcome: Outcome::Failed {
                kind: FailureKind::ProtocolError,
                message: "session task ended without a result".to_string(),
            },
            elapsed: started.elapsed(),
        }
    }
}

/// Blocking entry point: runs `nodes` on a current-thread runtime.
pub fn run<S>(
    nodes: Vec<NodeProfile>,
    output_dir: impl AsRef<Path>,
    config: EngineConfig,
    sink: &mut S,
) -> Result<Vec<SessionResult>, SessionError>
where
    S: ProgressSink + ?Sized,
{
    let orchestrator = Orchestrator::new(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(orchestrator.run(nodes, output_dir.as_ref(), sink))
}
