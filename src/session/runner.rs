use super::*;

use std::sync::Arc;

/// How a command exchange ended.
enum Response {
    /// The prompt came back; carries everything read since the command was sent.
    Prompt(Vec<u8>),
    /// The peer closed the connection before a prompt appeared.
    Closed,
}

/// Drives one node from connect to logout.
///
/// The runner exclusively owns the node's transport and transcript. Each state
/// change is announced on `events` before the next step starts, and
/// [`SessionRunner::run`] always ends with exactly one terminal event.
pub struct SessionRunner {
    profile: NodeProfile,
    config: Arc<EngineConfig>,
    detector: PromptDetector,
    transport: Box<dyn Transport>,
    transcript: Transcript,
    events: UnboundedSender<StatusEvent>,
    state: SessionState,
}

impl SessionRunner {
    pub fn new(
        profile: NodeProfile,
        config: Arc<EngineConfig>,
        detector: PromptDetector,
        transport: Box<dyn Transport>,
        transcript: Transcript,
        events: UnboundedSender<StatusEvent>,
    ) -> Self {
        Self {
            profile,
            config,
            detector,
            transport,
            transcript,
            events,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session within `budget` and returns its result.
    ///
    /// If the budget runs out the in-flight step is abandoned wherever it is and
    /// the session fails with [`FailureKind::OverallTimeout`]. The terminal event
    /// and result are produced at once; the transport is closed afterwards on a
    /// detached task.
    pub async fn run(mut self, budget: TimeoutBudget) -> SessionResult {
        let started = Instant::now();
        self.emit(None);
        debug!(
            "{} session started, budget {:?}",
            self.profile.name,
            budget.duration()
        );

        let outcome = match tokio::time::timeout(budget.duration(), self.drive()).await {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(err)) => Outcome::Failed {
                kind: err.failure_kind(),
                message: err.to_string(),
            },
            Err(_) => {
                let outcome = Outcome::Failed {
                    kind: FailureKind::OverallTimeout,
                    message: format!("session exceeded its {:?} budget", budget.duration()),
                };
                let result = self.finish(outcome, started.elapsed());
                self.abandon();
                return result;
            }
        };

        self.release().await;
        self.finish(outcome, started.elapsed())
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let address = self.profile.address.clone();
        let port = self.profile.port();
        debug!(
            "{} connecting to {address}:{port} over {}",
            self.profile.name, self.profile.protocol
        );
        self.transport
            .connect(&address, port, self.config.connect_timeout())
            .await?;

        self.advance(SessionState::Authenticating, None)?;
        let leftover = self
            .transport
            .authenticate(
                &self.profile.credential,
                self.config.login_timeout(),
                &mut self.transcript,
            )
            .await?;
        let banner = self.read_banner(leftover).await?;

        self.advance(SessionState::Ready, None)?;
        self.advance(SessionState::ExecutingCommands, None)?;
        let closed_by_peer = self.execute_script(banner).await?;

        self.advance(SessionState::LoggingOut, None)?;
        if closed_by_peer {
            debug!(
                "{} peer closed after the final command, no logout needed",
                self.profile.name
            );
            return Ok(());
        }
        self.logout().await
    }

    /// Reads the post-login banner up to the first prompt, starting from the
    /// text login already consumed.
    ///
    /// A missing prompt is tolerated: the session moves on and the first
    /// command's read decides.
    async fn read_banner(&mut self, seed: String) -> Result<Vec<u8>, SessionError> {
        let deadline = Instant::now() + self.config.banner_timeout();
        let mut buffer = seed.into_bytes();
        if !buffer.is_empty() && self.detector.is_complete(&buffer) {
            return Ok(buffer);
        }
        loop {
            let Some(left) = remaining(deadline) else {
                warn!(
                    "{} no prompt after login within {:?}, continuing",
                    self.profile.name,
                    self.config.banner_timeout()
                );
                return Ok(buffer);
            };
            match self.transport.read_chunk(left).await {
                Ok(Chunk::Data(data)) => {
                    let text = self.transcript.append(&data).await?;
                    buffer.extend_from_slice(text.as_bytes());
                    if self.login_rejected(&buffer) {
                        return Err(SessionError::Auth(format!(
                            "device asked for credentials again: {:?}",
                            self.detector.last_line(&buffer).unwrap_or_default()
                        )));
                    }
                    if self.detector.is_complete(&buffer) {
                        return Ok(buffer);
                    }
                }
                Ok(Chunk::Eof) => {
                    return Err(SessionError::Auth(
                        "connection closed right after login".to_string(),
                    ));
                }
                Err(SessionError::ReadTimeout(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Telnet devices answer bad credentials by prompting for them again.
    fn login_rejected(&self, buffer: &[u8]) -> bool {
        if self.profile.protocol != Protocol::Telnet {
            return false;
        }
        let cues = self
            .config
            .username_cues
            .iter()
            .chain(self.config.password_cues.iter());
        last_line_ends_with_cue(&self.detector, buffer, cues)
    }

    /// Sends follow-ups and then the scripted commands.
    ///
    /// Returns true when the peer closed the connection right after the final
    /// command.
    async fn execute_script(&mut self, banner: Vec<u8>) -> Result<bool, SessionError> {
        let follow_ups = self.profile.follow_ups.clone();
        let commands = self.profile.commands.clone();

        let mut last_response = banner;
        for follow_up in &follow_ups {
            let shown = follow_up.display_command();
            if !follow_up.triggered_by(&last_response) {
                debug!(
                    "{} follow-up '{shown}' skipped, marker {:?} absent",
                    self.profile.name, follow_up.marker
                );
                continue;
            }
            match self.exchange(&follow_up.command, shown, true).await? {
                Response::Prompt(buffer) => last_response = buffer,
                Response::Closed => {
                    return Err(SessionError::ChannelClosed(format!(
                        "peer closed after follow-up '{shown}'"
                    )));
                }
            }
        }

        for (index, command) in commands.iter().enumerate() {
            let left = commands.len() - index - 1;
            match self.exchange(command, command, false).await? {
                Response::Prompt(_) => {}
                Response::Closed if left == 0 => return Ok(true),
                Response::Closed => {
                    return Err(SessionError::ChannelClosed(format!(
                        "peer closed after '{command}' with {left} command(s) remaining"
                    )));
                }
            }
        }
        Ok(false)
    }

    /// Writes one command and collects output until the prompt returns.
    ///
    /// Follow-ups also finish on a password question, since an `enable`
    /// style escalation answers with one instead of a prompt.
    async fn exchange(
        &mut self,
        command: &str,
        shown: &str,
        follow_up: bool,
    ) -> Result<Response, SessionError> {
        debug!("{} > {shown}", self.profile.name);
        self.transport.write_line(command).await?;

        let mut buffer = Vec::new();
        loop {
            match self.transport.read_chunk(self.config.command_timeout()).await {
                Ok(Chunk::Data(data)) => {
                    let text = self.transcript.append(&data).await?;
                    buffer.extend_from_slice(text.as_bytes());
                    if self.detector.is_complete(&buffer)
                        || (follow_up
                            && last_line_ends_with_cue(
                                &self.detector,
                                &buffer,
                                self.config.password_cues.iter(),
                            ))
                    {
                        trace!("{} '{shown}' complete", self.profile.name);
                        return Ok(Response::Prompt(buffer));
                    }
                }
                Ok(Chunk::Eof) => return Ok(Response::Closed),
                Err(SessionError::ReadTimeout(waited)) => {
                    let tail = self.detector.last_line(&buffer).unwrap_or_default();
                    return Err(SessionError::PromptTimeout(format!(
                        "no prompt within {waited:?} after '{shown}', last line {tail:?}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Tries each logout phrase until the peer closes the connection.
    async fn logout(&mut self) -> Result<(), SessionError> {
        let phrases = self.config.logout_phrases.clone();
        let wait = self.config.logout_timeout();
        let poll = self.config.poll_interval();

        for phrase in &phrases {
            debug!("{} logout attempt '{phrase}'", self.profile.name);
            if let Err(err) = self.transport.write_line(phrase).await {
                debug!("{} writing '{phrase}' failed: {err}", self.profile.name);
            }

            let deadline = Instant::now() + wait;
            let mut buffer = Vec::new();
            while let Some(left) = remaining(deadline) {
                match self.transport.read_chunk(left.min(poll)).await {
                    Ok(Chunk::Eof) => {
                        debug!("{} closed after '{phrase}'", self.profile.name);
                        return Ok(());
                    }
                    Ok(Chunk::Data(data)) => {
                        let text = self.transcript.append(&data).await?;
                        buffer.extend_from_slice(text.as_bytes());
                        if self.detector.is_complete(&buffer) {
                            debug!(
                                "{} prompt returned after '{phrase}'",
                                self.profile.name
                            );
                            break;
                        }
                    }
                    Err(SessionError::ReadTimeout(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Err(SessionError::LogoutFailed(format!(
            "connection still open after {phrases:?}"
        )))
    }

    fn advance(&mut self, next: SessionState, message: Option<String>) -> Result<(), SessionError> {
        if !self.state.can_advance_to(next) {
            return Err(SessionError::Protocol(format!(
                "illegal transition {} -> {next}",
                self.state
            )));
        }
        trace!("{} {} -> {next}", self.profile.name, self.state);
        self.state = next;
        self.emit(message);
        Ok(())
    }

    fn emit(&self, message: Option<String>) {
        let event = StatusEvent::new(self.profile.name.clone(), self.state, message);
        if self.events.send(event).is_err() {
            trace!("{} status receiver dropped", self.profile.name);
        }
    }

    /// Closes the transport, giving up after the logout wait.
    async fn release(&mut self) {
        let wait = self.config.logout_timeout();
        if tokio::time::timeout(wait, self.transport.close())
            .await
            .is_err()
        {
            debug!("{} transport close abandoned after {wait:?}", self.profile.name);
        }
    }

    /// Hands the transport to a background task that closes it within the
    /// logout wait.
    fn abandon(self) {
        let wait = self.config.logout_timeout();
        let name = self.profile.name;
        let mut transport = self.transport;
        tokio::spawn(async move {
            if tokio::time::timeout(wait, transport.close()).await.is_err() {
                debug!("{name} transport close abandoned after {wait:?}");
            }
        });
    }

    fn finish(&mut self, outcome: Outcome, elapsed: Duration) -> SessionResult {
        let message = match &outcome {
            Outcome::Succeeded => None,
            Outcome::Failed { message, .. } => Some(message.clone()),
        };
        if let Err(err) = self.advance(outcome.terminal_state(), message) {
            warn!("{} {err}", self.profile.name);
        }
        match &outcome {
            Outcome::Succeeded => debug!("{} succeeded in {elapsed:?}", self.profile.name),
            Outcome::Failed { kind, message } => {
                warn!("{} failed ({kind}) after {elapsed:?}: {message}", self.profile.name)
            }
        }

        let keep_log = self.transcript.is_created()
            && outcome.failure_kind().is_none_or(|kind| kind.keeps_transcript());
        SessionResult {
            node: self.profile.name.clone(),
            log_path: keep_log.then(|| self.transcript.path().to_path_buf()),
            outcome,
            elapsed,
        }
    }
}

fn last_line_ends_with_cue<'a>(
    detector: &PromptDetector,
    buffer: &[u8],
    mut cues: impl Iterator<Item = &'a String>,
) -> bool {
    let Some(line) = detector.last_line(buffer) else {
        return false;
    };
    let line = line.trim().to_ascii_lowercase();
    cues.any(|cue| !cue.is_empty() && line.ends_with(&cue.to_ascii_lowercase()))
}
