use super::*;

use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::telnet::{Negotiator, escape_iac};

const READ_BUFFER_SIZE: usize = 4096;

/// Telnet over a plain TCP stream.
///
/// Login is a cue scan: wait for a username prompt, send the id, wait for a
/// password prompt, send the secret. Option offers from the peer are refused
/// as they arrive, during login and afterwards.
pub struct TelnetTransport {
    stream: Option<TcpStream>,
    negotiator: Negotiator,
    line_ending: String,
    poll_interval: Duration,
    username_cues: Vec<String>,
    password_cues: Vec<String>,
    closed: bool,
}

impl TelnetTransport {
    pub fn new(
        line_ending: String,
        poll_interval: Duration,
        username_cues: Vec<String>,
        password_cues: Vec<String>,
    ) -> Self {
        Self {
            stream: None,
            negotiator: Negotiator::new(),
            line_ending,
            poll_interval,
            username_cues: lowercase_cues(username_cues),
            password_cues: lowercase_cues(password_cues),
            closed: false,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, SessionError> {
        self.stream
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("telnet transport is not connected".to_string()))
    }

    /// Polls in short slices until one of `cues` shows up in the text logged
    /// since `carry` started, returning whatever followed the cue.
    async fn wait_for_cue(
        &mut self,
        what: &str,
        cues: &[String],
        mut carry: String,
        timeout: Duration,
        transcript: &mut Transcript,
    ) -> Result<String, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(end) = find_cue(carry.as_bytes(), cues) {
                trace!("Telnet {what} cue found");
                return Ok(carry.get(end..).map(str::to_string).unwrap_or_default());
            }
            let Some(left) = remaining(deadline) else {
                return Err(SessionError::Auth(format!(
                    "no {what} prompt within {timeout:?}, received {carry:?}"
                )));
            };
            match self.read_chunk(left.min(self.poll_interval)).await {
                Ok(Chunk::Data(data)) => {
                    carry.push_str(&transcript.append(&data).await?);
                }
                Ok(Chunk::Eof) => {
                    return Err(SessionError::Auth(format!(
                        "connection closed while waiting for {what} prompt"
                    )));
                }
                Err(SessionError::ReadTimeout(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn connect(
        &mut self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(SessionError::Connect(format!("{address}:{port}: {err}")));
            }
            Err(_) => {
                return Err(SessionError::Connect(format!(
                    "{address}:{port}: timed out after {timeout:?}"
                )));
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!("{address}:{port} could not disable Nagle: {err}");
        }
        debug!("{address}:{port} Telnet TCP connection established");
        self.stream = Some(stream);
        self.negotiator = Negotiator::new();
        self.closed = false;
        Ok(())
    }

    async fn authenticate(
        &mut self,
        credential: &Credential,
        timeout: Duration,
        transcript: &mut Transcript,
    ) -> Result<String, SessionError> {
        let username_cues = self.username_cues.clone();
        let password_cues = self.password_cues.clone();

        let carry = self
            .wait_for_cue("username", &username_cues, String::new(), timeout, transcript)
            .await?;
        self.write_line(&credential.id).await?;
        let leftover = self
            .wait_for_cue("password", &password_cues, carry, timeout, transcript)
            .await?;
        self.write_line(&credential.secret).await?;
        debug!("Telnet credentials sent for {}", credential.id);
        Ok(leftover)
    }

    async fn write_line(&mut self, text: &str) -> Result<(), SessionError> {
        let mut line = escape_iac(text.as_bytes());
        line.extend_from_slice(self.line_ending.as_bytes());
        let stream = self.stream()?;
        stream.write_all(&line).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Chunk, SessionError> {
        if self.closed {
            return Ok(Chunk::Eof);
        }
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let Some(left) = remaining(deadline) else {
                return Err(SessionError::ReadTimeout(timeout));
            };
            let stream = self.stream()?;
            let read = match tokio::time::timeout(left, stream.read(&mut buf)).await {
                Err(_) => return Err(SessionError::ReadTimeout(timeout)),
                Ok(Ok(0)) => None,
                Ok(Ok(n)) => Some(n),
                Ok(Err(err))
                    if matches!(
                        err.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!("Telnet peer reset the connection: {err}");
                    None
                }
                Ok(Err(err)) => return Err(err.into()),
            };
            let Some(n) = read else {
                self.closed = true;
                return Ok(Chunk::Eof);
            };

            let filtered = self.negotiator.feed(&buf[..n]);
            if !filtered.replies.is_empty() {
                let stream = self.stream()?;
                stream.write_all(&filtered.replies).await?;
                stream.flush().await?;
            }
            // A read made only of negotiation bytes is not data.
            if !filtered.data.is_empty() {
                return Ok(Chunk::Data(filtered.data));
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(err) = stream.shutdown().await
        {
            debug!("Telnet shutdown failed: {err}");
        }
        self.closed = true;
    }
}

fn lowercase_cues(cues: Vec<String>) -> Vec<String> {
    cues.into_iter()
        .filter(|cue| !cue.is_empty())
        .map(|cue| cue.to_ascii_lowercase())
        .collect()
}

/// Case-insensitive search; returns the offset just past the earliest cue.
fn find_cue(haystack: &[u8], cues: &[String]) -> Option<usize> {
    let lowered = haystack.to_ascii_lowercase();
    cues.iter()
        .filter_map(|cue| {
            let needle = cue.as_bytes();
            lowered
                .windows(needle.len())
                .position(|w| w == needle)
                .map(|pos| pos + needle.len())
        })
        .min()
}
