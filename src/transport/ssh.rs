use super::*;

use std::sync::Arc;

use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect, client};

/// Host key verification for one connection.
struct DeviceKeyCheck {
    policy: HostKeyPolicy,
    host: String,
    port: u16,
}

impl client::Handler for DeviceKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts => {
                match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(known) => {
                        if !known {
                            warn!("{}:{} host key not in known_hosts", self.host, self.port);
                        }
                        Ok(known)
                    }
                    Err(err) => {
                        warn!("{}:{} host key check failed: {err}", self.host, self.port);
                        Ok(false)
                    }
                }
            }
        }
    }
}

/// SSH client driving an interactive shell on a PTY.
pub struct SshTransport {
    options: SshOptions,
    line_ending: String,
    target: String,
    handle: Option<client::Handle<DeviceKeyCheck>>,
    channel: Option<Channel<client::Msg>>,
    closed: bool,
}

impl SshTransport {
    pub fn new(options: SshOptions, line_ending: String) -> Self {
        Self {
            options,
            line_ending,
            target: String::new(),
            handle: None,
            channel: None,
            closed: false,
        }
    }

    fn channel(&self) -> Result<&Channel<client::Msg>, SessionError> {
        self.channel
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("ssh shell channel is not open".to_string()))
    }

    async fn login(&mut self, credential: &Credential) -> Result<(), SessionError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("ssh transport is not connected".to_string()))?;

        let auth = handle
            .authenticate_password(&credential.id, &credential.secret)
            .await
            .map_err(|e| SessionError::Auth(e.to_string()))?;
        if !auth.success() {
            return Err(SessionError::Auth(format!(
                "password rejected for {}",
                credential.id
            )));
        }
        debug!("{} SSH password authentication accepted", self.target);

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SessionError::Auth(format!("session channel refused: {e}")))?;
        channel
            .request_pty(false, "vt100", 200, 24, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", self.target);

        self.channel = Some(channel);
        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(
        &mut self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        self.target = format!("{address}:{port}");
        let config = client::Config {
            preferred: self.options.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let handler = DeviceKeyCheck {
            policy: self.options.host_key,
            host: address.to_string(),
            port,
        };

        let connecting = client::connect(Arc::new(config), (address, port), handler);
        let handle = match tokio::time::timeout(timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                return Err(SessionError::Connect(format!("{}: {err}", self.target)));
            }
            Err(_) => {
                return Err(SessionError::Connect(format!(
                    "{}: timed out after {timeout:?}",
                    self.target
                )));
            }
        };
        debug!("{} SSH connection established", self.target);
        self.handle = Some(handle);
        self.closed = false;
        Ok(())
    }

    async fn authenticate(
        &mut self,
        credential: &Credential,
        timeout: Duration,
        _transcript: &mut Transcript,
    ) -> Result<String, SessionError> {
        match tokio::time::timeout(timeout, self.login(credential)).await {
            Ok(result) => result.map(|()| String::new()),
            Err(_) => Err(SessionError::Auth(format!(
                "login did not complete within {timeout:?}"
            ))),
        }
    }

    async fn write_line(&mut self, text: &str) -> Result<(), SessionError> {
        let mut line = Vec::with_capacity(text.len() + self.line_ending.len());
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(self.line_ending.as_bytes());
        self.channel()?.data(&line[..]).await?;
        Ok(())
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Chunk, SessionError> {
        if self.closed {
            return Ok(Chunk::Eof);
        }
        let deadline = Instant::now() + timeout;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("ssh shell channel is not open".to_string()))?;
        loop {
            let Some(left) = remaining(deadline) else {
                return Err(SessionError::ReadTimeout(timeout));
            };
            let msg = match tokio::time::timeout(left, channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => return Err(SessionError::ReadTimeout(timeout)),
            };
            match msg {
                Some(ChannelMsg::Data { data }) => return Ok(Chunk::Data(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(Chunk::Data(data.to_vec()));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("{} Shell exited with status code: {exit_status}", self.target);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("{} Shell sent EOF.", self.target);
                    self.closed = true;
                    return Ok(Chunk::Eof);
                }
                Some(other) => trace!("{} ignoring channel message {other:?}", self.target),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take()
            && let Err(err) = channel.close().await
        {
            debug!("{} channel close failed: {err}", self.target);
        }
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
        {
            debug!("{} disconnect failed: {err}", self.target);
        }
        self.closed = true;
    }
}
