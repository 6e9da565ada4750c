#![allow(dead_code)]

use std::time::Duration;

use rtrun::{Credential, EngineConfig, NodeProfile, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const IAC: u8 = 255;
pub const WILL: u8 = 251;
pub const DONT: u8 = 254;
pub const ECHO: u8 = 1;

/// Server side of one Telnet connection, driven step by step from a test.
pub struct FakeDevice {
    stream: TcpStream,
    pending: Vec<u8>,
    /// Every byte the client sent, negotiation replies included.
    pub received: Vec<u8>,
}

impl FakeDevice {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.expect("accept");
        Self {
            stream,
            pending: Vec::new(),
            received: Vec::new(),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("server write");
        self.stream.flush().await.expect("server flush");
    }

    /// Reads until `needle` has arrived, consuming input up to its end.
    pub async fn expect(&mut self, needle: &str) {
        let needle = needle.as_bytes();
        let mut buf = [0u8; 1024];
        loop {
            if let Some(pos) = self
                .pending
                .windows(needle.len())
                .position(|w| w == needle)
            {
                self.pending.drain(..pos + needle.len());
                return;
            }
            let n = self.stream.read(&mut buf).await.expect("server read");
            assert!(n > 0, "client closed while server waited for {needle:?}");
            self.pending.extend_from_slice(&buf[..n]);
            self.received.extend_from_slice(&buf[..n]);
        }
    }

    /// Standard `Username:` / `Password:` exchange.
    pub async fn login(&mut self, user: &str, secret: &str) {
        self.send(b"Username: ").await;
        self.expect(&format!("{user}\r\n")).await;
        self.send(b"Password: ").await;
        self.expect(&format!("{secret}\r\n")).await;
    }

    /// Keeps the connection open without answering.
    pub async fn stall(self) {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(self);
    }
}

pub async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

pub fn telnet_node(name: &str, port: u16, commands: &[&str]) -> NodeProfile {
    NodeProfile::new(
        name,
        Protocol::Telnet,
        "127.0.0.1",
        Credential::new("admin", "pw"),
        commands.iter().map(|c| c.to_string()).collect(),
    )
    .expect("profile")
    .with_port(port)
}

/// Short windows so failure paths finish in well under a second.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.connect_timeout_secs = 1.0;
    config.login_timeout_secs = 2.0;
    config.poll_interval_secs = 0.05;
    config.banner_timeout_secs = 0.3;
    config.command_timeout_secs = 0.5;
    config.logout_timeout_secs = 0.5;
    config.timeouts.base_seconds = 1.0;
    config.timeouts.per_command_seconds = 0.2;
    config
}
