mod common;

use common::{DONT, ECHO, FakeDevice, IAC, WILL, fast_config, listener, telnet_node};
use rtrun::{FailureKind, Orchestrator, Outcome, SessionState, StatusEvent};

#[tokio::test]
async fn negotiates_and_logs_in_with_split_cue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let mut device = FakeDevice::accept(&listener).await;
        device.send(&[IAC, WILL, ECHO, b'L', b'o', b'g']).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        device.send(b"in: ").await;
        device.expect("admin\r\n").await;
        device.send(b"Password: ").await;
        device.expect("pw\r\n").await;
        device.send(b"\r\nR1#").await;
        device.expect("show clock\r\n").await;
        device.send(b"show clock\r\n12:00:00 UTC\r\nR1#").await;
        device.expect("exit\r\n").await;
        device.received
    });

    let orchestrator = Orchestrator::new(fast_config()).expect("orchestrator");
    let mut events: Vec<StatusEvent> = Vec::new();
    let results = orchestrator
        .run(vec![telnet_node("r1", port, &["show clock"])], dir.path(), &mut events)
        .await
        .expect("run");

    let received = server.await.expect("server task");
    assert_eq!(&received[..3], &[IAC, DONT, ECHO]);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::Succeeded);
    let log = std::fs::read(results[0].log_path.as_ref().expect("log path")).expect("read log");
    assert_eq!(
        log,
        b"Login: Password: \r\nR1#show clock\r\n12:00:00 UTC\r\nR1#".to_vec()
    );
    assert_eq!(
        events.last().map(|e| e.state),
        Some(SessionState::Succeeded)
    );
}

#[tokio::test]
async fn repeated_login_prompt_is_auth_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let mut device = FakeDevice::accept(&listener).await;
        device.login("admin", "pw").await;
        device.send(b"\r\n% Login invalid\r\n\r\nUsername: ").await;
        device.stall().await;
    });

    let orchestrator = Orchestrator::new(fast_config()).expect("orchestrator");
    let mut events: Vec<StatusEvent> = Vec::new();
    let results = orchestrator
        .run(vec![telnet_node("r1", port, &["show ver"])], dir.path(), &mut events)
        .await
        .expect("run");
    server.abort();

    assert_eq!(
        results[0].outcome.failure_kind(),
        Some(FailureKind::AuthError)
    );
    assert!(results[0].log_path.is_none());
}

#[tokio::test]
async fn refused_connection_is_connect_error_without_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (listener, port) = listener().await;
    drop(listener);

    let orchestrator = Orchestrator::new(fast_config()).expect("orchestrator");
    let mut events: Vec<StatusEvent> = Vec::new();
    let results = orchestrator
        .run(vec![telnet_node("gone", port, &["show ver"])], dir.path(), &mut events)
        .await
        .expect("run");

    assert_eq!(
        results[0].outcome.failure_kind(),
        Some(FailureKind::ConnectError)
    );
    assert!(results[0].log_path.is_none());
    let leftovers = std::fs::read_dir(dir.path()).expect("read dir").count();
    assert_eq!(leftovers, 0);
    assert_eq!(
        events.iter().map(|e| e.state).collect::<Vec<_>>(),
        vec![
            SessionState::Connecting,
            SessionState::Failed(FailureKind::ConnectError)
        ]
    );
}

#[tokio::test]
async fn enable_follow_ups_run_before_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let mut device = FakeDevice::accept(&listener).await;
        device.login("admin", "pw").await;
        device.send(b"\r\nR1>").await;
        device.expect("enable\r\n").await;
        device.send(b"enable\r\nPassword: ").await;
        device.expect("s3cret\r\n").await;
        device.send(b"\r\nR1#").await;
        device.expect("show run\r\n").await;
        device.send(b"show run\r\nhostname R1\r\nR1#").await;
        device.expect("exit\r\n").await;
    });

    let node = telnet_node("r1", port, &["show run"])
        .with_follow_up(rtrun::FollowUp::new("enable", ">"))
        .with_follow_up(rtrun::FollowUp::secret("s3cret", ":"));
    let orchestrator = Orchestrator::new(fast_config()).expect("orchestrator");
    let mut events: Vec<StatusEvent> = Vec::new();
    let results = orchestrator
        .run(vec![node], dir.path(), &mut events)
        .await
        .expect("run");
    server.await.expect("server task");

    assert_eq!(results[0].outcome, Outcome::Succeeded);
}

#[tokio::test]
async fn non_utf8_output_lands_as_valid_utf8() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let mut device = FakeDevice::accept(&listener).await;
        device.login("admin", "pw").await;
        device.send(b"\r\nR1#").await;
        device.expect("show ver\r\n").await;
        // Latin-1 e-acute, an escaped 0xFF and a two-byte character split over two writes.
        device.send(b"show ver\r\ncaf\xe9 \xff\xff \xc3").await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        device.send(b"\xa9\r\nR1#").await;
        device.expect("exit\r\n").await;
    });

    let orchestrator = Orchestrator::new(fast_config()).expect("orchestrator");
    let mut events: Vec<StatusEvent> = Vec::new();
    let results = orchestrator
        .run(vec![telnet_node("r1", port, &["show ver"])], dir.path(), &mut events)
        .await
        .expect("run");
    server.await.expect("server task");

    assert_eq!(results[0].outcome, Outcome::Succeeded);
    let log = std::fs::read(results[0].log_path.as_ref().expect("log path")).expect("read log");
    let text = String::from_utf8(log).expect("log is valid utf-8");
    assert_eq!(text, "Username: Password: \r\nR1#show ver\r\ncaf  é\r\nR1#");
}
