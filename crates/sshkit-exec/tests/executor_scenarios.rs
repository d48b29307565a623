use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

use sshkit_exec::executor::execute;
use sshkit_exec::{ChannelEvent, CommandChannel, ExecError, ExecOptions, ExitStatus, StdinWriter};

// Channel fed by the test through an mpsc queue
struct ScriptedChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    stdin: Option<StdinWriter>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    fn stdin(&mut self) -> StdinWriter {
        self.stdin
            .take()
            .unwrap_or_else(|| Box::pin(tokio::io::sink()))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn scripted() -> (
    mpsc::UnboundedSender<ChannelEvent>,
    ScriptedChannel,
    Arc<AtomicBool>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let channel = ScriptedChannel {
        events: rx,
        stdin: None,
        closed: Arc::clone(&closed),
    };
    (tx, channel, closed)
}

fn out(s: &str) -> ChannelEvent {
    ChannelEvent::Stdout(s.as_bytes().to_vec())
}

fn err(s: &str) -> ChannelEvent {
    ChannelEvent::Stderr(s.as_bytes().to_vec())
}

fn exit(code: u32) -> ChannelEvent {
    ChannelEvent::Exit(ExitStatus::code(code))
}

#[tokio::test(start_paused = true)]
async fn test_echo_hello() {
    let (tx, channel, _) = scripted();
    tx.send(out("hello\n")).unwrap();
    tx.send(exit(0)).unwrap();

    let result = execute(channel, "echo hello", &ExecOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_chunks_accumulate() {
    let (tx, channel, _) = scripted();
    tokio::spawn(async move {
        tx.send(out("one ")).unwrap();
        tx.send(err("warn: a\n")).unwrap();
        sleep(Duration::from_millis(20)).await;
        tx.send(out("two\n")).unwrap();
        tx.send(err("warn: b\n")).unwrap();
        sleep(Duration::from_millis(20)).await;
        tx.send(exit(0)).unwrap();
    });

    let result = execute(channel, "noisy", &ExecOptions::new()).await.unwrap();

    assert_eq!(result.stdout, "one two\n");
    assert_eq!(result.stderr, "warn: a\nwarn: b\n");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_wins_and_late_exit_is_ignored() {
    let (tx, channel, closed) = scripted();
    tx.send(out("started\n")).unwrap();

    let start = Instant::now();
    let result = execute(
        channel,
        "sleep 5",
        &ExecOptions::new().with_timeout(Duration::from_millis(100)),
    )
    .await;

    assert!(matches!(
        result,
        Err(ExecError::Timeout { timeout }) if timeout == Duration::from_millis(100)
    ));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(110));
    assert!(closed.load(Ordering::SeqCst));

    // nothing is listening for the exit any more
    assert!(tx.send(exit(0)).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_exit_before_deadline_disarms_timer() {
    let (tx, channel, closed) = scripted();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        tx.send(out("done\n")).unwrap();
        tx.send(exit(0)).unwrap();
    });

    let result = execute(
        channel,
        "sleep 0.05",
        &ExecOptions::new().with_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    assert_eq!(result.stdout, "done\n");
    assert!(!closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_is_unbounded() {
    let (tx, channel, _) = scripted();
    tokio::spawn(async move {
        sleep(Duration::from_secs(60)).await;
        tx.send(exit(0)).unwrap();
    });

    let result = execute(
        channel,
        "sleep 60",
        &ExecOptions::new().with_timeout(Duration::ZERO),
    )
    .await;

    assert!(result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_stdin_is_delivered_then_closed() {
    let (tx, mut channel, _) = scripted();
    let (writer, mut reader) = tokio::io::duplex(1024);
    channel.stdin = Some(Box::pin(writer));

    // behaves like `cat`: echoes stdin once it sees EOF, then exits
    tokio::spawn(async move {
        let mut input = String::new();
        reader.read_to_string(&mut input).await.unwrap();
        tx.send(out(&input)).unwrap();
        tx.send(exit(0)).unwrap();
    });

    let result = execute(channel, "cat", &ExecOptions::new().with_stdin("line 1\nline 2\n"))
        .await
        .unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.stdout, "line 1\nline 2\n");
}

#[tokio::test(start_paused = true)]
async fn test_exit_before_stdin_flushed_is_premature() {
    let (tx, mut channel, _) = scripted();
    // one-byte pipe nobody reads: the write can never complete
    let (writer, _reader) = tokio::io::duplex(1);
    channel.stdin = Some(Box::pin(writer));
    tx.send(exit(0)).unwrap();

    let result = execute(
        channel,
        "true",
        &ExecOptions::new().with_stdin("more than one byte"),
    )
    .await;

    assert!(matches!(result, Err(ExecError::PrematureExit { code: Some(0) })));
}

#[tokio::test(start_paused = true)]
async fn test_broken_stdin_is_premature() {
    let (tx, mut channel, _) = scripted();
    let (writer, reader) = tokio::io::duplex(16);
    drop(reader);
    channel.stdin = Some(Box::pin(writer));

    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        tx.send(exit(0)).unwrap();
    });

    let result = execute(channel, "true", &ExecOptions::new().with_stdin("payload")).await;

    assert!(matches!(result, Err(ExecError::PrematureExit { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_non_zero_exit_fails_when_requested() {
    let (tx, channel, _) = scripted();
    tx.send(out("partial output\n")).unwrap();
    tx.send(err("something broke\n")).unwrap();
    tx.send(exit(7)).unwrap();

    let err = execute(
        channel,
        "exit 7",
        &ExecOptions::new().fail_on_non_zero(true),
    )
    .await
    .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains('7'));
    assert!(msg.contains("partial output"));
    assert!(msg.contains("something broke"));
    assert_eq!(err.exit_code(), Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_non_zero_exit_resolves_by_default() {
    let (tx, channel, _) = scripted();
    tx.send(err("nope\n")).unwrap();
    tx.send(exit(7)).unwrap();

    let result = execute(channel, "exit 7", &ExecOptions::new()).await.unwrap();

    assert_eq!(result.status, 7);
    assert!(!result.success());
    assert_eq!(result.stderr, "nope\n");
}

#[tokio::test(start_paused = true)]
async fn test_close_without_exit_status_counts_as_zero() {
    let (tx, channel, _) = scripted();
    tx.send(out("bye\n")).unwrap();
    drop(tx);

    let result = execute(channel, "logout", &ExecOptions::new().fail_on_non_zero(true))
        .await
        .unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.stdout, "bye\n");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_exec_request_fails() {
    let (tx, channel, closed) = scripted();
    tx.send(ChannelEvent::Rejected).unwrap();
    // events after the rejection are not observed
    tx.send(exit(0)).unwrap();

    let result = execute(channel, "not-allowed", &ExecOptions::new()).await;

    assert!(matches!(result, Err(ExecError::ChannelOpen(_))));
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_killed_by_signal() {
    let (tx, channel, _) = scripted();
    tx.send(ChannelEvent::Exit(ExitStatus::signal("KILL"))).unwrap();

    let result = execute(channel, "kill -9 $$", &ExecOptions::new().fail_on_non_zero(true))
        .await
        .unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.signal.as_deref(), Some("KILL"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_utf8_is_replaced() {
    let (tx, channel, _) = scripted();
    tx.send(ChannelEvent::Stdout(vec![b'o', b'k', 0xff])).unwrap();
    tx.send(exit(0)).unwrap();

    let result = execute(channel, "printf", &ExecOptions::new()).await.unwrap();

    assert_eq!(result.stdout, "ok\u{fffd}");
}
