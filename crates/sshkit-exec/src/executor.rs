//! Command execution state machine
//!
//! Drives one command over a [`CommandChannel`]. Stdout and stderr are
//! accumulated, stdin (if any) is written and closed, and an optional
//! deadline races the process exit. The loop returns on the first settling
//! event; the channel, timer and stdin writer are dropped with the call, so
//! nothing observed afterwards can produce a second outcome.

use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, instrument, warn};

use crate::error::ExecError;
use crate::options::ExecOptions;
use crate::result::{CommandResult, ExitStatus};
use crate::traits::{ChannelEvent, CommandChannel, StdinWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdinState {
    NotRequested,
    Pending,
    Flushed,
    Failed,
}

/// In-flight command. Settling consumes it, so it yields one outcome.
#[derive(Debug)]
struct Invocation {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdin: StdinState,
    fail_on_non_zero: bool,
    started: Instant,
}

impl Invocation {
    fn new(options: &ExecOptions) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdin: if options.stdin.is_some() {
                StdinState::Pending
            } else {
                StdinState::NotRequested
            },
            fail_on_non_zero: options.fail_on_non_zero,
            started: Instant::now(),
        }
    }

    fn stdin_done(&mut self, result: io::Result<()>) {
        self.stdin = match result {
            Ok(()) => StdinState::Flushed,
            Err(e) => {
                warn!(error = %e, "failed to write command stdin");
                StdinState::Failed
            }
        };
    }

    fn settle_timeout(self, timeout: Duration) -> ExecError {
        error!(
            timeout = ?timeout,
            elapsed = ?self.started.elapsed(),
            stdout_bytes = self.stdout.len(),
            stderr_bytes = self.stderr.len(),
            "command timed out"
        );
        ExecError::Timeout { timeout }
    }

    fn settle_rejected(self) -> ExecError {
        warn!(elapsed = ?self.started.elapsed(), "server rejected exec request");
        ExecError::ChannelOpen("exec request rejected by server".to_string())
    }

    fn settle_exit(self, exit: ExitStatus) -> Result<CommandResult, ExecError> {
        if matches!(self.stdin, StdinState::Pending | StdinState::Failed) {
            return Err(ExecError::PrematureExit { code: exit.code });
        }

        let stdout = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr).into_owned();

        if self.fail_on_non_zero && exit.is_failure() {
            return Err(ExecError::NonZeroExit {
                code: exit.status(),
                stdout,
                stderr,
            });
        }

        Ok(CommandResult {
            status: exit.status(),
            stdout,
            stderr,
            signal: exit.signal,
            duration: self.started.elapsed(),
        })
    }
}

async fn feed_stdin(writer: Option<StdinWriter>, payload: Option<&[u8]>) -> io::Result<()> {
    let (Some(mut writer), Some(payload)) = (writer, payload) else {
        return Ok(());
    };
    writer.write_all(payload).await?;
    writer.shutdown().await
}

/// Run a command already started on `channel` until it settles
///
/// # Errors
/// `Timeout` if the deadline passes first, `ChannelOpen` if the server
/// refuses to start the command, `PrematureExit` if the process
/// exits before stdin was fully written, `NonZeroExit` if requested and the
/// exit code is non-zero.
#[instrument(skip(channel, options), level = "debug")]
pub async fn execute<C: CommandChannel>(
    mut channel: C,
    command: &str,
    options: &ExecOptions,
) -> Result<CommandResult, ExecError> {
    let mut invocation = Invocation::new(options);

    let deadline = options.effective_timeout();
    let timer = sleep(deadline.unwrap_or_default());
    tokio::pin!(timer);

    let writer = options.stdin.as_ref().map(|_| channel.stdin());
    let stdin_write = feed_stdin(writer, options.stdin.as_deref());
    tokio::pin!(stdin_write);

    let outcome = loop {
        tokio::select! {
            biased;

            () = &mut timer, if deadline.is_some() => {
                let timeout = deadline.unwrap_or_default();
                break Err(invocation.settle_timeout(timeout));
            }

            result = &mut stdin_write, if invocation.stdin == StdinState::Pending => {
                invocation.stdin_done(result);
            }

            event = channel.recv() => match event {
                Some(ChannelEvent::Stdout(data)) => invocation.stdout.extend_from_slice(&data),
                Some(ChannelEvent::Stderr(data)) => invocation.stderr.extend_from_slice(&data),
                Some(ChannelEvent::Exit(exit)) => break invocation.settle_exit(exit),
                Some(ChannelEvent::Rejected) => break Err(invocation.settle_rejected()),
                None => {
                    debug!("channel closed without exit status");
                    break invocation.settle_exit(ExitStatus::default());
                }
            },
        }
    };

    match &outcome {
        Ok(result) => debug!(
            status = result.status,
            duration = ?result.duration,
            "remote command completed"
        ),
        Err(ExecError::Timeout { .. } | ExecError::ChannelOpen(_)) => channel.close().await,
        Err(e) => debug!(error = %e, "remote command failed"),
    }

    outcome
}
