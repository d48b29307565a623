//! Channel abstraction the executor runs against

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::result::ExitStatus;

/// Writer feeding the remote command's stdin; shutting it down sends EOF
pub type StdinWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// One event observed on a command channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Chunk of the command's standard output
    Stdout(Vec<u8>),
    /// Chunk of the command's standard error
    Stderr(Vec<u8>),
    /// Remote process terminated
    Exit(ExitStatus),
    /// Server refused to start the command
    Rejected,
}

/// A channel with a command already started on it
#[async_trait]
pub trait CommandChannel: Send {
    /// Next event, or `None` once the channel is closed
    async fn recv(&mut self) -> Option<ChannelEvent>;

    /// Writer for the command's stdin
    fn stdin(&mut self) -> StdinWriter;

    /// Close the channel without waiting for the process
    async fn close(&mut self);
}
