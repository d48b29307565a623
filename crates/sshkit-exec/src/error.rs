//! Error types for sshkit-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Opening a session channel or sending the exec request failed
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Remote process exited before its stdin was fully written
    #[error("command exited (code {code:?}) before stdin was fully written")]
    PrematureExit {
        /// Exit code reported by the remote process, if any
        code: Option<u32>,
    },

    /// Command exited with a non-zero code and the caller asked for failure
    #[error("command exited with code {code}\nstdout: {stdout}\nstderr: {stderr}")]
    NonZeroExit {
        /// Exit status code
        code: i32,
        /// Accumulated stdout
        stdout: String,
        /// Accumulated stderr
        stderr: String,
    },

    /// SFTP upload failed
    #[error("file transfer failed: {0}")]
    TransferFailed(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Client was closed
    #[error("not connected")]
    NotConnected,
}

impl ExecError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_) | ExecError::Timeout { .. }
        )
    }

    /// Exit code carried by the error, if the remote process reported one
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::NonZeroExit { code, .. } => Some(*code),
            ExecError::PrematureExit { code } => code.map(u32::cast_signed),
            _ => None,
        }
    }
}
