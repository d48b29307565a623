//! sshkit-exec: single-host SSH command runner
//!
//! Opens one lazily established SSH connection, runs shell commands on it
//! (optional stdin, timeout and non-zero-exit failure) and uploads files over
//! SFTP.

pub mod connection;
pub mod error;
pub mod executor;
pub mod keys;
pub mod options;
pub mod result;
mod sftp;
pub mod ssh;
pub mod traits;

pub use connection::ConnectionState;
pub use error::ExecError;
pub use keys::Credentials;
pub use options::{ExecOptions, ScriptOptions};
pub use result::{CommandResult, ConnectionInfo, ExitStatus};
pub use ssh::{SshClient, SshClientBuilder};
pub use traits::{ChannelEvent, CommandChannel, StdinWriter};
