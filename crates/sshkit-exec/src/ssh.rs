//! SSH client using russh crate

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{Channel, ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ConnectionState, LazySession};
use crate::error::ExecError;
use crate::executor;
use crate::keys::{Credentials, ResolvedKey};
use crate::options::{ExecOptions, ScriptOptions};
use crate::result::{CommandResult, ConnectionInfo, ExitStatus};
use crate::sftp;
use crate::traits::{ChannelEvent, CommandChannel, StdinWriter};

/// SSH client handler for russh
#[derive(Debug)]
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key policy is left to the caller's network; the key is only logged
        debug!(
            fingerprint = %server_public_key.fingerprint(ssh_key::HashAlg::Sha256),
            "accepting server key"
        );
        Ok(true)
    }
}

type Session = client::Handle<SshClientHandler>;

/// Exec channel backed by a russh session channel
///
/// Exit is reported once the channel closes, carrying the last exit status or
/// signal seen, so output trailing the exit status is still collected.
struct RusshChannel {
    channel: Channel<client::Msg>,
    exit: ExitStatus,
    closed: bool,
}

impl RusshChannel {
    fn new(channel: Channel<client::Msg>) -> Self {
        Self {
            channel,
            exit: ExitStatus::default(),
            closed: false,
        }
    }
}

#[async_trait]
impl CommandChannel for RusshChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.closed {
            return None;
        }

        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return Some(ChannelEvent::Stdout(data.to_vec()));
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    return Some(ChannelEvent::Stderr(data.to_vec()));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit.code = Some(exit_status);
                }
                Some(ChannelMsg::ExitSignal {
                    signal_name,
                    error_message,
                    ..
                }) => {
                    debug!(
                        signal = ?signal_name,
                        message = %error_message,
                        "remote process killed"
                    );
                    self.exit.signal = Some(format!("{signal_name:?}"));
                }
                // reply to the exec request sent with want_reply
                Some(ChannelMsg::Failure) => return Some(ChannelEvent::Rejected),
                Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    return Some(ChannelEvent::Exit(std::mem::take(&mut self.exit)));
                }
                Some(_) => {}
            }
        }
    }

    fn stdin(&mut self) -> StdinWriter {
        Box::pin(self.channel.make_writer())
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "failed to close channel");
        }
    }
}

/// SSH client for one remote host
///
/// Manages a single SSH session for command execution and file upload.
/// The connection is established on first use and never retried.
pub struct SshClient {
    /// Connection configuration
    conn_info: ConnectionInfo,
    /// Resolved credentials
    key: ResolvedKey,
    /// SSH session (initialized on first use)
    session: LazySession<Session>,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("conn_info", &self.conn_info)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SshClient {
    /// Create a new SSH client
    ///
    /// Credentials are resolved here; nothing touches the network until the
    /// first operation.
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if credential resolution fails
    pub fn new(conn_info: ConnectionInfo) -> Result<Self, ExecError> {
        let key = conn_info
            .credentials
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        Ok(Self {
            conn_info,
            key,
            session: LazySession::new(),
        })
    }

    /// Start building a client
    pub fn builder(host: impl Into<String>, user: impl Into<String>) -> SshClientBuilder {
        SshClientBuilder::new(host, user)
    }

    /// Get connection info
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.conn_info
    }

    /// Current connection lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Connect to the remote host unless an attempt was already made
    ///
    /// # Errors
    /// The outcome of the first connection attempt
    pub async fn connect(&self) -> Result<(), ExecError> {
        self.session().await.map(|_| ())
    }

    async fn session(&self) -> Result<&Session, ExecError> {
        let outcome = self.session.get_or_connect(|| self.establish()).await;
        if matches!(outcome, Err(ExecError::NotConnected)) {
            // connected after close() had already run
            if let Some(late) = self.session.take_for_teardown() {
                self.disconnect(late).await;
            }
        }
        outcome
    }

    async fn disconnect(&self, session: &Session) {
        match session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            Ok(()) => info!(host = %self.conn_info.host, "SSH disconnected"),
            Err(e) => warn!(host = %self.conn_info.host, error = %e, "failed to disconnect"),
        }
    }

    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn establish(&self) -> Result<Session, ExecError> {
        info!(
            host = %self.conn_info.host,
            port = self.conn_info.port,
            user = %self.conn_info.user,
            "connecting to SSH"
        );

        let attempt = async {
            let mut session = client::connect(
                Arc::new(client::Config::default()),
                (&self.conn_info.host[..], self.conn_info.port),
                SshClientHandler,
            )
            .await
            .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

            self.authenticate(&mut session).await?;
            Ok::<_, ExecError>(session)
        };

        let session = match self.conn_info.connect_timeout {
            Some(limit) => timeout(limit, attempt).await.map_err(|_| {
                ExecError::ConnectionFailed(format!(
                    "timed out after {limit:?} connecting to {}",
                    self.conn_info.target()
                ))
            })??,
            None => attempt.await?,
        };

        info!(host = %self.conn_info.host, "SSH connected and authenticated");
        Ok(session)
    }

    async fn authenticate(&self, session: &mut Session) -> Result<(), ExecError> {
        let user = &self.conn_info.user;

        if self.key.use_agent() {
            return authenticate_with_agent(session, user).await;
        }

        let success = if let Some(password) = self.key.password() {
            session
                .authenticate_password(user, password)
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
                .success()
        } else if let Some(key_path) = self.key.path() {
            let key_pair = load_secret_key(key_path, self.key.passphrase())
                .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            session
                .authenticate_publickey(
                    user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                )
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
                .success()
        } else {
            return Err(ExecError::AuthenticationFailed(
                "No authentication method available".to_string(),
            ));
        };

        if success {
            Ok(())
        } else {
            Err(ExecError::AuthenticationFailed(format!(
                "server rejected credentials for {}",
                self.conn_info.target()
            )))
        }
    }

    /// Execute a command on the remote host
    ///
    /// # Errors
    /// Connection and channel errors, or the executor's `Timeout`,
    /// `PrematureExit` and `NonZeroExit` outcomes
    #[instrument(skip(self, options), fields(host = %self.conn_info.host))]
    pub async fn exec(
        &self,
        command: &str,
        options: ExecOptions,
    ) -> Result<CommandResult, ExecError> {
        let session = self.session().await?;

        debug!(command = %command, timeout = ?options.timeout, "executing remote command");

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::ChannelOpen(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::ChannelOpen(e.to_string()))?;

        executor::execute(RusshChannel::new(channel), command, &options).await
    }

    /// Run `script` through a remote shell reading from stdin
    ///
    /// # Errors
    /// Same as [`SshClient::exec`]
    pub async fn exec_script(
        &self,
        script: &str,
        options: ScriptOptions,
    ) -> Result<CommandResult, ExecError> {
        let command = options.command();
        self.exec(&command, options.into_exec_options(script)).await
    }

    /// Upload a local file over SFTP, returning the number of bytes written
    ///
    /// # Errors
    /// `TransferFailed` on any channel, subsystem or I/O failure
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, ExecError> {
        let local = sftp::open_local(local_path).await?;
        let session = self.session().await?;
        sftp::upload(session, local, local_path, remote_path).await
    }

    /// Disconnect from the remote host
    ///
    /// Safe to call when never connected. Later operations fail with
    /// `NotConnected`.
    ///
    /// # Errors
    /// Returns `ExecError::IoError` if disconnection fails
    pub async fn close(&self) -> Result<(), ExecError> {
        if let Some(session) = self.session.close() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.conn_info.host, "SSH disconnected");
        }
        Ok(())
    }
}

async fn authenticate_with_agent(session: &mut Session, user: &str) -> Result<(), ExecError> {
    let mut agent = AgentClient::connect_env().await.map_err(|e| {
        ExecError::AuthenticationFailed(format!("SSH agent connection failed: {e}"))
    })?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| ExecError::AuthenticationFailed(format!("SSH agent: {e}")))?;

    if identities.is_empty() {
        return Err(ExecError::AuthenticationFailed(
            "no identities available in SSH agent".to_string(),
        ));
    }

    let mut last_error = None;
    for public_key in &identities {
        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        match session
            .authenticate_publickey_with(user, public_key.clone(), hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => return Ok(()),
            Ok(_) => last_error = Some("key rejected by server".to_string()),
            Err(e) => {
                warn!(error = %e, "agent signing failed");
                last_error = Some(e.to_string());
            }
        }
    }

    Err(ExecError::AuthenticationFailed(format!(
        "none of the {} agent identities worked: {}",
        identities.len(),
        last_error.unwrap_or_else(|| "unknown".to_string())
    )))
}

/// Builder for `SshClient`
pub struct SshClientBuilder {
    conn_info: ConnectionInfo,
}

impl SshClientBuilder {
    /// Create builder with required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conn_info: ConnectionInfo::new(host, user),
        }
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.conn_info.credentials = Credentials::key(path);
        self
    }

    /// Use SSH agent
    #[must_use]
    pub fn with_agent(mut self) -> Self {
        self.conn_info.credentials = Credentials::Agent;
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.conn_info.credentials = Credentials::Env {
            var: var_name.into(),
            passphrase: None,
        };
        self
    }

    /// Authenticate with a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.conn_info.credentials = Credentials::password(password);
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Bound connect + authenticate
    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.conn_info.connect_timeout = Some(limit);
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if credential resolution fails
    pub fn build(self) -> Result<SshClient, ExecError> {
        SshClient::new(self.conn_info)
    }
}
