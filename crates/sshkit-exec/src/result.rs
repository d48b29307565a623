//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::Credentials;

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 when the remote side reported none)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Signal that terminated the process, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Exit report from the remote process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, absent when the process was killed or the server sent none
    pub code: Option<u32>,
    /// Terminating signal name
    pub signal: Option<String>,
}

impl ExitStatus {
    /// Exit with a plain status code
    #[must_use]
    pub fn code(code: u32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Exit caused by a signal
    #[must_use]
    pub fn signal(name: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(name.into()),
        }
    }

    /// Exit code as reported to callers (missing code counts as 0)
    #[must_use]
    pub fn status(&self) -> i32 {
        self.code.map_or(0, u32::cast_signed)
    }

    /// Whether a non-zero code was reported
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code.is_some_and(|c| c != 0)
    }
}

/// Connection information for SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    pub user: String,
    /// How to authenticate
    #[serde(default)]
    pub credentials: Credentials,
    /// Upper bound on connect + authenticate
    #[serde(default, with = "opt_millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            credentials: Credentials::default(),
            connect_timeout: None,
        }
    }

    /// Set credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound the connection attempt
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// `user@host:port` for logs and errors
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Serialize an optional duration as whole milliseconds
pub mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.filter(|&ms| ms > 0).map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_defaults_missing_code_to_zero() {
        assert_eq!(ExitStatus::default().status(), 0);
        assert!(!ExitStatus::signal("KILL").is_failure());
        assert_eq!(ExitStatus::code(7).status(), 7);
        assert!(ExitStatus::code(7).is_failure());
    }

    #[test]
    fn test_connection_info_from_toml() {
        let info: ConnectionInfo = toml::from_str(
            r#"
            host = "10.0.0.5"
            user = "deploy"
            connect_timeout_ms = 1500

            [credentials]
            method = "password"
            password = "hunter2"
            "#,
        )
        .unwrap();

        assert_eq!(info.port, 22);
        assert_eq!(info.connect_timeout, Some(Duration::from_millis(1500)));
        assert!(matches!(info.credentials, Credentials::Password { .. }));
        assert_eq!(info.target(), "deploy@10.0.0.5:22");
    }

    #[test]
    fn test_zero_connect_timeout_means_none() {
        let info: ConnectionInfo = toml::from_str(
            r#"
            host = "h"
            user = "u"
            connect_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(info.connect_timeout, None);
        assert!(matches!(info.credentials, Credentials::Agent));
    }
}
