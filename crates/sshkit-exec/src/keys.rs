//! SSH credential management and resolution

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How the client authenticates
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credentials {
    /// Private key file on disk
    Key {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Identities from the running SSH agent
    #[default]
    Agent,
    /// Base64-encoded private key held in an environment variable
    Env {
        var: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Plain password
    Password { password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Key { path, .. } => f.debug_struct("Key").field("path", path).finish(),
            Credentials::Agent => f.write_str("Agent"),
            Credentials::Env { var, .. } => f.debug_struct("Env").field("var", var).finish(),
            Credentials::Password { .. } => f.write_str("Password(..)"),
        }
    }
}

impl Credentials {
    /// Key file without passphrase
    pub fn key(path: impl Into<PathBuf>) -> Self {
        Credentials::Key {
            path: path.into(),
            passphrase: None,
        }
    }

    /// Password authentication
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password {
            password: password.into(),
        }
    }

    /// Resolve credentials to something the SSH library can use
    ///
    /// For `Env`, decodes base64 and writes to temp file
    ///
    /// # Errors
    /// Returns `KeyError` if key resolution fails (env not set, invalid base64, etc.)
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            Credentials::Key { path, passphrase } => {
                validate_key_permissions(path)?;
                Ok(ResolvedKey::Path {
                    path: path.clone(),
                    passphrase: passphrase.clone(),
                })
            }
            Credentials::Agent => Ok(ResolvedKey::Agent),
            Credentials::Env { var, passphrase } => {
                let base64_key = env::var(var).map_err(|_| KeyError::EnvNotSet(var.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;

                let temp_path = write_temp_key(&key_data)?;
                Ok(ResolvedKey::Temp {
                    path: temp_path,
                    passphrase: passphrase.clone(),
                })
            }
            Credentials::Password { password } => Ok(ResolvedKey::Password(password.clone())),
        }
    }
}

/// Resolved credential
pub enum ResolvedKey {
    /// Path to key file
    Path {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Use SSH agent
    Agent,
    /// Temporary key file (deleted on drop)
    Temp {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Password
    Password(String),
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedKey::Path { path, .. } => f.debug_tuple("Path").field(path).finish(),
            ResolvedKey::Agent => f.write_str("Agent"),
            ResolvedKey::Temp { path, .. } => f.debug_tuple("Temp").field(path).finish(),
            ResolvedKey::Password(_) => f.write_str("Password(..)"),
        }
    }
}

impl ResolvedKey {
    /// Get key path for SSH library
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ResolvedKey::Path { path, .. } | ResolvedKey::Temp { path, .. } => Some(path),
            ResolvedKey::Agent | ResolvedKey::Password(_) => None,
        }
    }

    /// Passphrase for an encrypted key
    #[must_use]
    pub fn passphrase(&self) -> Option<&str> {
        match self {
            ResolvedKey::Path { passphrase, .. } | ResolvedKey::Temp { passphrase, .. } => {
                passphrase.as_deref()
            }
            ResolvedKey::Agent | ResolvedKey::Password(_) => None,
        }
    }

    /// Whether to use SSH agent
    #[must_use]
    pub fn use_agent(&self) -> bool {
        matches!(self, ResolvedKey::Agent)
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        match self {
            ResolvedKey::Password(p) => Some(p),
            _ => None,
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn validate_key_permissions(path: &PathBuf) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => KeyError::NotFound(path.display().to_string()),
        _ => KeyError::Io(e),
    })?;

    // group and other bits must be clear
    if metadata.permissions().mode() & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

static TEMP_KEY_SEQ: AtomicUsize = AtomicUsize::new(0);

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let seq = TEMP_KEY_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp_path = env::temp_dir().join(format!("sshkit_key_{}_{seq}", std::process::id()));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)?;
    file.write_all(key_data)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp { path, .. } = self
            && let Err(e) = std::fs::remove_file(&*path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove temp key");
        }
    }
}
