//! Configuration loading and target resolution

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{WrapErr, bail};
use serde::{Deserialize, Serialize};
use sshkit_exec::{ConnectionInfo, Credentials};

/// Top-level configuration for the sshkit CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Settings applied to every target
    #[serde(default)]
    pub defaults: Defaults,
    /// Named hosts
    #[serde(default)]
    pub host: Vec<HostConfig>,
}

/// Defaults for ad-hoc targets and commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// User for targets without `user@`
    pub user: Option<String>,
    /// Credentials for targets not listed under `[[host]]`
    #[serde(default)]
    pub credentials: Credentials,
    /// Command timeout applied when none is given on the command line
    pub timeout_ms: Option<u64>,
    /// Bound on connect + authenticate
    pub connect_timeout_ms: Option<u64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            user: None,
            credentials: Credentials::default(),
            timeout_ms: None,
            connect_timeout_ms: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Configuration for a single named host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Name used on the command line
    pub name: String,
    /// IP address or hostname for SSH connection
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH user (falls back to the defaults, then `$USER`)
    pub user: Option<String>,
    /// Overrides `defaults.credentials`
    pub credentials: Option<Credentials>,
    pub connect_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    22
}

/// Credential overrides given on the command line
#[derive(Debug, Clone, Default)]
pub struct CredentialOverride {
    pub identity: Option<PathBuf>,
    pub password_env: Option<String>,
}

impl CredentialOverride {
    fn resolve(&self) -> eyre::Result<Option<Credentials>> {
        if let Some(var) = &self.password_env {
            let password = std::env::var(var)
                .wrap_err_with(|| format!("password variable {var} not set"))?;
            return Ok(Some(Credentials::password(password)));
        }
        Ok(self.identity.as_ref().map(Credentials::key))
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("SSHKIT_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let paths = [
            Some(PathBuf::from("sshkit.toml")),
            dirs::config_dir().map(|p| p.join("sshkit/sshkit.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }

    /// Command timeout from the defaults section
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.defaults
            .timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Turn a host name or `[user@]host[:port]` into connection parameters
    ///
    /// # Errors
    /// Returns error if the target cannot be parsed or a password variable is unset
    pub fn resolve_target(
        &self,
        target: &str,
        overrides: &CredentialOverride,
    ) -> eyre::Result<ConnectionInfo> {
        let override_creds = overrides.resolve()?;

        if let Some(host) = self.host.iter().find(|h| h.name == target) {
            let user = host
                .user
                .clone()
                .unwrap_or_else(|| self.default_user());
            let credentials = override_creds
                .or_else(|| host.credentials.clone())
                .unwrap_or_else(|| self.defaults.credentials.clone());
            let mut info = ConnectionInfo::new(&host.addr, user)
                .with_port(host.port)
                .with_credentials(credentials);
            info.connect_timeout =
                millis(host.connect_timeout_ms.or(self.defaults.connect_timeout_ms));
            return Ok(info);
        }

        let (user, rest) = match target.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some(_) => bail!("empty user in target {target:?}"),
            None => (self.default_user(), target),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .wrap_err_with(|| format!("invalid port in target {target:?}"))?;
                (host, port)
            }
            None => (rest, default_port()),
        };

        if host.is_empty() {
            bail!("empty host in target {target:?}");
        }

        let mut info = ConnectionInfo::new(host, user)
            .with_port(port)
            .with_credentials(override_creds.unwrap_or_else(|| self.defaults.credentials.clone()));
        info.connect_timeout = millis(self.defaults.connect_timeout_ms);
        Ok(info)
    }

    fn default_user(&self) -> String {
        self.defaults
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }
}

fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|&ms| ms > 0).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
[defaults]
log_level = "debug"
user = "ops"
timeout_ms = 30000

[defaults.credentials]
method = "agent"

[[host]]
name = "web1"
addr = "10.0.0.11"
port = 2222
connect_timeout_ms = 5000

[host.credentials]
method = "key"
path = "/home/ops/.ssh/id_ed25519"

[[host]]
name = "db1"
addr = "10.0.0.21"
user = "postgres"
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.defaults.log_level, "debug");
        assert_eq!(config.host.len(), 2);
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_named_host() {
        let info = sample()
            .resolve_target("web1", &CredentialOverride::default())
            .unwrap();

        assert_eq!(info.host, "10.0.0.11");
        assert_eq!(info.port, 2222);
        assert_eq!(info.user, "ops");
        assert_eq!(info.connect_timeout, Some(Duration::from_secs(5)));
        assert!(matches!(info.credentials, Credentials::Key { .. }));

        let info = sample()
            .resolve_target("db1", &CredentialOverride::default())
            .unwrap();
        assert_eq!(info.user, "postgres");
        assert!(matches!(info.credentials, Credentials::Agent));
    }

    #[test]
    fn test_ad_hoc_target() {
        let config = sample();
        let none = CredentialOverride::default();

        let info = config.resolve_target("deploy@example.com:2200", &none).unwrap();
        assert_eq!(
            (info.user.as_str(), info.host.as_str(), info.port),
            ("deploy", "example.com", 2200)
        );

        let info = config.resolve_target("example.com", &none).unwrap();
        assert_eq!((info.user.as_str(), info.port), ("ops", 22));

        assert!(config.resolve_target("@example.com", &none).is_err());
        assert!(config.resolve_target("example.com:ssh", &none).is_err());
        assert!(config.resolve_target("deploy@", &none).is_err());
    }

    #[test]
    fn test_identity_override() {
        let overrides = CredentialOverride {
            identity: Some(PathBuf::from("/tmp/id_test")),
            password_env: None,
        };

        let info = sample().resolve_target("db1", &overrides).unwrap();
        assert!(matches!(
            info.credentials,
            Credentials::Key { ref path, .. } if path == Path::new("/tmp/id_test")
        ));
    }

    #[test]
    fn test_missing_password_env() {
        let overrides = CredentialOverride {
            identity: None,
            password_env: Some("SSHKIT_TEST_PASSWORD_UNSET".to_string()),
        };

        assert!(sample().resolve_target("db1", &overrides).is_err());
    }
}
