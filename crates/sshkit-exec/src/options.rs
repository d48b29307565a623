//! Per-invocation options

use std::time::Duration;

/// Options for a single command execution
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Bytes written to the command's stdin, followed by EOF
    pub stdin: Option<Vec<u8>>,
    /// Bound on total wall-clock time; zero means no bound
    pub timeout: Option<Duration>,
    /// Turn a non-zero exit code into `ExecError::NonZeroExit`
    pub fail_on_non_zero: bool,
}

impl ExecOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipe `stdin` into the command
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail on non-zero exit
    #[must_use]
    pub fn fail_on_non_zero(mut self, fail: bool) -> Self {
        self.fail_on_non_zero = fail;
        self
    }

    /// Timeout that should actually be armed
    #[must_use]
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }
}

/// Options for running a script through a remote shell
#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Run the shell under `sudo`
    pub sudo: bool,
    /// Shell that reads the script from stdin
    pub shell: String,
    /// Bound on total wall-clock time
    pub timeout: Option<Duration>,
    /// Turn a non-zero exit code into an error
    pub fail_on_non_zero: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            sudo: false,
            shell: "bash".to_string(),
            timeout: None,
            fail_on_non_zero: false,
        }
    }
}

impl ScriptOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Elevate with sudo
    #[must_use]
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Use a different shell
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail on non-zero exit
    #[must_use]
    pub fn fail_on_non_zero(mut self, fail: bool) -> Self {
        self.fail_on_non_zero = fail;
        self
    }

    /// Command line that starts the shell reading from stdin
    #[must_use]
    pub fn command(&self) -> String {
        if self.sudo {
            format!("sudo {} -s", self.shell)
        } else {
            format!("{} -s", self.shell)
        }
    }

    /// Exec options carrying `script` as stdin
    #[must_use]
    pub fn into_exec_options(self, script: impl Into<Vec<u8>>) -> ExecOptions {
        ExecOptions {
            stdin: Some(script.into()),
            timeout: self.timeout,
            fail_on_non_zero: self.fail_on_non_zero,
        }
    }
}
