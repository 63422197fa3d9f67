//! External command execution.
//!
//! Every step of the pipeline that is not plain file shuffling is an external
//! program: `make`, `patch`, `tar`, the container engine. [`Cmd`] wraps
//! [`std::process::Command`] so that each invocation is logged with its full
//! argument list and a failure always names the command that failed.
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_rebuild::process::Cmd;
//!
//! Cmd::new("make")
//!     .args(["olddefconfig"])
//!     .dir(&srcdir)
//!     .error_msg("make olddefconfig failed")
//!     .run_interactive()?;
//! ```

use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::RebuildError;

/// Captured output of a command run with [`Cmd::run`].
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Builder for a single external command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    dir: Option<PathBuf>,
    stdin: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            envs: Vec::new(),
            dir: None,
            stdin: None,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Working directory of the child.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    /// Feed the contents of `path` to the child's stdin.
    pub fn stdin_file(mut self, path: &Path) -> Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    /// Prefix for the error raised when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// The command line as it is logged and reported on failure.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Arguments passed after the program name.
    pub fn get_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Run with captured stdout/stderr.
    pub fn run(self) -> Result<CommandOutput> {
        let mut command = self.command()?;
        let output = command
            .output()
            .with_context(|| format!("Failed to spawn `{}`", self.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(output.status, Some(stderr.trim())).into());
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run with inherited stdout/stderr so the child's output streams live.
    pub fn run_interactive(self) -> Result<()> {
        let mut command = self.command()?;
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let status = command
            .status()
            .with_context(|| format!("Failed to spawn `{}`", self.display()))?;

        if !status.success() {
            return Err(self.failure(status, None).into());
        }
        Ok(())
    }

    fn command(&self) -> Result<Command> {
        tracing::debug!("running {}", self.display());
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (k, v) in &self.envs {
            command.env(k, v);
        }
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }
        if let Some(path) = &self.stdin {
            let file = File::open(path)
                .with_context(|| format!("Failed to open stdin for `{}`: {}", self.display(), path.display()))?;
            command.stdin(Stdio::from(file));
        }
        Ok(command)
    }

    fn failure(&self, status: ExitStatus, stderr: Option<&str>) -> RebuildError {
        let mut reason = match &self.error_msg {
            Some(msg) => format!("{msg} ({status})"),
            None => status.to_string(),
        };
        if let Some(stderr) = stderr.filter(|s| !s.is_empty()) {
            reason.push_str(": ");
            reason.push_str(stderr);
        }
        RebuildError::CommandFailed {
            command: self.display(),
            reason,
            code: status.code(),
        }
    }
}

/// Locate `tool` in `$PATH`.
pub fn which(tool: &str) -> Option<String> {
    which::which(tool).ok().map(|p| p.display().to_string())
}

/// Whether `tool` is available in `$PATH`.
pub fn exists(tool: &str) -> bool {
    which::which(tool).is_ok()
}
