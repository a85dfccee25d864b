//! Subprocess invocation.
//!
//! Commands are built from a program and an argument list and are never
//! passed through a shell. Callers inspect the returned [`CommandOutput`]
//! instead of parsing error strings.

use crate::error::{Result, StackError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Maximum captured size per stream in bytes (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Truncate a string to max bytes, preserving UTF-8 boundaries.
fn truncate_output(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("\n... [output truncated]");
    truncated
}

/// A program invocation: binary, arguments and optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Start a command for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The program to execute.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments in order.
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Working directory, if set.
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Arguments rendered for logging.
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Case-insensitive search across both streams.
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.stdout.to_lowercase().contains(&needle) || self.stderr.to_lowercase().contains(&needle)
    }

    /// Last non-empty line of stderr, falling back to stdout.
    pub fn summary(&self) -> &str {
        fn last(s: &str) -> Option<&str> {
            s.lines().rev().map(str::trim).find(|l| !l.is_empty())
        }
        last(&self.stderr)
            .or_else(|| last(&self.stdout))
            .unwrap_or("")
    }
}

/// Runs subprocesses on behalf of the installer, launcher and reporter.
///
/// A returned `Ok` means the process ran to completion, whatever its exit
/// code. `Err` means it could not be started.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion and capture its output.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(
            program = %spec.program().display(),
            args = %spec.display_args(),
            "executing command"
        );

        let mut cmd = tokio::process::Command::new(spec.program());
        cmd.args(spec.get_args());
        if let Some(dir) = spec.get_current_dir() {
            cmd.current_dir(dir);
        }

        let out = cmd.output().await.map_err(|source| StackError::Spawn {
            program: spec.program().display().to_string(),
            source,
        })?;

        let exit_code = out.status.code().unwrap_or(-1);
        let stdout = truncate_output(
            String::from_utf8_lossy(&out.stdout).into_owned(),
            MAX_OUTPUT_SIZE,
        );
        let stderr = truncate_output(
            String::from_utf8_lossy(&out.stderr).into_owned(),
            MAX_OUTPUT_SIZE,
        );
        debug!(
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "command completed"
        );
        trace!(stdout = %stdout, stderr = %stderr, "command output");

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}
