//! Process runner for commands started without a PTY.
//!
//! A [`CommandSpec`] describes what to run; a [`Runner`] starts it with
//! piped standard streams, waits for it, and delivers signals to it.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::pty::PtyError;

/// Errors produced while starting, running or signalling a command.
#[derive(Error, Debug)]
pub enum RunError {
    /// The command could not be launched.
    #[error("failed to launch command: {0}")]
    Launch(#[source] std::io::Error),

    /// Waiting for the command failed.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    /// The command exited unsuccessfully.
    #[error("command exited unsuccessfully: {0}")]
    Exited(ExitStatus),

    /// A PTY-attached command exited with a nonzero native exit code.
    #[error("PTY command exited with code {code}")]
    PtyExit {
        /// Exit code reported by the PTY provider.
        code: u32,
    },

    /// A PTY-attached command was terminated by a signal.
    #[error("PTY command terminated by {signal}")]
    PtySignaled {
        /// Signal that terminated the command.
        signal: Signal,
        /// Whether the process dumped core.
        core_dumped: bool,
    },

    /// The PTY failed while running the command.
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    /// Delivering a signal failed.
    #[error("failed to signal process: {0}")]
    Signal(#[source] nix::Error),

    /// The command has no running process.
    #[error("command has not been started")]
    NotStarted,
}

/// Description of a command to run.
///
/// The environment is the complete, ordered environment of the process;
/// later entries win over earlier ones with the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments, excluding the program name.
    pub args: Vec<OsString>,
    /// Environment entries in application order.
    pub env: Vec<(String, OsString)>,
}

impl CommandSpec {
    /// Create a command with no environment.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }
}

/// A started process and its piped standard streams.
#[derive(Debug)]
pub struct Process {
    /// OS process id.
    pub pid: Option<u32>,
    /// Write end of the process's standard input.
    pub stdin: Option<ChildStdin>,
    /// Read end of the process's standard output.
    pub stdout: Option<ChildStdout>,
    /// Read end of the process's standard error.
    pub stderr: Option<ChildStderr>,
    /// Handle used to wait for exit.
    pub child: Child,
}

/// Starts, waits for and signals commands.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Start the command with piped standard streams.
    fn start(&self, command: &CommandSpec) -> Result<Process, RunError>;

    /// Wait for the process to exit.
    ///
    /// A nonzero exit or death by signal is reported as [`RunError::Exited`].
    async fn wait(&self, child: Child) -> Result<(), RunError>;

    /// Deliver a signal to the process.
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), RunError>;
}

/// Runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn start(&self, command: &CommandSpec) -> Result<Process, RunError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(RunError::Launch)?;
        let pid = child.id();

        tracing::debug!(
            program = %command.program.display(),
            pid = ?pid,
            "Started process"
        );

        Ok(Process {
            pid,
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
        })
    }

    async fn wait(&self, mut child: Child) -> Result<(), RunError> {
        let status = child.wait().await.map_err(RunError::Wait)?;
        if status.success() {
            Ok(())
        } else {
            Err(RunError::Exited(status))
        }
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), RunError> {
        let pid = i32::try_from(pid).map_err(|_| RunError::Signal(nix::Error::ESRCH))?;
        kill(Pid::from_raw(pid), signal).map_err(RunError::Signal)
    }
}
