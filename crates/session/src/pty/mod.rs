//! Pseudo-terminal capability used by sessions.
//!
//! Sessions only see the [`PtyProvider`] / [`Pty`] / [`PtyWaiter`] traits;
//! [`native`] implements them on top of the host's terminal devices.

pub mod native;

use std::io::{Read, Write};

use channel_protocol::WindowSize;
use nix::sys::signal::Signal;
use thiserror::Error;

use crate::process::{CommandSpec, RunError};

pub use native::{NativePty, NativePtyProvider};

/// Errors that can occur during PTY operations.
#[derive(Error, Debug)]
pub enum PtyError {
    /// The provider cannot hand out terminals.
    #[error("PTY provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Failed to open the terminal device pair.
    #[error("failed to open PTY: {0}")]
    OpenFailed(String),

    /// The terminal has not been opened, or has been closed.
    #[error("PTY is not open")]
    NotOpen,

    /// Failed to obtain one of the terminal's streams.
    #[error("failed to get PTY {stream} stream: {reason}")]
    StreamUnavailable {
        /// Which stream was requested.
        stream: &'static str,
        /// Why it could not be provided.
        reason: String,
    },

    /// Failed to spawn the command on the terminal.
    #[error("failed to spawn PTY command: {0}")]
    SpawnFailed(String),

    /// Failed to resize the terminal.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// No process is attached to the terminal.
    #[error("no process attached to PTY")]
    NoProcess,

    /// Failed to signal the attached process.
    #[error("failed to signal PTY process: {0}")]
    SignalFailed(String),

    /// Failed to wait for the attached process.
    #[error("failed to wait for PTY process: {0}")]
    WaitFailed(String),
}

/// Hands out pseudo-terminals.
pub trait PtyProvider: Send + Sync {
    /// Allocate a terminal. It is not opened until [`Pty::open`].
    fn allocate(&self) -> Result<Box<dyn Pty>, PtyError>;
}

/// A pseudo-terminal and the command attached to it.
pub trait Pty: Send {
    /// Open the terminal device pair.
    fn open(&mut self) -> Result<(), PtyError>;

    /// Set the terminal geometry. Before [`Pty::open`] the size is kept and
    /// applied when the terminal opens.
    fn set_size(&mut self, size: WindowSize) -> Result<(), PtyError>;

    /// Take the stream carrying the terminal's output.
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError>;

    /// Take the stream feeding the terminal's input.
    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError>;

    /// Launch the command attached to the terminal.
    fn run(&mut self, command: &CommandSpec) -> Result<Box<dyn PtyWaiter>, PtyError>;

    /// Deliver a signal to the attached process.
    fn signal(&mut self, signal: Signal) -> Result<(), PtyError>;

    /// Release the terminal.
    fn close(&mut self);
}

/// Waits for the process attached to a terminal.
pub trait PtyWaiter: Send {
    /// Block until the process exits.
    ///
    /// A nonzero native exit code is reported as [`RunError::PtyExit`].
    fn wait(self: Box<Self>) -> Result<(), RunError>;
}
