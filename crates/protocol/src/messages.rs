//! Session channel request and exit message definitions.
//!
//! These are the payloads carried by SSH `CHANNEL_REQUEST` messages on a
//! session channel (RFC 4254 §6). Each type implements [`WireMessage`].

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

/// Out-of-band liveness probe sent while a PTY-backed command runs.
pub const KEEPALIVE_REQUEST: &str = "keepalive@cloudfoundry.org";

/// Request name carrying a command's exit code.
pub const EXIT_STATUS_REQUEST: &str = "exit-status";

/// Request name carrying the signal that killed a command.
pub const EXIT_SIGNAL_REQUEST: &str = "exit-signal";

/// Exit code reported for any outcome that cannot be classified.
pub const UNCLASSIFIED_EXIT_CODE: u32 = 255;

/// The only subsystem served on a session channel.
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// A payload that can be decoded from and encoded to the SSH wire format.
pub trait WireMessage: Sized {
    /// Decode the message from a complete request payload.
    fn decode(payload: &[u8]) -> Result<Self>;

    /// Encode the message as a request payload.
    fn encode(&self) -> Bytes;
}

/// Session channel request types handled by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Set an environment variable.
    Env,
    /// Deliver a signal to the running command.
    Signal,
    /// Allocate a pseudo-terminal.
    PtyReq,
    /// Terminal geometry changed.
    WindowChange,
    /// Run a single command.
    Exec,
    /// Run the login shell.
    Shell,
    /// Start a named subsystem.
    Subsystem,
}

impl RequestKind {
    /// Look up a request kind by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "env" => Some(Self::Env),
            "signal" => Some(Self::Signal),
            "pty-req" => Some(Self::PtyReq),
            "window-change" => Some(Self::WindowChange),
            "exec" => Some(Self::Exec),
            "shell" => Some(Self::Shell),
            "subsystem" => Some(Self::Subsystem),
            _ => None,
        }
    }

    /// The wire name of this request kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Signal => "signal",
            Self::PtyReq => "pty-req",
            Self::WindowChange => "window-change",
            Self::Exec => "exec",
            Self::Shell => "shell",
            Self::Subsystem => "subsystem",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSize {
    /// Width in character cells.
    pub columns: u32,
    /// Height in character cells.
    pub rows: u32,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
}

impl WindowSize {
    /// Create a geometry with the given cell dimensions and no pixel size.
    pub fn new(columns: u32, rows: u32) -> Self {
        Self {
            columns,
            rows,
            width_px: 0,
            height_px: 0,
        }
    }

    fn read(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            columns: reader.read_u32("columns")?,
            rows: reader.read_u32("rows")?,
            width_px: reader.read_u32("width_px")?,
            height_px: reader.read_u32("height_px")?,
        })
    }

    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_u32(self.columns)
            .put_u32(self.rows)
            .put_u32(self.width_px)
            .put_u32(self.height_px);
    }
}

/// `env` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvRequest {
    /// Variable name.
    pub name: String,
    /// Variable value, as sent. Not necessarily UTF-8.
    pub value: Bytes,
}

impl WireMessage for EnvRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let name = reader.read_string("name")?;
        let value = reader.read_bytes("value")?;
        reader.finish()?;
        Ok(Self { name, value })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_str(&self.name).put_bytes(&self.value);
        writer.finish()
    }
}

/// `signal` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    /// Signal name without the `SIG` prefix, e.g. `INT`.
    pub signal: String,
}

impl WireMessage for SignalRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let signal = reader.read_string("signal")?;
        reader.finish()?;
        Ok(Self { signal })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_str(&self.signal);
        writer.finish()
    }
}

/// `pty-req` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value for the `TERM` environment variable.
    pub term: String,
    /// Initial terminal geometry.
    pub size: WindowSize,
    /// Encoded terminal modes, kept opaque.
    pub modes: Bytes,
}

impl WireMessage for PtyRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let term = reader.read_string("term")?;
        let size = WindowSize::read(&mut reader)?;
        let modes = reader.read_bytes("modes")?;
        reader.finish()?;
        Ok(Self { term, size, modes })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_str(&self.term);
        self.size.write(&mut writer);
        writer.put_bytes(&self.modes);
        writer.finish()
    }
}

/// `window-change` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChangeRequest {
    /// New terminal geometry.
    pub size: WindowSize,
}

impl WireMessage for WindowChangeRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let size = WindowSize::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { size })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        self.size.write(&mut writer);
        writer.finish()
    }
}

/// `exec` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Command line to run, as sent. Not necessarily UTF-8.
    pub command: Bytes,
}

impl ExecRequest {
    /// The command line with invalid UTF-8 replaced, for matching and logs.
    pub fn command_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.command)
    }
}

impl WireMessage for ExecRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let command = reader.read_bytes("command")?;
        reader.finish()?;
        Ok(Self { command })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_bytes(&self.command);
        writer.finish()
    }
}

/// `subsystem` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRequest {
    /// Subsystem name.
    pub name: String,
}

impl WireMessage for SubsystemRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let name = reader.read_string("subsystem")?;
        reader.finish()?;
        Ok(Self { name })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_str(&self.name);
        writer.finish()
    }
}

/// `exit-status` message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code of the command.
    pub status: u32,
}

impl WireMessage for ExitStatus {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let status = reader.read_u32("status")?;
        reader.finish()?;
        Ok(Self { status })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_u32(self.status);
        writer.finish()
    }
}

/// `exit-signal` message payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitSignal {
    /// Signal name without the `SIG` prefix.
    pub signal: String,
    /// Whether the process dumped core.
    pub core_dumped: bool,
    /// Human readable error message.
    pub error_message: String,
    /// RFC 3066 language tag for `error_message`.
    pub language_tag: String,
}

impl WireMessage for ExitSignal {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let signal = reader.read_string("signal")?;
        let core_dumped = reader.read_bool("core_dumped")?;
        let error_message = reader.read_string("error_message")?;
        let language_tag = reader.read_string("language_tag")?;
        reader.finish()?;
        Ok(Self {
            signal,
            core_dumped,
            error_message,
            language_tag,
        })
    }

    fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer
            .put_str(&self.signal)
            .put_bool(self.core_dumped)
            .put_str(&self.error_message)
            .put_str(&self.language_tag);
        writer.finish()
    }
}

/// How a command finished, as reported to the peer.
///
/// Every outcome maps to exactly one exit message; anything that could not
/// be classified is reported as exit status 255.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The command exited with status 0.
    Success,
    /// The command exited with a nonzero code.
    ExitCode(u32),
    /// The command was terminated by a signal.
    Signaled {
        /// Signal name without the `SIG` prefix.
        signal: String,
        /// Whether the process dumped core.
        core_dumped: bool,
    },
    /// The outcome could not be classified (e.g. launch failure).
    Unclassified,
}

impl ExitOutcome {
    /// The channel request name carrying this outcome.
    pub fn request_name(&self) -> &'static str {
        match self {
            Self::Signaled { .. } => EXIT_SIGNAL_REQUEST,
            _ => EXIT_STATUS_REQUEST,
        }
    }

    /// Encode the exit message payload.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Success => ExitStatus { status: 0 }.encode(),
            Self::ExitCode(code) => ExitStatus { status: *code }.encode(),
            Self::Signaled {
                signal,
                core_dumped,
            } => ExitSignal {
                signal: signal.clone(),
                core_dumped: *core_dumped,
                ..ExitSignal::default()
            }
            .encode(),
            Self::Unclassified => ExitStatus {
                status: UNCLASSIFIED_EXIT_CODE,
            }
            .encode(),
        }
    }
}
