//! # Session Channel Protocol
//!
//! Payload definitions for the requests exchanged on an SSH session channel
//! and the exit messages a server sends when the channel's command ends.
//!
//! ## Overview
//!
//! - **Wire primitives**: strict RFC 4251 `uint32`/`boolean`/`string` codec
//! - **Request payloads**: `env`, `signal`, `pty-req`, `window-change`,
//!   `exec`, `subsystem`
//! - **Exit messages**: `exit-status`, `exit-signal`, and the
//!   [`ExitOutcome`] that selects between them
//! - **Signal translation**: SSH signal names to and from OS signals
//!
//! ## Example Usage
//!
//! ```rust
//! use channel_protocol::{ExecRequest, ExitOutcome, WireMessage};
//!
//! let payload = ExecRequest { command: "uptime".into() }.encode();
//! let request = ExecRequest::decode(&payload).unwrap();
//! assert_eq!(request.command, "uptime");
//!
//! let outcome = ExitOutcome::ExitCode(2);
//! assert_eq!(outcome.request_name(), "exit-status");
//! ```
//!
//! ## Modules
//!
//! - [`wire`]: SSH data type encoding
//! - [`messages`]: Request and exit message definitions
//! - [`signals`]: Signal name translation
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod signals;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use messages::{
    EnvRequest, ExecRequest, ExitOutcome, ExitSignal, ExitStatus, PtyRequest, RequestKind,
    SignalRequest, SubsystemRequest, WindowChangeRequest, WindowSize, WireMessage,
    EXIT_SIGNAL_REQUEST, EXIT_STATUS_REQUEST, KEEPALIVE_REQUEST, SFTP_SUBSYSTEM,
    UNCLASSIFIED_EXIT_CODE,
};
pub use wire::{WireReader, WireWriter};
