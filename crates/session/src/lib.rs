//! # Session Channel
//!
//! The session-channel layer of an SSH server: it interprets the requests
//! sent on an accepted `session` channel and maps them onto processes and
//! pseudo-terminals, then reports how the command ended.
//!
//! ## Overview
//!
//! - **Request handling**: `env`, `signal`, `pty-req`, `window-change`,
//!   `exec`, `shell` and `subsystem` requests, one at a time per channel
//! - **Command execution**: one command per session, with piped streams or
//!   attached to a PTY, its output copied to the channel
//! - **Exit reporting**: exactly one `exit-status` or `exit-signal` message
//! - **Liveness**: keepalive probes while a PTY command runs
//! - **Transfers**: `scp` over `exec` and the `sftp` subsystem, delegated
//!   to pluggable engines
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 SessionChannelHandler                    │
//! │   accept channel ─▶ Session::service_requests            │
//! ├──────────────────────────────────────────────────────────┤
//! │  Session (one lock around SessionState)                  │
//! │   ├─ request handlers                                    │
//! │   ├─ stream copiers / wait task / keepalive              │
//! │   └─ destroy (runs once)                                 │
//! ├──────────────┬──────────────┬─────────────┬──────────────┤
//! │   Runner     │ PtyProvider  │ ScpEngine   │ SftpServer   │
//! └──────────────┴──────────────┴─────────────┴──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_channel::channel::LoopbackChannel;
//! use session_channel::{Config, SessionChannelHandler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     session_channel::logging::init_tracing(&config);
//!
//!     let handler = SessionChannelHandler::from_config(&config);
//!
//!     // An SSH library would hand over its own channel here.
//!     let (new_channel, _peer) = LoopbackChannel::pair();
//!     handler.handle_new_channel(Box::new(new_channel)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: Transport seam and the in-process loopback channel
//! - [`session`]: Session state machine and channel handler
//! - [`process`]: Commands run without a PTY
//! - [`pty`]: PTY capability and the host implementation
//! - [`exit`]: Exit message classification
//! - [`shell`]: Shell resolution
//! - [`transfer`]: scp and sftp engine interfaces
//! - [`config`]: Configuration loading and defaults
//! - [`logging`]: Tracing subscriber setup

pub mod channel;
pub mod config;
pub mod exit;
pub mod logging;
pub mod process;
pub mod pty;
pub mod session;
pub mod shell;
pub mod transfer;

// Re-export protocol for convenience
pub use channel_protocol as protocol;

pub use channel::{AcceptedChannel, ChannelError, ChannelRequest, NewChannel, SessionChannel};
pub use config::Config;
pub use process::{CommandSpec, ProcessRunner, RunError, Runner};
pub use pty::{NativePtyProvider, Pty, PtyError, PtyProvider, PtyWaiter};
pub use session::{Session, SessionChannelHandler, SessionError, SessionId, SessionSettings};
pub use shell::{ConfiguredShell, ShellLocator};
pub use transfer::{ScpEngine, ScpEngineFactory, SftpServer, SftpServerFactory, TransferError};
