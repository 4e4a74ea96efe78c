//! Guarded per-session state.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

use channel_protocol::WindowSize;
use tokio_util::sync::CancellationToken;

use super::SessionError;
use crate::process::CommandSpec;
use crate::pty::Pty;

/// Search path every command starts with.
pub const BASE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Locale every command starts with.
pub const BASE_LANG: &str = "en_US.UTF8";

/// Variables the client cannot set; they always come from the host.
const HOST_ONLY_VARS: [&str; 2] = ["HOME", "USER"];

/// Everything a session mutates after it is created.
///
/// Lives behind the session lock; every access holds it.
pub struct SessionState {
    /// Variables set by the handler defaults and `env` requests.
    pub env: BTreeMap<String, OsString>,
    /// The one command this session runs, once created.
    pub command: Option<CommandSpec>,
    /// Process id of a command started without a PTY.
    pub pid: Option<u32>,
    /// Terminal from a successful `pty-req`.
    pub pty: Option<Box<dyn Pty>>,
    /// Last geometry from `pty-req` or `window-change`.
    pub geometry: WindowSize,
    /// Set once teardown has started.
    pub completed: bool,
    /// Stops the keepalive task, while one runs.
    pub keepalive: Option<CancellationToken>,
}

impl SessionState {
    pub fn new(env: BTreeMap<String, OsString>) -> Self {
        Self {
            env,
            command: None,
            pid: None,
            pty: None,
            geometry: WindowSize::default(),
            completed: false,
            keepalive: None,
        }
    }

    /// Whether `pty-req` succeeded.
    pub fn pty_allocated(&self) -> bool {
        self.pty.is_some()
    }

    /// The environment handed to the command.
    ///
    /// Always in this order: base `PATH` and `LANG`, the session variables
    /// except `HOME` and `USER`, then the host's own `HOME` and `USER`.
    pub fn environment(&self) -> Vec<(String, OsString)> {
        let mut env = vec![
            ("PATH".to_string(), OsString::from(BASE_PATH)),
            ("LANG".to_string(), OsString::from(BASE_LANG)),
        ];

        env.extend(
            self.env
                .iter()
                .filter(|(name, _)| !HOST_ONLY_VARS.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        for name in HOST_ONLY_VARS {
            env.push((name.to_string(), std::env::var_os(name).unwrap_or_default()));
        }

        env
    }

    /// Record the session's command, snapshotting the current environment.
    pub fn create_command(
        &mut self,
        shell: &Path,
        args: Vec<OsString>,
    ) -> Result<CommandSpec, SessionError> {
        if self.completed {
            return Err(SessionError::Closed);
        }
        if self.command.is_some() {
            return Err(SessionError::CommandAlreadyStarted);
        }

        let mut command = CommandSpec::new(shell, args);
        command.env = self.environment();
        self.command = Some(command.clone());
        Ok(command)
    }
}
