//! Per-channel session state machine.
//!
//! A [`Session`] consumes the requests of one accepted channel in order and
//! turns them into environment changes, PTY operations, signals and a single
//! command run. The command's termination is reported back as one
//! `exit-status` or `exit-signal` message, after which the session tears
//! itself down exactly once.

mod exec;
mod handler;
mod state;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use channel_protocol::{
    signals, EnvRequest, PtyRequest, RequestKind, SignalRequest, SubsystemRequest,
    WindowChangeRequest, WindowSize, WireMessage, SFTP_SUBSYSTEM,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::channel::{ChannelRequest, SessionChannel};
use crate::process::{RunError, Runner};
use crate::pty::PtyProvider;
use crate::shell::ShellLocator;
use crate::transfer::{ScpEngineFactory, SftpServerFactory};

pub use handler::SessionChannelHandler;
pub use state::{SessionState, BASE_LANG, BASE_PATH};

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Errors from session state transitions.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session already has a command.
    #[error("command already started")]
    CommandAlreadyStarted,

    /// The session has been torn down.
    #[error("session is closed")]
    Closed,
}

/// Collaborators and defaults shared by every session a handler creates.
#[derive(Clone)]
pub struct SessionSettings {
    /// Starts, waits for and signals commands run without a PTY.
    pub runner: Arc<dyn Runner>,
    /// Finds the shell for `exec` and `shell`.
    pub shell_locator: Arc<dyn ShellLocator>,
    /// Environment every session starts with.
    pub default_env: BTreeMap<String, String>,
    /// Keepalive interval while a PTY command runs; `None` disables it.
    pub keepalive_interval: Option<Duration>,
    /// Allocates terminals for `pty-req`.
    pub pty_provider: Arc<dyn PtyProvider>,
    /// Runs `scp` commands.
    pub scp: Option<Arc<dyn ScpEngineFactory>>,
    /// Serves the `sftp` subsystem.
    pub sftp: Option<Arc<dyn SftpServerFactory>>,
}

/// State machine for one session channel.
pub struct Session {
    id: SessionId,
    channel: Arc<dyn SessionChannel>,
    runner: Arc<dyn Runner>,
    shell_path: PathBuf,
    keepalive_interval: Option<Duration>,
    pty_provider: Arc<dyn PtyProvider>,
    scp: Option<Arc<dyn ScpEngineFactory>>,
    sftp: Option<Arc<dyn SftpServerFactory>>,
    state: Mutex<SessionState>,
    /// Output copiers that must drain before the channel closes.
    copiers: TaskTracker,
}

impl Session {
    /// Creates a session for an accepted channel.
    ///
    /// The default environment is copied, so sessions never share it.
    pub fn new(channel: Arc<dyn SessionChannel>, settings: &SessionSettings) -> Arc<Self> {
        let id = Uuid::new_v4();
        let shell_path = settings.shell_locator.shell_path();

        tracing::debug!(
            session_id = %id,
            shell = %shell_path.display(),
            "Created session"
        );

        Arc::new(Self {
            id,
            channel,
            runner: Arc::clone(&settings.runner),
            shell_path,
            keepalive_interval: settings.keepalive_interval.filter(|d| !d.is_zero()),
            pty_provider: Arc::clone(&settings.pty_provider),
            scp: settings.scp.clone(),
            sftp: settings.sftp.clone(),
            state: Mutex::new(SessionState::new(
                settings
                    .default_env
                    .iter()
                    .map(|(name, value)| (name.clone(), OsString::from(value)))
                    .collect(),
            )),
            copiers: TaskTracker::new(),
        })
    }

    /// The session's identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Last known terminal geometry.
    pub async fn window_size(&self) -> WindowSize {
        self.state.lock().await.geometry
    }

    /// Whether a `pty-req` has succeeded.
    pub async fn pty_allocated(&self) -> bool {
        self.state.lock().await.pty_allocated()
    }

    /// The environment a command would be started with now.
    pub async fn environment(&self) -> Vec<(String, OsString)> {
        self.state.lock().await.environment()
    }

    /// Whether teardown has started.
    pub async fn is_completed(&self) -> bool {
        self.state.lock().await.completed
    }

    /// Handle requests until the request stream ends, then tear down.
    pub async fn service_requests(self: Arc<Self>, mut requests: mpsc::Receiver<ChannelRequest>) {
        tracing::info!(session_id = %self.id, "Session started");

        while let Some(request) = requests.recv().await {
            tracing::debug!(
                session_id = %self.id,
                request_type = %request.request_type(),
                "Received request"
            );

            match RequestKind::from_name(request.request_type()) {
                Some(RequestKind::Env) => self.handle_env_request(request).await,
                Some(RequestKind::Signal) => self.handle_signal_request(request).await,
                Some(RequestKind::PtyReq) => self.handle_pty_request(request).await,
                Some(RequestKind::WindowChange) => self.handle_window_change_request(request).await,
                Some(RequestKind::Exec) => self.handle_exec_request(request).await,
                Some(RequestKind::Shell) => self.execute_shell(request, Vec::new()).await,
                Some(RequestKind::Subsystem) => self.handle_subsystem_request(request).await,
                None => request.reply(false),
            }
        }

        self.destroy().await;
        tracing::info!(session_id = %self.id, "Session finished");
    }

    /// Decode a request payload, refusing the request when it is malformed.
    fn decode<T: WireMessage>(&self, request: ChannelRequest) -> Option<(T, ChannelRequest)> {
        match T::decode(request.payload()) {
            Ok(message) => Some((message, request)),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    request_type = %request.request_type(),
                    error = %e,
                    "Malformed request payload"
                );
                request.reply(false);
                None
            }
        }
    }

    async fn handle_env_request(&self, request: ChannelRequest) {
        let Some((env, request)) = self.decode::<EnvRequest>(request) else {
            return;
        };

        let value = OsString::from_vec(env.value.to_vec());
        self.state.lock().await.env.insert(env.name, value);
        request.reply(true);
    }

    async fn handle_signal_request(&self, request: ChannelRequest) {
        let Some((message, request)) = self.decode::<SignalRequest>(request) else {
            return;
        };

        let mut state = self.state.lock().await;
        if state.command.is_some() {
            match signals::from_ssh_name(&message.signal) {
                Some(signal) => {
                    let state = &mut *state;
                    let result = match (state.pty.as_mut(), state.pid) {
                        (Some(pty), _) => pty.signal(signal).map_err(RunError::from),
                        (None, Some(pid)) => self.runner.signal(pid, signal),
                        (None, None) => Err(RunError::NotStarted),
                    };
                    match result {
                        Ok(()) => tracing::debug!(
                            session_id = %self.id,
                            signal = %message.signal,
                            "Delivered signal"
                        ),
                        Err(e) => tracing::warn!(
                            session_id = %self.id,
                            signal = %message.signal,
                            error = %e,
                            "Failed to signal process"
                        ),
                    }
                }
                None => tracing::warn!(
                    session_id = %self.id,
                    signal = %message.signal,
                    "Unknown signal name"
                ),
            }
        }
        drop(state);

        request.reply(true);
    }

    async fn handle_pty_request(&self, request: ChannelRequest) {
        let Some((pty_request, request)) = self.decode::<PtyRequest>(request) else {
            return;
        };

        let mut state = self.state.lock().await;
        if state.completed || state.command.is_some() {
            drop(state);
            tracing::warn!(session_id = %self.id, "PTY requested after command start");
            request.reply(false);
            return;
        }

        match self.pty_provider.allocate() {
            Ok(pty) => {
                if let Some(mut previous) = state.pty.replace(pty) {
                    previous.close();
                }
                state.geometry = pty_request.size;
                state
                    .env
                    .insert("TERM".to_string(), OsString::from(pty_request.term));
                drop(state);

                tracing::info!(
                    session_id = %self.id,
                    cols = pty_request.size.columns,
                    rows = pty_request.size.rows,
                    "Allocated PTY"
                );
                request.reply(true);
            }
            Err(e) => {
                drop(state);
                tracing::error!(session_id = %self.id, error = %e, "Failed to allocate PTY");
                request.reply(false);
            }
        }
    }

    async fn handle_window_change_request(&self, request: ChannelRequest) {
        let Some((change, request)) = self.decode::<WindowChangeRequest>(request) else {
            return;
        };

        let mut state = self.state.lock().await;
        state.geometry = change.size;
        if let Some(pty) = state.pty.as_mut() {
            if let Err(e) = pty.set_size(change.size) {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to resize PTY");
            }
        }
        drop(state);

        request.reply(true);
    }

    async fn handle_subsystem_request(self: &Arc<Self>, request: ChannelRequest) {
        let Some((subsystem, request)) = self.decode::<SubsystemRequest>(request) else {
            return;
        };

        if subsystem.name != SFTP_SUBSYSTEM {
            tracing::info!(
                session_id = %self.id,
                subsystem = %subsystem.name,
                "Unsupported subsystem"
            );
            request.reply(false);
            return;
        }

        let server = match &self.sftp {
            Some(factory) => factory.new_server(Arc::clone(&self.channel)),
            None => Err(crate::transfer::TransferError::Unavailable("sftp")),
        };
        let server = match server {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "Failed to create SFTP server");
                request.reply(false);
                return;
            }
        };

        request.reply(true);

        tracing::info!(session_id = %self.id, "Starting SFTP server");
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::error!(session_id = %session.id, error = %e, "SFTP server failed");
            }
            session.destroy().await;
        });
    }

    /// Tear the session down. Only the first call does anything.
    ///
    /// Output copiers are drained before the channel is closed; the PTY is
    /// closed and the keepalive task stopped afterwards.
    pub async fn destroy(&self) {
        {
            let mut state = self.state.lock().await;
            if state.completed {
                return;
            }
            state.completed = true;
        }

        tracing::debug!(session_id = %self.id, "Destroying session");

        self.copiers.close();
        self.copiers.wait().await;

        if let Err(e) = self.channel.close().await {
            tracing::debug!(session_id = %self.id, error = %e, "Channel already closed");
        }

        let mut state = self.state.lock().await;
        if let Some(mut pty) = state.pty.take() {
            pty.close();
        }
        if let Some(keepalive) = state.keepalive.take() {
            keepalive.cancel();
        }
        drop(state);

        tracing::info!(session_id = %self.id, "Session destroyed");
    }
}
