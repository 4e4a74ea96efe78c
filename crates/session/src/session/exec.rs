//! Command execution: the `exec`/`shell` run paths, stream copiers,
//! keepalive and exit reporting.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStringExt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use channel_protocol::{ExecRequest, ExitOutcome, KEEPALIVE_REQUEST};
use nix::sys::signal::Signal;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionId, SessionState};
use crate::channel::{BoxReader, ChannelRequest, SessionChannel};
use crate::exit;
use crate::process::{CommandSpec, RunError};
use crate::pty::PtyWaiter;
use crate::shell::ONE_SHOT_FLAG;
use crate::transfer::{is_scp_command, TransferError};

/// Buffer size for PTY reads and writes.
const READ_BUFFER_SIZE: usize = 4096;

/// A command that started and has not been waited for yet.
enum Started {
    /// Started by the process runner with piped streams.
    Process {
        child: Child,
        stdout: Option<JoinHandle<()>>,
        stderr: Option<JoinHandle<()>>,
    },
    /// Attached to the session's PTY.
    Pty(Box<dyn PtyWaiter>),
}

impl Session {
    pub(super) async fn handle_exec_request(self: &Arc<Self>, request: ChannelRequest) {
        let Some((exec, request)) = self.decode::<ExecRequest>(request) else {
            return;
        };

        let command = exec.command_lossy();
        if is_scp_command(&command) {
            tracing::info!(session_id = %self.id, command = %command, "Handling scp command");
            self.execute_scp(&command, request).await;
        } else {
            let command = OsString::from_vec(exec.command.to_vec());
            self.execute_shell(request, vec![ONE_SHOT_FLAG.into(), command])
                .await;
        }
    }

    /// Start the session's command and arrange for its exit to be reported.
    ///
    /// The request is answered once the command is recorded; a launch
    /// failure after that is reported through the exit message.
    pub(super) async fn execute_shell(
        self: &Arc<Self>,
        request: ChannelRequest,
        args: Vec<OsString>,
    ) {
        let mut state = self.state.lock().await;

        let command = match state.create_command(&self.shell_path, args) {
            Ok(command) => command,
            Err(e) => {
                drop(state);
                tracing::warn!(session_id = %self.id, error = %e, "Failed to create command");
                request.reply(false);
                return;
            }
        };

        request.reply(true);

        let started = if state.pty_allocated() {
            self.run_with_pty(&mut state, &command).map(Started::Pty)
        } else {
            self.run(&mut state, &command)
        };
        drop(state);

        match started {
            Ok(started) => {
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    let result = session.wait(started).await;
                    session.send_exit_message(&result).await;
                    session.destroy().await;
                });
            }
            Err(e) => {
                self.send_exit_message(&Err(e)).await;
                self.destroy().await;
            }
        }
    }

    /// Start the command with its streams piped to the channel.
    fn run(&self, state: &mut SessionState, command: &CommandSpec) -> Result<Started, RunError> {
        let mut process = self.runner.start(command)?;
        state.pid = process.pid;

        tracing::info!(
            session_id = %self.id,
            pid = ?process.pid,
            "Started command"
        );

        if let Some(stdin) = process.stdin.take() {
            tokio::spawn(copy_to_stdin(self.id, self.channel.reader(), stdin));
        }

        let stdout = process.stdout.take().map(|mut stdout| {
            let mut writer = self.channel.writer();
            let id = self.id;
            tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut stdout, &mut writer).await {
                    tracing::debug!(session_id = %id, error = %e, "stdout copy ended");
                }
            })
        });

        let stderr = process.stderr.take().map(|mut stderr| {
            let mut writer = self.channel.stderr();
            let id = self.id;
            tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut stderr, &mut writer).await {
                    tracing::debug!(session_id = %id, error = %e, "stderr copy ended");
                }
            })
        });

        Ok(Started::Process {
            child: process.child,
            stdout,
            stderr,
        })
    }

    /// Open the PTY and launch the command on it.
    ///
    /// Copiers and keepalive only start once the command is running.
    fn run_with_pty(
        self: &Arc<Self>,
        state: &mut SessionState,
        command: &CommandSpec,
    ) -> Result<Box<dyn PtyWaiter>, RunError> {
        let pty = state.pty.as_mut().ok_or(crate::pty::PtyError::NotOpen)?;

        pty.open()?;
        if let Err(e) = pty.set_size(state.geometry) {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to set PTY size");
        }

        let output = pty.take_reader()?;
        let input = pty.take_writer()?;
        let waiter = pty.run(command)?;

        tracing::info!(
            session_id = %self.id,
            cols = state.geometry.columns,
            rows = state.geometry.rows,
            "Started command on PTY"
        );

        tokio::spawn(copy_to_pty(self.id, self.channel.reader(), input));
        self.copiers
            .spawn(copy_from_pty(self.id, output, Arc::clone(&self.channel)));

        if let Some(interval) = self.keepalive_interval {
            let cancel = CancellationToken::new();
            state.keepalive = Some(cancel.clone());
            tokio::spawn(Arc::clone(self).keepalive(interval, cancel));
        }

        Ok(waiter)
    }

    /// Wait for a started command to exit.
    async fn wait(&self, started: Started) -> Result<(), RunError> {
        tracing::debug!(session_id = %self.id, "Waiting for command");

        match started {
            Started::Process {
                child,
                stdout,
                stderr,
            } => {
                let result = self.runner.wait(child).await;
                // Reaped; the pid may be reused from here on.
                self.state.lock().await.pid = None;
                // Everything the command wrote goes out before its exit status.
                for copier in [stdout, stderr].into_iter().flatten() {
                    let _ = copier.await;
                }
                result
            }
            Started::Pty(waiter) => tokio::task::spawn_blocking(move || waiter.wait())
                .await
                .map_err(|e| RunError::Wait(std::io::Error::other(e)))?,
        }
    }

    /// Probe the peer until cancelled; interrupt the PTY command when the
    /// peer stops answering.
    async fn keepalive(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = self.channel.send_request(KEEPALIVE_REQUEST, true, Bytes::new()) => result,
            };

            tracing::debug!(session_id = %self.id, success = result.is_ok(), "Keepalive");

            if let Err(e) = result {
                tracing::info!(
                    session_id = %self.id,
                    error = %e,
                    "Keepalive failed, interrupting command"
                );
                let mut state = self.state.lock().await;
                if let Some(pty) = state.pty.as_mut() {
                    if let Err(e) = pty.signal(Signal::SIGINT) {
                        tracing::warn!(session_id = %self.id, error = %e, "Failed to interrupt PTY command");
                    }
                }
                return;
            }
        }
    }

    /// Report how the command ended.
    pub(super) async fn send_exit_message(&self, result: &Result<(), RunError>) {
        if let Err(e) = result {
            tracing::info!(session_id = %self.id, error = %e, "Command failed");
        }
        self.send_outcome(exit::classify(result)).await;
    }

    async fn send_outcome(&self, outcome: ExitOutcome) {
        tracing::debug!(session_id = %self.id, outcome = ?outcome, "Sending exit message");

        if let Err(e) = self
            .channel
            .send_request(outcome.request_name(), false, outcome.encode())
            .await
        {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to send exit message");
        }
    }

    /// Hand the channel to an scp engine and report 0 or 1 when it is done.
    async fn execute_scp(&self, command: &str, request: ChannelRequest) {
        request.reply(true);

        let result = match &self.scp {
            Some(factory) => {
                match factory.from_command(
                    command,
                    self.channel.reader(),
                    self.channel.writer(),
                    self.channel.stderr(),
                ) {
                    Ok(engine) => engine.copy().await,
                    Err(e) => Err(e),
                }
            }
            None => Err(TransferError::Unavailable("scp")),
        };

        let outcome = match result {
            Ok(()) => ExitOutcome::Success,
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "scp failed");
                ExitOutcome::ExitCode(1)
            }
        };

        self.send_outcome(outcome).await;
        self.destroy().await;
    }
}

/// Copy channel input to a piped stdin, closing it at end of input.
async fn copy_to_stdin(id: SessionId, mut input: BoxReader, mut stdin: ChildStdin) {
    if let Err(e) = tokio::io::copy(&mut input, &mut stdin).await {
        tracing::debug!(session_id = %id, error = %e, "stdin copy ended");
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::trace!(session_id = %id, error = %e, "stdin already closed");
    }
}

/// Copy channel input to the PTY.
async fn copy_to_pty(id: SessionId, mut input: BoxReader, writer: Box<dyn Write + Send>) {
    let mut writer = Some(writer);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match input.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(session_id = %id, error = %e, "Channel input ended");
                break;
            }
        };

        let Some(mut pty_input) = writer.take() else {
            break;
        };
        let chunk = buffer[..n].to_vec();

        let result = tokio::task::spawn_blocking(move || {
            let written = pty_input.write_all(&chunk).and_then(|()| pty_input.flush());
            (pty_input, written)
        })
        .await;

        match result {
            Ok((pty_input, Ok(()))) => writer = Some(pty_input),
            Ok((_, Err(e))) => {
                tracing::debug!(session_id = %id, error = %e, "PTY input closed");
                break;
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "PTY input task failed");
                break;
            }
        }
    }
}

/// Copy PTY output to the channel, then send EOF.
async fn copy_from_pty(
    id: SessionId,
    reader: Box<dyn Read + Send>,
    channel: Arc<dyn SessionChannel>,
) {
    let mut writer = channel.writer();
    let mut reader = Some(reader);

    while let Some(mut pty_output) = reader.take() {
        // Use spawn_blocking to read from the PTY
        let result = tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            let read = pty_output.read(&mut buffer);
            (pty_output, buffer, read)
        })
        .await;

        match result {
            Ok((pty_output, mut buffer, Ok(n))) if n > 0 => {
                buffer.truncate(n);
                if let Err(e) = writer.write_all(&buffer).await {
                    tracing::debug!(session_id = %id, error = %e, "Channel output closed");
                    break;
                }
                reader = Some(pty_output);
            }
            Ok((_, _, Ok(_))) => {
                tracing::debug!(session_id = %id, "PTY EOF");
            }
            Ok((_, _, Err(e))) => {
                // The master reports EIO once the command exits.
                tracing::debug!(session_id = %id, error = %e, "PTY output ended");
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "PTY output task failed");
            }
        }
    }

    if let Err(e) = channel.close_write().await {
        tracing::debug!(session_id = %id, error = %e, "Failed to send EOF");
    }
}
