//! Host pseudo-terminals via `portable-pty`.

use std::io::{Read, Write};
use std::path::PathBuf;

use channel_protocol::WindowSize;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};

use super::{Pty, PtyError, PtyProvider, PtyWaiter};
use crate::process::{CommandSpec, RunError};

/// Provider of host terminals.
///
/// When a provider location is configured it must be an existing directory;
/// allocation fails otherwise.
#[derive(Debug, Clone, Default)]
pub struct NativePtyProvider {
    location: Option<PathBuf>,
}

impl NativePtyProvider {
    /// Creates a provider, optionally bound to a backend location.
    pub fn new(location: Option<PathBuf>) -> Self {
        Self { location }
    }
}

impl PtyProvider for NativePtyProvider {
    fn allocate(&self) -> Result<Box<dyn Pty>, PtyError> {
        if let Some(dir) = &self.location {
            if !dir.is_dir() {
                return Err(PtyError::ProviderUnavailable(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(Box::new(NativePty::new()))
    }
}

/// A host terminal.
pub struct NativePty {
    size: PtySize,
    master: Option<Box<dyn MasterPty + Send>>,
    slave: Option<Box<dyn SlavePty + Send>>,
    pid: Option<u32>,
}

impl NativePty {
    /// Creates an unopened terminal with an 80x24 geometry.
    pub fn new() -> Self {
        Self {
            size: to_pty_size(WindowSize::new(80, 24)),
            master: None,
            slave: None,
            pid: None,
        }
    }

    fn master(&self) -> Result<&(dyn MasterPty + Send), PtyError> {
        self.master.as_deref().ok_or(PtyError::NotOpen)
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

impl Pty for NativePty {
    fn open(&mut self) -> Result<(), PtyError> {
        if self.master.is_some() {
            return Ok(());
        }

        let pair = native_pty_system()
            .openpty(self.size)
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;
        self.master = Some(pair.master);
        self.slave = Some(pair.slave);
        Ok(())
    }

    fn set_size(&mut self, size: WindowSize) -> Result<(), PtyError> {
        self.size = to_pty_size(size);
        if let Some(master) = &self.master {
            master
                .resize(self.size)
                .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;
        }
        tracing::debug!(cols = self.size.cols, rows = self.size.rows, "Resized PTY");
        Ok(())
    }

    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master()?
            .try_clone_reader()
            .map_err(|e| PtyError::StreamUnavailable {
                stream: "output",
                reason: e.to_string(),
            })
    }

    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master()?
            .take_writer()
            .map_err(|e| PtyError::StreamUnavailable {
                stream: "input",
                reason: e.to_string(),
            })
    }

    fn run(&mut self, command: &CommandSpec) -> Result<Box<dyn PtyWaiter>, PtyError> {
        // The slave end is dropped once the child owns it so the master sees
        // end of output when the child exits.
        let slave = self.slave.take().ok_or(PtyError::NotOpen)?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        cmd.env_clear();
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        self.pid = child.process_id();

        tracing::debug!(
            program = %command.program.display(),
            pid = ?self.pid,
            "Spawned PTY command"
        );

        Ok(Box::new(NativePtyWaiter { child }))
    }

    fn signal(&mut self, signal: Signal) -> Result<(), PtyError> {
        let pid = self.pid.ok_or(PtyError::NoProcess)?;
        let pid = i32::try_from(pid).map_err(|e| PtyError::SignalFailed(e.to_string()))?;
        kill(Pid::from_raw(pid), signal).map_err(|e| PtyError::SignalFailed(e.to_string()))
    }

    fn close(&mut self) {
        self.slave = None;
        self.master = None;
        self.pid = None;
    }
}

struct NativePtyWaiter {
    child: Box<dyn Child + Send + Sync>,
}

impl PtyWaiter for NativePtyWaiter {
    fn wait(mut self: Box<Self>) -> Result<(), RunError> {
        // portable-pty folds death by signal into exit code 1, so reap the
        // process directly when its pid is known.
        if let Some(pid) = self.child.process_id().and_then(|pid| i32::try_from(pid).ok()) {
            return reap(Pid::from_raw(pid));
        }

        let status = self
            .child
            .wait()
            .map_err(|e| PtyError::WaitFailed(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(RunError::PtyExit {
                code: status.exit_code(),
            })
        }
    }
}

/// Block until `pid` exits and translate its wait status.
fn reap(pid: Pid) -> Result<(), RunError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, 0)) => return Ok(()),
            Ok(WaitStatus::Exited(_, code)) => {
                return Err(RunError::PtyExit { code: code as u32 })
            }
            Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                return Err(RunError::PtySignaled {
                    signal,
                    core_dumped,
                })
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(PtyError::WaitFailed(e.to_string()).into()),
        }
    }
}

/// Clamp SSH geometry to the terminal's 16-bit fields.
fn to_pty_size(size: WindowSize) -> PtySize {
    let clamp = |value: u32| u16::try_from(value).unwrap_or(u16::MAX);
    PtySize {
        rows: clamp(size.rows),
        cols: clamp(size.columns),
        pixel_width: clamp(size.width_px),
        pixel_height: clamp(size.height_px),
    }
}
