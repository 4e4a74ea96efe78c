//! Shared fakes and helpers for session integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use session_channel::channel::{
    BoxReader, BoxWriter, LoopbackChannel, LoopbackPeer, PeerEvent,
};
use session_channel::protocol::{
    ExitSignal, ExitStatus, WindowSize, WireMessage, EXIT_SIGNAL_REQUEST, EXIT_STATUS_REQUEST,
};
use session_channel::{
    CommandSpec, ConfiguredShell, ProcessRunner, Pty, PtyError, PtyProvider, PtyWaiter, RunError,
    Runner, ScpEngine, ScpEngineFactory, SessionChannel, SessionChannelHandler, SftpServer,
    SftpServerFactory, TransferError,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::task::JoinHandle;

/// What the session did to a fake terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyCall {
    Open,
    SetSize(WindowSize),
    Run(CommandSpec),
    Signal(Signal),
    Close,
}

#[derive(Default)]
struct Shared {
    /// (terminal index, call) in the order they happened.
    calls: Vec<(usize, PtyCall)>,
    allocations: usize,
    input: Vec<u8>,
    exit: Option<std_mpsc::Sender<FakeExit>>,
    pending_exit: Option<u32>,
}

/// PTY provider recording every call made to the terminals it hands out.
///
/// Commands "run" until [`FakePtyProvider::finish`] is called or the
/// terminal is signalled; a signal terminates the command.
#[derive(Clone, Default)]
pub struct FakePtyProvider {
    shared: Arc<Mutex<Shared>>,
    output: Vec<u8>,
    exit_immediately: Option<u32>,
    fail: bool,
}

impl FakePtyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal output produced by every command.
    pub fn with_output(mut self, output: &[u8]) -> Self {
        self.output = output.to_vec();
        self
    }

    /// Commands exit with `code` as soon as they run.
    pub fn exiting_with(mut self, code: u32) -> Self {
        self.exit_immediately = Some(code);
        self
    }

    /// Every allocation fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<PtyCall> {
        self.shared
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn calls_for(&self, index: usize) -> Vec<PtyCall> {
        self.shared
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn allocations(&self) -> usize {
        self.shared.lock().unwrap().allocations
    }

    pub fn input(&self) -> Vec<u8> {
        self.shared.lock().unwrap().input.clone()
    }

    /// End the running command with `code`, or the next one to run.
    pub fn finish(&self, code: u32) {
        let mut shared = self.shared.lock().unwrap();
        match shared.exit.take() {
            Some(exit) => {
                let _ = exit.send(FakeExit::Code(code));
            }
            None => shared.pending_exit = Some(code),
        }
    }

    pub fn count(&self, call: &PtyCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

impl PtyProvider for FakePtyProvider {
    fn allocate(&self) -> Result<Box<dyn Pty>, PtyError> {
        if self.fail {
            return Err(PtyError::ProviderUnavailable("fake failure".to_string()));
        }
        let mut shared = self.shared.lock().unwrap();
        let index = shared.allocations;
        shared.allocations += 1;
        Ok(Box::new(FakePty {
            index,
            shared: Arc::clone(&self.shared),
            output: self.output.clone(),
            exit_immediately: self.exit_immediately,
            running: false,
        }))
    }
}

struct FakePty {
    index: usize,
    shared: Arc<Mutex<Shared>>,
    output: Vec<u8>,
    exit_immediately: Option<u32>,
    running: bool,
}

impl FakePty {
    fn record(&self, call: PtyCall) {
        self.shared.lock().unwrap().calls.push((self.index, call));
    }
}

impl Pty for FakePty {
    fn open(&mut self) -> Result<(), PtyError> {
        self.record(PtyCall::Open);
        Ok(())
    }

    fn set_size(&mut self, size: WindowSize) -> Result<(), PtyError> {
        self.record(PtyCall::SetSize(size));
        Ok(())
    }

    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError> {
        Ok(Box::new(Cursor::new(self.output.clone())))
    }

    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        Ok(Box::new(InputRecorder {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn run(&mut self, command: &CommandSpec) -> Result<Box<dyn PtyWaiter>, PtyError> {
        self.record(PtyCall::Run(command.clone()));
        let (tx, rx) = std_mpsc::channel();
        let mut shared = self.shared.lock().unwrap();
        match self.exit_immediately.or(shared.pending_exit.take()) {
            Some(code) => {
                let _ = tx.send(FakeExit::Code(code));
            }
            None => shared.exit = Some(tx),
        }
        drop(shared);
        self.running = true;
        Ok(Box::new(FakeWaiter { exit: rx }))
    }

    fn signal(&mut self, signal: Signal) -> Result<(), PtyError> {
        self.record(PtyCall::Signal(signal));
        if !self.running {
            return Err(PtyError::NoProcess);
        }
        if let Some(exit) = self.shared.lock().unwrap().exit.take() {
            let _ = exit.send(FakeExit::Signal(signal));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.record(PtyCall::Close);
        self.shared.lock().unwrap().exit = None;
    }
}

/// How a fake terminal's command ends.
enum FakeExit {
    Code(u32),
    Signal(Signal),
}

struct FakeWaiter {
    exit: std_mpsc::Receiver<FakeExit>,
}

impl PtyWaiter for FakeWaiter {
    fn wait(self: Box<Self>) -> Result<(), RunError> {
        match self.exit.recv() {
            Ok(FakeExit::Code(0)) => Ok(()),
            Ok(FakeExit::Code(code)) => Err(RunError::PtyExit { code }),
            Ok(FakeExit::Signal(signal)) => Err(RunError::PtySignaled {
                signal,
                core_dumped: false,
            }),
            Err(_) => Err(PtyError::WaitFailed("terminal closed".to_string()).into()),
        }
    }
}

struct InputRecorder {
    shared: Arc<Mutex<Shared>>,
}

impl Write for InputRecorder {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.shared.lock().unwrap().input.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Process runner that records what it was asked to do.
#[derive(Default)]
pub struct RecordingRunner {
    inner: ProcessRunner,
    pub started: Mutex<Vec<CommandSpec>>,
    pub signals: Mutex<Vec<Signal>>,
    pub reaped: AtomicBool,
}

impl RecordingRunner {
    /// Whether a started process has been waited for.
    pub fn has_reaped(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for RecordingRunner {
    fn start(&self, command: &CommandSpec) -> Result<session_channel::process::Process, RunError> {
        self.started.lock().unwrap().push(command.clone());
        self.inner.start(command)
    }

    async fn wait(&self, child: Child) -> Result<(), RunError> {
        let result = self.inner.wait(child).await;
        self.reaped.store(true, Ordering::SeqCst);
        result
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), RunError> {
        self.signals.lock().unwrap().push(signal);
        self.inner.signal(pid, signal)
    }
}

/// scp engine factory whose engines write a marker and then succeed or fail.
#[derive(Default)]
pub struct FakeScp {
    pub commands: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl ScpEngine for FakeScpEngine {
    async fn copy(self: Box<Self>) -> Result<(), TransferError> {
        let mut engine = *self;
        engine.output.write_all(b"scp-data").await?;
        if engine.fail {
            engine.stderr.write_all(b"scp: failed").await?;
            return Err(TransferError::Failed("fake failure".to_string()));
        }
        Ok(())
    }
}

pub struct FakeScpEngine {
    output: BoxWriter,
    stderr: BoxWriter,
    fail: bool,
}

impl ScpEngineFactory for FakeScp {
    fn from_command(
        &self,
        command: &str,
        _input: BoxReader,
        output: BoxWriter,
        stderr: BoxWriter,
    ) -> Result<Box<dyn ScpEngine>, TransferError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(Box::new(FakeScpEngine {
            output,
            stderr,
            fail: self.fail,
        }))
    }
}

/// sftp server factory whose servers write a marker and return.
#[derive(Default)]
pub struct FakeSftp {
    pub fail_to_start: bool,
}

pub struct FakeSftpServer {
    channel: Arc<dyn SessionChannel>,
}

impl SftpServerFactory for FakeSftp {
    fn new_server(
        &self,
        channel: Arc<dyn SessionChannel>,
    ) -> Result<Box<dyn SftpServer>, TransferError> {
        if self.fail_to_start {
            return Err(TransferError::Failed("fake failure".to_string()));
        }
        Ok(Box::new(FakeSftpServer { channel }))
    }
}

#[async_trait]
impl SftpServer for FakeSftpServer {
    async fn serve(self: Box<Self>) -> Result<(), TransferError> {
        self.channel.writer().write_all(b"sftp-data").await?;
        Ok(())
    }
}

/// Handler running `/bin/sh` through `runner`, with no keepalive.
pub fn handler_with(runner: Arc<dyn Runner>, provider: FakePtyProvider) -> SessionChannelHandler {
    SessionChannelHandler::new(
        runner,
        Arc::new(ConfiguredShell::new(Some("/bin/sh".to_string()))),
        BTreeMap::new(),
        None,
    )
    .with_pty_provider(Arc::new(provider))
}

pub fn handler(provider: FakePtyProvider) -> SessionChannelHandler {
    handler_with(Arc::new(ProcessRunner::new()), provider)
}

/// Serve a fresh loopback channel with `handler` on a background task.
pub fn start(handler: SessionChannelHandler) -> (LoopbackPeer, JoinHandle<()>) {
    let (new_channel, peer) = LoopbackChannel::pair();
    let task = tokio::spawn(async move {
        handler.handle_new_channel(Box::new(new_channel)).await;
    });
    (peer, task)
}

/// Send a request and wait for its reply.
pub async fn request(peer: &LoopbackPeer, request_type: &str, payload: bytes::Bytes) -> bool {
    let reply = peer.request(request_type, true, payload).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .expect("reply timed out")
        .unwrap_or(false)
}

/// Collect events until the session closes the channel.
pub async fn finish(peer: &mut LoopbackPeer) -> Vec<PeerEvent> {
    tokio::time::timeout(Duration::from_secs(10), peer.collect_until_close())
        .await
        .expect("session did not close the channel")
}

pub fn stdout(events: &[PeerEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            PeerEvent::Data(data) => Some(data.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

pub fn stderr(events: &[PeerEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            PeerEvent::ExtendedData(data) => Some(data.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

/// Every exit message sent, in order.
pub fn exit_messages(events: &[PeerEvent]) -> Vec<(usize, &str)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(i, event)| match event {
            PeerEvent::Request(request)
                if request.name == EXIT_STATUS_REQUEST || request.name == EXIT_SIGNAL_REQUEST =>
            {
                Some((i, request.name.as_str()))
            }
            _ => None,
        })
        .collect()
}

pub fn exit_status(events: &[PeerEvent]) -> Option<u32> {
    events.iter().find_map(|event| match event {
        PeerEvent::Request(request) if request.name == EXIT_STATUS_REQUEST => {
            Some(ExitStatus::decode(&request.payload).unwrap().status)
        }
        _ => None,
    })
}

pub fn exit_signal(events: &[PeerEvent]) -> Option<ExitSignal> {
    events.iter().find_map(|event| match event {
        PeerEvent::Request(request) if request.name == EXIT_SIGNAL_REQUEST => {
            Some(ExitSignal::decode(&request.payload).unwrap())
        }
        _ => None,
    })
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
