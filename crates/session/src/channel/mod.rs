//! Transport seam between the SSH protocol library and sessions.
//!
//! The SSH library owns framing, authentication and flow control. What a
//! session needs from it is captured here: a byte-stream channel with an
//! extended-data stream and out-of-band requests, plus the sequence of
//! typed requests the peer sends on that channel.

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

pub use loopback::{LoopbackChannel, LoopbackNewChannel, LoopbackPeer, OutgoingRequest, PeerEvent};

/// Boxed inbound byte stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed outbound byte stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors reported by the transport.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel has been closed.
    #[error("channel closed")]
    Closed,

    /// The peer went away before answering a request.
    #[error("no reply to {0} request")]
    NoReply(String),

    /// The channel could not be accepted.
    #[error("failed to accept channel: {0}")]
    AcceptFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An established session channel.
#[async_trait]
pub trait SessionChannel: Send + Sync + 'static {
    /// The inbound data stream.
    ///
    /// The stream has a single consumer; readers obtained after the first
    /// one are at end of input.
    fn reader(&self) -> BoxReader;

    /// The outbound data stream.
    fn writer(&self) -> BoxWriter;

    /// The extended data (stderr) stream.
    fn stderr(&self) -> BoxWriter;

    /// Send an out-of-band channel request.
    ///
    /// With `want_reply` set this waits for the peer's answer and returns it;
    /// otherwise it returns `false` once the request is sent.
    async fn send_request(
        &self,
        name: &str,
        want_reply: bool,
        payload: Bytes,
    ) -> Result<bool, ChannelError>;

    /// Signal end of output to the peer.
    async fn close_write(&self) -> Result<(), ChannelError>;

    /// Close the channel in both directions.
    async fn close(&self) -> Result<(), ChannelError>;
}

/// A channel together with its request stream, as returned by [`NewChannel::accept`].
pub struct AcceptedChannel {
    /// The accepted channel.
    pub channel: Arc<dyn SessionChannel>,
    /// Requests sent by the peer. Ends when the channel closes.
    pub requests: mpsc::Receiver<ChannelRequest>,
}

/// A channel open request that has not been accepted yet.
#[async_trait]
pub trait NewChannel: Send {
    /// Accept the channel.
    async fn accept(self: Box<Self>) -> Result<AcceptedChannel, ChannelError>;
}

/// A typed request received on a session channel.
///
/// Replying consumes the request, so each request is answered at most once.
#[derive(Debug)]
pub struct ChannelRequest {
    request_type: String,
    want_reply: bool,
    payload: Bytes,
    reply: Option<oneshot::Sender<bool>>,
}

impl ChannelRequest {
    /// Create a request and the receiver on which its reply arrives.
    pub fn new(
        request_type: impl Into<String>,
        want_reply: bool,
        payload: Bytes,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            request_type: request_type.into(),
            want_reply,
            payload,
            reply: Some(tx),
        };
        (request, rx)
    }

    /// The request type name.
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Whether the peer asked for a reply.
    pub fn want_reply(&self) -> bool {
        self.want_reply
    }

    /// The raw request payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Answer the request. Nothing is sent unless the peer asked for a reply.
    pub fn reply(mut self, ok: bool) {
        if !self.want_reply {
            return;
        }
        if let Some(tx) = self.reply.take() {
            if tx.send(ok).is_err() {
                tracing::debug!(
                    request_type = %self.request_type,
                    "Reply dropped: transport no longer waiting"
                );
            }
        }
    }
}
