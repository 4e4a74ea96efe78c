//! In-process session channel.
//!
//! A [`LoopbackChannel`] behaves like a channel accepted from an SSH
//! transport, but its far end is a [`LoopbackPeer`] living in the same
//! process. Everything the session sends (data, extended data, requests,
//! EOF, close) arrives at the peer as ordered [`PeerEvent`]s.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    AcceptedChannel, BoxReader, BoxWriter, ChannelError, ChannelRequest, NewChannel,
    SessionChannel,
};

/// Capacity of the in-memory stdin pipe.
const STDIN_BUFFER_SIZE: usize = 64 * 1024;

/// Capacity of the request queue between peer and session.
const REQUEST_QUEUE_CAPACITY: usize = 32;

/// Something the session did on the channel, as seen by the peer.
#[derive(Debug)]
pub enum PeerEvent {
    /// Bytes on the data stream.
    Data(Vec<u8>),
    /// Bytes on the extended (stderr) stream.
    ExtendedData(Vec<u8>),
    /// An out-of-band channel request.
    Request(OutgoingRequest),
    /// End of output.
    Eof,
    /// The channel was closed.
    Close,
}

/// An out-of-band request sent by the session.
#[derive(Debug)]
pub struct OutgoingRequest {
    /// Request name.
    pub name: String,
    /// Whether the session waits for an answer.
    pub want_reply: bool,
    /// Request payload.
    pub payload: Bytes,
    reply: Option<oneshot::Sender<bool>>,
}

impl OutgoingRequest {
    /// Answer the request. Dropping it unanswered makes the sender see the
    /// peer as gone.
    pub fn reply(mut self, ok: bool) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(ok);
        }
    }
}

/// Session side of an in-process channel.
pub struct LoopbackChannel {
    inbound: Mutex<Option<DuplexStream>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: CancellationToken,
}

impl LoopbackChannel {
    /// Create a channel and the peer that observes it.
    pub fn pair() -> (LoopbackNewChannel, LoopbackPeer) {
        let (peer_stdin, inbound) = tokio::io::duplex(STDIN_BUFFER_SIZE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);

        let channel = Arc::new(LoopbackChannel {
            inbound: Mutex::new(Some(inbound)),
            events: events_tx,
            closed: CancellationToken::new(),
        });

        let new_channel = LoopbackNewChannel {
            channel,
            requests: requests_rx,
        };
        let peer = LoopbackPeer {
            stdin: Some(peer_stdin),
            events: events_rx,
            requests: Some(requests_tx),
        };

        (new_channel, peer)
    }

    /// Whether [`SessionChannel::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn event_writer(&self, extended: bool) -> BoxWriter {
        Box::new(EventWriter {
            events: self.events.clone(),
            closed: self.closed.clone(),
            extended,
        })
    }
}

#[async_trait]
impl SessionChannel for LoopbackChannel {
    fn reader(&self) -> BoxReader {
        let inbound = self.inbound.lock().ok().and_then(|mut guard| guard.take());
        match inbound {
            Some(stream) => Box::new(stream),
            None => Box::new(tokio::io::empty()),
        }
    }

    fn writer(&self) -> BoxWriter {
        self.event_writer(false)
    }

    fn stderr(&self) -> BoxWriter {
        self.event_writer(true)
    }

    async fn send_request(
        &self,
        name: &str,
        want_reply: bool,
        payload: Bytes,
    ) -> Result<bool, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let request = OutgoingRequest {
            name: name.to_string(),
            want_reply,
            payload,
            reply: want_reply.then_some(tx),
        };
        self.events
            .send(PeerEvent::Request(request))
            .map_err(|_| ChannelError::Closed)?;

        if !want_reply {
            return Ok(false);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(ChannelError::Closed),
            answer = rx => answer.map_err(|_| ChannelError::NoReply(name.to_string())),
        }
    }

    async fn close_write(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.events
            .send(PeerEvent::Eof)
            .map_err(|_| ChannelError::Closed)
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.closed.cancel();
        // The peer may already be gone; closing locally still succeeds.
        let _ = self.events.send(PeerEvent::Close);
        Ok(())
    }
}

/// Writer turning each write into a [`PeerEvent`].
struct EventWriter {
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: CancellationToken,
    extended: bool,
}

impl AsyncWrite for EventWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed.is_cancelled() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        let event = if self.extended {
            PeerEvent::ExtendedData(buf.to_vec())
        } else {
            PeerEvent::Data(buf.to_vec())
        };
        match self.events.send(event) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A loopback channel that has not been accepted yet.
pub struct LoopbackNewChannel {
    channel: Arc<LoopbackChannel>,
    requests: mpsc::Receiver<ChannelRequest>,
}

impl LoopbackNewChannel {
    /// The channel that [`NewChannel::accept`] will hand out.
    pub fn channel(&self) -> Arc<LoopbackChannel> {
        Arc::clone(&self.channel)
    }
}

#[async_trait]
impl NewChannel for LoopbackNewChannel {
    async fn accept(self: Box<Self>) -> Result<AcceptedChannel, ChannelError> {
        let LoopbackNewChannel {
            channel,
            mut requests,
        } = *self;

        // Like a real transport, stop delivering requests once the channel closes.
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let closed = channel.closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => break,
                    request = requests.recv() => match request {
                        Some(request) => {
                            if tx.send(request).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(AcceptedChannel {
            channel,
            requests: rx,
        })
    }
}

/// The far end of a loopback channel.
pub struct LoopbackPeer {
    stdin: Option<DuplexStream>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    requests: Option<mpsc::Sender<ChannelRequest>>,
}

impl LoopbackPeer {
    /// Send a channel request, returning the receiver for its reply.
    pub async fn request(
        &self,
        request_type: &str,
        want_reply: bool,
        payload: Bytes,
    ) -> Result<oneshot::Receiver<bool>, ChannelError> {
        let sender = self.requests.as_ref().ok_or(ChannelError::Closed)?;
        let (request, reply) = ChannelRequest::new(request_type, want_reply, payload);
        sender
            .send(request)
            .await
            .map_err(|_| ChannelError::Closed)?;
        Ok(reply)
    }

    /// Write bytes to the session's inbound stream.
    pub async fn write_stdin(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::Closed)?;
        stdin.write_all(data).await?;
        Ok(())
    }

    /// Signal end of input to the session.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Stop sending requests, as a peer closing its side of the channel would.
    pub fn hang_up(&mut self) {
        self.requests = None;
    }

    /// Wait for the next event from the session.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    /// Collect events until the channel is closed, answering any request
    /// that wants a reply with success.
    pub async fn collect_until_close(&mut self) -> Vec<PeerEvent> {
        let mut collected = Vec::new();
        while let Some(event) = self.events.recv().await {
            match event {
                PeerEvent::Request(request) if request.want_reply => request.reply(true),
                PeerEvent::Close => {
                    collected.push(PeerEvent::Close);
                    break;
                }
                other => collected.push(other),
            }
        }
        collected
    }
}
