use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_serde::formats::SymmetricalBincode;
use tokio_serde::SymmetricallyFramed;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::raft::message::{Frame, Message};
use crate::raft::node::Event;
use crate::raft::NodeId;

/// How long an outbound connection attempt may take before the peer counts
/// as unreachable and the message is dropped.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) type FrameSink<T> =
    SymmetricallyFramed<FramedWrite<T, LengthDelimitedCodec>, Frame, SymmetricalBincode<Frame>>;
pub(crate) type FrameStream<T> =
    SymmetricallyFramed<FramedRead<T, LengthDelimitedCodec>, Frame, SymmetricalBincode<Frame>>;

/// Length-delimited bincode frames over any byte sink.
pub(crate) fn frame_sink<T: AsyncWrite>(io: T) -> FrameSink<T> {
    SymmetricallyFramed::new(
        FramedWrite::new(io, LengthDelimitedCodec::new()),
        SymmetricalBincode::default(),
    )
}

pub(crate) fn frame_stream<T: AsyncRead>(io: T) -> FrameStream<T> {
    SymmetricallyFramed::new(
        FramedRead::new(io, LengthDelimitedCodec::new()),
        SymmetricalBincode::default(),
    )
}

/// Handles to the per-peer outbound queues.
///
/// Each peer gets its own unbounded queue drained by its own writer task, so
/// a slow or dead peer can never stall heartbeats to healthy peers, and the
/// consensus core never blocks on the network: `send` is a queue push.
///
/// Delivery is best-effort. A peer that cannot be reached within
/// [`CONNECT_TIMEOUT`], or whose connection breaks mid-write, costs exactly
/// the messages in flight; nothing is retried at this layer, the protocol
/// re-sends what matters.
#[derive(Clone)]
pub struct PeerTransport {
    outboxes: HashMap<NodeId, mpsc::UnboundedSender<Message>>,
}

impl PeerTransport {
    /// Spawns one writer task per peer in the cluster file.
    pub fn start(own_id: NodeId, config: &ClusterConfig) -> Self {
        let mut outboxes = HashMap::new();
        for (peer, addr) in config.iter() {
            if peer == own_id {
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_peer_writer(peer, addr.to_string(), rx));
            outboxes.insert(peer, tx);
        }
        Self { outboxes }
    }

    /// Queues a message for `to`. Unknown peers are a configuration bug and
    /// are logged rather than panicking the state machine.
    pub fn send(&self, to: NodeId, message: Message) {
        match self.outboxes.get(&to) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => warn!("no outbound queue for peer {}, dropping message", to),
        }
    }

    /// A transport backed by in-process queues; the returned receivers see
    /// exactly what the node sends to each peer.
    #[cfg(test)]
    pub(crate) fn in_memory(
        peers: &[NodeId],
    ) -> (Self, HashMap<NodeId, mpsc::UnboundedReceiver<Message>>) {
        let mut outboxes = HashMap::new();
        let mut inboxes = HashMap::new();
        for &peer in peers {
            let (tx, rx) = mpsc::unbounded_channel();
            outboxes.insert(peer, tx);
            inboxes.insert(peer, rx);
        }
        (Self { outboxes }, inboxes)
    }
}

/// Drains one peer's outbound queue, connecting lazily and dropping
/// messages whenever the peer is unreachable.
async fn run_peer_writer(
    peer: NodeId,
    addr: String,
    mut outbox: mpsc::UnboundedReceiver<Message>,
) {
    let mut sink: Option<FrameSink<TcpStream>> = None;
    while let Some(message) = outbox.recv().await {
        if sink.is_none() {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => sink = Some(frame_sink(stream)),
                Ok(Err(err)) => {
                    warn!("peer {} unreachable at {}: {}", peer, addr, err);
                    continue;
                }
                Err(_) => {
                    warn!("peer {} unreachable at {}: connect timed out", peer, addr);
                    continue;
                }
            }
        }
        let mut broken = false;
        if let Some(open) = sink.as_mut() {
            if let Err(err) = open.send(Frame::Peer(message)).await {
                warn!("send to peer {} failed: {}", peer, err);
                broken = true;
            }
        }
        if broken {
            sink = None;
        }
    }
}

/// Binds the node's listening socket. Failing to bind is fatal at startup.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    Ok(listener)
}

/// Accepts inbound connections forever, posting decoded frames as events.
pub async fn serve(listener: TcpListener, events: mpsc::UnboundedSender<Event>) {
    let mut incoming = TcpListenerStream::new(listener);
    while let Some(accepted) = incoming.next().await {
        match accepted {
            Ok(stream) => {
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, events).await {
                        debug!("connection ended: {}", err);
                    }
                });
            }
            Err(err) => warn!("accept failed: {}", err),
        }
    }
}

/// One inbound connection: peers fire `Peer` frames and never read back;
/// a client's `Client` frame gets exactly one `Reply` on the same
/// connection. Framing errors drop the message, get logged, and close the
/// connection (there is no way to resynchronize a corrupt framed stream).
async fn serve_connection(stream: TcpStream, events: mpsc::UnboundedSender<Event>) -> Result<()> {
    let (read, write) = stream.into_split();
    let mut frames_in = frame_stream(read);
    let mut frames_out = frame_sink(write);

    loop {
        let frame = match frames_in.try_next().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(err) => {
                warn!("dropping malformed frame: {}", err);
                return Ok(());
            }
        };
        match frame {
            Frame::Peer(message) => events.send(Event::Peer(message))?,
            Frame::Client(request) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                events.send(Event::Client { request, reply: reply_tx })?;
                // A dropped reply means the node would not acknowledge the
                // operation; close so the client sees the failure.
                let response = reply_rx.await?;
                frames_out.send(Frame::Reply(response)).await?;
            }
            Frame::Reply(_) => warn!("unexpected reply frame from remote, dropping"),
        }
    }
}
