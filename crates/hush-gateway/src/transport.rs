use std::fmt::Display;
use std::io;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future, sink, stream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long the writer keeps flushing already-queued frames after shutdown.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One outbound transport frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Control literals (`PONG`) go out as text.
    Text(String),
    /// AEAD frames and handshake bytes go out as binary.
    Binary(Bytes),
}

/// A queued frame plus the slot the writer answers once the frame has
/// been written (`true`) or has failed (`false`). A dropped slot also
/// means failure.
pub(crate) struct Outbound {
    pub(crate) frame: WireFrame,
    pub(crate) ack: oneshot::Sender<bool>,
}

/// A byte-oriented, frame-preserving duplex link to one client.
///
/// The socket itself lives in two pump tasks; the transport only holds the
/// ends of the queues feeding them and a shutdown token that stops both.
pub struct Transport {
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
    pub(crate) inbound: mpsc::UnboundedReceiver<Bytes>,
    pub(crate) shutdown: CancellationToken,
}

impl Transport {
    /// Drive an upgraded WebSocket. Text and binary frames both arrive as raw
    /// bytes; socket-level ping/pong is handled by axum and never surfaces.
    pub fn websocket(socket: WebSocket) -> Self {
        let (ws_sink, ws_stream) = socket.split();

        let frames_out = ws_sink.with(|frame: WireFrame| {
            future::ready(Ok::<_, axum::Error>(match frame {
                WireFrame::Text(text) => Message::Text(text.into()),
                WireFrame::Binary(data) => Message::Binary(data),
            }))
        });

        let frames_in = ws_stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                    Ok(Message::Binary(data)) => Some(Ok(data)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
            });

        Self::spawn(frames_out, frames_in)
    }

    /// An in-process transport plus the remote end a client would hold.
    /// Runs the same pumps as [`Transport::websocket`].
    pub fn pair() -> (Self, Peer) {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (from_peer_tx, from_peer_rx) = mpsc::unbounded_channel::<Bytes>();

        let frames_out = sink::unfold(to_peer_tx, |tx, frame: WireFrame| async move {
            tx.send(frame)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok::<_, io::Error>(tx)
        });
        let frames_in = stream::unfold(from_peer_rx, |mut rx| async move {
            rx.recv().await.map(|raw| (Ok::<_, io::Error>(raw), rx))
        });

        let transport = Self::spawn(frames_out, frames_in);
        let peer = Peer {
            tx: from_peer_tx,
            rx: to_peer_rx,
            shutdown: transport.shutdown.clone(),
        };
        (transport, peer)
    }

    /// Start the writer and reader pumps over any frame sink and stream.
    /// Either pump ending shuts the other down.
    pub fn spawn<Si, St, E>(frames_out: Si, frames_in: St) -> Self
    where
        Si: Sink<WireFrame> + Send + 'static,
        Si::Error: Display,
        St: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_writer(Box::pin(frames_out), out_rx, shutdown.clone()));
        tokio::spawn(run_reader(Box::pin(frames_in), in_tx, shutdown.clone()));

        Self {
            outbound: out_tx,
            inbound: in_rx,
            shutdown,
        }
    }
}

/// Queue -> socket. Every frame taken off the queue is acknowledged with
/// the outcome of its write. After shutdown, frames queued before it are
/// still flushed for up to [`DRAIN_GRACE`]; whatever is left is dropped
/// unacknowledged, which senders see as failure.
async fn run_writer<Si>(
    mut frames_out: std::pin::Pin<Box<Si>>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown: CancellationToken,
) where
    Si: Sink<WireFrame>,
    Si::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            queued = out_rx.recv() => match queued {
                Some(out) => {
                    if !write_frame(&mut frames_out, out).await {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }

    shutdown.cancel();
    out_rx.close();
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        while let Some(out) = out_rx.recv().await {
            write_frame(&mut frames_out, out).await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("writer gave up draining after {:?}", DRAIN_GRACE);
    }
    let _ = frames_out.close().await;
}

async fn write_frame<Si>(frames_out: &mut std::pin::Pin<Box<Si>>, out: Outbound) -> bool
where
    Si: Sink<WireFrame>,
    Si::Error: Display,
{
    let written = match frames_out.send(out.frame).await {
        Ok(()) => true,
        Err(e) => {
            debug!("transport write failed: {}", e);
            false
        }
    };
    let _ = out.ack.send(written);
    written
}

/// Socket -> queue.
async fn run_reader<St, E>(
    mut frames_in: std::pin::Pin<Box<St>>,
    in_tx: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
) where
    St: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames_in.next() => match next {
                Some(Ok(raw)) => {
                    if in_tx.send(raw).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!("transport read failed: {}", e);
                    break;
                }
                None => break,
            },
        }
    }
    shutdown.cancel();
}

/// Remote side of [`Transport::pair`]. Dropping it breaks the link: the
/// reader sees end-of-stream and further writes fail.
pub struct Peer {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<WireFrame>,
    shutdown: CancellationToken,
}

impl Peer {
    /// Push a raw frame towards the server. Returns false once the server
    /// side is gone.
    pub fn send(&self, raw: impl Into<Bytes>) -> bool {
        self.tx.send(raw.into()).is_ok()
    }

    /// Next frame the server wrote, or `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    /// A frame the server already wrote, without waiting.
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }

    /// True once the server side closed the transport.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Drop the link from the client side, as a socket error would.
    pub fn hang_up(&self) {
        self.shutdown.cancel();
    }
}
