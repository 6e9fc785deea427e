//! Physical links -- one bidirectional frame stream per connection.
//!
//! A `Connector` dials the node, sends the `hello` frame carrying the device
//! id and waits for the node's `connect` acknowledgement. The resulting
//! `Link` is a pair of queues serviced by a spawned IO task; dropping the
//! link closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use shockwire_protocol::{EventName, Frame, FrameCodec, DEFAULT_TIMING};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::ChannelError;

/// Events delivered from a live link to the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Inbound frame (not yet decrypted).
    Frame(Frame),
    /// Transport-level error. The link may still be usable.
    Error(String),
    /// The link is gone.
    Closed { reason: String },
}

/// One live connection.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<Frame>,
    inbound: mpsc::Receiver<LinkEvent>,
}

/// Far side of a `Link`: what an IO task (or a test) drives.
#[derive(Debug)]
pub struct LinkPeer {
    pub outbound: mpsc::Receiver<Frame>,
    pub inbound: mpsc::Sender<LinkEvent>,
}

impl Link {
    /// Create a connected link/peer pair.
    pub fn pair(capacity: usize) -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Link {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Frame) -> Result<(), ChannelError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::NotConnected,
        })
    }

    /// Next event from the link. A vanished IO task reads as `Closed`.
    pub async fn recv(&mut self) -> LinkEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => LinkEvent::Closed {
                reason: "io task ended".into(),
            },
        }
    }
}

/// Dials the node.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, device_id: &str) -> Result<Link, ChannelError>;
}

/// Strip scheme and path from a node url: `http://1.2.3.4:9835/x` -> `1.2.3.4:9835`.
pub fn host_port(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

// ============================================================================
// Stream plumbing shared by TCP and QUIC
// ============================================================================

/// Send `hello`, await the `connect` ack, then spawn the IO task.
///
/// `guard` lives as long as the IO task (QUIC keeps its connection here).
pub(crate) async fn open_link<R, W, G>(
    reader: R,
    writer: W,
    device_id: &str,
    connect_timeout: Duration,
    codec: FrameCodec,
    queue: usize,
    guard: G,
) -> Result<Link, ChannelError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    G: Send + 'static,
{
    let mut stream = FramedRead::new(reader, codec);
    let mut sink = FramedWrite::new(writer, codec);

    match tokio::time::timeout(connect_timeout, handshake(&mut stream, &mut sink, device_id)).await
    {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(?connect_timeout, "link: connect_timeout");
            return Err(ChannelError::ConnectFailed("connect_timeout".into()));
        }
    }

    let (link, peer) = Link::pair(queue);
    tokio::spawn(run_link(stream, sink, peer, guard));
    Ok(link)
}

async fn handshake<R, W>(
    stream: &mut FramedRead<R, FrameCodec>,
    sink: &mut FramedWrite<W, FrameCodec>,
    device_id: &str,
) -> Result<(), ChannelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    sink.send(Frame::hello(device_id)).await?;
    match stream.next().await {
        Some(Ok(frame)) if frame.is(EventName::Connect) => Ok(()),
        Some(Ok(frame)) if frame.is(EventName::ConnectError) => Err(ChannelError::ConnectFailed(
            format!("connect_error: {}", frame.data),
        )),
        Some(Ok(frame)) => Err(ChannelError::ConnectFailed(format!(
            "expected connect ack, got {}",
            frame.event
        ))),
        Some(Err(e)) => Err(e.into()),
        None => Err(ChannelError::ConnectFailed("closed during handshake".into())),
    }
}

async fn run_link<R, W, G>(
    mut stream: FramedRead<R, FrameCodec>,
    mut sink: FramedWrite<W, FrameCodec>,
    mut peer: LinkPeer,
    _guard: G,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let reason = loop {
        tokio::select! {
            out = peer.outbound.recv() => match out {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        break format!("write failed: {e}");
                    }
                }
                None => {
                    // Link dropped locally
                    let _ = sink.close().await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => {
                    if peer.inbound.send(LinkEvent::Frame(frame)).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = peer.inbound.send(LinkEvent::Error(e.to_string())).await;
                    break format!("read failed: {e}");
                }
                None => break "transport close".to_string(),
            },
        }
    };

    tracing::debug!(%reason, "link: io task exiting");
    let _ = peer.inbound.send(LinkEvent::Closed { reason }).await;
}

// ============================================================================
// TCP
// ============================================================================

/// Plain TCP connector. Confidentiality comes from the envelope codec.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    max_frame_bytes: usize,
    queue: usize,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            max_frame_bytes: DEFAULT_TIMING.max_frame_bytes,
            queue: DEFAULT_TIMING.outbound_queue,
        }
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMING.connect_timeout_secs))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, url: &str, device_id: &str) -> Result<Link, ChannelError> {
        let addr = host_port(url);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(addr, "link: connect_error: {e}");
                return Err(ChannelError::ConnectFailed(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(addr, "link: connect_timeout");
                return Err(ChannelError::ConnectFailed("connect_timeout".into()));
            }
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        open_link(
            reader,
            writer,
            device_id,
            self.connect_timeout,
            FrameCodec::new(self.max_frame_bytes),
            self.queue,
            (),
        )
        .await
    }
}
