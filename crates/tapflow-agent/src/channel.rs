//! Framed duplex channels the transceiver runs over.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::AgentError;

/// Upper bound on one frame; raw screenshots dominate frame size.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A point-to-point message channel. Frames arrive whole and in order;
/// delivery guarantees come from the transport, the protocol above only
/// assigns meaning to frame contents.
#[async_trait]
pub trait Duplex: Send + Sync {
    async fn send_frame(&self, frame: Bytes) -> Result<(), AgentError>;

    /// Next frame, or `None` when `wait` elapsed without one.
    async fn recv_frame(&self, wait: Duration) -> Result<Option<Bytes>, AgentError>;
}

/// In-process channel: two crossed unbounded queues.
///
/// Used by tests and by embedding a client and server in one process.
pub struct InProcDuplex {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl InProcDuplex {
    pub fn pair() -> (InProcDuplex, InProcDuplex) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            InProcDuplex {
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            InProcDuplex {
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }
}

#[async_trait]
impl Duplex for InProcDuplex {
    async fn send_frame(&self, frame: Bytes) -> Result<(), AgentError> {
        self.tx.send(frame).map_err(|_| AgentError::ChannelClosed)
    }

    async fn recv_frame(&self, wait: Duration) -> Result<Option<Bytes>, AgentError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(AgentError::ChannelClosed),
        }
    }
}

/// Unix-socket channel with length-delimited framing.
pub struct SocketDuplex {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    reader: Mutex<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
}

impl SocketDuplex {
    pub fn new(stream: UnixStream) -> Self {
        let codec = || {
            LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_BYTES)
                .new_codec()
        };
        let (read, write) = stream.into_split();
        Self {
            writer: Mutex::new(FramedWrite::new(write, codec())),
            reader: Mutex::new(FramedRead::new(read, codec())),
        }
    }

    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        Ok(Self::new(UnixStream::connect(path).await?))
    }

    /// Bind `path` and accept a single peer.
    pub async fn listen(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let listener = UnixListener::bind(path)?;
        let (stream, _addr) = listener.accept().await?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Duplex for SocketDuplex {
    async fn send_frame(&self, frame: Bytes) -> Result<(), AgentError> {
        let mut writer = self.writer.lock().await;
        writer.send(frame).await?;
        Ok(())
    }

    async fn recv_frame(&self, wait: Duration) -> Result<Option<Bytes>, AgentError> {
        let mut reader = self.reader.lock().await;
        match tokio::time::timeout(wait, reader.next()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(frame))) => Ok(Some(frame.freeze())),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(AgentError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_proc_pair_crosses_frames() {
        let (a, b) = InProcDuplex::pair();
        a.send_frame(Bytes::from_static(b"ping")).await.unwrap();
        let got = b.recv_frame(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"ping")));

        // Empty window times out rather than erroring.
        assert!(b
            .recv_frame(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn dropped_peer_surfaces_as_closed() {
        let (a, b) = InProcDuplex::pair();
        drop(a);
        assert!(matches!(
            b.recv_frame(Duration::from_millis(10)).await,
            Err(AgentError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chan.sock");
        let server_path = path.clone();

        let server = tokio::spawn(async move {
            let duplex = SocketDuplex::listen(&server_path).await.unwrap();
            let frame = duplex
                .recv_frame(Duration::from_secs(2))
                .await
                .unwrap()
                .unwrap();
            duplex.send_frame(frame).await.unwrap();
        });

        // The listener may not be bound yet on the first attempt.
        let client = loop {
            match SocketDuplex::connect(&path).await {
                Ok(c) => break c,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        client.send_frame(Bytes::from_static(b"echo")).await.unwrap();
        let back = client.recv_frame(Duration::from_secs(2)).await.unwrap();
        assert_eq!(back, Some(Bytes::from_static(b"echo")));
        server.await.unwrap();
    }
}
