//! In-process tunnel
//!
//! Streams opened on a [`MemoryTunnel`] surface on the other side as
//! [`RemoteEnd`] handles, letting tests and embedders play the relay.

use super::{FrameChannel, FrameReceiver, FrameSender, FrameSink, FrameSource, Tunnel};
use crate::error::RelayError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-direction frame queue depth
const QUEUE_SIZE: usize = 64;

/// Which command a stream was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// TCP CONNECT stream
    Tcp,
    /// UDP ASSOCIATE stream
    Udp,
}

/// In-memory tunnel
#[derive(Debug, Clone)]
pub struct MemoryTunnel {
    accept_tx: mpsc::UnboundedSender<RemoteEnd>,
    available: Arc<AtomicBool>,
}

impl MemoryTunnel {
    /// Create a tunnel and the receiver on which opened streams arrive
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let tunnel = MemoryTunnel {
            accept_tx,
            available: Arc::new(AtomicBool::new(true)),
        };
        (tunnel, accept_rx)
    }

    /// Make subsequent opens fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn open(&self, kind: StreamKind) -> Result<FrameChannel> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("relay unavailable");
        }

        let (up_tx, up_rx) = mpsc::channel(QUEUE_SIZE);
        let (down_tx, down_rx) = mpsc::channel(QUEUE_SIZE);

        self.accept_tx
            .send(RemoteEnd {
                kind,
                frames: up_rx,
                replies: Some(down_tx),
            })
            .map_err(|_| anyhow::anyhow!("relay side dropped"))?;

        Ok(FrameChannel {
            sender: FrameSender::new(Box::new(MemorySink { tx: Some(up_tx) })),
            receiver: FrameReceiver::new(Box::new(MemorySource { rx: down_rx })),
            peer: None,
        })
    }
}

#[async_trait]
impl Tunnel for MemoryTunnel {
    async fn open_tcp(&self) -> Result<FrameChannel> {
        self.open(StreamKind::Tcp)
    }

    async fn open_udp(&self) -> Result<FrameChannel> {
        self.open(StreamKind::Udp)
    }
}

/// Relay-side view of one stream
#[derive(Debug)]
pub struct RemoteEnd {
    kind: StreamKind,
    frames: mpsc::Receiver<Bytes>,
    replies: Option<mpsc::Sender<Result<Bytes, String>>>,
}

impl RemoteEnd {
    /// Command the stream was opened for
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Next frame from the proxy, `None` once the proxy half-closed
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Send a frame to the proxy; false if the proxy side is gone
    pub async fn send(&self, data: impl Into<Bytes>) -> bool {
        match &self.replies {
            Some(tx) => tx.send(Ok(data.into())).await.is_ok(),
            None => false,
        }
    }

    /// Fail the stream with an error as seen by the proxy
    pub async fn fail(&mut self, message: &str) {
        if let Some(tx) = self.replies.take() {
            let _ = tx.send(Err(message.to_string())).await;
        }
    }

    /// End the relay-to-proxy direction cleanly
    pub fn finish(&mut self) {
        self.replies = None;
    }
}

#[derive(Debug)]
struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RelayError::Stream("send side closed".to_string()))?;
        tx.send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| RelayError::Stream("relay side closed".to_string()))
    }

    fn close_send(&mut self) {
        self.tx = None;
    }
}

#[derive(Debug)]
struct MemorySource {
    rx: mpsc::Receiver<Result<Bytes, String>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Bytes>, RelayError> {
        match self.rx.recv().await {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(message)) => Err(RelayError::Stream(message)),
            None => Ok(None),
        }
    }
}
