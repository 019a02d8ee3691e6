//! Transport module for grpc-socks
//!
//! This module provides the remote-facing tunnel abstraction: every client
//! connection gets one bidirectional stream of frames to the relay. The
//! production implementation speaks gRPC over HTTP/2; an in-memory
//! implementation backs tests and embedders.

mod addr;
mod codec;
mod grpc;
mod memory;

pub use addr::AddrMaybeCached;
pub use codec::{encode_frame, FrameDecoder, Payload};
pub use grpc::GrpcTunnel;
pub use memory::{MemoryTunnel, RemoteEnd, StreamKind};

use crate::config::TcpConfig;
use crate::error::RelayError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Send side of a remote stream
///
/// Frames are delivered in the order `send` is called. `&mut self` keeps
/// at most one sender active at any instant.
#[async_trait]
pub trait FrameSink: Send + Debug {
    /// Send one frame; the sink copies `data` into its own buffer
    async fn send(&mut self, data: &[u8]) -> Result<(), RelayError>;

    /// Half-close the send side; the remote observes end-of-stream
    fn close_send(&mut self);
}

/// Receive side of a remote stream
#[async_trait]
pub trait FrameSource: Send + Debug {
    /// Receive the next frame, `None` on clean end-of-stream
    async fn recv(&mut self) -> Result<Option<Bytes>, RelayError>;
}

/// Owned send half of a stream
///
/// Half-closes the underlying sink exactly once: either through an explicit
/// [`close_send`](FrameSender::close_send) or when the sender is dropped.
#[derive(Debug)]
pub struct FrameSender {
    sink: Box<dyn FrameSink>,
    closed: bool,
}

impl FrameSender {
    /// Wrap a sink
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        FrameSender {
            sink,
            closed: false,
        }
    }

    /// Send one frame
    pub async fn send(&mut self, data: &[u8]) -> Result<(), RelayError> {
        if self.closed {
            return Err(RelayError::Stream("send side already closed".to_string()));
        }
        self.sink.send(data).await
    }

    /// Half-close the stream (idempotent)
    pub fn close_send(&mut self) {
        if !self.closed {
            self.closed = true;
            self.sink.close_send();
        }
    }

    /// Whether the send side has been half-closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.close_send();
    }
}

/// Owned receive half of a stream
#[derive(Debug)]
pub struct FrameReceiver {
    source: Box<dyn FrameSource>,
}

impl FrameReceiver {
    /// Wrap a source
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        FrameReceiver { source }
    }

    /// Receive the next frame, `None` on clean end-of-stream
    pub async fn recv(&mut self) -> Result<Option<Bytes>, RelayError> {
        self.source.recv().await
    }
}

/// One opened remote stream
#[derive(Debug)]
pub struct FrameChannel {
    /// Send half
    pub sender: FrameSender,
    /// Receive half
    pub receiver: FrameReceiver,
    /// Address of the remote relay, when known
    pub peer: Option<SocketAddr>,
}

/// Opens streams to the remote relay
#[async_trait]
pub trait Tunnel: Debug + Send + Sync + 'static {
    /// Open a stream carrying TCP CONNECT traffic
    async fn open_tcp(&self) -> Result<FrameChannel>;

    /// Open a stream carrying UDP ASSOCIATE traffic
    async fn open_udp(&self) -> Result<FrameChannel>;
}
