//! Test utilities for grpc-socks
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use grpc_socks::config::ClientConfig;
use grpc_socks::server::Server;
use grpc_socks::socks::TargetAddr;
use grpc_socks::transport::{MemoryTunnel, RemoteEnd};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

/// A running proxy backed by an in-memory relay
pub struct TestProxy {
    /// SOCKS5 listen address
    pub addr: SocketAddr,
    /// Handle to the in-memory tunnel
    pub tunnel: MemoryTunnel,
    /// Streams opened by sessions
    pub accepted: mpsc::UnboundedReceiver<RemoteEnd>,
    shutdown_tx: broadcast::Sender<bool>,
}

impl TestProxy {
    /// Start a proxy on an ephemeral loopback port
    pub async fn start() -> Self {
        Self::start_with(TestConfigBuilder::new().build()).await
    }

    /// Start a proxy with a custom configuration
    pub async fn start_with(config: ClientConfig) -> Self {
        let (tunnel, accepted) = MemoryTunnel::new();
        let server = Server::bind(&config, Arc::new(tunnel.clone()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown_rx));

        TestProxy {
            addr,
            tunnel,
            accepted,
            shutdown_tx,
        }
    }

    /// Next stream opened towards the relay
    pub async fn next_stream(&mut self) -> RemoteEnd {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("no stream opened")
            .expect("tunnel closed")
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Test configuration builder
pub struct TestConfigBuilder {
    listen_addr: String,
    remote_addr: String,
    idle_timeout: u64,
    buffer_size: usize,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            listen_addr: "127.0.0.1:0".to_string(),
            remote_addr: "127.0.0.1:50051".to_string(),
            idle_timeout: 600,
            buffer_size: 4108,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set UDP idle timeout in seconds
    pub fn idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout = secs;
        self
    }

    /// Set pooled buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Build the client config
    pub fn build(self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.listen_addr, &self.remote_addr);
        config.udp.idle_timeout = self.idle_timeout;
        config.udp.bind_ip = "127.0.0.1".parse().unwrap();
        config.pool.buffer_size = self.buffer_size;
        config
    }
}

/// Connect and negotiate "no authentication"
pub async fn socks5_connect(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    stream
}

/// Send a request and read the reply's bind address (IPv4 replies only)
pub async fn socks5_request(stream: &mut TcpStream, cmd: u8, target: &TargetAddr) -> SocketAddr {
    let mut request = vec![0x05, cmd, 0x00];
    request.extend_from_slice(&target.to_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);

    let ip = std::net::Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);
    SocketAddr::new(ip.into(), u16::from_be_bytes([reply[8], reply[9]]))
}
