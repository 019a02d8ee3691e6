//! Main SOCKS5 handler
//!
//! Entry point for every accepted client connection: negotiates the method,
//! reads the command and hands the connection to the matching relay.

use crate::config::{ClientConfig, UdpConfig};
use crate::error::Socks5Error;
use crate::pool::BufferPool;
use crate::socks::command::handshake;
use crate::socks::tcp_relay::handle_tcp_connect;
use crate::socks::types::SocksCommand;
use crate::socks::udp::handle_udp_associate;
use crate::transport::Tunnel;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Shared state handed to every session
#[derive(Debug, Clone)]
pub struct RelayContext {
    /// Opens one remote stream per session
    pub tunnel: Arc<dyn Tunnel>,
    /// Upstream read buffers
    pub pool: BufferPool,
    /// UDP association settings
    pub udp: UdpConfig,
}

impl RelayContext {
    /// Create a context
    pub fn new(tunnel: Arc<dyn Tunnel>, pool: BufferPool, udp: UdpConfig) -> Self {
        RelayContext { tunnel, pool, udp }
    }

    /// Create a context with the pool and UDP settings from configuration
    pub fn from_config(tunnel: Arc<dyn Tunnel>, config: &ClientConfig) -> Self {
        Self::new(
            tunnel,
            BufferPool::from_config(&config.pool),
            config.udp.clone(),
        )
    }
}

/// Handle one SOCKS5 client connection
///
/// # Protocol Flow
///
/// 1. Method negotiation ("no authentication" only)
/// 2. Request header
/// 3. CONNECT -> TCP relay, UDP ASSOCIATE -> UDP relay
///
/// Any other command (BIND included) fails with
/// [`Socks5Error::CommandNotSupported`] and the connection is closed
/// without a reply.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, ctx: &RelayContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let cmd = handshake(&mut stream)
        .await
        .context("socks handshake failed")?;

    match SocksCommand::from_byte(cmd) {
        Some(SocksCommand::Connect) => {
            debug!("SOCKS5 CONNECT from {}", peer);
            handle_tcp_connect(stream, peer, ctx).await
        }
        Some(SocksCommand::UdpAssociate) => {
            debug!("SOCKS5 UDP ASSOCIATE from {}", peer);
            handle_udp_associate(stream, peer, ctx).await
        }
        _ => Err(Socks5Error::CommandNotSupported(cmd).into()),
    }
}
