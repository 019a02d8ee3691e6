//! SOCKS5 listener
//!
//! Accepts local clients and runs one session task per connection.

use crate::config::{ClientConfig, Config};
use crate::socks::{handle_connection, RelayContext};
use crate::transport::{GrpcTunnel, SocketOpts, Tunnel};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound SOCKS5 listener
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    ctx: RelayContext,
    socket_opts: SocketOpts,
}

impl Server {
    /// Bind the listen address
    pub async fn bind(config: &ClientConfig, tunnel: Arc<dyn Tunnel>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("Failed to listen on {}", config.listen_addr))?;

        Ok(Server {
            listener,
            ctx: RelayContext::from_config(tunnel, config),
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until shutdown
    ///
    /// Session errors are logged and never stop the loop.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        info!("SOCKS5 proxy listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = self.socket_opts.apply(&stream) {
                                warn!("Failed to set socket options for {}: {}", peer, e);
                            }

                            let ctx = self.ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, &ctx).await {
                                    error!("{}: {:#}", peer, e);
                                }
                                debug!("{} disconnected", peer);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Run the proxy against the configured gRPC relay
pub async fn run_server(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    let client = config.client;
    info!("Remote relay: {}", client.remote_addr);
    info!("Service name: {}", client.service_name);

    let tunnel: Arc<dyn Tunnel> = Arc::new(GrpcTunnel::new(&client));
    Server::bind(&client, tunnel).await?.run(shutdown_rx).await
}
