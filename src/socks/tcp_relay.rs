//! TCP relay for SOCKS5 CONNECT command
//!
//! Relays a CONNECT session over one remote stream: the first frame names
//! the destination, every following frame carries raw bytes.

use crate::error::is_closed_connection;
use crate::pool::PooledBuffer;
use crate::socks::command::{read_target_addr, send_success};
use crate::socks::handler::RelayContext;
use crate::transport::{FrameChannel, FrameReceiver, FrameSender};
use anyhow::{Context, Result};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Handle TCP CONNECT command
///
/// Success is reported to the client before the remote stream is opened;
/// the reply's bind address is always `0.0.0.0:0`. A failure after that
/// point closes the client socket without any further reply.
pub async fn handle_tcp_connect<S>(
    mut client: S,
    peer: SocketAddr,
    ctx: &RelayContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let target = read_target_addr(&mut client)
        .await
        .context("Failed to read CONNECT address")?;

    send_success(&mut client, None)
        .await
        .context("Failed to send CONNECT reply")?;

    let mut channel = ctx
        .tunnel
        .open_tcp()
        .await
        .context("Failed to establish stream")?;

    let target = target.to_string();
    channel
        .sender
        .send(target.as_bytes())
        .await
        .context("Failed to send first frame")?;

    let route = match channel.peer {
        Some(remote) => format!("{}<-->{}<-->{}", peer, remote, target),
        None => format!("{}<-->{}", peer, target),
    };
    debug!("tcp estab {}", route);

    relay_tcp(client, channel, ctx.pool.get()).await;

    debug!("tcp close {}", route);
    Ok(())
}

/// Relay bytes between the client and an established stream
///
/// Returns once either direction has finished; the other one is cancelled.
/// The stream's send side is half-closed and `buf` returned to its pool
/// before this returns.
pub async fn relay_tcp<S>(client: S, channel: FrameChannel, buf: PooledBuffer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let FrameChannel { sender, receiver, .. } = channel;
    let (reader, writer) = tokio::io::split(client);
    let token = CancellationToken::new();

    tokio::join!(
        upstream(reader, sender, buf, token.clone()),
        downstream(receiver, writer, token.clone()),
    );
}

/// Client -> remote
async fn upstream<S>(
    mut reader: ReadHalf<S>,
    mut sender: FrameSender,
    mut buf: PooledBuffer,
    token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite,
{
    let _cancel = token.clone().drop_guard();

    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log_io_error("conn read", &e);
                break;
            }
        };

        let sent = tokio::select! {
            _ = token.cancelled() => break,
            sent = sender.send(&buf[..n]) => sent,
        };
        if let Err(e) = sent {
            if !token.is_cancelled() {
                error!("stream send err: {}", e);
            }
            break;
        }
    }

    sender.close_send();
}

/// Remote -> client
async fn downstream<S>(
    mut receiver: FrameReceiver,
    mut writer: WriteHalf<S>,
    token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite,
{
    let _cancel = token.clone().drop_guard();

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = receiver.recv() => frame,
        };

        let data = match frame {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                if !token.is_cancelled() {
                    error!("stream recv err: {}", e);
                }
                break;
            }
        };

        let written = tokio::select! {
            _ = token.cancelled() => break,
            written = writer.write_all(&data) => written,
        };
        if let Err(e) = written {
            log_io_error("conn write", &e);
            break;
        }
    }

    let _ = writer.shutdown().await;
}

fn log_io_error(op: &str, err: &io::Error) {
    if is_closed_connection(err) {
        debug!("{} ended: {}", op, err);
    } else {
        error!("{} err: {}", op, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use crate::transport::{MemoryTunnel, Tunnel};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;

    /// Counts error-level events
    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl ErrorCounter {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl<S: Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_relay_upstream_order() {
        let (tunnel, mut accepted) = MemoryTunnel::new();
        let channel = tunnel.open_tcp().await.unwrap();
        let mut remote = accepted.recv().await.unwrap();
        let pool = BufferPool::new(4, 8);

        let (mut client, proxy_side) = duplex(1024);
        let session = tokio::spawn(relay_tcp(proxy_side, channel, pool.get()));

        let payload: Vec<u8> = (0..200u8).collect();
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        while let Some(frame) = remote.recv().await {
            assert!(!frame.is_empty());
            assert!(frame.len() <= 8);
            received.extend_from_slice(&frame);
        }
        assert_eq!(received, payload);

        session.await.unwrap();
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_relay_downstream_order() {
        let (tunnel, mut accepted) = MemoryTunnel::new();
        let channel = tunnel.open_tcp().await.unwrap();
        let mut remote = accepted.recv().await.unwrap();
        let pool = BufferPool::new(4, 64);

        let (mut client, proxy_side) = duplex(1024);
        let session = tokio::spawn(relay_tcp(proxy_side, channel, pool.get()));

        assert!(remote.send(&b"hello "[..]).await);
        assert!(remote.send(&b"world"[..]).await);
        remote.finish();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello world");

        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("upstream did not stop")
            .unwrap();

        // Send side was half-closed
        assert!(remote.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_relay_stream_error_closes_client() {
        let (tunnel, mut accepted) = MemoryTunnel::new();
        let channel = tunnel.open_tcp().await.unwrap();
        let mut remote = accepted.recv().await.unwrap();
        let pool = BufferPool::new(4, 64);

        let (mut client, proxy_side) = duplex(1024);
        let session = tokio::spawn(relay_tcp(proxy_side, channel, pool.get()));

        remote.fail("reset by relay").await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_client_gone_during_downstream_is_quiet() {
        let errors = ErrorCounter::default();
        let subscriber = tracing_subscriber::registry().with(errors.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let (tunnel, mut accepted) = MemoryTunnel::new();
        let channel = tunnel.open_tcp().await.unwrap();
        let remote = accepted.recv().await.unwrap();
        let pool = BufferPool::new(4, 64);

        let (client, proxy_side) = duplex(16);
        let session = tokio::spawn(relay_tcp(proxy_side, channel, pool.get()));

        let flood = tokio::spawn(async move {
            while remote.send(Bytes::from_static(b"0123456789abcdef")).await {}
            remote
        });
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(client);
        });

        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("relay kept running after the client left")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), flood)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(errors.count(), 0);
        assert_eq!(pool.idle(), 1);
    }
}
