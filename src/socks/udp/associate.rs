//! UDP ASSOCIATE session
//!
//! One UDP socket and one remote stream per association. A single reader
//! turns client datagrams into [`InboundDatagram`]s on a bounded queue, a
//! single writer forwards them to the stream in order, and a downstream
//! loop sends relay frames back to the most recent client address.

use super::packet::parse_udp_packet;
use crate::config::UdpConfig;
use crate::socks::command::{read_target_addr, send_success};
use crate::socks::consts::MAX_UDP_PACKET;
use crate::socks::handler::RelayContext;
use crate::socks::types::TargetAddr;
use crate::transport::{FrameChannel, FrameReceiver, FrameSender};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// One client datagram, decoded and ready for the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDatagram {
    /// Payload without the SOCKS5 envelope
    pub data: Bytes,
    /// Destination named in the envelope
    pub destination: TargetAddr,
    /// Client address the datagram came from
    pub source: SocketAddr,
}

/// Association limits
#[derive(Debug, Clone, Copy)]
pub struct UdpRelayOpts {
    /// Teardown after this long without a client datagram
    pub idle_timeout: Duration,
    /// Depth of the reader -> writer queue
    pub queue_size: usize,
}

impl UdpRelayOpts {
    /// Build options from configuration
    pub fn from_config(config: &UdpConfig) -> Self {
        UdpRelayOpts {
            idle_timeout: Duration::from_secs(config.idle_timeout),
            queue_size: config.queue_size,
        }
    }
}

/// Handle UDP ASSOCIATE command
///
/// The address hint in the request is read and ignored. The reply carries
/// `0.0.0.0` and the port of the freshly bound relay socket.
pub async fn handle_udp_associate<S>(
    mut control: S,
    peer: SocketAddr,
    ctx: &RelayContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _hint = read_target_addr(&mut control)
        .await
        .context("Failed to read UDP ASSOCIATE address")?;

    let socket = UdpSocket::bind(SocketAddr::new(ctx.udp.bind_ip, 0))
        .await
        .context("Failed to bind UDP relay socket")?;
    let port = socket.local_addr()?.port();

    send_success(
        &mut control,
        Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
    )
    .await
    .context("Failed to send UDP ASSOCIATE reply")?;

    let channel = ctx
        .tunnel
        .open_udp()
        .await
        .context("Failed to establish stream")?;

    debug!("udp estab {} on port {}", peer, port);
    relay_udp(control, socket, channel, UdpRelayOpts::from_config(&ctx.udp)).await;
    debug!("udp close {} on port {}", peer, port);

    Ok(())
}

/// Run an association until idle timeout, error, or control close
///
/// The socket is dropped and the stream's send side half-closed before
/// this returns.
pub async fn relay_udp<S>(control: S, socket: UdpSocket, channel: FrameChannel, opts: UdpRelayOpts)
where
    S: AsyncRead + Unpin + Send,
{
    let FrameChannel { sender, receiver, .. } = channel;
    let token = CancellationToken::new();
    let (queue_tx, queue_rx) = mpsc::channel(opts.queue_size.max(1));
    let (nat_tx, nat_rx) = watch::channel(None);

    tokio::join!(
        read_datagrams(&socket, queue_tx, nat_tx, opts.idle_timeout, token.clone()),
        write_frames(queue_rx, sender, token.clone()),
        send_replies(receiver, &socket, nat_rx, token.clone()),
        monitor_control_stream(control, token.clone()),
    );
}

/// Single reader: socket -> queue
async fn read_datagrams(
    socket: &UdpSocket,
    queue: mpsc::Sender<InboundDatagram>,
    nat: watch::Sender<Option<SocketAddr>>,
    idle_timeout: Duration,
    token: CancellationToken,
) {
    let _cancel = token.clone().drop_guard();
    let mut buf = vec![0u8; MAX_UDP_PACKET];

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = tokio::time::timeout(idle_timeout, socket.recv_from(&mut buf)) => received,
        };

        let (n, source) = match received {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                error!("udp read err: {}", e);
                break;
            }
            Err(_) => {
                debug!("udp association idle for {:?}", idle_timeout);
                break;
            }
        };

        if n == 0 {
            continue;
        }

        nat.send_if_modified(|current| {
            if *current == Some(source) {
                false
            } else {
                *current = Some(source);
                true
            }
        });

        let packet = match parse_udp_packet(&buf[..n]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("udp datagram from {} dropped: {}", source, e);
                continue;
            }
        };
        if packet.is_fragmented() {
            warn!("udp fragment from {} dropped", source);
            continue;
        }

        let datagram = InboundDatagram {
            data: packet.data,
            destination: packet.addr,
            source,
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = queue.send(datagram) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// Single ordered writer: queue -> stream
///
/// The first datagram binds the destination and is preceded by its
/// `host:port` frame. Datagrams naming another destination are dropped.
async fn write_frames(
    mut queue: mpsc::Receiver<InboundDatagram>,
    mut sender: FrameSender,
    token: CancellationToken,
) {
    let _cancel = token.clone().drop_guard();
    let mut bound: Option<TargetAddr> = None;

    loop {
        let datagram = tokio::select! {
            _ = token.cancelled() => break,
            datagram = queue.recv() => match datagram {
                Some(datagram) => datagram,
                None => break,
            },
        };

        if let Some(destination) = &bound {
            if *destination != datagram.destination {
                warn!(
                    "udp {} --> {} dropped: association bound to {}",
                    datagram.source, datagram.destination, destination
                );
                continue;
            }
        }

        if bound.is_none() {
            let first = datagram.destination.to_string();
            let sent = tokio::select! {
                _ = token.cancelled() => break,
                sent = sender.send(first.as_bytes()) => sent,
            };
            if let Err(e) = sent {
                if !token.is_cancelled() {
                    error!("first frame send err: {}", e);
                }
                break;
            }
            bound = Some(datagram.destination.clone());
        }

        debug!("udp {} --> {}", datagram.source, datagram.destination);

        let sent = tokio::select! {
            _ = token.cancelled() => break,
            sent = sender.send(&datagram.data) => sent,
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

/// Downstream: stream -> latest client address
async fn send_replies(
    mut receiver: FrameReceiver,
    socket: &UdpSocket,
    nat: watch::Receiver<Option<SocketAddr>>,
    token: CancellationToken,
) {
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

        let client = *nat.borrow();
        let Some(client) = client else {
            warn!("udp reply dropped: no client address yet");
            continue;
        };

        if let Err(e) = socket.send_to(&data, client).await {
            error!("udp write err: {}", e);
            break;
        }
        debug!("udp {} <-- relay ({} bytes)", client, data.len());
    }
}

/// The association ends when the TCP control connection closes
async fn monitor_control_stream<S>(mut control: S, token: CancellationToken)
where
    S: AsyncRead + Unpin,
{
    let _cancel = token.clone().drop_guard();
    let mut buf = [0u8; 1];

    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = control.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("Control stream closed, terminating UDP association");
                break;
            }
            Ok(_) => {
                warn!("Unexpected data on UDP control stream");
            }
            Err(e) => {
                debug!("Control stream error: {}", e);
                break;
            }
        }
    }
}
