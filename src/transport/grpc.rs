//! gRPC tunnel over plaintext HTTP/2
//!
//! One HTTP/2 connection to the relay is shared by all sessions; each
//! session opens its own bidirectional streaming call on it. The connection
//! is re-dialled lazily once it stops accepting new streams.

use super::codec::{encode_frame, FrameDecoder};
use super::{AddrMaybeCached, FrameChannel, FrameReceiver, FrameSender, FrameSink, FrameSource};
use super::{SocketOpts, Tunnel};
use crate::config::ClientConfig;
use crate::error::RelayError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::poll_fn;
use h2::client::{ResponseFuture, SendRequest};
use h2::{RecvStream, SendStream};
use http::header::{CONTENT_TYPE, TE};
use http::{HeaderMap, Method, Request, StatusCode, Uri, Version};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Method carrying TCP CONNECT sessions
const TCP_METHOD: &str = "Pipeline";

/// Method carrying UDP ASSOCIATE sessions
const UDP_METHOD: &str = "PipelineUDP";

/// Default timeout for dialling the relay
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP/2 flow-control window used for both streams and the connection
const WINDOW_SIZE: u32 = 4 * 1024 * 1024;

/// Live HTTP/2 connection to the relay
#[derive(Debug, Clone)]
struct Connection {
    send_request: SendRequest<Bytes>,
    peer: SocketAddr,
}

/// Tunnel that opens gRPC streaming calls on the remote relay
#[derive(Debug)]
pub struct GrpcTunnel {
    /// Relay address
    remote: AddrMaybeCached,
    /// Fully qualified gRPC service name
    service_name: String,
    /// Socket options for the relay connection
    socket_opts: SocketOpts,
    /// Dial timeout
    connect_timeout: Duration,
    /// Shared connection, `None` until first use or after a failure
    conn: Mutex<Option<Connection>>,
}

impl GrpcTunnel {
    /// Create a tunnel from client configuration; no connection is made yet
    pub fn new(config: &ClientConfig) -> Self {
        GrpcTunnel {
            remote: AddrMaybeCached::new(&config.remote_addr),
            service_name: config.service_name.clone(),
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            connect_timeout: CONNECT_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    /// Set the dial timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Request path of a method on the configured service
    fn method_path(&self, method: &str) -> String {
        format!("/{}/{}", self.service_name, method)
    }

    fn build_request(&self, method: &str) -> Result<Request<()>> {
        let uri = Uri::builder()
            .scheme("http")
            .authority(self.remote.addr())
            .path_and_query(self.method_path(method))
            .build()
            .with_context(|| format!("Invalid gRPC URI for {}", self.remote.addr()))?;

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .version(Version::HTTP_2)
            .header(CONTENT_TYPE, "application/grpc")
            .header(TE, "trailers")
            .body(())
            .context("Failed to build gRPC request")
    }

    /// Get a connection ready to open a new stream, dialling if needed
    async fn ready_connection(&self) -> Result<Connection> {
        let mut guard = self.conn.lock().await;

        if let Some(conn) = guard.as_ref() {
            match conn.send_request.clone().ready().await {
                Ok(send_request) => {
                    return Ok(Connection {
                        send_request,
                        peer: conn.peer,
                    })
                }
                Err(e) => {
                    debug!("gRPC connection to {} unusable: {}", conn.peer, e);
                    *guard = None;
                }
            }
        }

        let conn = self.dial().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn dial(&self) -> Result<Connection> {
        let peer = self.remote.resolve().await?;

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(peer))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.remote.clear_cache().await;
                return Err(
                    RelayError::Connection(format!("Failed to connect to {}: {}", peer, e)).into(),
                );
            }
            Err(_) => {
                self.remote.clear_cache().await;
                return Err(RelayError::Timeout(format!("connecting to {}", peer)).into());
            }
        };

        self.socket_opts.apply(&stream)?;

        let (send_request, connection) = h2::client::Builder::new()
            .initial_window_size(WINDOW_SIZE)
            .initial_connection_window_size(WINDOW_SIZE)
            .enable_push(false)
            .handshake::<_, Bytes>(stream)
            .await
            .with_context(|| format!("HTTP/2 handshake with {} failed", peer))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("gRPC connection to {} closed: {}", peer, e);
            }
        });

        debug!("gRPC connection established to {}", peer);

        let send_request = send_request
            .ready()
            .await
            .with_context(|| format!("gRPC connection to {} not ready", peer))?;

        Ok(Connection { send_request, peer })
    }

    async fn open(&self, method: &str) -> Result<FrameChannel> {
        let Connection {
            mut send_request,
            peer,
        } = self.ready_connection().await?;

        let request = self.build_request(method)?;
        let (response, send) = send_request
            .send_request(request, false)
            .with_context(|| format!("Failed to open {} stream", method))?;

        Ok(FrameChannel {
            sender: FrameSender::new(Box::new(GrpcSink { stream: send })),
            receiver: FrameReceiver::new(Box::new(GrpcSource::new(response))),
            peer: Some(peer),
        })
    }
}

#[async_trait]
impl Tunnel for GrpcTunnel {
    async fn open_tcp(&self) -> Result<FrameChannel> {
        self.open(TCP_METHOD).await
    }

    async fn open_udp(&self) -> Result<FrameChannel> {
        self.open(UDP_METHOD).await
    }
}

fn stream_error(err: h2::Error) -> RelayError {
    RelayError::Stream(err.to_string())
}

/// Send half of a gRPC call
#[derive(Debug)]
struct GrpcSink {
    stream: SendStream<Bytes>,
}

#[async_trait]
impl FrameSink for GrpcSink {
    async fn send(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let mut remaining = encode_frame(data);

        while !remaining.is_empty() {
            self.stream.reserve_capacity(remaining.len());
            let available = match poll_fn(|cx| self.stream.poll_capacity(cx)).await {
                Some(Ok(n)) => n,
                Some(Err(e)) => return Err(stream_error(e)),
                None => return Err(RelayError::Stream("stream closed by relay".to_string())),
            };
            if available == 0 {
                continue;
            }

            let chunk = remaining.split_to(available.min(remaining.len()));
            self.stream.send_data(chunk, false).map_err(stream_error)?;
        }

        Ok(())
    }

    fn close_send(&mut self) {
        // Fails only when the stream is already gone, which is closed enough
        let _ = self.stream.send_data(Bytes::new(), true);
    }
}

#[derive(Debug)]
enum SourceState {
    /// Waiting for response headers
    Pending(ResponseFuture),
    /// Reading DATA frames
    Streaming(RecvStream),
    /// End of stream observed
    Done,
}

/// Receive half of a gRPC call
#[derive(Debug)]
struct GrpcSource {
    state: SourceState,
    decoder: FrameDecoder,
}

impl GrpcSource {
    fn new(response: ResponseFuture) -> Self {
        GrpcSource {
            state: SourceState::Pending(response),
            decoder: FrameDecoder::new(),
        }
    }
}

/// Map a non-zero `grpc-status` to an error
fn check_grpc_status(headers: &HeaderMap) -> Result<(), RelayError> {
    let Some(status) = headers.get("grpc-status") else {
        return Ok(());
    };

    let code = status.to_str().ok().and_then(|s| s.parse::<u32>().ok());
    match code {
        Some(0) => Ok(()),
        _ => {
            let message = headers
                .get("grpc-message")
                .and_then(|m| m.to_str().ok())
                .unwrap_or("");
            Err(RelayError::Stream(format!(
                "grpc-status {:?}: {}",
                status, message
            )))
        }
    }
}

#[async_trait]
impl FrameSource for GrpcSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, RelayError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            match std::mem::replace(&mut self.state, SourceState::Done) {
                SourceState::Pending(response) => {
                    let response = response.await.map_err(stream_error)?;
                    if response.status() != StatusCode::OK {
                        return Err(RelayError::Stream(format!(
                            "unexpected HTTP status {}",
                            response.status()
                        )));
                    }
                    // Trailers-only responses carry the status in the headers
                    check_grpc_status(response.headers())?;
                    self.state = SourceState::Streaming(response.into_body());
                }
                SourceState::Streaming(mut body) => match body.data().await {
                    Some(Ok(chunk)) => {
                        let _ = body.flow_control().release_capacity(chunk.len());
                        self.decoder.extend(&chunk);
                        self.state = SourceState::Streaming(body);
                    }
                    Some(Err(e)) => return Err(stream_error(e)),
                    None => {
                        if let Some(trailers) = body.trailers().await.map_err(stream_error)? {
                            check_grpc_status(&trailers)?;
                        }
                        if !self.decoder.is_empty() {
                            return Err(RelayError::Protocol(
                                "stream ended inside a message".to_string(),
                            ));
                        }
                        return Ok(None);
                    }
                },
                SourceState::Done => return Ok(None),
            }
        }
    }
}
