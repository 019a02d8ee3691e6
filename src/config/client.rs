//! Client configuration types
//!
//! Defines the main configuration structures for the proxy front-end.

use super::{BufferPoolConfig, TcpConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Default local SOCKS5 listen address
fn default_listen_addr() -> String {
    "127.0.0.1:1080".to_string()
}

/// Default gRPC service name hosting the pipeline methods
fn default_service_name() -> String {
    "pb.Proxy".to_string()
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Client configuration
    pub client: ClientConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.client.validate()
    }
}

/// Client configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Local address the SOCKS5 listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Remote relay address (e.g., "relay.example.com:50051")
    pub remote_addr: String,

    /// Fully qualified gRPC service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Buffer pool configuration
    #[serde(default)]
    pub pool: BufferPoolConfig,

    /// UDP association configuration
    #[serde(default)]
    pub udp: UdpConfig,
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the addresses
    pub fn new(listen_addr: &str, remote_addr: &str) -> Self {
        ClientConfig {
            listen_addr: listen_addr.to_string(),
            remote_addr: remote_addr.to_string(),
            service_name: default_service_name(),
            tcp: TcpConfig::default(),
            pool: BufferPoolConfig::default(),
            udp: UdpConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.remote_addr.is_empty() {
            return Err("remote_addr must not be empty".to_string());
        }
        if self.service_name.is_empty() || self.service_name.contains('/') {
            return Err(format!("Invalid service_name: {:?}", self.service_name));
        }
        self.pool.validate()?;
        self.udp.validate()
    }
}

/// Default UDP idle timeout in seconds
fn default_idle_timeout() -> u64 {
    600
}

/// Default depth of the per-association datagram queue
fn default_queue_size() -> usize {
    64
}

/// Default bind IP of the per-association UDP socket
fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// UDP ASSOCIATE configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UdpConfig {
    /// Idle timeout in seconds after which an association is torn down
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Maximum number of datagrams queued for the stream writer
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Local IP the relay's UDP socket binds to
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            idle_timeout: default_idle_timeout(),
            queue_size: default_queue_size(),
            bind_ip: default_bind_ip(),
        }
    }
}

impl UdpConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout == 0 {
            return Err("udp idle_timeout must be greater than 0".to_string());
        }
        if self.queue_size == 0 {
            return Err("udp queue_size must be greater than 0".to_string());
        }
        Ok(())
    }
}
