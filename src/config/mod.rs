//! Configuration module for grpc-socks
//!
//! This module provides configuration types and parsing for the proxy.

mod client;
mod pool;
mod transport;

pub use client::{ClientConfig, Config, UdpConfig};
pub use pool::BufferPoolConfig;
pub use transport::TcpConfig;

use crate::error::RelayError;
use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate().map_err(RelayError::Config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config_str = r#"
[client]
remote_addr = "relay.example.com:50051"
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.client.remote_addr, "relay.example.com:50051");
        assert_eq!(config.client.listen_addr, "127.0.0.1:1080");
        assert_eq!(config.client.service_name, "pb.Proxy");
        assert_eq!(config.client.pool.capacity, 2048);
        assert_eq!(config.client.pool.buffer_size, 4108);
        assert_eq!(config.client.udp.idle_timeout, 600);
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[client]
listen_addr = "0.0.0.0:1086"
remote_addr = "10.0.0.2:8080"
service_name = "tunnel.Relay"

[client.tcp]
nodelay = false
keepalive_secs = 30
keepalive_interval = 10

[client.pool]
capacity = 16
buffer_size = 1024

[client.udp]
idle_timeout = 30
queue_size = 8
bind_ip = "127.0.0.1"
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.client.listen_addr, "0.0.0.0:1086");
        assert_eq!(config.client.service_name, "tunnel.Relay");
        assert!(!config.client.tcp.nodelay);
        assert_eq!(config.client.tcp.keepalive_secs, 30);
        assert_eq!(config.client.pool.capacity, 16);
        assert_eq!(config.client.pool.buffer_size, 1024);
        assert_eq!(config.client.udp.idle_timeout, 30);
        assert_eq!(config.client.udp.queue_size, 8);
        assert_eq!(config.client.udp.bind_ip.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_parse_invalid_config_rejected() {
        let config_str = r#"
[client]
remote_addr = "10.0.0.2:8080"

[client.pool]
buffer_size = 0
"#;

        let err = parse_config(config_str).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Config(msg)) if msg.contains("buffer_size")
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\nremote_addr = \"127.0.0.1:9000\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.client.remote_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/grpc-socks.toml");
        assert!(result.is_err());
    }
}
