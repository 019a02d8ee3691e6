//! # grpc-socks - SOCKS5 over gRPC streams
//!
//! A local SOCKS5 proxy that tunnels every client connection to a remote
//! relay over one bidirectional streaming gRPC call.
//!
//! ## Features
//!
//! - **TCP CONNECT**: raw bytes relayed as stream frames
//! - **UDP ASSOCIATE**: client datagrams relayed as frames, replies sent back
//!   to the latest client address
//! - **Buffer Pooling**: fixed-size upstream buffers reused across sessions
//! - **Pluggable Tunnel**: gRPC over HTTP/2, or in-process for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grpc_socks::config::load_config;
//! use grpc_socks::server::run_server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_server(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The first frame of every stream is the destination as `host:port`; the
//! remaining frames carry payload in both directions.
//!
//! ```text
//! SOCKS5 Client -> grpc-socks -> gRPC relay -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod pool;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{RelayError, Socks5Error};
pub use server::run_server;

/// Version of the grpc-socks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "grpc-socks");
    }
}
