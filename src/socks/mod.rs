//! SOCKS5 front-end for grpc-socks
//!
//! Accepted client connections are negotiated here and relayed over the
//! remote tunnel: CONNECT as a byte stream, UDP ASSOCIATE as datagrams.

mod command;
mod consts;
mod handler;
mod tcp_relay;
mod types;
mod udp;

pub use command::{build_reply, handshake, read_target_addr, send_success};
pub use consts::*;
pub use handler::{handle_connection, RelayContext};
pub use tcp_relay::{handle_tcp_connect, relay_tcp};
pub use types::{SocksCommand, TargetAddr};
pub use udp::{
    encode_udp_packet, handle_udp_associate, parse_udp_packet, relay_udp, InboundDatagram,
    UdpPacket, UdpRelayOpts,
};
