//! UDP ASSOCIATE support
//!
//! SOCKS5 UDP envelope codec and the association relay.

mod associate;
mod packet;

pub use associate::{handle_udp_associate, relay_udp, InboundDatagram, UdpRelayOpts};
pub use packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
