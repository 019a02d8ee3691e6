//! UDP packet encoding/decoding for SOCKS5
//!
//! Handles the encapsulation format for UDP packets in SOCKS5.

use crate::socks::types::TargetAddr;
use anyhow::{bail, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// RSV + FRAG
const HEADER_LEN: usize = 3;

/// UDP packet structure for SOCKS5
///
/// # UDP Request/Response Format
///
/// ```text
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
/// ```
#[derive(Debug, Clone)]
pub struct UdpPacket {
    /// Fragment number (0 for standalone packets)
    pub frag: u8,
    /// Target/source address
    pub addr: TargetAddr,
    /// Packet data
    pub data: Bytes,
}

impl UdpPacket {
    /// Create a new UDP packet
    pub fn new(addr: TargetAddr, data: Bytes) -> Self {
        UdpPacket {
            frag: 0,
            addr,
            data,
        }
    }

    /// Check if this is a fragmented packet
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }
}

/// Parse a UDP packet from a received datagram
///
/// The RSV field is not checked.
pub fn parse_udp_packet(data: &[u8]) -> Result<UdpPacket> {
    if data.len() < HEADER_LEN + 1 {
        bail!("UDP packet too short: {} bytes", data.len());
    }

    let frag = data[2];
    let (addr, consumed) = TargetAddr::read_from(&data[HEADER_LEN..])?;
    let payload = &data[HEADER_LEN + consumed..];

    Ok(UdpPacket {
        frag,
        addr,
        data: Bytes::copy_from_slice(payload),
    })
}

/// Encode a UDP packet to bytes
pub fn encode_udp_packet(packet: &UdpPacket) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(HEADER_LEN + packet.addr.serialized_len() + packet.data.len());

    buf.put_u16(0);
    buf.put_u8(packet.frag);
    buf.extend_from_slice(&packet.addr.to_bytes());
    buf.extend_from_slice(&packet.data);

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::consts::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_encode_udp_packet_ipv4() {
        let addr = TargetAddr::ipv4(Ipv4Addr::new(10, 0, 0, 1), 80);
        let packet = UdpPacket::new(addr, Bytes::from_static(b"test"));

        let encoded = encode_udp_packet(&packet);

        // RSV (2) + FRAG (1) + ATYP (1) + IPv4 (4) + PORT (2) + DATA (4)
        assert_eq!(encoded.len(), 2 + 1 + 1 + 4 + 2 + 4);
        assert_eq!(&encoded[0..3], &[0, 0, 0]);
        assert_eq!(encoded[3], SOCKS5_ADDR_TYPE_IPV4);
        assert_eq!(&encoded[10..], b"test");
    }

    #[test]
    fn test_parse_udp_packet_domain() {
        let mut raw = vec![0, 0, 0, SOCKS5_ADDR_TYPE_DOMAIN, 11];
        raw.extend_from_slice(b"example.com");
        raw.extend_from_slice(&53u16.to_be_bytes());
        raw.extend_from_slice(b"X");

        let packet = parse_udp_packet(&raw).unwrap();
        assert!(!packet.is_fragmented());
        assert_eq!(packet.addr.to_string(), "example.com:53");
        assert_eq!(&packet.data[..], b"X");
    }

    #[test]
    fn test_parse_encoded_packet() {
        let addr = TargetAddr::domain("dns.local".to_string(), 5353);
        let packet = UdpPacket::new(addr.clone(), Bytes::from_static(b"query"));

        let parsed = parse_udp_packet(&encode_udp_packet(&packet)).unwrap();
        assert_eq!(parsed.addr, addr);
        assert_eq!(&parsed.data[..], b"query");
    }

    #[test]
    fn test_parse_empty_payload() {
        let addr = TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 9);
        let packet = UdpPacket::new(addr, Bytes::new());

        let parsed = parse_udp_packet(&encode_udp_packet(&packet)).unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_parse_fragmented() {
        let mut raw = vec![0, 0, 1, SOCKS5_ADDR_TYPE_IPV4, 127, 0, 0, 1, 0, 53];
        raw.extend_from_slice(b"part");

        let packet = parse_udp_packet(&raw).unwrap();
        assert!(packet.is_fragmented());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse_udp_packet(&[0, 0, 0]).is_err());
        assert!(parse_udp_packet(&[0, 0, 0, SOCKS5_ADDR_TYPE_IPV4, 1, 2]).is_err());
    }

    #[test]
    fn test_parse_unknown_addr_type() {
        assert!(parse_udp_packet(&[0, 0, 0, 0x07, 1, 2, 3, 4, 0, 80]).is_err());
    }
}
