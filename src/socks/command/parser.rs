//! SOCKS5 handshake and request parser
//!
//! Negotiates the authentication method and reads the client's request.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use anyhow::{Context, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Negotiate the method and read the request header
///
/// Only "no authentication" is offered. On success the stream is positioned
/// at the request's address block and the command byte is returned.
///
/// # Greeting and request header
///
/// ```text
/// +----+----------+----------+      +----+-----+-------+
/// |VER | NMETHODS | METHODS  |      |VER | CMD |  RSV  |
/// +----+----------+----------+      +----+-----+-------+
/// | 1  |    1     | 1 to 255 |      | 1  |  1  | X'00' |
/// +----+----------+----------+      +----+-----+-------+
/// ```
pub async fn handshake<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream
        .read_exact(&mut header)
        .await
        .context("Failed to read greeting")?;

    if header[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(header[0]).into());
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream
        .read_exact(&mut methods)
        .await
        .context("Failed to read auth methods")?;

    if !methods.contains(&SOCKS5_AUTH_METHOD_NONE) {
        stream
            .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE])
            .await?;
        stream.flush().await?;
        return Err(Socks5Error::NoAcceptableMethod.into());
    }

    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
        .await?;
    stream.flush().await?;

    // Request: VER CMD RSV
    let mut request = [0u8; 3];
    stream
        .read_exact(&mut request)
        .await
        .context("Failed to read request header")?;

    if request[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(request[0]).into());
    }

    Ok(request[1])
}

/// Read the request's address block
///
/// ```text
/// +------+----------+----------+
/// | ATYP | DST.ADDR | DST.PORT |
/// +------+----------+----------+
/// |  1   | Variable |    2     |
/// +------+----------+----------+
/// ```
pub async fn read_target_addr<S>(stream: &mut S) -> Result<TargetAddr>
where
    S: AsyncRead + Unpin,
{
    let addr_type = stream
        .read_u8()
        .await
        .context("Failed to read address type")?;

    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;

            Ok(TargetAddr::ipv4(Ipv4Addr::from(addr), port))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let domain_len = stream.read_u8().await? as usize;
            if domain_len == 0 {
                return Err(Socks5Error::InvalidDomain("empty domain".to_string()).into());
            }

            let mut domain_buf = vec![0u8; domain_len];
            stream.read_exact(&mut domain_buf).await?;
            let domain = String::from_utf8(domain_buf)
                .map_err(|_| Socks5Error::InvalidDomain("invalid UTF-8".to_string()))?;
            let port = stream.read_u16().await?;

            Ok(TargetAddr::domain(domain, port))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;

            Ok(TargetAddr::ipv6(Ipv6Addr::from(addr), port))
        }

        _ => Err(Socks5Error::AddressTypeNotSupported(addr_type).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::duplex;

    fn greeting(methods: &[u8]) -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, methods.len() as u8];
        bytes.extend_from_slice(methods);
        bytes
    }

    #[tokio::test]
    async fn test_handshake_no_auth() {
        let (mut client, mut server) = duplex(256);

        let mut input = greeting(&[SOCKS5_AUTH_METHOD_PASSWORD, SOCKS5_AUTH_METHOD_NONE]);
        input.extend_from_slice(&[SOCKS5_VERSION, SOCKS5_CMD_UDP_ASSOCIATE, SOCKS5_RESERVED]);
        client.write_all(&input).await.unwrap();

        let cmd = handshake(&mut server).await.unwrap();
        assert_eq!(cmd, SOCKS5_CMD_UDP_ASSOCIATE);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);
    }

    #[tokio::test]
    async fn test_handshake_returns_unknown_command() {
        let (mut client, mut server) = duplex(256);

        let mut input = greeting(&[SOCKS5_AUTH_METHOD_NONE]);
        input.extend_from_slice(&[SOCKS5_VERSION, 0x09, SOCKS5_RESERVED]);
        client.write_all(&input).await.unwrap();

        assert_eq!(handshake(&mut server).await.unwrap(), 0x09);
    }

    #[tokio::test]
    async fn test_handshake_rejects_password_only() {
        let (mut client, mut server) = duplex(256);
        client
            .write_all(&greeting(&[SOCKS5_AUTH_METHOD_PASSWORD]))
            .await
            .unwrap();

        let err = handshake(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Socks5Error>(),
            Some(Socks5Error::NoAcceptableMethod)
        ));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn test_handshake_invalid_version() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let err = handshake(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Socks5Error>(),
            Some(Socks5Error::UnsupportedVersion(4))
        ));
    }

    #[tokio::test]
    async fn test_handshake_truncated() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[SOCKS5_VERSION]).await.unwrap();
        drop(client);

        assert!(handshake(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_read_target_addr_ipv4() {
        let mut cursor = Cursor::new(vec![SOCKS5_ADDR_TYPE_IPV4, 192, 168, 1, 1, 0x1F, 0x90]);
        let addr = read_target_addr(&mut cursor).await.unwrap();
        assert_eq!(addr.to_string(), "192.168.1.1:8080");
    }

    #[tokio::test]
    async fn test_read_target_addr_domain() {
        let addr = TargetAddr::domain("example.com".to_string(), 443);
        let mut cursor = Cursor::new(addr.to_bytes());
        assert_eq!(read_target_addr(&mut cursor).await.unwrap(), addr);
    }

    #[tokio::test]
    async fn test_read_target_addr_ipv6() {
        let addr = TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 80);
        let mut cursor = Cursor::new(addr.to_bytes());
        let parsed = read_target_addr(&mut cursor).await.unwrap();
        assert_eq!(parsed.to_string(), "[::1]:80");
    }

    #[tokio::test]
    async fn test_read_target_addr_unknown_type() {
        let mut cursor = Cursor::new(vec![0x05, 0, 0]);
        let err = read_target_addr(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Socks5Error>(),
            Some(Socks5Error::AddressTypeNotSupported(5))
        ));
    }

    #[tokio::test]
    async fn test_read_target_addr_empty_domain() {
        let mut cursor = Cursor::new(vec![SOCKS5_ADDR_TYPE_DOMAIN, 0, 0, 80]);
        assert!(read_target_addr(&mut cursor).await.is_err());
    }
}
