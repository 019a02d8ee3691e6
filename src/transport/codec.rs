//! gRPC message framing for stream frames
//!
//! Every frame travels as one gRPC length-prefixed message whose body is a
//! protobuf `Payload { bytes data = 1; }`.
//!
//! ```text
//! +------+------------+---------------------------+
//! | FLAG |   LENGTH   |   protobuf Payload bytes  |
//! +------+------------+---------------------------+
//! |  1   |  4 (BE)    |         LENGTH            |
//! +------+------------+---------------------------+
//! ```

use crate::error::RelayError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{encode_varint, encoded_len_varint};
use prost::Message;

/// Length of the gRPC message prefix
const GRPC_HEADER_LEN: usize = 5;

/// Largest message accepted from the remote
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Protobuf message carried by every frame
#[derive(Clone, PartialEq, Message)]
pub struct Payload {
    /// Opaque frame bytes
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
}

/// Field 1, wire type 2 (length-delimited)
const PAYLOAD_DATA_KEY: u8 = 0x0a;

/// Encode one frame as a complete gRPC message
///
/// Writes the `Payload` message by hand so `data` is copied exactly once,
/// straight into the outgoing buffer.
pub fn encode_frame(data: &[u8]) -> Bytes {
    // proto3 omits an empty bytes field
    let body_len = if data.is_empty() {
        0
    } else {
        1 + encoded_len_varint(data.len() as u64) + data.len()
    };

    let mut buf = BytesMut::with_capacity(GRPC_HEADER_LEN + body_len);
    buf.put_u8(0);
    buf.put_u32(body_len as u32);
    if !data.is_empty() {
        buf.put_u8(PAYLOAD_DATA_KEY);
        encode_varint(data.len() as u64, &mut buf);
        buf.extend_from_slice(data);
    }
    buf.freeze()
}

/// Incremental decoder for gRPC messages arriving in arbitrary chunks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Whether no partial message is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, RelayError> {
        if self.buf.len() < GRPC_HEADER_LEN {
            return Ok(None);
        }

        let mut header = &self.buf[..GRPC_HEADER_LEN];
        let compressed = header.get_u8();
        let len = header.get_u32() as usize;

        if compressed != 0 {
            return Err(RelayError::Protocol(
                "compressed gRPC messages are not supported".to_string(),
            ));
        }
        if len > MAX_MESSAGE_LEN {
            return Err(RelayError::Protocol(format!(
                "gRPC message too large: {} bytes",
                len
            )));
        }
        if self.buf.len() < GRPC_HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(GRPC_HEADER_LEN);
        let body = self.buf.split_to(len).freeze();
        let payload = Payload::decode(body)
            .map_err(|e| RelayError::Protocol(format!("invalid payload message: {}", e)))?;

        Ok(Some(payload.data))
    }
}
