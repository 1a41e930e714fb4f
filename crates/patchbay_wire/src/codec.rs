//! Length-value frame codec.
//!
//! Layout, big-endian 4-byte integers:
//!
//! ```text
//! | total_len (4) | kind (4) | id_len (4) | id (id_len) | body (rest) |
//! ```
//!
//! `total_len` counts every byte after itself, so a frame occupies
//! `4 + total_len` bytes on the wire. The body is UTF-8 JSON.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::kinds::MessageKind;
use crate::message::Message;

/// Default cap on buffered undecoded bytes before the connection is dropped.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

const HEADER_LEN: usize = 4;
// kind + id_len, the fixed part counted inside total_len.
const FIXED_BODY_PREFIX: usize = 8;

/// Frame-level failures. Any of these is unrecoverable for the connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
    #[error("frame length {total_len} cannot hold its own header")]
    TruncatedFrame { total_len: u32 },
    #[error("id length {id_len} exceeds frame length {total_len}")]
    BadIdLength { id_len: u32, total_len: u32 },
    #[error("message id is not valid UTF-8")]
    BadId,
    #[error("message body is not valid JSON: {0}")]
    BadBody(#[source] serde_json::Error),
    #[error("read buffer exceeded {cap} bytes without a complete frame")]
    BufferOverflow { cap: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Length-value codec over a byte stream; plugs into `FramedRead`/`FramedWrite`.
#[derive(Clone, Debug)]
pub struct LvCodec {
    max_buffer: usize,
}

impl LvCodec {
    pub fn new() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    /// Overrides the buffer cap. Values below the default are pinned to it.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            max_buffer: max_buffer.max(DEFAULT_MAX_BUFFER),
        }
    }

    /// Whether `src` holds at least one complete frame.
    pub fn frame_ready(src: &BytesMut) -> bool {
        if src.len() < HEADER_LEN {
            return false;
        }
        let total_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        src.len() >= HEADER_LEN + total_len
    }

    /// Encodes one frame into a fresh buffer.
    pub fn encode_frame(msg: &Message) -> Result<BytesMut, WireError> {
        let mut buf = BytesMut::new();
        LvCodec::new().encode(msg, &mut buf)?;
        Ok(buf)
    }
}

impl Default for LvCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LvCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if !Self::frame_ready(src) {
            // Garbage protection: a peer that streams bytes without ever
            // completing a frame must not grow the buffer unboundedly.
            if src.len() > self.max_buffer {
                return Err(WireError::BufferOverflow {
                    cap: self.max_buffer,
                });
            }
            return Ok(None);
        }

        let total_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if (total_len as usize) < FIXED_BODY_PREFIX {
            return Err(WireError::TruncatedFrame { total_len });
        }

        let mut frame = src.split_to(HEADER_LEN + total_len as usize);
        frame.advance(HEADER_LEN);
        let kind_code = frame.get_u32();
        let id_len = frame.get_u32();
        if id_len as usize + FIXED_BODY_PREFIX > total_len as usize {
            return Err(WireError::BadIdLength { id_len, total_len });
        }

        let kind = MessageKind::from_code(kind_code).ok_or(WireError::UnknownKind(kind_code))?;
        let id_bytes = frame.split_to(id_len as usize);
        let id = std::str::from_utf8(&id_bytes)
            .map_err(|_| WireError::BadId)?
            .to_string();
        let body: Value = serde_json::from_slice(&frame).map_err(|err| {
            warn!(kind = kind.as_str(), %err, "frame body is not valid JSON");
            WireError::BadBody(err)
        })?;

        Ok(Some(Message::from_parts(kind, id, body)))
    }
}

impl<'a> Encoder<&'a Message> for LvCodec {
    type Error = WireError;

    fn encode(&mut self, msg: &'a Message, dst: &mut BytesMut) -> Result<(), WireError> {
        let body = serde_json::to_vec(msg.body()).map_err(WireError::BadBody)?;
        let id = msg.id().as_bytes();
        let total_len = FIXED_BODY_PREFIX + id.len() + body.len();

        dst.reserve(HEADER_LEN + total_len);
        dst.put_u32(total_len as u32);
        dst.put_u32(msg.kind().code());
        dst.put_u32(id.len() as u32);
        dst.put_slice(id);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::ResponseCode;
    use crate::message::{RpcRequest, RpcResponse};
    use serde_json::json;

    fn sample_request() -> Message {
        Message::from(RpcRequest::new("Add", json!({ "num1": 90, "num2": 10 })).with_id("req-1"))
    }

    #[test]
    fn frame_round_trips_field_wise() {
        let msg = sample_request();
        let mut buf = LvCodec::encode_frame(&msg).unwrap();

        let decoded = LvCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn total_len_counts_kind_id_len_id_and_body() {
        let msg = sample_request();
        let buf = LvCodec::encode_frame(&msg).unwrap();

        let total_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let body_len = msg.serialize_body().len();
        assert_eq!(total_len, 8 + "req-1".len() + body_len);
        assert_eq!(buf.len(), 4 + total_len);
    }

    #[test]
    fn two_concatenated_frames_decode_in_order() {
        let first = sample_request();
        let second = Message::from(RpcResponse::new("req-1", ResponseCode::Ok, json!(100)));

        let mut buf = LvCodec::encode_frame(&first).unwrap();
        buf.extend_from_slice(&LvCodec::encode_frame(&second).unwrap());

        let mut codec = LvCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let frame = LvCodec::encode_frame(&sample_request()).unwrap();
        let mut codec = LvCodec::new();

        let mut buf = BytesMut::from(&frame[..frame.len() - 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[frame.len() - 3..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn unknown_kind_is_a_parse_failure() {
        let mut frame = LvCodec::encode_frame(&sample_request()).unwrap();
        frame[7] = 42;

        let err = LvCodec::new().decode(&mut frame).unwrap_err();
        assert!(matches!(err, WireError::UnknownKind(42)));
    }

    #[test]
    fn implausible_id_len_is_rejected() {
        let mut frame = LvCodec::encode_frame(&sample_request()).unwrap();
        // id_len far larger than the frame itself.
        frame[8..12].copy_from_slice(&u32::MAX.to_be_bytes());

        let err = LvCodec::new().decode(&mut frame).unwrap_err();
        assert!(matches!(err, WireError::BadIdLength { .. }));
    }

    #[test]
    fn non_json_body_is_rejected() {
        let msg = sample_request();
        let id = msg.id().as_bytes();
        let body = b"not json";
        let mut buf = BytesMut::new();
        buf.put_u32((8 + id.len() + body.len()) as u32);
        buf.put_u32(msg.kind().code());
        buf.put_u32(id.len() as u32);
        buf.put_slice(id);
        buf.put_slice(body);

        let err = LvCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::BadBody(_)));
    }

    #[test]
    fn garbage_past_the_cap_overflows() {
        let mut codec = LvCodec::new();
        // A header promising a frame the peer never completes.
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        buf.extend_from_slice(&vec![0u8; DEFAULT_MAX_BUFFER + 1]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::BufferOverflow { .. }));
    }
}
