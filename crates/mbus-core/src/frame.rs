//! Wire framing
//!
//! Each frame on the wire is a 4-byte big-endian unsigned length prefix
//! followed by exactly that many bytes of UTF-8 JSON envelope text.
//! Decoding accumulates bytes and yields complete envelopes; a partial
//! frame stays buffered until more bytes arrive.

use crate::method::Method;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Length prefix size
pub const HEADER_SIZE: usize = 4;

/// Upper bound on a single frame body
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Encode one envelope into a length-prefixed frame
pub fn encode(method: &Method) -> Result<Bytes> {
    let body = serde_json::to_vec(method).map_err(|e| Error::EncodeError(e.to_string()))?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Accumulating frame decoder
#[derive(Debug, Default)]
pub struct Framer {
    buffer: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes to the decode buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete envelope, if one is buffered
    ///
    /// Returns `Ok(None)` when the buffer holds less than one full frame.
    /// A body that is not valid envelope JSON, or whose `type` tag is
    /// unknown, is an error; the connection cannot resynchronize past it.
    pub fn next(&mut self) -> Result<Option<Method>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(length));
        }
        if self.buffer.len() < HEADER_SIZE + length {
            return Ok(None);
        }
        self.buffer.advance(HEADER_SIZE);
        let body = self.buffer.split_to(length);
        let method = serde_json::from_slice(&body).map_err(|e| Error::DecodeError(e.to_string()))?;
        Ok(Some(method))
    }

    /// Number of buffered, not yet decoded bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{CommandMethod, EventMethod};
    use serde_json::json;

    fn command() -> Method {
        Method::Command(CommandMethod {
            destination: crate::SERVER_IDENTIFIER.to_string(),
            identifier: crate::SERVER_COMMAND_SUBSCRIBE.to_string(),
            sequence: 7,
            payload: json!({ "source": crate::METHOD_EVENT_SOURCE_ALL, "event": "example" }),
            timeout: Some(30000),
        })
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let method = command();
        let encoded = encode(&method).unwrap();

        let mut framer = Framer::new();
        framer.extend(&encoded);
        let decoded = framer.next().unwrap().unwrap();

        assert_eq!(decoded, method);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let encoded = encode(&command()).unwrap();

        let mut framer = Framer::new();
        framer.extend(&encoded[..3]);
        assert!(framer.next().unwrap().is_none());

        framer.extend(&encoded[3..10]);
        assert!(framer.next().unwrap().is_none());

        framer.extend(&encoded[10..]);
        assert!(framer.next().unwrap().is_some());
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let event = Method::Event(EventMethod {
            source: None,
            destination: Some(crate::METHOD_EVENT_DESTINATION_SUBSCRIBERS.to_string()),
            identifier: "example".to_string(),
            sequence: Some(8),
            payload: json!(null),
            timeout: Some(30000),
        });

        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&encode(&command()).unwrap());
        bytes.extend_from_slice(&encode(&event).unwrap());

        let mut framer = Framer::new();
        framer.extend(&bytes);
        assert!(matches!(framer.next().unwrap(), Some(Method::Command(_))));
        assert_eq!(framer.next().unwrap(), Some(event));
        assert_eq!(framer.next().unwrap(), None);
    }

    #[test]
    fn test_invalid_body_is_fatal() {
        let body = b"not json";
        let mut framer = Framer::new();
        framer.extend(&(body.len() as u32).to_be_bytes());
        framer.extend(body);
        assert!(framer.next().is_err());
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let body = br#"{"type":"org.mbus.method.type.bogus","identifier":"x"}"#;
        let mut framer = Framer::new();
        framer.extend(&(body.len() as u32).to_be_bytes());
        framer.extend(body);
        assert!(framer.next().is_err());
    }

    #[test]
    fn test_oversized_length_is_fatal() {
        let mut framer = Framer::new();
        framer.extend(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        assert!(framer.next().is_err());
    }
}
