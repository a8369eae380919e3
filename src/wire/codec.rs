//! Streaming frame decoder: pulls complete [`Value`]s out of a growing
//! byte buffer, enforcing the size cap from `spec.md` §6 before a
//! malicious or confused peer can make us buffer unbounded memory.

use bytes::Bytes;

use crate::error::CodecError;
use crate::wire::value::{self, Decoded, Value};

/// Maximum size, in bytes, of a single buffered message. A peer whose
/// next message would exceed this is a protocol violation, not a
/// "wait for more data" condition.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Encodes a reply or broadcast event as the shared, immutable buffer
/// `net::conn`'s write pumps and `net::listener::send_all` enqueue.
pub fn encode_message(value: &Value) -> Bytes {
    let mut buf = Vec::new();
    value::write_value(&mut buf, value);
    Bytes::from(buf)
}

/// Accumulates bytes read off a socket and yields complete [`Value`]s
/// as soon as they're available, across as many `read()`s as it takes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append freshly-read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull every complete message currently buffered. Returns `Err`
    /// and leaves the decoder unusable (the connection must be torn
    /// down) on a malformed frame or a cap violation.
    pub fn drain(&mut self) -> Result<Vec<Value>, CodecError> {
        let mut messages = Vec::new();
        loop {
            if self.buf.len() > MAX_MESSAGE_BYTES {
                return Err(CodecError::TooLarge { limit: MAX_MESSAGE_BYTES });
            }
            match value::decode_value(&self.buf).map_err(CodecError::Malformed)? {
                Decoded::Value(v, consumed) => {
                    self.buf.drain(..consumed);
                    messages.push(v);
                }
                Decoded::Incomplete => break,
            }
        }
        Ok(messages)
    }

    /// Bytes currently buffered, awaiting completion of a message.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(v: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        value::write_value(&mut buf, v);
        buf
    }

    #[test]
    fn buffers_partial_frames_across_feeds() {
        let mut dec = FrameDecoder::new();
        let frame = encode(&Value::Array(vec![Value::str("devicelist")]));
        dec.feed(&frame[..frame.len() - 1]);
        assert!(dec.drain().unwrap().is_empty());
        dec.feed(&frame[frame.len() - 1..]);
        let msgs = dec.drain().unwrap();
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn drains_multiple_messages_from_one_read() {
        let mut dec = FrameDecoder::new();
        dec.feed(&encode(&Value::UInt(1)));
        dec.feed(&encode(&Value::UInt(2)));
        dec.feed(&encode(&Value::UInt(3)));
        let msgs = dec.drain().unwrap();
        assert_eq!(msgs, vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]);
        assert_eq!(dec.buffered_len(), 0);
    }

    #[test]
    fn rejects_messages_over_the_cap() {
        let mut dec = FrameDecoder::new();
        dec.feed(&encode(&Value::Bin(vec![0u8; MAX_MESSAGE_BYTES + 1])));
        let err = dec.drain().unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { .. }));
    }

    #[test]
    fn rejects_malformed_frames() {
        let mut dec = FrameDecoder::new();
        dec.feed(&[0x80]); // fixmap, unsupported
        let err = dec.drain().unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
