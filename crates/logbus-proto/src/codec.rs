//! Length-prefixed frame codec.
//!
//! The wire stream is a sequence of frames, each prefixed by a 4-byte
//! big-endian total length that includes the prefix itself. [`FrameParser`]
//! is the receive side: a purely byte-driven accumulator that never blocks
//! and yields complete frames as they materialize. Parser state is
//! per-connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    frame::Frame,
};

/// Size of the length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default cap on a single frame's total length (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode a frame to its wire form: length prefix plus CBOR body.
///
/// # Errors
///
/// - [`ProtocolError::FrameTooLarge`] if the encoded frame exceeds
///   [`DEFAULT_MAX_FRAME_SIZE`]
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let payload = frame.encode_payload()?;
    let total = payload.len() + LEN_PREFIX_SIZE;

    if total > DEFAULT_MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: total, max: DEFAULT_MAX_FRAME_SIZE });
    }

    let mut out = BytesMut::with_capacity(total);
    out.put_u32(total as u32);
    out.put_slice(&payload);
    Ok(out.freeze())
}

/// Streaming receive-side parser.
///
/// Feed raw bytes in as they arrive, then drain complete frames:
///
/// ```
/// use logbus_proto::{Frame, FrameParser, encode_frame};
///
/// let wire = encode_frame(&Frame::new("PING")).unwrap();
/// let mut parser = FrameParser::default();
/// parser.feed(&wire);
/// assert_eq!(parser.next_frame().unwrap().unwrap().kind(), "PING");
/// assert!(parser.next_frame().unwrap().is_none());
/// ```
///
/// # Errors
///
/// A length prefix below the minimum or above the configured maximum, or an
/// undecodable body, is fatal: the parser is in an unrecoverable position in
/// the stream and the caller must close the connection.
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameParser {
    /// Create a parser with an explicit frame size cap.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { buf: BytesMut::with_capacity(4096), max_frame_size }
    }

    /// Append received bytes to the accumulation buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        let total = {
            let mut prefix = &self.buf[..LEN_PREFIX_SIZE];
            prefix.get_u32() as usize
        };

        // The prefix counts itself; a frame must carry at least one body byte.
        if total <= LEN_PREFIX_SIZE {
            return Err(ProtocolError::FrameTooShort(total));
        }
        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: total, max: self.max_frame_size });
        }

        if self.buf.len() < total {
            return Ok(None);
        }

        let wire = self.buf.split_to(total);
        Frame::decode_payload(&wire[LEN_PREFIX_SIZE..]).map(Some)
    }

    /// Bytes currently buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Record, frame::kind};

    #[test]
    fn parse_single_frame() {
        let frame = Frame::publish("orders", Record::new().put("id", 1));
        let wire = encode_frame(&frame).unwrap();

        let mut parser = FrameParser::default();
        parser.feed(&wire);

        assert_eq!(parser.next_frame().unwrap(), Some(frame));
        assert_eq!(parser.next_frame().unwrap(), None);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn parse_across_arbitrary_splits() {
        let first = Frame::publish("orders", Record::new().put("id", 1));
        let second = Frame::new(kind::PING);

        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(&first).unwrap());
        wire.extend_from_slice(&encode_frame(&second).unwrap());

        // One byte at a time: frames appear exactly when complete.
        let mut parser = FrameParser::default();
        let mut parsed = Vec::new();
        for byte in &wire {
            parser.feed(std::slice::from_ref(byte));
            while let Some(frame) = parser.next_frame().unwrap() {
                parsed.push(frame);
            }
        }

        assert_eq!(parsed, vec![first, second]);
    }

    #[test]
    fn reject_undersized_length() {
        let mut parser = FrameParser::default();
        parser.feed(&3u32.to_be_bytes());

        assert_eq!(parser.next_frame(), Err(ProtocolError::FrameTooShort(3)));
    }

    #[test]
    fn reject_oversized_length() {
        let mut parser = FrameParser::new(1024);
        parser.feed(&2048u32.to_be_bytes());

        assert_eq!(
            parser.next_frame(),
            Err(ProtocolError::FrameTooLarge { size: 2048, max: 1024 })
        );
    }

    #[test]
    fn incomplete_frame_yields_none() {
        let wire = encode_frame(&Frame::new(kind::CONNECT)).unwrap();

        let mut parser = FrameParser::default();
        parser.feed(&wire[..wire.len() - 1]);
        assert_eq!(parser.next_frame().unwrap(), None);

        parser.feed(&wire[wire.len() - 1..]);
        assert_eq!(parser.next_frame().unwrap().unwrap().kind(), kind::CONNECT);
    }
}
