//! Newline-delimited framing for MCP stdio streams
//!
//! Wraps `LinesCodec` so that a bad line (not UTF-8, or longer than the
//! limit) comes out as a frame rather than a stream error. `FramedRead`
//! stops after the first error, and one bad line must not end a session.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Upper bound for a single JSON-RPC message
pub const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    NotUtf8,
    TooLong,
}

#[derive(Debug)]
pub struct JsonLinesCodec {
    inner: LinesCodec,
}

impl JsonLinesCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn frame(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<Frame>> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::TooLong)),
            // LinesCodec consumes the offending line before reporting it
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Frame::NotUtf8))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLinesCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        Self::frame(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        Self::frame(self.inner.decode_eof(buf))
    }
}

impl Encoder<String> for JsonLinesCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> io::Result<()> {
        self.inner.encode(line, buf).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_utf8_line_is_skipped_not_fatal() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe garbage\n{\"ok\":1}\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::NotUtf8));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Line("{\"ok\":1}".to_string()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_over_long_line_is_reported_once() {
        let mut codec = JsonLinesCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef\n{}\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::TooLong));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Line("{}".to_string())));
    }

    #[test]
    fn test_trailing_line_at_eof() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"{\"last\":true}"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Frame::Line("{\"last\":true}".to_string()))
        );
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{}".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{}\n");
    }
}
