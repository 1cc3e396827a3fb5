//! RESP frame model and incremental parser.
//!
//! Covers the RESP2 frame types a request/response exchange with a
//! key-value server needs. The parser is used by the mock target to split
//! incoming requests and by tests to decode what the encoder produced.

use bytes::{Bytes, BytesMut};

/// RESP frame types
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string: +OK\r\n
    Simple(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n or $-1\r\n (null)
    Bulk(Option<Bytes>),
    /// Array: *2\r\n... or *-1\r\n (null)
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Encode a frame to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode a frame into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(s) => write_line(buf, b'+', s.as_bytes()),
            Frame::Error(s) => write_line(buf, b'-', s.as_bytes()),
            Frame::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            Frame::Bulk(None) => buf.extend_from_slice(b"$-1\r\n"),
            Frame::Bulk(Some(data)) => {
                write_line(buf, b'$', data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
            Frame::Array(Some(frames)) => {
                write_line(buf, b'*', frames.len().to_string().as_bytes());
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    pub fn simple<S: Into<String>>(s: S) -> Frame {
        Frame::Simple(s.into())
    }

    pub fn error<S: Into<String>>(s: S) -> Frame {
        Frame::Error(s.into())
    }

    /// Null bulk string, the reply to a GET miss
    pub fn null() -> Frame {
        Frame::Bulk(None)
    }

    pub fn bulk<B: Into<Bytes>>(data: B) -> Frame {
        Frame::Bulk(Some(data.into()))
    }

    /// Borrow the payload of a non-null bulk string
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.extend_from_slice(&[prefix]);
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\r\n");
}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed a frame with bytes consumed
    Complete(Frame, usize),
    /// Need more data
    Incomplete,
    /// Parse error
    Error(String),
}

/// Parse a RESP frame from the front of a buffer
pub fn parse(buffer: &[u8]) -> ParseResult {
    let Some(&kind) = buffer.first() else {
        return ParseResult::Incomplete;
    };

    let Some(line_end) = find_crlf(buffer) else {
        return ParseResult::Incomplete;
    };
    let line = match std::str::from_utf8(&buffer[1..line_end]) {
        Ok(s) => s,
        Err(_) => return ParseResult::Error("Invalid UTF-8 in frame header".to_string()),
    };
    let after_line = line_end + 2;

    match kind {
        b'+' => ParseResult::Complete(Frame::Simple(line.to_string()), after_line),
        b'-' => ParseResult::Complete(Frame::Error(line.to_string()), after_line),
        b':' => match line.parse::<i64>() {
            Ok(n) => ParseResult::Complete(Frame::Integer(n), after_line),
            Err(_) => ParseResult::Error(format!("Invalid integer: {line}")),
        },
        b'$' => match parse_length(line, "bulk string") {
            Ok(None) => ParseResult::Complete(Frame::Bulk(None), after_line),
            Ok(Some(len)) => parse_bulk_body(buffer, after_line, len),
            Err(e) => ParseResult::Error(e),
        },
        b'*' => match parse_length(line, "array") {
            Ok(None) => ParseResult::Complete(Frame::Array(None), after_line),
            Ok(Some(len)) => parse_array_items(buffer, after_line, len),
            Err(e) => ParseResult::Error(e),
        },
        other => ParseResult::Error(format!("Unknown frame type: {}", other as char)),
    }
}

/// Find CRLF in buffer, return position of \r
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Negative lengths denote a null bulk string or array
fn parse_length(line: &str, what: &str) -> Result<Option<usize>, String> {
    let len: i64 = line
        .parse()
        .map_err(|_| format!("Invalid {what} length: {line}"))?;
    Ok(usize::try_from(len).ok())
}

fn parse_bulk_body(buffer: &[u8], start: usize, len: usize) -> ParseResult {
    let end = start + len;
    let total = end + 2;

    if buffer.len() < total {
        return ParseResult::Incomplete;
    }
    if &buffer[end..total] != b"\r\n" {
        return ParseResult::Error("Bulk string missing trailing CRLF".to_string());
    }

    let data = Bytes::copy_from_slice(&buffer[start..end]);
    ParseResult::Complete(Frame::Bulk(Some(data)), total)
}

fn parse_array_items(buffer: &[u8], start: usize, len: usize) -> ParseResult {
    let mut offset = start;
    let mut frames = Vec::with_capacity(len.min(64));

    for _ in 0..len {
        match parse(&buffer[offset..]) {
            ParseResult::Complete(frame, consumed) => {
                frames.push(frame);
                offset += consumed;
            }
            other => return other,
        }
    }

    ParseResult::Complete(Frame::Array(Some(frames)), offset)
}
