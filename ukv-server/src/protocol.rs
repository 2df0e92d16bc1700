//! # RESP2 Request Framing
//!
//! Purpose: Pull complete client requests out of a growing read buffer and
//! encode replies back onto the wire.
//!
//! ## Design Principles
//! 1. **Incremental**: `parse` returns `Ok(None)` until a whole request is
//!    buffered and consumes nothing in that case.
//! 2. **Bounded**: Argument counts and bulk lengths are capped so a hostile
//!    client cannot make the server allocate without limit.
//! 3. **Inline Friendly**: A bare text line is split on whitespace, so
//!    `PING` typed into a terminal works.

use bytes::{Buf, BufMut, BytesMut};

use ukv_common::Value;

const MAX_ARGS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;

/// Framing failure; the connection cannot be resynchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespError {
    Protocol(&'static str),
}

impl std::fmt::Display for RespError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RespError::Protocol(reason) => write!(f, "Protocol error: {}", reason),
        }
    }
}

impl std::error::Error for RespError {}

/// Incremental request parser.
#[derive(Debug)]
pub struct RespParser {
    max_bulk_len: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    pub fn new() -> Self {
        RespParser {
            max_bulk_len: MAX_BULK_LEN,
        }
    }

    /// Parses one request from the front of `buf`, advancing past it.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let parsed = if buf[0] == b'*' {
            self.parse_multibulk(buf)?
        } else {
            parse_inline(buf)?
        };
        match parsed {
            Some((args, consumed)) => {
                buf.advance(consumed);
                Ok(Some(args))
            }
            None => Ok(None),
        }
    }

    fn parse_multibulk(&self, buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
        let Some((header, mut pos)) = read_line(buf, 0) else {
            return Ok(None);
        };
        let count = parse_len(&header[1..])?;
        if count > MAX_ARGS {
            return Err(RespError::Protocol("invalid multibulk length"));
        }
        let mut args = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let Some((line, next)) = read_line(buf, pos) else {
                return Ok(None);
            };
            if line.first() != Some(&b'$') {
                return Err(RespError::Protocol("expected '$'"));
            }
            let len = parse_len(&line[1..])?;
            if len > self.max_bulk_len {
                return Err(RespError::Protocol("invalid bulk length"));
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(RespError::Protocol("bulk not terminated by CRLF"));
            }
            args.push(buf[next..end].to_vec());
            pos = end + 2;
        }
        Ok(Some((args, pos)))
    }
}

/// Returns the line starting at `from` (without CRLF) and the offset after it.
fn read_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(from..)?;
    let idx = rest.windows(2).position(|pair| pair == b"\r\n")?;
    Some((&rest[..idx], from + idx + 2))
}

fn parse_len(raw: &[u8]) -> Result<usize, RespError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(RespError::Protocol("invalid length"))
}

fn parse_inline(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_LEN {
            return Err(RespError::Protocol("too big inline request"));
        }
        return Ok(None);
    };
    let line = &buf[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Ok(Some((args, newline + 1)))
}

/// Appends the RESP2 encoding of `value` to `out`.
pub fn write_value(out: &mut BytesMut, value: &Value) {
    match value {
        Value::Nil => out.put_slice(b"$-1\r\n"),
        Value::Simple(text) => {
            out.put_u8(b'+');
            out.put_slice(text);
            out.put_slice(b"\r\n");
        }
        Value::Error(text) => {
            out.put_u8(b'-');
            out.put_slice(text);
            out.put_slice(b"\r\n");
        }
        Value::Integer(n) => {
            out.put_u8(b':');
            out.put_slice(n.to_string().as_bytes());
            out.put_slice(b"\r\n");
        }
        Value::Bulk(data) => {
            out.put_u8(b'$');
            out.put_slice(data.len().to_string().as_bytes());
            out.put_slice(b"\r\n");
            out.put_slice(data);
            out.put_slice(b"\r\n");
        }
        Value::Array(items) => {
            out.put_u8(b'*');
            out.put_slice(items.len().to_string().as_bytes());
            out.put_slice(b"\r\n");
            for item in items {
                write_value(out, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipelined_requests_one_at_a_time() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), Some(vec![b"PING".to_vec()]));
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(vec![b"GET".to_vec(), b"k".to_vec()])
        );
        assert!(buf.is_empty());
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn waits_for_partial_frames_without_consuming() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nSET\r\n$5\r\nhel"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 20);
        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(vec![b"SET".to_vec(), b"hello".to_vec()])
        );
    }

    #[test]
    fn inline_commands_split_on_whitespace() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"SET  k v\r\n"[..]);
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()])
        );
    }

    #[test]
    fn rejects_bad_framing() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n:5\r\n"[..]);
        assert!(parser.parse(&mut buf).is_err());
        let mut buf = BytesMut::from(&b"*x\r\n"[..]);
        assert!(parser.parse(&mut buf).is_err());
    }

    #[test]
    fn encodes_nested_values() {
        let mut out = BytesMut::new();
        write_value(
            &mut out,
            &Value::Array(vec![Value::Integer(1), Value::Nil, Value::bulk("x")]),
        );
        assert_eq!(&out[..], b"*3\r\n:1\r\n$-1\r\n$1\r\nx\r\n");
    }
}
