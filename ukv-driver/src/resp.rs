//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses without
//! external dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{BufRead, Read};

use ukv_common::{Error, Result, Value};

/// Largest bulk reply accepted, matching the store's own string limit.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest element count accepted for one array reply.
const MAX_ARRAY_LEN: i64 = 1024 * 1024 * 1024;
/// Deepest array nesting accepted.
const MAX_DEPTH: usize = 64;
/// Upper bound on memory reserved up front from a length header.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Value> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>, depth: usize) -> Result<Value> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(Error::Protocol("empty reply line".into()));
    }

    match line_buf[0] {
        b'+' => Ok(Value::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(Value::Error(line_buf[1..].to_vec())),
        b':' => Ok(Value::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf, depth)
        }
        other => Err(Error::Protocol(format!("unknown reply prefix {:?}", other as char))),
    }
}

fn parse_bulk_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> Result<Value> {
    if len < 0 {
        return Ok(Value::Nil);
    }
    if len > MAX_BULK_LEN {
        return Err(Error::Protocol(format!("bulk length {} exceeds limit", len)));
    }
    let len = len as usize;
    // Grow with the bytes actually received rather than trusting the header.
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() < len {
        return Err(Error::connection("connection closed inside a bulk reply"));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(Error::Protocol("bulk string missing CRLF".into()));
    }

    line_buf.clear();
    Ok(Value::Bulk(data))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> Result<Value> {
    if len < 0 {
        return Ok(Value::Nil);
    }
    if len > MAX_ARRAY_LEN {
        return Err(Error::Protocol(format!("array length {} exceeds limit", len)));
    }
    if depth >= MAX_DEPTH {
        return Err(Error::Protocol("array nesting too deep".into()));
    }

    let mut items = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT / 16));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1)?);
    }
    Ok(Value::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(Error::connection("connection closed by peer"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(Error::Protocol("reply line missing CRLF".into()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64> {
    if data.is_empty() {
        return Err(Error::Protocol("empty integer".into()));
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(Error::Protocol("invalid integer".into()));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &[u8]) -> Result<Value> {
        let mut reader = Cursor::new(raw.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[&b"GET"[..], &b"app:key"[..]], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$7\r\napp:key\r\n");
    }

    #[test]
    fn parses_null_bulk_and_null_array_as_nil() {
        assert_eq!(parse(b"$-1\r\n").unwrap(), Value::Nil);
        assert_eq!(parse(b"*-1\r\n").unwrap(), Value::Nil);
    }

    #[test]
    fn parses_nested_array() {
        let value = parse(b"*2\r\n:1\r\n*1\r\n$1\r\na\r\n").unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Integer(1),
                Value::Array(vec![Value::Bulk(b"a".to_vec())]),
            ])
        );
    }

    #[test]
    fn parses_error_reply_as_value() {
        let value = parse(b"-WRONGTYPE Operation against a key\r\n").unwrap();
        assert_eq!(value, Value::Error(b"WRONGTYPE Operation against a key".to_vec()));
    }

    #[test]
    fn rejects_unknown_prefix() {
        let err = parse(b"?what\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn eof_is_a_connection_error() {
        let err = parse(b"").unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn oversized_length_headers_are_protocol_errors() {
        let err = parse(b"$9223372036854775000\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
        let err = parse(b"*9223372036854775000\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
    }

    #[test]
    fn truncated_bulk_does_not_trust_its_header() {
        let err = parse(b"$400000000\r\nabc").unwrap_err();
        assert!(err.is_connection(), "got {:?}", err);
    }

    #[test]
    fn large_array_header_with_few_items_fails_cleanly() {
        let err = parse(b"*100000000\r\n:1\r\n").unwrap_err();
        assert!(err.is_connection(), "got {:?}", err);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let raw = b"*1\r\n".repeat(MAX_DEPTH + 1);
        let err = parse(&raw).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
    }

    #[test]
    fn parses_negative_integer() {
        assert_eq!(parse(b":-2\r\n").unwrap(), Value::Integer(-2));
    }
}
