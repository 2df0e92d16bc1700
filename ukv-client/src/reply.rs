//! # Typed Replies
//!
//! Purpose: Turn raw `Value`s into the types the client API promises. The
//! same decoders serve direct calls and batch handles, so a command decodes
//! identically whether it ran alone or inside a pipeline.
//!
//! ## Design Principles
//! 1. **Error Replies First**: Every decoder starts by converting
//!    `Value::Error` into `Error::Command`.
//! 2. **Nil Is Explicit**: Decoders either map nil to `Error::NotFound` or to
//!    an `Option`/empty collection; they never invent a zero value.
//! 3. **Shape Mismatches Are Protocol Errors**: A reply the command cannot
//!    produce is reported, not coerced.

use std::collections::HashMap;
use std::time::Duration;

use ukv_common::{Error, Result, Value};

/// Decoder signature shared by the client and batch handles.
pub(crate) type Decode<T> = fn(Value) -> Result<T>;

/// Sorted-set element with its score.
///
/// Members are sent as given and decoded as UTF-8 text on the way back. A
/// member stored by another writer as non-UTF-8 bytes fails the whole reply
/// with `Error::Protocol`; `Client::execute` returns the raw `Value` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub score: f64,
    pub member: String,
}

impl Member {
    pub fn new(score: f64, member: impl Into<String>) -> Self {
        Member {
            score,
            member: member.into(),
        }
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

fn unexpected(value: &Value) -> Error {
    Error::Protocol(format!("unexpected {} reply", value.type_name()))
}

fn utf8(data: Vec<u8>) -> Result<String> {
    String::from_utf8(data).map_err(|_| Error::Protocol("reply is not valid UTF-8".into()))
}

/// Any non-error reply.
pub(crate) fn value(reply: Value) -> Result<Value> {
    reply.into_result()
}

/// Status replies such as `+OK`.
pub(crate) fn unit(reply: Value) -> Result<()> {
    match reply.into_result()? {
        Value::Simple(_) => Ok(()),
        other => Err(unexpected(&other)),
    }
}

/// Status reply kept as text, e.g. `TYPE`.
pub(crate) fn status(reply: Value) -> Result<String> {
    match reply.into_result()? {
        Value::Simple(data) | Value::Bulk(data) => utf8(data),
        other => Err(unexpected(&other)),
    }
}

/// Bulk string; nil is `NotFound`.
pub(crate) fn string(reply: Value) -> Result<String> {
    opt_string(reply)?.ok_or(Error::NotFound)
}

/// Bulk string; nil is `None`.
pub(crate) fn opt_string(reply: Value) -> Result<Option<String>> {
    match reply.into_result()? {
        Value::Nil => Ok(None),
        Value::Bulk(data) | Value::Simple(data) => utf8(data).map(Some),
        other => Err(unexpected(&other)),
    }
}

pub(crate) fn int(reply: Value) -> Result<i64> {
    match reply.into_result()? {
        Value::Integer(n) => Ok(n),
        other => Err(unexpected(&other)),
    }
}

/// Integer; nil is `NotFound` (ranks of absent members).
pub(crate) fn rank(reply: Value) -> Result<i64> {
    match reply.into_result()? {
        Value::Nil => Err(Error::NotFound),
        Value::Integer(n) => Ok(n),
        other => Err(unexpected(&other)),
    }
}

/// `1`/`OK` are true; `0`/nil are false (`SET NX` replies nil when it loses).
pub(crate) fn boolean(reply: Value) -> Result<bool> {
    match reply.into_result()? {
        Value::Integer(n) => Ok(n != 0),
        Value::Simple(_) => Ok(true),
        Value::Nil => Ok(false),
        other => Err(unexpected(&other)),
    }
}

pub(crate) fn float(reply: Value) -> Result<f64> {
    match reply.into_result()? {
        Value::Nil => Err(Error::NotFound),
        Value::Bulk(data) | Value::Simple(data) => parse_float(&data),
        other => Err(unexpected(&other)),
    }
}

fn parse_float(raw: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(raw).unwrap_or_default();
    match text {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid float reply `{}`", text))),
    }
}

fn array(reply: Value) -> Result<Vec<Value>> {
    match reply.into_result()? {
        Value::Array(items) => Ok(items),
        Value::Nil => Ok(Vec::new()),
        other => Err(unexpected(&other)),
    }
}

pub(crate) fn strings(reply: Value) -> Result<Vec<String>> {
    array(reply)?
        .into_iter()
        .map(|item| match item {
            Value::Bulk(data) | Value::Simple(data) => utf8(data),
            other => Err(unexpected(&other)),
        })
        .collect()
}

/// Arrays with holes, e.g. `MGET`.
pub(crate) fn opt_strings(reply: Value) -> Result<Vec<Option<String>>> {
    array(reply)?.into_iter().map(opt_string).collect()
}

pub(crate) fn bools(reply: Value) -> Result<Vec<bool>> {
    array(reply)?.into_iter().map(boolean).collect()
}

/// Flat `field value field value ...` arrays.
pub(crate) fn map(reply: Value) -> Result<HashMap<String, String>> {
    let items = strings(reply)?;
    if items.len() % 2 != 0 {
        return Err(Error::Protocol("odd number of elements in map reply".into()));
    }
    let mut out = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        out.insert(field, value);
    }
    Ok(out)
}

/// `WITHSCORES` replies.
pub(crate) fn members(reply: Value) -> Result<Vec<Member>> {
    let items = array(reply)?;
    if items.len() % 2 != 0 {
        return Err(Error::Protocol("odd number of elements in score reply".into()));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        let member = match member {
            Value::Bulk(data) | Value::Simple(data) => utf8(data)?,
            other => return Err(unexpected(&other)),
        };
        out.push(Member {
            score: float(score)?,
            member,
        });
    }
    Ok(out)
}

/// `PTTL` reply.
pub(crate) fn ttl(reply: Value) -> Result<Ttl> {
    match int(reply)? {
        -2 => Ok(Ttl::Missing),
        -1 => Ok(Ttl::NoExpiry),
        ms if ms >= 0 => Ok(Ttl::ExpiresIn(Duration::from_millis(ms as u64))),
        other => Err(Error::Protocol(format!("invalid ttl reply {}", other))),
    }
}

/// `SCAN` reply: next cursor and one page of keys.
pub(crate) fn scan(reply: Value) -> Result<(u64, Vec<String>)> {
    let mut items = array(reply)?.into_iter();
    let (Some(cursor), Some(keys), None) = (items.next(), items.next(), items.next()) else {
        return Err(Error::Protocol("scan reply must have two elements".into()));
    };
    let cursor = status(cursor)?
        .parse()
        .map_err(|_| Error::Protocol("invalid scan cursor".into()))?;
    Ok((cursor, strings(keys)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_not_found_for_required_strings() {
        assert!(string(Value::Nil).unwrap_err().is_not_found());
        assert_eq!(opt_string(Value::Nil).unwrap(), None);
    }

    #[test]
    fn error_replies_keep_their_code() {
        let err = int(Value::error("WRONGTYPE Operation against a key")).unwrap_err();
        assert_eq!(err.code(), Some("WRONGTYPE"));
    }

    #[test]
    fn set_nx_loss_is_false() {
        assert!(!boolean(Value::Nil).unwrap());
        assert!(boolean(Value::ok()).unwrap());
        assert!(boolean(Value::Integer(1)).unwrap());
    }

    #[test]
    fn decodes_scores_and_infinities() {
        let reply = Value::Array(vec![
            Value::bulk("A"),
            Value::bulk("100"),
            Value::bulk("B"),
            Value::bulk("-inf"),
        ]);
        let decoded = members(reply).unwrap();
        assert_eq!(decoded[0], Member::new(100.0, "A"));
        assert_eq!(decoded[1].score, f64::NEG_INFINITY);
    }

    #[test]
    fn binary_member_is_a_protocol_error() {
        let reply = Value::Array(vec![Value::Bulk(vec![0xff, 0xfe]), Value::bulk("1")]);
        let err = members(reply).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
    }

    #[test]
    fn pttl_maps_sentinels() {
        assert_eq!(ttl(Value::Integer(-2)).unwrap(), Ttl::Missing);
        assert_eq!(ttl(Value::Integer(-1)).unwrap(), Ttl::NoExpiry);
        assert_eq!(
            ttl(Value::Integer(1500)).unwrap(),
            Ttl::ExpiresIn(Duration::from_millis(1500))
        );
    }

    #[test]
    fn scan_reply_splits_cursor_and_page() {
        let reply = Value::Array(vec![
            Value::bulk("7"),
            Value::Array(vec![Value::bulk("a"), Value::bulk("b")]),
        ]);
        assert_eq!(scan(reply).unwrap(), (7, vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn wrong_shape_is_a_protocol_error() {
        let err = int(Value::bulk("x")).unwrap_err();
        assert_eq!(err.kind(), ukv_common::ErrorKind::Protocol);
    }
}
