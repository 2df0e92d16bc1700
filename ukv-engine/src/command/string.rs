//! String commands.

use std::time::Duration;

use ukv_common::Value;

use super::{keyword, parse_int, Call, CmdError, Reply};
use crate::keyspace::{Data, Entry};

fn string_of(entry: Option<&Entry>) -> Result<Option<&Vec<u8>>, CmdError> {
    match entry.map(|entry| &entry.data) {
        None => Ok(None),
        Some(Data::Str(value)) => Ok(Some(value)),
        Some(_) => Err(CmdError::WrongType),
    }
}

pub(super) fn get(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(string_of(entry)?.map_or(Value::Nil, |value| Value::Bulk(value.clone())))
    })
}

#[derive(Default)]
struct SetOptions {
    ttl: Option<Duration>,
    nx: bool,
    xx: bool,
    keep_ttl: bool,
    get: bool,
}

fn parse_set_options(args: &[Vec<u8>]) -> Result<SetOptions, CmdError> {
    let mut options = SetOptions::default();
    let mut rest = args.iter();
    while let Some(flag) = rest.next() {
        match keyword(flag).as_slice() {
            unit @ (b"EX" | b"PX") => {
                if options.ttl.is_some() || options.keep_ttl {
                    return Err(CmdError::Syntax);
                }
                let amount = parse_int(rest.next().ok_or(CmdError::Syntax)?)?;
                if amount <= 0 {
                    return Err(CmdError::BadExpire("set".into()));
                }
                let amount = amount as u64;
                options.ttl = Some(if unit == b"EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
            }
            b"NX" if !options.xx => options.nx = true,
            b"XX" if !options.nx => options.xx = true,
            b"KEEPTTL" if options.ttl.is_none() => options.keep_ttl = true,
            b"GET" => options.get = true,
            _ => return Err(CmdError::Syntax),
        }
    }
    Ok(options)
}

/// `SET key value [EX s|PX ms|KEEPTTL] [NX|XX] [GET]`
pub(super) fn set(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let options = parse_set_options(&args[3..])?;
    let now = call.now;
    let deadline = match options.ttl {
        Some(ttl) => Some(
            now.checked_add(ttl)
                .ok_or_else(|| CmdError::BadExpire("set".into()))?,
        ),
        None => None,
    };
    call.db().update(&args[1], now, |slot| {
        let previous = if options.get {
            string_of(slot.as_ref())?.cloned()
        } else {
            None
        };
        let exists = slot.is_some();
        if (options.nx && exists) || (options.xx && !exists) {
            return Ok(if options.get {
                previous.map_or(Value::Nil, Value::Bulk)
            } else {
                Value::Nil
            });
        }
        let expires_at = match deadline {
            Some(at) => Some(at),
            None if options.keep_ttl => slot.as_ref().and_then(|entry| entry.expires_at),
            None => None,
        };
        *slot = Some(Entry {
            data: Data::Str(args[2].clone()),
            expires_at,
        });
        Ok(if options.get {
            previous.map_or(Value::Nil, Value::Bulk)
        } else {
            Value::ok()
        })
    })
}

pub(super) fn setnx(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_some() {
            return Ok(Value::Integer(0));
        }
        *slot = Some(Entry::new(Data::Str(args[2].clone())));
        Ok(Value::Integer(1))
    })
}

pub(super) fn getset(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        let previous = string_of(slot.as_ref())?.cloned();
        *slot = Some(Entry::new(Data::Str(args[2].clone())));
        Ok(previous.map_or(Value::Nil, Value::Bulk))
    })
}

pub(super) fn mget(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let db = call.db();
    let values = args[1..]
        .iter()
        .map(|key| {
            db.view(key, call.now, |entry| match entry.map(|entry| &entry.data) {
                Some(Data::Str(value)) => Value::Bulk(value.clone()),
                _ => Value::Nil,
            })
        })
        .collect();
    Ok(Value::Array(values))
}

pub(super) fn mset(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    if args.len() % 2 == 0 {
        return Err(CmdError::Arity("mset".into()));
    }
    let db = call.db();
    for pair in args[1..].chunks_exact(2) {
        db.update(&pair[0], call.now, |slot| {
            *slot = Some(Entry::new(Data::Str(pair[1].clone())));
        });
    }
    Ok(Value::ok())
}

/// Adds `delta` to the integer at `key`, keeping its TTL.
fn incr_by(call: &mut Call<'_>, key: &[u8], delta: i64) -> Reply {
    call.db().update(key, call.now, |slot| {
        let current = match string_of(slot.as_ref())? {
            Some(raw) => parse_int(raw)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(CmdError::Overflow)?;
        let encoded = next.to_string().into_bytes();
        match slot {
            Some(entry) => entry.data = Data::Str(encoded),
            None => *slot = Some(Entry::new(Data::Str(encoded))),
        }
        Ok(Value::Integer(next))
    })
}

pub(super) fn incr(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    incr_by(call, &args[1], 1)
}

pub(super) fn decr(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    incr_by(call, &args[1], -1)
}

pub(super) fn incrby(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let delta = parse_int(&args[2])?;
    incr_by(call, &args[1], delta)
}

pub(super) fn decrby(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let delta = parse_int(&args[2])?
        .checked_neg()
        .ok_or(CmdError::Overflow)?;
    incr_by(call, &args[1], delta)
}

pub(super) fn append(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| match slot {
        Some(Entry {
            data: Data::Str(value),
            ..
        }) => {
            value.extend_from_slice(&args[2]);
            Ok(Value::Integer(value.len() as i64))
        }
        Some(_) => Err(CmdError::WrongType),
        None => {
            *slot = Some(Entry::new(Data::Str(args[2].clone())));
            Ok(Value::Integer(args[2].len() as i64))
        }
    })
}

pub(super) fn strlen(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(Value::Integer(string_of(entry)?.map_or(0, |value| value.len() as i64)))
    })
}
