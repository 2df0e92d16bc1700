//! Keyspace commands: deletion, expiration, introspection and iteration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use glob::Pattern;

use ukv_common::Value;

use super::{bool_reply, bulk_array, keyword, parse_int, Call, CmdError, Reply};

/// Keys visited per `SCAN` call when no `COUNT` is given.
const DEFAULT_SCAN_COUNT: usize = 10;

/// Glob matcher over key bytes. An unparsable pattern only matches itself.
struct KeyPattern {
    raw: Vec<u8>,
    compiled: Option<Pattern>,
}

impl KeyPattern {
    fn new(pattern: &[u8]) -> Self {
        KeyPattern {
            raw: pattern.to_vec(),
            compiled: Pattern::new(&String::from_utf8_lossy(pattern)).ok(),
        }
    }

    fn matches(&self, key: &[u8]) -> bool {
        if self.raw == b"*" {
            return true;
        }
        match &self.compiled {
            Some(pattern) => pattern.matches(&String::from_utf8_lossy(key)),
            None => key == self.raw.as_slice(),
        }
    }
}

pub(super) fn del(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let db = call.db();
    let removed = args[1..]
        .iter()
        .filter(|key| db.remove(key, call.now))
        .count();
    Ok(Value::Integer(removed as i64))
}

/// Counts existing keys; a key named twice counts twice.
pub(super) fn exists(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let db = call.db();
    let found = args[1..]
        .iter()
        .filter(|key| db.view(key, call.now, |entry| entry.is_some()))
        .count();
    Ok(Value::Integer(found as i64))
}

/// Sets a relative expiration; a non-positive one deletes the key.
fn expire_in(call: &mut Call<'_>, command: &str, key: &[u8], millis: i64) -> Reply {
    let now = call.now;
    if millis <= 0 {
        return Ok(bool_reply(call.db().remove(key, now)));
    }
    let at = now
        .checked_add(Duration::from_millis(millis as u64))
        .ok_or_else(|| CmdError::BadExpire(command.into()))?;
    call.db().update(key, now, |slot| match slot {
        Some(entry) => {
            entry.expires_at = Some(at);
            Ok(Value::Integer(1))
        }
        None => Ok(Value::Integer(0)),
    })
}

pub(super) fn expire(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let seconds = parse_int(&args[2])?;
    let millis = seconds
        .checked_mul(1000)
        .ok_or_else(|| CmdError::BadExpire("expire".into()))?;
    expire_in(call, "expire", &args[1], millis)
}

pub(super) fn pexpire(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let millis = parse_int(&args[2])?;
    expire_in(call, "pexpire", &args[1], millis)
}

/// `EXPIREAT key unix-seconds`
pub(super) fn expireat(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let at = parse_int(&args[2])?;
    let at_ms = at
        .checked_mul(1000)
        .ok_or_else(|| CmdError::BadExpire("expireat".into()))?;
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);
    expire_in(call, "expireat", &args[1], at_ms.saturating_sub(now_ms))
}

pub(super) fn persist(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| match slot {
        Some(entry) if entry.expires_at.is_some() => {
            entry.expires_at = None;
            Ok(Value::Integer(1))
        }
        _ => Ok(Value::Integer(0)),
    })
}

/// Remaining lifetime in milliseconds: -2 for a missing key, -1 without TTL.
fn remaining_ms(call: &Call<'_>, key: &[u8]) -> i64 {
    call.db().view(key, call.now, |entry| match entry {
        None => -2,
        Some(entry) => match entry.expires_at {
            None => -1,
            Some(at) => at.saturating_duration_since(call.now).as_millis() as i64,
        },
    })
}

pub(super) fn ttl(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let millis = remaining_ms(call, &args[1]);
    Ok(Value::Integer(if millis < 0 {
        millis
    } else {
        (millis + 500) / 1000
    }))
}

pub(super) fn pttl(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    Ok(Value::Integer(remaining_ms(call, &args[1])))
}

pub(super) fn key_type(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let name = call.db().view(&args[1], call.now, |entry| {
        entry.map_or("none", |entry| entry.data.type_name())
    });
    Ok(Value::Simple(name.as_bytes().to_vec()))
}

pub(super) fn keys(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let pattern = KeyPattern::new(&args[1]);
    let mut keys: Vec<Vec<u8>> = call
        .db()
        .keys(call.now)
        .into_iter()
        .filter(|key| pattern.matches(key))
        .collect();
    keys.sort();
    Ok(bulk_array(keys))
}

/// `SCAN cursor [MATCH pattern] [COUNT count] [TYPE type]`
///
/// The cursor is the index of the next shard to visit, so every key present
/// for the whole iteration is returned at least once.
pub(super) fn scan(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let cursor = std::str::from_utf8(&args[1])
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .ok_or(CmdError::BadCursor)?;

    let mut pattern: Option<Vec<u8>> = None;
    let mut count = DEFAULT_SCAN_COUNT;
    let mut type_filter: Option<Vec<u8>> = None;
    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        let value = rest.next().ok_or(CmdError::Syntax)?;
        match keyword(flag).as_slice() {
            b"MATCH" => pattern = Some(value.clone()),
            b"COUNT" => {
                let requested = parse_int(value)?;
                if requested < 1 {
                    return Err(CmdError::Syntax);
                }
                count = requested as usize;
            }
            b"TYPE" => type_filter = Some(value.to_ascii_lowercase()),
            _ => return Err(CmdError::Syntax),
        }
    }
    let pattern = KeyPattern::new(pattern.as_deref().unwrap_or(b"*"));

    let db = call.db();
    let shards = db.shard_count() as u64;
    let mut shard = cursor;
    let mut visited = 0;
    let mut found = Vec::new();
    while shard < shards && visited < count {
        for key in db.scan_shard(shard as usize, call.now) {
            visited += 1;
            if !pattern.matches(&key) {
                continue;
            }
            if let Some(wanted) = &type_filter {
                let kind = db.view(&key, call.now, |entry| entry.map(|e| e.data.type_name()));
                if kind.map_or(true, |kind| kind.as_bytes() != wanted.as_slice()) {
                    continue;
                }
            }
            found.push(key);
        }
        shard += 1;
    }
    let next = if shard >= shards { 0 } else { shard };
    Ok(Value::Array(vec![
        Value::Bulk(next.to_string().into_bytes()),
        bulk_array(found),
    ]))
}

pub(super) fn dbsize(call: &mut Call<'_>, _args: &[Vec<u8>]) -> Reply {
    Ok(Value::Integer(call.db().len(call.now) as i64))
}

fn flush_mode(args: &[Vec<u8>]) -> Result<(), CmdError> {
    match args {
        [_] => Ok(()),
        [_, mode] if matches!(keyword(mode).as_slice(), b"SYNC" | b"ASYNC") => Ok(()),
        _ => Err(CmdError::Syntax),
    }
}

pub(super) fn flushdb(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    flush_mode(args)?;
    call.db().clear();
    Ok(Value::ok())
}

pub(super) fn flushall(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    flush_mode(args)?;
    for idx in 0..call.store.databases() {
        if let Some(db) = call.store.db(idx) {
            db.clear();
        }
    }
    Ok(Value::ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching_over_bytes() {
        let prefixed = KeyPattern::new(b"user:*");
        assert!(prefixed.matches(b"user:1"));
        assert!(!prefixed.matches(b"order:1"));
        let single = KeyPattern::new(b"k?");
        assert!(single.matches(b"k1"));
        assert!(!single.matches(b"k12"));
        assert!(KeyPattern::new(b"*").matches(b"anything"));
    }
}
