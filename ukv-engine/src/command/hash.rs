//! Hash commands.

use hashbrown::HashMap;

use ukv_common::Value;

use super::{bool_reply, bulk_array, parse_int, slot_data, Call, CmdError, Reply};
use crate::keyspace::{Data, Entry};

type Fields = HashMap<Vec<u8>, Vec<u8>>;

fn hash_of(entry: Option<&Entry>) -> Result<Option<&Fields>, CmdError> {
    match entry.map(|entry| &entry.data) {
        None => Ok(None),
        Some(Data::Hash(fields)) => Ok(Some(fields)),
        Some(_) => Err(CmdError::WrongType),
    }
}

fn hash_mut(slot: &mut Option<Entry>) -> Result<&mut Fields, CmdError> {
    match slot_data(slot, || Data::Hash(HashMap::new())) {
        Data::Hash(fields) => Ok(fields),
        _ => Err(CmdError::WrongType),
    }
}

/// Field/value pairs sorted by field so replies are deterministic.
fn sorted_pairs(fields: &Fields) -> Vec<(&Vec<u8>, &Vec<u8>)> {
    let mut pairs: Vec<_> = fields.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
}

pub(super) fn hget(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(hash_of(entry)?
            .and_then(|fields| fields.get(&args[2]))
            .map_or(Value::Nil, |value| Value::Bulk(value.clone())))
    })
}

fn store_pairs(call: &mut Call<'_>, args: &[Vec<u8>], name: &str) -> Result<i64, CmdError> {
    if args.len() % 2 != 0 {
        return Err(CmdError::Arity(name.into()));
    }
    call.db().update(&args[1], call.now, |slot| {
        let fields = hash_mut(slot)?;
        let mut added = 0;
        for pair in args[2..].chunks_exact(2) {
            if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        Ok(added)
    })
}

/// `HSET key field value [field value ...]`; replies with the number of new fields.
pub(super) fn hset(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    store_pairs(call, args, "hset").map(Value::Integer)
}

pub(super) fn hmset(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    store_pairs(call, args, "hmset").map(|_| Value::ok())
}

pub(super) fn hsetnx(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        let fields = hash_mut(slot)?;
        if fields.contains_key(&args[2]) {
            return Ok(Value::Integer(0));
        }
        fields.insert(args[2].clone(), args[3].clone());
        Ok(Value::Integer(1))
    })
}

pub(super) fn hdel(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(Value::Integer(0));
        }
        let fields = hash_mut(slot)?;
        let removed = args[2..]
            .iter()
            .filter(|field| fields.remove(field.as_slice()).is_some())
            .count();
        Ok(Value::Integer(removed as i64))
    })
}

pub(super) fn hexists(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(bool_reply(
            hash_of(entry)?.map_or(false, |fields| fields.contains_key(&args[2])),
        ))
    })
}

pub(super) fn hgetall(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        let flat = hash_of(entry)?
            .map(|fields| {
                sorted_pairs(fields)
                    .into_iter()
                    .flat_map(|(field, value)| [field.clone(), value.clone()])
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(bulk_array(flat))
    })
}

pub(super) fn hkeys(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        let keys: Vec<Vec<u8>> = hash_of(entry)?
            .map(|fields| sorted_pairs(fields).into_iter().map(|(f, _)| f.clone()).collect())
            .unwrap_or_default();
        Ok(bulk_array(keys))
    })
}

pub(super) fn hvals(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        let values: Vec<Vec<u8>> = hash_of(entry)?
            .map(|fields| sorted_pairs(fields).into_iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default();
        Ok(bulk_array(values))
    })
}

pub(super) fn hlen(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(Value::Integer(hash_of(entry)?.map_or(0, |fields| fields.len() as i64)))
    })
}

pub(super) fn hmget(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        let fields = hash_of(entry)?;
        Ok(Value::Array(
            args[2..]
                .iter()
                .map(|field| {
                    fields
                        .and_then(|fields| fields.get(field))
                        .map_or(Value::Nil, |value| Value::Bulk(value.clone()))
                })
                .collect(),
        ))
    })
}

pub(super) fn hincrby(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let delta = parse_int(&args[3])?;
    call.db().update(&args[1], call.now, |slot| {
        let fields = hash_mut(slot)?;
        let current = match fields.get(&args[2]) {
            Some(raw) => parse_int(raw).map_err(|_| CmdError::Custom("hash value is not an integer".into()))?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(CmdError::Overflow)?;
        fields.insert(args[2].clone(), next.to_string().into_bytes());
        Ok(Value::Integer(next))
    })
}
