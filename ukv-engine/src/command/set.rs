//! Set commands.

use hashbrown::HashSet;
use rand::seq::IteratorRandom;
use rand::Rng;

use ukv_common::Value;

use super::{bool_reply, bulk_array, parse_int, slot_data, Call, CmdError, Reply};
use crate::keyspace::{Data, Entry};

type Members = HashSet<Vec<u8>>;

fn set_of(entry: Option<&Entry>) -> Result<Option<&Members>, CmdError> {
    match entry.map(|entry| &entry.data) {
        None => Ok(None),
        Some(Data::Set(members)) => Ok(Some(members)),
        Some(_) => Err(CmdError::WrongType),
    }
}

fn set_mut(slot: &mut Option<Entry>) -> Result<&mut Members, CmdError> {
    match slot_data(slot, || Data::Set(HashSet::new())) {
        Data::Set(members) => Ok(members),
        _ => Err(CmdError::WrongType),
    }
}

fn sorted(members: impl IntoIterator<Item = Vec<u8>>) -> Vec<Vec<u8>> {
    let mut members: Vec<Vec<u8>> = members.into_iter().collect();
    members.sort();
    members
}

/// Snapshot of the members at `key`; missing keys read as empty.
fn snapshot(call: &Call<'_>, key: &[u8]) -> Result<Members, CmdError> {
    call.db()
        .view(key, call.now, |entry| Ok(set_of(entry)?.cloned().unwrap_or_default()))
}

pub(super) fn sadd(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        let members = set_mut(slot)?;
        let added = args[2..]
            .iter()
            .filter(|member| members.insert((*member).clone()))
            .count();
        Ok(Value::Integer(added as i64))
    })
}

pub(super) fn srem(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(Value::Integer(0));
        }
        let members = set_mut(slot)?;
        let removed = args[2..]
            .iter()
            .filter(|member| members.remove(member.as_slice()))
            .count();
        Ok(Value::Integer(removed as i64))
    })
}

pub(super) fn smembers(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    Ok(bulk_array(sorted(snapshot(call, &args[1])?)))
}

pub(super) fn sismember(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(bool_reply(
            set_of(entry)?.map_or(false, |members| members.contains(&args[2])),
        ))
    })
}

pub(super) fn scard(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(Value::Integer(set_of(entry)?.map_or(0, |members| members.len() as i64)))
    })
}

fn optional_count(args: &[Vec<u8>]) -> Result<Option<i64>, CmdError> {
    match args {
        [_, _] => Ok(None),
        [_, _, raw] => parse_int(raw).map(Some),
        _ => Err(CmdError::Syntax),
    }
}

/// `SPOP key [count]`
pub(super) fn spop(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let count = optional_count(args)?;
    if count.map_or(false, |count| count < 0) {
        return Err(CmdError::Custom("value is out of range, must be positive".into()));
    }
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(match count {
                None => Value::Nil,
                Some(_) => Value::Array(Vec::new()),
            });
        }
        let members = set_mut(slot)?;
        let mut rng = rand::thread_rng();
        let wanted = count.map_or(1, |count| count as usize);
        let picked: Vec<Vec<u8>> = members.iter().cloned().choose_multiple(&mut rng, wanted);
        for member in &picked {
            members.remove(member);
        }
        Ok(match count {
            None => picked.into_iter().next().map_or(Value::Nil, Value::Bulk),
            Some(_) => bulk_array(picked),
        })
    })
}

/// `SRANDMEMBER key [count]`; a negative count may repeat members.
pub(super) fn srandmember(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let count = optional_count(args)?;
    let members: Vec<Vec<u8>> = snapshot(call, &args[1])?.into_iter().collect();
    let mut rng = rand::thread_rng();
    Ok(match count {
        None => members
            .iter()
            .choose(&mut rng)
            .map_or(Value::Nil, |member| Value::Bulk(member.clone())),
        Some(_) if members.is_empty() => Value::Array(Vec::new()),
        Some(count) if count >= 0 => {
            bulk_array(members.iter().cloned().choose_multiple(&mut rng, count as usize))
        }
        Some(count) => bulk_array(
            (0..count.unsigned_abs())
                .map(|_| members[rng.gen_range(0..members.len())].clone())
                .collect::<Vec<_>>(),
        ),
    })
}

pub(super) fn sinter(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let mut result = snapshot(call, &args[1])?;
    for key in &args[2..] {
        let other = snapshot(call, key)?;
        result.retain(|member| other.contains(member));
    }
    Ok(bulk_array(sorted(result)))
}

pub(super) fn sunion(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let mut result = Members::new();
    for key in &args[1..] {
        result.extend(snapshot(call, key)?);
    }
    Ok(bulk_array(sorted(result)))
}

pub(super) fn sdiff(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let mut result = snapshot(call, &args[1])?;
    for key in &args[2..] {
        let other = snapshot(call, key)?;
        result.retain(|member| !other.contains(member));
    }
    Ok(bulk_array(sorted(result)))
}
