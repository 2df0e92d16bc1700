//! List commands.

use std::collections::VecDeque;

use ukv_common::Value;

use super::{bulk_array, normalize_range, parse_int, slot_data, Call, CmdError, Reply};
use crate::keyspace::{Data, Entry};

type Items = VecDeque<Vec<u8>>;

fn list_of(entry: Option<&Entry>) -> Result<Option<&Items>, CmdError> {
    match entry.map(|entry| &entry.data) {
        None => Ok(None),
        Some(Data::List(items)) => Ok(Some(items)),
        Some(_) => Err(CmdError::WrongType),
    }
}

fn list_mut(slot: &mut Option<Entry>) -> Result<&mut Items, CmdError> {
    match slot_data(slot, || Data::List(VecDeque::new())) {
        Data::List(items) => Ok(items),
        _ => Err(CmdError::WrongType),
    }
}

fn push(call: &mut Call<'_>, args: &[Vec<u8>], front: bool) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        let items = list_mut(slot)?;
        for value in &args[2..] {
            if front {
                items.push_front(value.clone());
            } else {
                items.push_back(value.clone());
            }
        }
        Ok(Value::Integer(items.len() as i64))
    })
}

pub(super) fn lpush(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    push(call, args, true)
}

pub(super) fn rpush(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    push(call, args, false)
}

/// `LPOP key [count]`: a bulk reply without count, an array with it.
fn pop(call: &mut Call<'_>, args: &[Vec<u8>], front: bool) -> Reply {
    let count = match args.get(2) {
        None => None,
        Some(raw) => {
            let count = parse_int(raw)?;
            if count < 0 {
                return Err(CmdError::Custom("value is out of range, must be positive".into()));
            }
            Some(count as usize)
        }
    };
    if args.len() > 3 {
        return Err(CmdError::Syntax);
    }
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(Value::Nil);
        }
        let items = list_mut(slot)?;
        let mut take = || {
            if front {
                items.pop_front()
            } else {
                items.pop_back()
            }
        };
        Ok(match count {
            None => take().map_or(Value::Nil, Value::Bulk),
            Some(count) => bulk_array(std::iter::from_fn(take).take(count)),
        })
    })
}

pub(super) fn lpop(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    pop(call, args, true)
}

pub(super) fn rpop(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    pop(call, args, false)
}

pub(super) fn llen(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(Value::Integer(list_of(entry)?.map_or(0, |items| items.len() as i64)))
    })
}

pub(super) fn lrange(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let start = parse_int(&args[2])?;
    let stop = parse_int(&args[3])?;
    call.db().view(&args[1], call.now, |entry| {
        let Some(items) = list_of(entry)? else {
            return Ok(Value::Array(Vec::new()));
        };
        Ok(match normalize_range(start, stop, items.len()) {
            Some((from, to)) => bulk_array(items.range(from..=to).cloned()),
            None => Value::Array(Vec::new()),
        })
    })
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&index).then_some(index as usize)
}

pub(super) fn lindex(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let index = parse_int(&args[2])?;
    call.db().view(&args[1], call.now, |entry| {
        Ok(list_of(entry)?
            .and_then(|items| resolve_index(index, items.len()).and_then(|idx| items.get(idx)))
            .map_or(Value::Nil, |value| Value::Bulk(value.clone())))
    })
}

pub(super) fn lset(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let index = parse_int(&args[2])?;
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Err(CmdError::NoSuchKey);
        }
        let items = list_mut(slot)?;
        let idx = resolve_index(index, items.len()).ok_or(CmdError::OutOfRange)?;
        items[idx] = args[3].clone();
        Ok(Value::ok())
    })
}

/// `LREM key count value`: positive counts scan from the head, negative from
/// the tail, zero removes every match.
pub(super) fn lrem(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let count = parse_int(&args[2])?;
    let target = &args[3];
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(Value::Integer(0));
        }
        let items = list_mut(slot)?;
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0;
        if count >= 0 {
            let mut idx = 0;
            while idx < items.len() && removed < limit {
                if &items[idx] == target {
                    items.remove(idx);
                    removed += 1;
                } else {
                    idx += 1;
                }
            }
        } else {
            let mut idx = items.len();
            while idx > 0 && removed < limit {
                idx -= 1;
                if &items[idx] == target {
                    items.remove(idx);
                    removed += 1;
                }
            }
        }
        Ok(Value::Integer(removed as i64))
    })
}

pub(super) fn ltrim(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let start = parse_int(&args[2])?;
    let stop = parse_int(&args[3])?;
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(Value::ok());
        }
        let items = list_mut(slot)?;
        match normalize_range(start, stop, items.len()) {
            Some((from, to)) => {
                items.truncate(to + 1);
                items.drain(..from);
            }
            None => items.clear(),
        }
        Ok(Value::ok())
    })
}
