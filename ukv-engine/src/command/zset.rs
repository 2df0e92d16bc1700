//! Sorted set commands.

use ukv_common::Value;

use super::{format_float, keyword, normalize_range, parse_float, parse_int, slot_data, Call, CmdError, Reply};
use crate::keyspace::{Data, Entry, SortedSet};

fn zset_of(entry: Option<&Entry>) -> Result<Option<&SortedSet>, CmdError> {
    match entry.map(|entry| &entry.data) {
        None => Ok(None),
        Some(Data::ZSet(zset)) => Ok(Some(zset)),
        Some(_) => Err(CmdError::WrongType),
    }
}

fn zset_mut(slot: &mut Option<Entry>) -> Result<&mut SortedSet, CmdError> {
    match slot_data(slot, || Data::ZSet(SortedSet::default())) {
        Data::ZSet(zset) => Ok(zset),
        _ => Err(CmdError::WrongType),
    }
}

/// One end of a score interval, e.g. `5`, `(5` or `-inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bound {
    value: f64,
    exclusive: bool,
}

impl Bound {
    fn parse(raw: &[u8]) -> Result<Self, CmdError> {
        let (exclusive, digits) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw),
        };
        let value = parse_float(digits).map_err(|_| CmdError::BadScoreRange)?;
        Ok(Bound { value, exclusive })
    }

    fn admits_from_below(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_from_above(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

fn in_range(score: f64, min: &Bound, max: &Bound) -> bool {
    min.admits_from_below(score) && max.admits_from_above(score)
}

fn render(items: Vec<(Vec<u8>, f64)>, with_scores: bool) -> Value {
    let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
    for (member, score) in items {
        out.push(Value::Bulk(member));
        if with_scores {
            out.push(Value::Bulk(format_float(score)));
        }
    }
    Value::Array(out)
}

/// `ZADD key [NX|XX] [CH] [INCR] score member [score member ...]`
pub(super) fn zadd(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let (mut nx, mut xx, mut ch, mut incr) = (false, false, false, false);
    let mut idx = 2;
    while idx < args.len() {
        match keyword(&args[idx]).as_slice() {
            b"NX" => nx = true,
            b"XX" => xx = true,
            b"CH" => ch = true,
            b"INCR" => incr = true,
            _ => break,
        }
        idx += 1;
    }
    let pairs = &args[idx..];
    if pairs.is_empty() || pairs.len() % 2 != 0 || (nx && xx) {
        return Err(CmdError::Syntax);
    }
    if incr && pairs.len() != 2 {
        return Err(CmdError::Custom("INCR option supports a single increment-element pair".into()));
    }
    let scored = pairs
        .chunks_exact(2)
        .map(|pair| Ok((parse_float(&pair[0])?, pair[1].clone())))
        .collect::<Result<Vec<_>, CmdError>>()?;

    call.db().update(&args[1], call.now, |slot| {
        let zset = zset_mut(slot)?;
        let mut added = 0;
        let mut changed = 0;
        let mut last_score = None;
        for (score, member) in scored {
            let current = zset.score(&member);
            if (nx && current.is_some()) || (xx && current.is_none()) {
                continue;
            }
            let next = match (incr, current) {
                (true, Some(current)) => current + score,
                _ => score,
            };
            if next.is_nan() {
                return Err(CmdError::NanScore);
            }
            if current.is_none() {
                added += 1;
            } else if current != Some(next) {
                changed += 1;
            }
            zset.insert(member, next);
            last_score = Some(next);
        }
        Ok(if incr {
            last_score.map_or(Value::Nil, |score| Value::Bulk(format_float(score)))
        } else if ch {
            Value::Integer(added + changed)
        } else {
            Value::Integer(added)
        })
    })
}

pub(super) fn zrem(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().update(&args[1], call.now, |slot| {
        if slot.is_none() {
            return Ok(Value::Integer(0));
        }
        let zset = zset_mut(slot)?;
        let removed = args[2..].iter().filter(|member| zset.remove(member)).count();
        Ok(Value::Integer(removed as i64))
    })
}

pub(super) fn zscore(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(zset_of(entry)?
            .and_then(|zset| zset.score(&args[2]))
            .map_or(Value::Nil, |score| Value::Bulk(format_float(score))))
    })
}

fn rank(call: &mut Call<'_>, args: &[Vec<u8>], reverse: bool) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        let Some(zset) = zset_of(entry)? else {
            return Ok(Value::Nil);
        };
        Ok(match zset.rank(&args[2]) {
            Some(rank) if reverse => Value::Integer((zset.len() - 1 - rank) as i64),
            Some(rank) => Value::Integer(rank as i64),
            None => Value::Nil,
        })
    })
}

pub(super) fn zrank(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    rank(call, args, false)
}

pub(super) fn zrevrank(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    rank(call, args, true)
}

fn with_scores_flag(extra: &[Vec<u8>]) -> Result<bool, CmdError> {
    match extra {
        [] => Ok(false),
        [flag] if keyword(flag) == b"WITHSCORES" => Ok(true),
        _ => Err(CmdError::Syntax),
    }
}

/// Members by rank, ascending or descending.
fn range_by_rank(call: &mut Call<'_>, args: &[Vec<u8>], reverse: bool) -> Reply {
    let start = parse_int(&args[2])?;
    let stop = parse_int(&args[3])?;
    let with_scores = with_scores_flag(&args[4..])?;
    call.db().view(&args[1], call.now, |entry| {
        let Some(zset) = zset_of(entry)? else {
            return Ok(Value::Array(Vec::new()));
        };
        let mut ordered = zset.ordered();
        if reverse {
            ordered.reverse();
        }
        let items = match normalize_range(start, stop, ordered.len()) {
            Some((from, to)) => ordered[from..=to]
                .iter()
                .map(|(member, score)| (member.to_vec(), *score))
                .collect(),
            None => Vec::new(),
        };
        Ok(render(items, with_scores))
    })
}

pub(super) fn zrange(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    range_by_rank(call, args, false)
}

pub(super) fn zrevrange(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    range_by_rank(call, args, true)
}

/// Members by score. For the reverse form the first bound is the maximum.
fn range_by_score(call: &mut Call<'_>, args: &[Vec<u8>], reverse: bool) -> Reply {
    let (min, max) = if reverse {
        (Bound::parse(&args[3])?, Bound::parse(&args[2])?)
    } else {
        (Bound::parse(&args[2])?, Bound::parse(&args[3])?)
    };
    let mut with_scores = false;
    let mut limit: Option<(usize, Option<usize>)> = None;
    let mut idx = 4;
    while idx < args.len() {
        match keyword(&args[idx]).as_slice() {
            b"WITHSCORES" => {
                with_scores = true;
                idx += 1;
            }
            b"LIMIT" if idx + 2 < args.len() => {
                let offset = parse_int(&args[idx + 1])?;
                let count = parse_int(&args[idx + 2])?;
                if offset < 0 {
                    limit = Some((0, Some(0)));
                } else {
                    limit = Some((offset as usize, usize::try_from(count).ok()));
                }
                idx += 3;
            }
            _ => return Err(CmdError::Syntax),
        }
    }

    call.db().view(&args[1], call.now, |entry| {
        let Some(zset) = zset_of(entry)? else {
            return Ok(Value::Array(Vec::new()));
        };
        let mut ordered = zset.ordered();
        if reverse {
            ordered.reverse();
        }
        let (offset, count) = limit.unwrap_or((0, None));
        let items = ordered
            .into_iter()
            .filter(|(_, score)| in_range(*score, &min, &max))
            .skip(offset)
            .take(count.unwrap_or(usize::MAX))
            .map(|(member, score)| (member.to_vec(), score))
            .collect();
        Ok(render(items, with_scores))
    })
}

pub(super) fn zrangebyscore(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    range_by_score(call, args, false)
}

pub(super) fn zrevrangebyscore(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    range_by_score(call, args, true)
}

pub(super) fn zcard(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    call.db().view(&args[1], call.now, |entry| {
        Ok(Value::Integer(zset_of(entry)?.map_or(0, |zset| zset.len() as i64)))
    })
}

pub(super) fn zcount(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let min = Bound::parse(&args[2])?;
    let max = Bound::parse(&args[3])?;
    call.db().view(&args[1], call.now, |entry| {
        let count = zset_of(entry)?.map_or(0, |zset| {
            zset.ordered()
                .iter()
                .filter(|(_, score)| in_range(*score, &min, &max))
                .count()
        });
        Ok(Value::Integer(count as i64))
    })
}

pub(super) fn zincrby(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let delta = parse_float(&args[2])?;
    call.db().update(&args[1], call.now, |slot| {
        let zset = zset_mut(slot)?;
        let next = zset.score(&args[3]).unwrap_or(0.0) + delta;
        if next.is_nan() {
            return Err(CmdError::NanScore);
        }
        zset.insert(args[3].clone(), next);
        Ok(Value::Bulk(format_float(next)))
    })
}
