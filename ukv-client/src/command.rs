//! Command builders shared by `Client` and `Pipeline`.
//!
//! Every key argument goes through `Policy::with_prefix` here and nowhere
//! else; values, fields, members and script arguments are passed verbatim.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ukv_common::{Cmd, ToArg};

use crate::policy::{millis, Policy};
use crate::reply::Member;

fn keyed(name: &str, policy: &Policy, key: &str) -> Cmd {
    Cmd::new(name).key(policy.with_prefix(key))
}

fn multi_keyed<K: AsRef<str>>(name: &str, policy: &Policy, keys: &[K]) -> Cmd {
    Cmd::new(name).keys(keys.iter().map(|key| policy.with_prefix(key.as_ref())))
}

fn with_ttl(cmd: Cmd, policy: &Policy, ttl: Duration) -> Cmd {
    match policy.resolve_ttl(ttl) {
        Some(ttl) => cmd.arg("PX").arg(&millis(ttl)),
        None => cmd,
    }
}

// Strings

pub(crate) fn get(policy: &Policy, key: &str) -> Cmd {
    keyed("GET", policy, key).readonly()
}

pub(crate) fn set<V: ToArg + ?Sized>(policy: &Policy, key: &str, value: &V, ttl: Duration) -> Cmd {
    with_ttl(keyed("SET", policy, key).arg(value), policy, ttl)
}

pub(crate) fn set_nx<V: ToArg + ?Sized>(
    policy: &Policy,
    key: &str,
    value: &V,
    ttl: Duration,
) -> Cmd {
    with_ttl(keyed("SET", policy, key).arg(value), policy, ttl).arg("NX")
}

pub(crate) fn get_set<V: ToArg + ?Sized>(policy: &Policy, key: &str, value: &V) -> Cmd {
    keyed("GETSET", policy, key).arg(value)
}

pub(crate) fn mget<K: AsRef<str>>(policy: &Policy, keys: &[K]) -> Cmd {
    multi_keyed("MGET", policy, keys).readonly()
}

pub(crate) fn mset<K: AsRef<str>, V: ToArg>(policy: &Policy, pairs: &[(K, V)]) -> Cmd {
    pairs.iter().fold(Cmd::new("MSET"), |cmd, (key, value)| {
        cmd.key(policy.with_prefix(key.as_ref())).arg(value)
    })
}

pub(crate) fn incr_by(policy: &Policy, key: &str, delta: i64) -> Cmd {
    match delta {
        1 => keyed("INCR", policy, key),
        -1 => keyed("DECR", policy, key),
        _ => keyed("INCRBY", policy, key).arg(&delta),
    }
}

pub(crate) fn decr_by(policy: &Policy, key: &str, delta: i64) -> Cmd {
    keyed("DECRBY", policy, key).arg(&delta)
}

// Hashes

pub(crate) fn hget(policy: &Policy, key: &str, field: &str) -> Cmd {
    keyed("HGET", policy, key).arg(field).readonly()
}

pub(crate) fn hset<V: ToArg + ?Sized>(policy: &Policy, key: &str, field: &str, value: &V) -> Cmd {
    keyed("HSET", policy, key).arg(field).arg(value)
}

pub(crate) fn hset_nx<V: ToArg + ?Sized>(
    policy: &Policy,
    key: &str,
    field: &str,
    value: &V,
) -> Cmd {
    keyed("HSETNX", policy, key).arg(field).arg(value)
}

pub(crate) fn hdel<F: ToArg>(policy: &Policy, key: &str, fields: &[F]) -> Cmd {
    keyed("HDEL", policy, key).args(fields)
}

pub(crate) fn hexists(policy: &Policy, key: &str, field: &str) -> Cmd {
    keyed("HEXISTS", policy, key).arg(field).readonly()
}

/// Read-only single-key command without further arguments.
pub(crate) fn read(name: &str, policy: &Policy, key: &str) -> Cmd {
    keyed(name, policy, key).readonly()
}

/// Mutating single-key command without further arguments.
pub(crate) fn write(name: &str, policy: &Policy, key: &str) -> Cmd {
    keyed(name, policy, key)
}

pub(crate) fn hmget<F: ToArg>(policy: &Policy, key: &str, fields: &[F]) -> Cmd {
    keyed("HMGET", policy, key).args(fields).readonly()
}

pub(crate) fn hmset<F: ToArg, V: ToArg>(policy: &Policy, key: &str, pairs: &[(F, V)]) -> Cmd {
    pairs
        .iter()
        .fold(keyed("HMSET", policy, key), |cmd, (field, value)| {
            cmd.arg(field).arg(value)
        })
}

pub(crate) fn hincr_by(policy: &Policy, key: &str, field: &str, delta: i64) -> Cmd {
    keyed("HINCRBY", policy, key).arg(field).arg(&delta)
}

// Lists

pub(crate) fn push<V: ToArg>(name: &str, policy: &Policy, key: &str, values: &[V]) -> Cmd {
    keyed(name, policy, key).args(values)
}

pub(crate) fn range(name: &str, policy: &Policy, key: &str, start: i64, stop: i64) -> Cmd {
    keyed(name, policy, key).arg(&start).arg(&stop).readonly()
}

pub(crate) fn lindex(policy: &Policy, key: &str, index: i64) -> Cmd {
    keyed("LINDEX", policy, key).arg(&index).readonly()
}

pub(crate) fn lset<V: ToArg + ?Sized>(policy: &Policy, key: &str, index: i64, value: &V) -> Cmd {
    keyed("LSET", policy, key).arg(&index).arg(value)
}

pub(crate) fn lrem<V: ToArg + ?Sized>(policy: &Policy, key: &str, count: i64, value: &V) -> Cmd {
    keyed("LREM", policy, key).arg(&count).arg(value)
}

pub(crate) fn ltrim(policy: &Policy, key: &str, start: i64, stop: i64) -> Cmd {
    keyed("LTRIM", policy, key).arg(&start).arg(&stop)
}

// Sets

pub(crate) fn members<M: ToArg>(name: &str, policy: &Policy, key: &str, members: &[M]) -> Cmd {
    keyed(name, policy, key).args(members)
}

pub(crate) fn sismember<M: ToArg + ?Sized>(policy: &Policy, key: &str, member: &M) -> Cmd {
    keyed("SISMEMBER", policy, key).arg(member).readonly()
}

pub(crate) fn set_algebra<K: AsRef<str>>(name: &str, policy: &Policy, keys: &[K]) -> Cmd {
    multi_keyed(name, policy, keys).readonly()
}

// Sorted sets

pub(crate) fn zadd(policy: &Policy, key: &str, members: &[Member]) -> Cmd {
    members.iter().fold(keyed("ZADD", policy, key), |cmd, entry| {
        cmd.arg(&entry.score).arg(&entry.member)
    })
}

pub(crate) fn zmember(name: &str, policy: &Policy, key: &str, member: &str) -> Cmd {
    keyed(name, policy, key).arg(member).readonly()
}

pub(crate) fn with_scores(cmd: Cmd) -> Cmd {
    cmd.arg("WITHSCORES")
}

/// `ZRANGEBYSCORE key min max` or `ZREVRANGEBYSCORE key max min`; bounds are
/// passed as written so `(` exclusivity and `-inf`/`+inf` work.
pub(crate) fn score_range(name: &str, policy: &Policy, key: &str, from: &str, to: &str) -> Cmd {
    keyed(name, policy, key).arg(from).arg(to).readonly()
}

pub(crate) fn zincr_by(policy: &Policy, key: &str, delta: f64, member: &str) -> Cmd {
    keyed("ZINCRBY", policy, key).arg(&delta).arg(member)
}

// Generic

pub(crate) fn del<K: AsRef<str>>(policy: &Policy, keys: &[K]) -> Cmd {
    multi_keyed("DEL", policy, keys)
}

pub(crate) fn exists<K: AsRef<str>>(policy: &Policy, keys: &[K]) -> Cmd {
    multi_keyed("EXISTS", policy, keys).readonly()
}

/// Relative expiration, sent with millisecond precision. Used verbatim:
/// the default TTL only applies to writes.
pub(crate) fn expire(policy: &Policy, key: &str, ttl: Duration) -> Cmd {
    keyed("PEXPIRE", policy, key).arg(&millis(ttl))
}

pub(crate) fn expire_at(policy: &Policy, key: &str, at: SystemTime) -> Cmd {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or(0);
    keyed("EXPIREAT", policy, key).arg(&secs)
}

pub(crate) fn ttl(policy: &Policy, key: &str) -> Cmd {
    read("PTTL", policy, key)
}

/// An empty pattern lists everything in the namespace.
fn pattern(policy: &Policy, pattern: &str) -> String {
    policy.with_prefix(if pattern.is_empty() { "*" } else { pattern })
}

pub(crate) fn keys(policy: &Policy, pat: &str) -> Cmd {
    Cmd::new("KEYS").arg(&pattern(policy, pat)).readonly()
}

pub(crate) fn scan(policy: &Policy, cursor: u64, pat: &str, count: usize) -> Cmd {
    let cmd = Cmd::new("SCAN")
        .arg(&cursor)
        .arg("MATCH")
        .arg(&pattern(policy, pat))
        .readonly();
    if count > 0 {
        cmd.arg("COUNT").arg(&count)
    } else {
        cmd
    }
}

// Scripting

pub(crate) fn eval<K: AsRef<str>, A: ToArg>(
    name: &str,
    policy: &Policy,
    script: &str,
    keys: &[K],
    args: &[A],
) -> Cmd {
    Cmd::new(name)
        .arg(script)
        .arg(&keys.len())
        .keys(keys.iter().map(|key| policy.with_prefix(key.as_ref())))
        .args(args)
}

pub(crate) fn script<A: ToArg>(subcommand: &str, args: &[A]) -> Cmd {
    Cmd::new("SCRIPT").arg(subcommand).args(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Cmd) -> Vec<String> {
        cmd.as_args()
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect()
    }

    #[test]
    fn set_applies_prefix_and_default_ttl() {
        let policy = Policy::new("app:", Duration::from_secs(1800));
        let cmd = set(&policy, "k1", "v1", Duration::ZERO);
        assert_eq!(args(&cmd), ["SET", "app:k1", "v1", "PX", "1800000"]);
        assert_eq!(cmd.routing_key(), Some(&b"app:k1"[..]));
    }

    #[test]
    fn set_without_any_ttl_omits_px() {
        let policy = Policy::new("", Duration::ZERO);
        assert_eq!(args(&set(&policy, "k", "v", Duration::ZERO)), ["SET", "k", "v"]);
    }

    #[test]
    fn multi_key_commands_prefix_keys_but_not_values() {
        let policy = Policy::new("app:", Duration::ZERO);
        let cmd = mset(&policy, &[("a", "app:x"), ("b", "2")]);
        assert_eq!(args(&cmd), ["MSET", "app:a", "app:x", "app:b", "2"]);
        let cmd = set_algebra("SINTER", &policy, &["s1", "s2"]);
        assert_eq!(args(&cmd), ["SINTER", "app:s1", "app:s2"]);
    }

    #[test]
    fn eval_prefixes_only_the_keys() {
        let policy = Policy::new("app:", Duration::ZERO);
        let cmd = eval("EVAL", &policy, "return 1", &["k"], &["k"]);
        assert_eq!(args(&cmd), ["EVAL", "return 1", "1", "app:k", "k"]);
    }

    #[test]
    fn scan_defaults_pattern_to_namespace() {
        let policy = Policy::new("app:", Duration::ZERO);
        let cmd = scan(&policy, 0, "", 0);
        assert_eq!(args(&cmd), ["SCAN", "0", "MATCH", "app:*"]);
        assert!(cmd.routing_key().is_none());
    }

    #[test]
    fn unit_increments_use_short_forms() {
        let policy = Policy::default();
        assert_eq!(args(&incr_by(&policy, "n", 1)), ["INCR", "n"]);
        assert_eq!(args(&incr_by(&policy, "n", -1)), ["DECR", "n"]);
        assert_eq!(args(&incr_by(&policy, "n", 5)), ["INCRBY", "n", "5"]);
    }
}
