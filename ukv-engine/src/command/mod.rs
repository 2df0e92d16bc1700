//! # Command Interpreter
//!
//! Purpose: Map RESP argument vectors onto keyspace operations and produce
//! wire-ready replies.
//!
//! ## Design Principles
//! 1. **One Table**: Every command is listed once with its arity; the same
//!    entry validates `MULTI` queueing and drives dispatch.
//! 2. **Typed Failures**: Handlers return `CmdError`, whose `Display` is the
//!    exact error line a client sees.
//! 3. **Caller Holds the Gate**: Dispatch takes no store-level locks; `Store`
//!    decides between shared and exclusive execution.

mod connection;
mod generic;
mod hash;
mod list;
mod set;
mod string;
mod zset;

use std::time::Instant;

use thiserror::Error;

use ukv_common::Value;

use crate::keyspace::{Data, Entry, Keyspace};
use crate::store::{Session, Store};

/// A command failure, rendered as its error reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CmdError {
    #[error("ERR empty command")]
    Empty,
    #[error("ERR unknown command '{0}'")]
    Unknown(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR value is not a valid float")]
    NotFloat,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
    #[error("ERR resulting score is not a number (NaN)")]
    NanScore,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("ERR index out of range")]
    OutOfRange,
    #[error("ERR min or max is not a float")]
    BadScoreRange,
    #[error("ERR DB index is out of range")]
    BadDb,
    #[error("ERR invalid expire time in '{0}' command")]
    BadExpire(String),
    #[error("ERR invalid cursor")]
    BadCursor,
    #[error("NOAUTH Authentication required.")]
    NoAuth,
    #[error("WRONGPASS invalid username-password pair or user is disabled.")]
    WrongPass,
    #[error("ERR AUTH <password> called without any password configured for the default user. Are you sure your configuration is correct?")]
    NoPassword,
    #[error("ERR scripting is not supported by this server")]
    NoScripting,
    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,
    #[error("ERR {0}")]
    Custom(String),
}

impl From<CmdError> for Value {
    fn from(err: CmdError) -> Self {
        Value::error(err.to_string())
    }
}

pub(crate) type Reply = Result<Value, CmdError>;

/// Everything a handler may touch while running one command.
pub(crate) struct Call<'a> {
    pub store: &'a Store,
    pub session: &'a mut Session,
    pub now: Instant,
}

impl Call<'_> {
    pub fn db(&self) -> &Keyspace {
        self.store.keyspace(self.session.db)
    }
}

type Handler = fn(&mut Call<'_>, &[Vec<u8>]) -> Reply;

struct CommandDef {
    name: &'static str,
    /// Exact argument count when positive, minimum when negative.
    arity: i32,
    /// Touches several keys and must not interleave with other commands.
    exclusive: bool,
    handler: Handler,
}

macro_rules! commands {
    ($( $name:literal, $arity:literal, $exclusive:literal => $handler:path; )*) => {
        &[$( CommandDef {
            name: $name,
            arity: $arity,
            exclusive: $exclusive,
            handler: $handler,
        }, )*]
    };
}

static COMMANDS: &[CommandDef] = commands! {
    // connection
    "PING", -1, false => connection::ping;
    "ECHO", 2, false => connection::echo;
    "SELECT", 2, false => connection::select;
    "AUTH", -2, false => connection::auth;
    "INFO", -1, false => connection::info;
    "EVAL", -3, false => connection::scripting;
    "EVALSHA", -3, false => connection::scripting;
    "SCRIPT", -2, false => connection::scripting;
    // strings
    "GET", 2, false => string::get;
    "SET", -3, false => string::set;
    "SETNX", 3, false => string::setnx;
    "GETSET", 3, false => string::getset;
    "MGET", -2, true => string::mget;
    "MSET", -3, true => string::mset;
    "INCR", 2, false => string::incr;
    "DECR", 2, false => string::decr;
    "INCRBY", 3, false => string::incrby;
    "DECRBY", 3, false => string::decrby;
    "APPEND", 3, false => string::append;
    "STRLEN", 2, false => string::strlen;
    // hashes
    "HGET", 3, false => hash::hget;
    "HSET", -4, false => hash::hset;
    "HMSET", -4, false => hash::hmset;
    "HSETNX", 4, false => hash::hsetnx;
    "HDEL", -3, false => hash::hdel;
    "HEXISTS", 3, false => hash::hexists;
    "HGETALL", 2, false => hash::hgetall;
    "HKEYS", 2, false => hash::hkeys;
    "HVALS", 2, false => hash::hvals;
    "HLEN", 2, false => hash::hlen;
    "HMGET", -3, false => hash::hmget;
    "HINCRBY", 4, false => hash::hincrby;
    // lists
    "LPUSH", -3, false => list::lpush;
    "RPUSH", -3, false => list::rpush;
    "LPOP", -2, false => list::lpop;
    "RPOP", -2, false => list::rpop;
    "LLEN", 2, false => list::llen;
    "LRANGE", 4, false => list::lrange;
    "LINDEX", 3, false => list::lindex;
    "LSET", 4, false => list::lset;
    "LREM", 4, false => list::lrem;
    "LTRIM", 4, false => list::ltrim;
    // sets
    "SADD", -3, false => set::sadd;
    "SREM", -3, false => set::srem;
    "SMEMBERS", 2, false => set::smembers;
    "SISMEMBER", 3, false => set::sismember;
    "SCARD", 2, false => set::scard;
    "SPOP", -2, false => set::spop;
    "SRANDMEMBER", -2, false => set::srandmember;
    "SINTER", -2, true => set::sinter;
    "SUNION", -2, true => set::sunion;
    "SDIFF", -2, true => set::sdiff;
    // sorted sets
    "ZADD", -4, false => zset::zadd;
    "ZREM", -3, false => zset::zrem;
    "ZSCORE", 3, false => zset::zscore;
    "ZRANK", 3, false => zset::zrank;
    "ZREVRANK", 3, false => zset::zrevrank;
    "ZRANGE", -4, false => zset::zrange;
    "ZREVRANGE", -4, false => zset::zrevrange;
    "ZRANGEBYSCORE", -4, false => zset::zrangebyscore;
    "ZREVRANGEBYSCORE", -4, false => zset::zrevrangebyscore;
    "ZCARD", 2, false => zset::zcard;
    "ZCOUNT", 4, false => zset::zcount;
    "ZINCRBY", 4, false => zset::zincrby;
    // keys
    "DEL", -2, true => generic::del;
    "UNLINK", -2, true => generic::del;
    "EXISTS", -2, true => generic::exists;
    "EXPIRE", 3, false => generic::expire;
    "PEXPIRE", 3, false => generic::pexpire;
    "EXPIREAT", 3, false => generic::expireat;
    "PERSIST", 2, false => generic::persist;
    "TTL", 2, false => generic::ttl;
    "PTTL", 2, false => generic::pttl;
    "TYPE", 2, false => generic::key_type;
    "KEYS", 2, false => generic::keys;
    "SCAN", -2, false => generic::scan;
    "DBSIZE", 1, false => generic::dbsize;
    "FLUSHDB", -1, true => generic::flushdb;
    "FLUSHALL", -1, true => generic::flushall;
};

fn lookup(name: &[u8]) -> Option<&'static CommandDef> {
    COMMANDS
        .iter()
        .find(|def| def.name.as_bytes().eq_ignore_ascii_case(name))
}

fn check_arity(def: &CommandDef, argc: usize) -> Result<(), CmdError> {
    let ok = if def.arity >= 0 {
        argc == def.arity as usize
    } else {
        argc >= def.arity.unsigned_abs() as usize
    };
    if ok {
        Ok(())
    } else {
        Err(CmdError::Arity(def.name.to_ascii_lowercase()))
    }
}

/// Checks that `args` names a known command with a valid argument count.
pub(crate) fn validate(args: &[Vec<u8>]) -> Result<(), CmdError> {
    let name = args.first().ok_or(CmdError::Empty)?;
    let def = lookup(name)
        .ok_or_else(|| CmdError::Unknown(String::from_utf8_lossy(name).into_owned()))?;
    check_arity(def, args.len())
}

/// True when the command must run under the exclusive gate.
pub(crate) fn is_exclusive(name: &[u8]) -> bool {
    lookup(name).map_or(false, |def| def.exclusive)
}

/// Runs one command. The caller holds the transaction gate.
pub(crate) fn dispatch(store: &Store, session: &mut Session, args: &[Vec<u8>]) -> Value {
    let outcome = args
        .first()
        .ok_or(CmdError::Empty)
        .and_then(|name| {
            lookup(name).ok_or_else(|| CmdError::Unknown(String::from_utf8_lossy(name).into_owned()))
        })
        .and_then(|def| {
            check_arity(def, args.len())?;
            let mut call = Call {
                store,
                session,
                now: Instant::now(),
            };
            (def.handler)(&mut call, args)
        });
    outcome.unwrap_or_else(Value::from)
}

// ---- argument parsing ----

pub(crate) fn parse_int(raw: &[u8]) -> Result<i64, CmdError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(CmdError::NotInteger)
}

pub(crate) fn parse_float(raw: &[u8]) -> Result<f64, CmdError> {
    let text = std::str::from_utf8(raw).map_err(|_| CmdError::NotFloat)?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().map_err(|_| CmdError::NotFloat)?,
    };
    if value.is_nan() {
        return Err(CmdError::NotFloat);
    }
    Ok(value)
}

pub(crate) fn format_float(value: f64) -> Vec<u8> {
    format!("{}", value).into_bytes()
}

/// Resolves an inclusive `start..=stop` range with negative indexes counted
/// from the end. `None` when the range selects nothing.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Bytes of an option keyword, uppercased for comparison.
pub(crate) fn keyword(raw: &[u8]) -> Vec<u8> {
    raw.to_ascii_uppercase()
}

// ---- reply helpers ----

pub(crate) fn bulk_array<I, B>(items: I) -> Value
where
    I: IntoIterator<Item = B>,
    B: Into<Vec<u8>>,
{
    Value::Array(items.into_iter().map(|item| Value::Bulk(item.into())).collect())
}

pub(crate) fn bool_reply(flag: bool) -> Value {
    Value::Integer(i64::from(flag))
}

/// Starts a fresh entry of the right type when `slot` is empty, then returns
/// the payload for mutation.
pub(crate) fn slot_data<'a>(slot: &'a mut Option<Entry>, empty: impl FnOnce() -> Data) -> &'a mut Data {
    &mut slot.get_or_insert_with(|| Entry::new(empty())).data
}
