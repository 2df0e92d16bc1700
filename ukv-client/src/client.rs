//! # Unified Client
//!
//! Purpose: One command surface over any `Backend`, with the key/TTL policy
//! applied uniformly before delegation.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides which topology serves the calls.
//! 2. **Stateless Beyond Its Parts**: It holds only an `Arc<dyn Backend>` and
//!    an `Arc<Policy>`, so clones are cheap and safe to share across threads.
//! 3. **Typed Misses**: Reads of absent keys return `Error::NotFound` (or an
//!    `Option`), never a transport error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ukv_common::{Backend, BatchMode, Cmd, Context, Result, ToArg, Topology, Value};

use crate::batch::Pipeline;
use crate::command;
use crate::policy::Policy;
use crate::reply::{self, Decode, Member, Ttl};

/// Topology-independent client.
#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
    policy: Arc<Policy>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("topology", &self.backend.topology())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Client {
    /// Wraps an already connected backend.
    pub fn new(backend: Arc<dyn Backend>, policy: Policy) -> Self {
        Client {
            backend,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn topology(&self) -> Topology {
        self.backend.topology()
    }

    /// The backend behind this client.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn run<T>(&self, ctx: &Context, cmd: Cmd, decode: Decode<T>) -> Result<T> {
        decode(self.backend.execute(ctx, &cmd)?)
    }

    /// Sends a raw command. Keys are not prefixed.
    pub fn execute(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        self.backend.execute(ctx, cmd)?.into_result()
    }

    pub fn ping(&self, ctx: &Context) -> Result<()> {
        self.backend.ping(ctx)
    }

    /// Releases the backend's connections. Other clones share them.
    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }

    // Batches

    /// A non-transactional batch: one round trip, no isolation.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.backend.clone(), self.policy.clone(), BatchMode::Pipeline)
    }

    /// A batch executed atomically with `MULTI`/`EXEC`.
    pub fn transactional_pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.backend.clone(),
            self.policy.clone(),
            BatchMode::Transaction,
        )
    }

    // Strings

    /// Returns `Error::NotFound` when the key is missing.
    pub fn get(&self, ctx: &Context, key: &str) -> Result<String> {
        self.run(ctx, command::get(&self.policy, key), reply::string)
    }

    /// Stores `value`. A zero `ttl` applies the default TTL.
    pub fn set<V: ToArg + ?Sized>(
        &self,
        ctx: &Context,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<()> {
        self.run(ctx, command::set(&self.policy, key, value, ttl), reply::unit)
    }

    /// Stores `value` only if the key is absent; `false` when it already exists.
    pub fn set_nx<V: ToArg + ?Sized>(
        &self,
        ctx: &Context,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<bool> {
        self.run(
            ctx,
            command::set_nx(&self.policy, key, value, ttl),
            reply::boolean,
        )
    }

    /// Replaces the value and returns the previous one.
    ///
    /// The new value is written; `Error::NotFound` only reports that there
    /// was no previous value.
    pub fn get_set<V: ToArg + ?Sized>(&self, ctx: &Context, key: &str, value: &V) -> Result<String> {
        self.run(ctx, command::get_set(&self.policy, key, value), reply::string)
    }

    pub fn mget<K: AsRef<str>>(&self, ctx: &Context, keys: &[K]) -> Result<Vec<Option<String>>> {
        self.run(ctx, command::mget(&self.policy, keys), reply::opt_strings)
    }

    pub fn mset<K: AsRef<str>, V: ToArg>(&self, ctx: &Context, pairs: &[(K, V)]) -> Result<()> {
        self.run(ctx, command::mset(&self.policy, pairs), reply::unit)
    }

    pub fn incr(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.incr_by(ctx, key, 1)
    }

    pub fn incr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<i64> {
        self.run(ctx, command::incr_by(&self.policy, key, delta), reply::int)
    }

    pub fn decr(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.incr_by(ctx, key, -1)
    }

    pub fn decr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<i64> {
        self.run(ctx, command::decr_by(&self.policy, key, delta), reply::int)
    }

    // Hashes

    pub fn hget(&self, ctx: &Context, key: &str, field: &str) -> Result<String> {
        self.run(ctx, command::hget(&self.policy, key, field), reply::string)
    }

    /// Returns the number of fields that were added.
    pub fn hset<V: ToArg + ?Sized>(
        &self,
        ctx: &Context,
        key: &str,
        field: &str,
        value: &V,
    ) -> Result<i64> {
        self.run(ctx, command::hset(&self.policy, key, field, value), reply::int)
    }

    pub fn hset_nx<V: ToArg + ?Sized>(
        &self,
        ctx: &Context,
        key: &str,
        field: &str,
        value: &V,
    ) -> Result<bool> {
        self.run(
            ctx,
            command::hset_nx(&self.policy, key, field, value),
            reply::boolean,
        )
    }

    pub fn hdel<F: ToArg>(&self, ctx: &Context, key: &str, fields: &[F]) -> Result<i64> {
        self.run(ctx, command::hdel(&self.policy, key, fields), reply::int)
    }

    pub fn hexists(&self, ctx: &Context, key: &str, field: &str) -> Result<bool> {
        self.run(ctx, command::hexists(&self.policy, key, field), reply::boolean)
    }

    pub fn hgetall(&self, ctx: &Context, key: &str) -> Result<HashMap<String, String>> {
        self.run(ctx, command::read("HGETALL", &self.policy, key), reply::map)
    }

    pub fn hkeys(&self, ctx: &Context, key: &str) -> Result<Vec<String>> {
        self.run(ctx, command::read("HKEYS", &self.policy, key), reply::strings)
    }

    pub fn hvals(&self, ctx: &Context, key: &str) -> Result<Vec<String>> {
        self.run(ctx, command::read("HVALS", &self.policy, key), reply::strings)
    }

    pub fn hlen(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.run(ctx, command::read("HLEN", &self.policy, key), reply::int)
    }

    pub fn hmget<F: ToArg>(
        &self,
        ctx: &Context,
        key: &str,
        fields: &[F],
    ) -> Result<Vec<Option<String>>> {
        self.run(ctx, command::hmget(&self.policy, key, fields), reply::opt_strings)
    }

    pub fn hmset<F: ToArg, V: ToArg>(&self, ctx: &Context, key: &str, pairs: &[(F, V)]) -> Result<()> {
        self.run(ctx, command::hmset(&self.policy, key, pairs), reply::unit)
    }

    pub fn hincr_by(&self, ctx: &Context, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.run(
            ctx,
            command::hincr_by(&self.policy, key, field, delta),
            reply::int,
        )
    }

    // Lists

    /// Returns the list length after the push.
    pub fn lpush<V: ToArg>(&self, ctx: &Context, key: &str, values: &[V]) -> Result<i64> {
        self.run(ctx, command::push("LPUSH", &self.policy, key, values), reply::int)
    }

    pub fn rpush<V: ToArg>(&self, ctx: &Context, key: &str, values: &[V]) -> Result<i64> {
        self.run(ctx, command::push("RPUSH", &self.policy, key, values), reply::int)
    }

    pub fn lpop(&self, ctx: &Context, key: &str) -> Result<String> {
        self.run(ctx, command::write("LPOP", &self.policy, key), reply::string)
    }

    pub fn rpop(&self, ctx: &Context, key: &str) -> Result<String> {
        self.run(ctx, command::write("RPOP", &self.policy, key), reply::string)
    }

    pub fn llen(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.run(ctx, command::read("LLEN", &self.policy, key), reply::int)
    }

    /// Elements from `start` to `stop` inclusive; negative indexes count from the tail.
    pub fn lrange(&self, ctx: &Context, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.run(
            ctx,
            command::range("LRANGE", &self.policy, key, start, stop),
            reply::strings,
        )
    }

    pub fn lindex(&self, ctx: &Context, key: &str, index: i64) -> Result<String> {
        self.run(ctx, command::lindex(&self.policy, key, index), reply::string)
    }

    pub fn lset<V: ToArg + ?Sized>(
        &self,
        ctx: &Context,
        key: &str,
        index: i64,
        value: &V,
    ) -> Result<()> {
        self.run(ctx, command::lset(&self.policy, key, index, value), reply::unit)
    }

    pub fn lrem<V: ToArg + ?Sized>(
        &self,
        ctx: &Context,
        key: &str,
        count: i64,
        value: &V,
    ) -> Result<i64> {
        self.run(ctx, command::lrem(&self.policy, key, count, value), reply::int)
    }

    pub fn ltrim(&self, ctx: &Context, key: &str, start: i64, stop: i64) -> Result<()> {
        self.run(ctx, command::ltrim(&self.policy, key, start, stop), reply::unit)
    }

    // Sets

    pub fn sadd<M: ToArg>(&self, ctx: &Context, key: &str, members: &[M]) -> Result<i64> {
        self.run(ctx, command::members("SADD", &self.policy, key, members), reply::int)
    }

    pub fn srem<M: ToArg>(&self, ctx: &Context, key: &str, members: &[M]) -> Result<i64> {
        self.run(ctx, command::members("SREM", &self.policy, key, members), reply::int)
    }

    pub fn smembers(&self, ctx: &Context, key: &str) -> Result<Vec<String>> {
        self.run(ctx, command::read("SMEMBERS", &self.policy, key), reply::strings)
    }

    pub fn sismember<M: ToArg + ?Sized>(&self, ctx: &Context, key: &str, member: &M) -> Result<bool> {
        self.run(ctx, command::sismember(&self.policy, key, member), reply::boolean)
    }

    pub fn scard(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.run(ctx, command::read("SCARD", &self.policy, key), reply::int)
    }

    /// Removes and returns a random member.
    pub fn spop(&self, ctx: &Context, key: &str) -> Result<String> {
        self.run(ctx, command::write("SPOP", &self.policy, key), reply::string)
    }

    pub fn srandmember(&self, ctx: &Context, key: &str) -> Result<String> {
        self.run(ctx, command::read("SRANDMEMBER", &self.policy, key), reply::string)
    }

    pub fn sinter<K: AsRef<str>>(&self, ctx: &Context, keys: &[K]) -> Result<Vec<String>> {
        self.run(ctx, command::set_algebra("SINTER", &self.policy, keys), reply::strings)
    }

    pub fn sunion<K: AsRef<str>>(&self, ctx: &Context, keys: &[K]) -> Result<Vec<String>> {
        self.run(ctx, command::set_algebra("SUNION", &self.policy, keys), reply::strings)
    }

    pub fn sdiff<K: AsRef<str>>(&self, ctx: &Context, keys: &[K]) -> Result<Vec<String>> {
        self.run(ctx, command::set_algebra("SDIFF", &self.policy, keys), reply::strings)
    }

    // Sorted sets

    /// Returns the number of new members.
    pub fn zadd(&self, ctx: &Context, key: &str, members: &[Member]) -> Result<i64> {
        self.run(ctx, command::zadd(&self.policy, key, members), reply::int)
    }

    pub fn zrem<M: ToArg>(&self, ctx: &Context, key: &str, members: &[M]) -> Result<i64> {
        self.run(ctx, command::members("ZREM", &self.policy, key, members), reply::int)
    }

    pub fn zscore(&self, ctx: &Context, key: &str, member: &str) -> Result<f64> {
        self.run(
            ctx,
            command::zmember("ZSCORE", &self.policy, key, member),
            reply::float,
        )
    }

    /// Zero-based rank by ascending score.
    pub fn zrank(&self, ctx: &Context, key: &str, member: &str) -> Result<i64> {
        self.run(ctx, command::zmember("ZRANK", &self.policy, key, member), reply::rank)
    }

    /// Zero-based rank by descending score.
    pub fn zrevrank(&self, ctx: &Context, key: &str, member: &str) -> Result<i64> {
        self.run(
            ctx,
            command::zmember("ZREVRANK", &self.policy, key, member),
            reply::rank,
        )
    }

    /// Members by ascending score.
    pub fn zrange(&self, ctx: &Context, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.run(
            ctx,
            command::range("ZRANGE", &self.policy, key, start, stop),
            reply::strings,
        )
    }

    /// Members by descending score.
    pub fn zrevrange(&self, ctx: &Context, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.run(
            ctx,
            command::range("ZREVRANGE", &self.policy, key, start, stop),
            reply::strings,
        )
    }

    pub fn zrange_with_scores(
        &self,
        ctx: &Context,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Member>> {
        let cmd = command::range("ZRANGE", &self.policy, key, start, stop);
        self.run(ctx, command::with_scores(cmd), reply::members)
    }

    pub fn zrevrange_with_scores(
        &self,
        ctx: &Context,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Member>> {
        let cmd = command::range("ZREVRANGE", &self.policy, key, start, stop);
        self.run(ctx, command::with_scores(cmd), reply::members)
    }

    /// Members with `min <= score <= max`, ascending. Bounds accept `(x`,
    /// `-inf` and `+inf`.
    pub fn zrange_by_score(
        &self,
        ctx: &Context,
        key: &str,
        min: &str,
        max: &str,
    ) -> Result<Vec<String>> {
        self.run(
            ctx,
            command::score_range("ZRANGEBYSCORE", &self.policy, key, min, max),
            reply::strings,
        )
    }

    /// Members with `min <= score <= max`, descending.
    pub fn zrevrange_by_score(
        &self,
        ctx: &Context,
        key: &str,
        max: &str,
        min: &str,
    ) -> Result<Vec<String>> {
        self.run(
            ctx,
            command::score_range("ZREVRANGEBYSCORE", &self.policy, key, max, min),
            reply::strings,
        )
    }

    pub fn zcard(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.run(ctx, command::read("ZCARD", &self.policy, key), reply::int)
    }

    pub fn zcount(&self, ctx: &Context, key: &str, min: &str, max: &str) -> Result<i64> {
        self.run(
            ctx,
            command::score_range("ZCOUNT", &self.policy, key, min, max),
            reply::int,
        )
    }

    /// Returns the new score.
    pub fn zincr_by(&self, ctx: &Context, key: &str, delta: f64, member: &str) -> Result<f64> {
        self.run(
            ctx,
            command::zincr_by(&self.policy, key, delta, member),
            reply::float,
        )
    }

    // Generic

    /// Returns how many of `keys` were removed.
    pub fn del<K: AsRef<str>>(&self, ctx: &Context, keys: &[K]) -> Result<i64> {
        self.run(ctx, command::del(&self.policy, keys), reply::int)
    }

    /// Returns how many of `keys` exist (repeats count repeatedly).
    pub fn exists<K: AsRef<str>>(&self, ctx: &Context, keys: &[K]) -> Result<i64> {
        self.run(ctx, command::exists(&self.policy, keys), reply::int)
    }

    /// Sets a relative expiration; `false` when the key does not exist.
    /// The default TTL does not apply here.
    pub fn expire(&self, ctx: &Context, key: &str, ttl: Duration) -> Result<bool> {
        self.run(ctx, command::expire(&self.policy, key, ttl), reply::boolean)
    }

    /// Sets an absolute expiration with second precision.
    pub fn expire_at(&self, ctx: &Context, key: &str, at: SystemTime) -> Result<bool> {
        self.run(ctx, command::expire_at(&self.policy, key, at), reply::boolean)
    }

    pub fn ttl(&self, ctx: &Context, key: &str) -> Result<Ttl> {
        self.run(ctx, command::ttl(&self.policy, key), reply::ttl)
    }

    /// Type name of the stored value (`string`, `hash`, ..., or `none`).
    pub fn key_type(&self, ctx: &Context, key: &str) -> Result<String> {
        self.run(ctx, command::read("TYPE", &self.policy, key), reply::status)
    }

    /// Keys matching `pattern` inside the namespace, with the prefix removed.
    pub fn keys(&self, ctx: &Context, pattern: &str) -> Result<Vec<String>> {
        let keys = self.run(ctx, command::keys(&self.policy, pattern), reply::strings)?;
        Ok(self.unprefix(keys))
    }

    /// One page of a cursor scan. Returns the page (prefix removed) and the
    /// next cursor; `0` means the scan is complete. A zero `count` lets the
    /// store pick the page size.
    ///
    /// On a cluster the scan runs on the first master only, since a cursor is
    /// meaningful on a single node. Use `keys` to match across every master.
    pub fn scan(
        &self,
        ctx: &Context,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(Vec<String>, u64)> {
        let (next, keys) = self.run(
            ctx,
            command::scan(&self.policy, cursor, pattern, count),
            reply::scan,
        )?;
        Ok((self.unprefix(keys), next))
    }

    fn unprefix(&self, keys: Vec<String>) -> Vec<String> {
        keys.into_iter()
            .map(|key| self.policy.strip_prefix(key))
            .collect()
    }

    // Scripting

    /// Runs a script. `keys` are prefixed; `args` are not.
    pub fn eval<K: AsRef<str>, A: ToArg>(
        &self,
        ctx: &Context,
        script: &str,
        keys: &[K],
        args: &[A],
    ) -> Result<Value> {
        self.run(
            ctx,
            command::eval("EVAL", &self.policy, script, keys, args),
            reply::value,
        )
    }

    pub fn eval_sha<K: AsRef<str>, A: ToArg>(
        &self,
        ctx: &Context,
        sha1: &str,
        keys: &[K],
        args: &[A],
    ) -> Result<Value> {
        self.run(
            ctx,
            command::eval("EVALSHA", &self.policy, sha1, keys, args),
            reply::value,
        )
    }

    pub fn script_exists<H: ToArg>(&self, ctx: &Context, hashes: &[H]) -> Result<Vec<bool>> {
        self.run(ctx, command::script("EXISTS", hashes), reply::bools)
    }

    pub fn script_flush(&self, ctx: &Context) -> Result<()> {
        self.run(ctx, command::script::<&str>("FLUSH", &[]), reply::unit)
    }

    pub fn script_kill(&self, ctx: &Context) -> Result<()> {
        self.run(ctx, command::script::<&str>("KILL", &[]), reply::unit)
    }

    /// Caches a script and returns its SHA1.
    pub fn script_load(&self, ctx: &Context, script: &str) -> Result<String> {
        self.run(ctx, command::script("LOAD", &[script]), reply::status)
    }
}
