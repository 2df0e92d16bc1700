//! # Deferred Batches
//!
//! Purpose: Queue commands locally, send them in one round trip, and hand each
//! command's typed result back through the handle returned at enqueue time.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: `Open -> Executed | Discarded`, enforced on
//!    every call; misuse is `Error::InvalidUse`.
//! 2. **Resolution Needs Results**: A `Handle` can only be read against the
//!    `BatchResults` its own batch produced, so "read before exec" cannot
//!    happen and a discarded batch's handles stay unresolved forever.
//! 3. **Transport vs Command Failure**: `exec` fails only when the round trip
//!    fails; a command the store rejected surfaces on its own handle.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use ukv_common::{Backend, BatchMode, Cmd, Context, Error, Result, ToArg, Value};

use crate::command;
use crate::policy::Policy;
use crate::reply::{self, Decode, Member, Ttl};

static NEXT_BATCH: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Open,
    Executed,
    Discarded,
}

/// Placeholder for one queued command's result.
pub struct Handle<T> {
    batch: u64,
    index: usize,
    decode: Decode<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Position of the command in its batch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Decodes this command's reply from its batch's results.
    ///
    /// Fails with `InvalidUse` when `results` came from another batch, and
    /// with the command's own error when the store rejected it.
    pub fn resolve(&self, results: &BatchResults) -> Result<T> {
        if results.batch != self.batch {
            return Err(Error::InvalidUse("handle belongs to a different batch"));
        }
        let reply = results
            .values
            .get(self.index)
            .cloned()
            .ok_or_else(|| Error::Protocol("batch result missing".into()))?;
        (self.decode)(reply)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("batch", &self.batch)
            .field("index", &self.index)
            .finish()
    }
}

/// Ordered raw replies of an executed batch.
#[derive(Debug, Clone)]
pub struct BatchResults {
    batch: u64,
    values: Vec<Value>,
}

impl BatchResults {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw replies in enqueue order; rejected commands are `Value::Error`.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Client-side command queue executed as one round trip.
///
/// Not safe for concurrent enqueue; it takes `&mut self` throughout.
pub struct Pipeline {
    backend: Arc<dyn Backend>,
    policy: Arc<Policy>,
    mode: BatchMode,
    id: u64,
    cmds: Vec<Cmd>,
    state: BatchState,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("queued", &self.cmds.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Pipeline {
    pub(crate) fn new(backend: Arc<dyn Backend>, policy: Arc<Policy>, mode: BatchMode) -> Self {
        Pipeline {
            backend,
            policy,
            mode,
            id: NEXT_BATCH.fetch_add(1, Ordering::Relaxed),
            cmds: Vec::new(),
            state: BatchState::Open,
        }
    }

    /// Whether the batch runs as a transaction.
    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            BatchState::Open => Ok(()),
            BatchState::Executed => Err(Error::InvalidUse("batch already executed")),
            BatchState::Discarded => Err(Error::InvalidUse("batch already discarded")),
        }
    }

    fn push<T>(&mut self, cmd: Cmd, decode: Decode<T>) -> Result<Handle<T>> {
        self.ensure_open()?;
        let index = self.cmds.len();
        self.cmds.push(cmd);
        Ok(Handle {
            batch: self.id,
            index,
            decode,
            _marker: PhantomData,
        })
    }

    /// Queues an arbitrary command; its raw reply is returned on resolve.
    pub fn cmd(&mut self, cmd: Cmd) -> Result<Handle<Value>> {
        self.push(cmd, reply::value)
    }

    /// Sends every queued command in one round trip.
    ///
    /// The batch is spent even when the round trip fails. An empty batch
    /// completes without contacting the store.
    pub fn exec(&mut self, ctx: &Context) -> Result<BatchResults> {
        self.ensure_open()?;
        self.state = BatchState::Executed;
        let cmds = std::mem::take(&mut self.cmds);
        if cmds.is_empty() {
            return Ok(BatchResults {
                batch: self.id,
                values: Vec::new(),
            });
        }
        debug!(batch = self.id, commands = cmds.len(), mode = ?self.mode, "executing batch");
        let values = self.backend.execute_batch(ctx, &cmds, self.mode)?;
        if values.len() != cmds.len() {
            return Err(Error::Protocol(format!(
                "batch of {} commands returned {} replies",
                cmds.len(),
                values.len()
            )));
        }
        Ok(BatchResults {
            batch: self.id,
            values,
        })
    }

    /// Abandons every queued command without sending anything.
    pub fn discard(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = BatchState::Discarded;
        self.cmds.clear();
        Ok(())
    }

    /// Releases the queue. Always legal and idempotent; does not change state
    /// or affect results already returned.
    pub fn close(&mut self) {
        self.cmds = Vec::new();
    }

    // Strings

    pub fn get(&mut self, key: &str) -> Result<Handle<String>> {
        let cmd = command::get(&self.policy, key);
        self.push(cmd, reply::string)
    }

    pub fn set<V: ToArg + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<Handle<()>> {
        let cmd = command::set(&self.policy, key, value, ttl);
        self.push(cmd, reply::unit)
    }

    pub fn set_nx<V: ToArg + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<Handle<bool>> {
        let cmd = command::set_nx(&self.policy, key, value, ttl);
        self.push(cmd, reply::boolean)
    }

    pub fn incr(&mut self, key: &str) -> Result<Handle<i64>> {
        self.incr_by(key, 1)
    }

    pub fn incr_by(&mut self, key: &str, delta: i64) -> Result<Handle<i64>> {
        let cmd = command::incr_by(&self.policy, key, delta);
        self.push(cmd, reply::int)
    }

    pub fn decr(&mut self, key: &str) -> Result<Handle<i64>> {
        self.incr_by(key, -1)
    }

    // Hashes

    pub fn hget(&mut self, key: &str, field: &str) -> Result<Handle<String>> {
        let cmd = command::hget(&self.policy, key, field);
        self.push(cmd, reply::string)
    }

    pub fn hset<V: ToArg + ?Sized>(
        &mut self,
        key: &str,
        field: &str,
        value: &V,
    ) -> Result<Handle<i64>> {
        let cmd = command::hset(&self.policy, key, field, value);
        self.push(cmd, reply::int)
    }

    pub fn hdel<F: ToArg>(&mut self, key: &str, fields: &[F]) -> Result<Handle<i64>> {
        let cmd = command::hdel(&self.policy, key, fields);
        self.push(cmd, reply::int)
    }

    // Lists

    pub fn lpush<V: ToArg>(&mut self, key: &str, values: &[V]) -> Result<Handle<i64>> {
        let cmd = command::push("LPUSH", &self.policy, key, values);
        self.push(cmd, reply::int)
    }

    pub fn rpush<V: ToArg>(&mut self, key: &str, values: &[V]) -> Result<Handle<i64>> {
        let cmd = command::push("RPUSH", &self.policy, key, values);
        self.push(cmd, reply::int)
    }

    pub fn lpop(&mut self, key: &str) -> Result<Handle<String>> {
        let cmd = command::write("LPOP", &self.policy, key);
        self.push(cmd, reply::string)
    }

    pub fn rpop(&mut self, key: &str) -> Result<Handle<String>> {
        let cmd = command::write("RPOP", &self.policy, key);
        self.push(cmd, reply::string)
    }

    // Sets

    pub fn sadd<M: ToArg>(&mut self, key: &str, members: &[M]) -> Result<Handle<i64>> {
        let cmd = command::members("SADD", &self.policy, key, members);
        self.push(cmd, reply::int)
    }

    pub fn srem<M: ToArg>(&mut self, key: &str, members: &[M]) -> Result<Handle<i64>> {
        let cmd = command::members("SREM", &self.policy, key, members);
        self.push(cmd, reply::int)
    }

    pub fn smembers(&mut self, key: &str) -> Result<Handle<Vec<String>>> {
        let cmd = command::read("SMEMBERS", &self.policy, key);
        self.push(cmd, reply::strings)
    }

    // Sorted sets

    pub fn zadd(&mut self, key: &str, members: &[Member]) -> Result<Handle<i64>> {
        let cmd = command::zadd(&self.policy, key, members);
        self.push(cmd, reply::int)
    }

    pub fn zrem<M: ToArg>(&mut self, key: &str, members: &[M]) -> Result<Handle<i64>> {
        let cmd = command::members("ZREM", &self.policy, key, members);
        self.push(cmd, reply::int)
    }

    pub fn zrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Handle<Vec<String>>> {
        let cmd = command::range("ZRANGE", &self.policy, key, start, stop);
        self.push(cmd, reply::strings)
    }

    // Generic

    pub fn del<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Handle<i64>> {
        let cmd = command::del(&self.policy, keys);
        self.push(cmd, reply::int)
    }

    pub fn exists<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Handle<i64>> {
        let cmd = command::exists(&self.policy, keys);
        self.push(cmd, reply::int)
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> Result<Handle<bool>> {
        let cmd = command::expire(&self.policy, key, ttl);
        self.push(cmd, reply::boolean)
    }

    pub fn ttl(&mut self, key: &str) -> Result<Handle<Ttl>> {
        let cmd = command::ttl(&self.policy, key);
        self.push(cmd, reply::ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder::Recorder;

    /// Minimal in-crate backend that records what it was asked to run.
    mod recorder {
        use std::sync::Mutex;

        use ukv_common::{Backend, BatchMode, Cmd, Context, Error, Result, Topology, Value};

        #[derive(Default)]
        pub struct Recorder {
            pub batches: Mutex<Vec<(usize, BatchMode)>>,
            pub fail: bool,
        }

        impl Backend for Recorder {
            fn topology(&self) -> Topology {
                Topology::Single
            }

            fn execute(&self, _ctx: &Context, _cmd: &Cmd) -> Result<Value> {
                Ok(Value::ok())
            }

            fn execute_batch(
                &self,
                _ctx: &Context,
                cmds: &[Cmd],
                mode: BatchMode,
            ) -> Result<Vec<Value>> {
                if self.fail {
                    return Err(Error::connection("link down"));
                }
                if let Ok(mut batches) = self.batches.lock() {
                    batches.push((cmds.len(), mode));
                }
                Ok(cmds
                    .iter()
                    .map(|cmd| {
                        if cmd.is("GET") {
                            Value::bulk("v")
                        } else {
                            Value::Integer(1)
                        }
                    })
                    .collect())
            }

            fn ping(&self, _ctx: &Context) -> Result<()> {
                Ok(())
            }

            fn close(&self) -> Result<()> {
                Ok(())
            }
        }
    }

    fn pipeline(backend: Arc<Recorder>, mode: BatchMode) -> Pipeline {
        Pipeline::new(backend, Arc::new(Policy::default()), mode)
    }

    #[test]
    fn empty_batch_skips_the_round_trip() {
        let backend = Arc::new(Recorder::default());
        let mut pipe = pipeline(backend.clone(), BatchMode::Pipeline);
        let results = pipe.exec(&Context::background()).unwrap();
        assert!(results.is_empty());
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn state_machine_rejects_reuse() {
        let backend = Arc::new(Recorder::default());
        let ctx = Context::background();

        let mut pipe = pipeline(backend.clone(), BatchMode::Pipeline);
        pipe.incr("n").unwrap();
        pipe.exec(&ctx).unwrap();
        assert!(pipe.exec(&ctx).unwrap_err().is_invalid_use());
        assert!(pipe.get("k").unwrap_err().is_invalid_use());
        assert!(pipe.discard().unwrap_err().is_invalid_use());

        let mut pipe = pipeline(backend, BatchMode::Pipeline);
        pipe.discard().unwrap();
        assert!(pipe.discard().unwrap_err().is_invalid_use());
        assert!(pipe.exec(&ctx).unwrap_err().is_invalid_use());
        pipe.close();
        pipe.close();
    }

    #[test]
    fn handles_resolve_only_against_their_batch() {
        let backend = Arc::new(Recorder::default());
        let ctx = Context::background();
        let mut first = pipeline(backend.clone(), BatchMode::Transaction);
        let get = first.get("k").unwrap();
        let incr = first.incr("n").unwrap();
        let mut second = pipeline(backend.clone(), BatchMode::Pipeline);
        second.incr("n").unwrap();

        let results = first.exec(&ctx).unwrap();
        let other = second.exec(&ctx).unwrap();
        assert_eq!(get.resolve(&results).unwrap(), "v");
        assert_eq!(incr.resolve(&results).unwrap(), 1);
        assert!(incr.resolve(&other).unwrap_err().is_invalid_use());
        assert_eq!(
            *backend.batches.lock().unwrap(),
            vec![(2, BatchMode::Transaction), (1, BatchMode::Pipeline)]
        );
    }

    #[test]
    fn transport_failure_still_spends_the_batch() {
        let backend = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let ctx = Context::background();
        let mut pipe = pipeline(backend, BatchMode::Pipeline);
        pipe.incr("n").unwrap();
        assert!(pipe.exec(&ctx).unwrap_err().is_connection());
        assert!(pipe.exec(&ctx).unwrap_err().is_invalid_use());
    }
}
