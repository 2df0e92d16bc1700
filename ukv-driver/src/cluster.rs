//! # Cluster Provider
//!
//! Purpose: Route each command to the node owning its key's hash slot and
//! follow the cluster's redirects when ownership moves.
//!
//! ## Design Principles
//! 1. **Lazy Discovery**: The slot map is loaded from the first reachable
//!    node on first use and reloaded after `MOVED` or a node failure.
//! 2. **Bounded Redirects**: `MOVED`/`ASK` are followed at most
//!    `max_redirects` times per command.
//! 3. **Per-Node Batches**: A batch is split by owning node and each group is
//!    pipelined on its own thread; replies are stitched back in order.
//! 4. **Replica Reads Are Opt-In**: Read-only commands leave the master only
//!    when `read_only` is set, chosen by the configured `Routing`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use ukv_common::{Backend, BatchMode, Cmd, Context, Error, Result, Topology, Value};

use crate::batch::run_batch;
use crate::options::{ClusterOptions, ConnectOptions, Routing};
use crate::pool::{host_of, ConnectionPool, PoolConfig};
use crate::retry::with_retry;
use crate::slot::{key_slot, SlotMap};
use crate::standalone::expect_pong;
use crate::tls::TlsConnector;

#[derive(Default)]
struct ClusterState {
    slots: Option<Arc<SlotMap>>,
    pools: HashMap<String, ConnectionPool>,
    latency: HashMap<String, Duration>,
}

/// A redirect reply from a node that no longer (or not yet) owns a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Redirect {
    Moved(String),
    Ask(String),
}

fn parse_redirect(reply: &Value, from: &str) -> Option<Redirect> {
    let raw = match reply {
        Value::Error(raw) => raw,
        _ => return None,
    };
    let text = String::from_utf8_lossy(raw);
    let mut parts = text.split_whitespace();
    let kind = parts.next()?;
    let _slot = parts.next()?;
    let target = parts.next()?;
    let target = if target.starts_with(':') {
        format!("{}{}", host_of(from), target)
    } else {
        target.to_string()
    };
    match kind {
        "MOVED" => Some(Redirect::Moved(target)),
        "ASK" => Some(Redirect::Ask(target)),
        _ => None,
    }
}

/// `Backend` over a hash-slot sharded cluster.
pub struct Cluster {
    cluster: ClusterOptions,
    options: ConnectOptions,
    tls: Option<TlsConnector>,
    state: RwLock<ClusterState>,
    closed: AtomicBool,
}

impl Cluster {
    /// Creates the provider. No node is contacted until the first command.
    pub fn connect(cluster: ClusterOptions, mut options: ConnectOptions) -> Result<Self> {
        if cluster.addrs.iter().all(|addr| addr.trim().is_empty()) {
            return Err(Error::MissingConfig { field: "cluster.addrs" });
        }
        if options.db != 0 {
            warn!(db = options.db, "cluster mode only has database 0; ignoring db");
            options.db = 0;
        }
        let tls = options.tls.as_ref().map(TlsConnector::new).transpose()?;
        info!(seeds = cluster.addrs.len(), read_only = cluster.read_only, "cluster provider ready");
        Ok(Cluster {
            cluster,
            options,
            tls,
            state: RwLock::new(ClusterState::default()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::unsent("cluster is closed"));
        }
        Ok(())
    }

    /// Pool for `addr`, created on first use. Fails once the cluster is closed.
    fn pool(&self, addr: &str) -> Result<ConnectionPool> {
        self.ensure_open()?;
        if let Some(pool) = self.state.read().pools.get(addr) {
            return Ok(pool.clone());
        }
        // Dial outside the lock; a concurrent creator may win the insert.
        let mut config = PoolConfig::for_node(addr, &self.options, self.tls.clone());
        config.readonly = self.cluster.read_only;
        let created = ConnectionPool::new(config);

        let mut state = self.state.write();
        if self.closed.load(Ordering::SeqCst) {
            drop(state);
            created.close();
            return Err(Error::unsent("cluster is closed"));
        }
        match state.pools.get(addr) {
            Some(existing) => {
                let existing = existing.clone();
                drop(state);
                created.close();
                Ok(existing)
            }
            None => {
                state.pools.insert(addr.to_string(), created.clone());
                Ok(created)
            }
        }
    }

    fn slots(&self, ctx: &Context) -> Result<Arc<SlotMap>> {
        if let Some(slots) = self.state.read().slots.clone() {
            return Ok(slots);
        }
        self.refresh(ctx)
    }

    fn invalidate_slots(&self) {
        self.state.write().slots = None;
    }

    /// Reloads the slot map from the first node that answers `CLUSTER SLOTS`.
    fn refresh(&self, ctx: &Context) -> Result<Arc<SlotMap>> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(current) = self.state.read().slots.clone() {
            candidates.extend(current.nodes());
        }
        for seed in &self.cluster.addrs {
            if !seed.trim().is_empty() && !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_err = None;
        for addr in &candidates {
            ctx.check()?;
            let loaded = self
                .pool(addr)
                .and_then(|pool| pool.acquire(ctx))
                .and_then(|mut conn| conn.exec(ctx, &Cmd::new("CLUSTER").arg("SLOTS")))
                .and_then(|reply| SlotMap::from_reply(reply, host_of(addr)));
            match loaded {
                Ok(map) if map.is_empty() => {
                    last_err = Some(Error::connection(format!("{} reports no slots", addr)));
                }
                Ok(map) => {
                    let map = Arc::new(map);
                    let latency = if self.cluster.routing == Routing::Latency {
                        self.measure_latency(ctx, &map)
                    } else {
                        HashMap::new()
                    };
                    let mut state = self.state.write();
                    state.slots = Some(map.clone());
                    state.latency = latency;
                    drop(state);
                    debug!(addr = %addr, masters = map.masters().len(), "slot map loaded");
                    return Ok(map);
                }
                Err(err) => {
                    warn!(addr = %addr, error = %err, "slot discovery failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::unsent("no cluster node reachable")))
    }

    fn measure_latency(&self, ctx: &Context, map: &SlotMap) -> HashMap<String, Duration> {
        let mut latency = HashMap::new();
        for addr in map.nodes() {
            let started = Instant::now();
            let probe = self
                .pool(&addr)
                .and_then(|pool| pool.acquire(ctx))
                .and_then(|mut conn| conn.exec(ctx, &Cmd::new("PING")));
            if probe.is_ok() {
                latency.insert(addr, started.elapsed());
            }
        }
        latency
    }

    /// Picks the node for `cmd` from the current slot map.
    fn node_for(&self, ctx: &Context, cmd: &Cmd) -> Result<String> {
        let map = self.slots(ctx)?;
        let key = match cmd.routing_key() {
            Some(key) => key,
            // Keyless commands stay on one node so cursors remain valid.
            None => {
                return map
                    .masters()
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::unsent("cluster has no masters"))
            }
        };
        let slot = key_slot(key);
        let range = match map.lookup(slot) {
            Some(range) => range.clone(),
            None => {
                let map = self.refresh(ctx)?;
                map.lookup(slot)
                    .cloned()
                    .ok_or_else(|| Error::unsent(format!("slot {} is not served", slot)))?
            }
        };

        if !(self.cluster.read_only && cmd.is_readonly()) || range.replicas.is_empty() {
            return Ok(range.master);
        }
        let mut candidates = Vec::with_capacity(range.replicas.len() + 1);
        candidates.push(range.master.clone());
        candidates.extend(range.replicas.iter().cloned());
        match self.cluster.routing {
            Routing::Master => Ok(range.master),
            Routing::Random => Ok(candidates
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or(range.master)),
            Routing::Latency => {
                let state = self.state.read();
                Ok(candidates
                    .into_iter()
                    .min_by_key(|addr| state.latency.get(addr).copied().unwrap_or(Duration::MAX))
                    .unwrap_or(range.master))
            }
        }
    }

    /// Sends `cmd` to `addr`, preceded by `ASKING` when following an `ASK`.
    fn send_to(&self, ctx: &Context, addr: &str, cmd: &Cmd, asking: bool) -> Result<Value> {
        let result = with_retry(ctx, &self.options.retry, || {
            let mut conn = self.pool(addr)?.acquire(ctx)?;
            if asking {
                let asking_cmd = Cmd::new("ASKING");
                let mut replies = conn.pipeline(ctx, &[&asking_cmd, cmd])?;
                replies
                    .pop()
                    .ok_or_else(|| Error::Protocol("missing reply".into()))
            } else {
                conn.exec(ctx, cmd)
            }
        });
        if let Err(Error::Connection { .. }) = &result {
            self.invalidate_slots();
        }
        result
    }

    /// Executes one keyed command, following redirects.
    ///
    /// `start` resumes from a redirect already received, e.g. inside a batch.
    fn execute_routed(&self, ctx: &Context, cmd: &Cmd, start: Option<Redirect>) -> Result<Value> {
        let (mut addr, mut asking) = match start {
            Some(Redirect::Moved(target)) => (target, false),
            Some(Redirect::Ask(target)) => (target, true),
            None => (self.node_for(ctx, cmd)?, false),
        };
        for _ in 0..=self.cluster.max_redirects {
            let reply = self.send_to(ctx, &addr, cmd, asking)?;
            match parse_redirect(&reply, &addr) {
                Some(Redirect::Moved(target)) => {
                    debug!(from = %addr, to = %target, "MOVED");
                    if let Err(err) = self.refresh(ctx) {
                        warn!(error = %err, "slot refresh after MOVED failed");
                    }
                    addr = target;
                    asking = false;
                }
                Some(Redirect::Ask(target)) => {
                    debug!(from = %addr, to = %target, "ASK");
                    addr = target;
                    asking = true;
                }
                None => return Ok(reply),
            }
        }
        Err(Error::TooManyRedirects(self.cluster.max_redirects))
    }

    fn masters(&self, ctx: &Context) -> Result<Vec<String>> {
        let masters = self.slots(ctx)?.masters();
        if masters.is_empty() {
            return Err(Error::unsent("cluster has no masters"));
        }
        Ok(masters)
    }

    /// Runs `cmd` on every master and returns the replies in master order.
    fn broadcast(&self, ctx: &Context, cmd: &Cmd) -> Result<Vec<Value>> {
        let masters = self.masters(ctx)?;
        thread::scope(|scope| {
            let handles: Vec<_> = masters
                .iter()
                .map(|addr| scope.spawn(move || self.send_to(ctx, addr, cmd, false)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::connection("broadcast worker panicked")))
                })
                .collect()
        })
    }

    /// `KEYS` concatenates the matches of every master.
    fn keys_everywhere(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        let mut merged = Vec::new();
        for reply in self.broadcast(ctx, cmd)? {
            match reply {
                Value::Array(items) => merged.extend(items),
                Value::Nil => {}
                error @ Value::Error(_) => return Ok(error),
                other => {
                    return Err(Error::Protocol(format!("KEYS returned {}", other.type_name())))
                }
            }
        }
        Ok(Value::Array(merged))
    }

    /// `SCRIPT LOAD`/`FLUSH` run everywhere; `SCRIPT EXISTS` is true only when
    /// every master has the script.
    fn script_everywhere(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        let replies = self.broadcast(ctx, cmd)?;
        if let Some(error) = replies.iter().find(|reply| reply.is_error()) {
            return Ok(error.clone());
        }
        let exists = cmd
            .as_args()
            .get(1)
            .map_or(false, |sub| sub.eq_ignore_ascii_case(b"EXISTS"));
        if !exists {
            return replies
                .into_iter()
                .next()
                .ok_or_else(|| Error::Protocol("no script reply".into()));
        }

        let mut combined: Option<Vec<Value>> = None;
        for reply in replies {
            let flags = match reply {
                Value::Array(flags) => flags,
                other => {
                    return Err(Error::Protocol(format!(
                        "SCRIPT EXISTS returned {}",
                        other.type_name()
                    )))
                }
            };
            combined = Some(match combined {
                None => flags,
                Some(acc) => acc
                    .into_iter()
                    .zip(flags)
                    .map(|(a, b)| match (a, b) {
                        (Value::Integer(1), Value::Integer(1)) => Value::Integer(1),
                        _ => Value::Integer(0),
                    })
                    .collect(),
            });
        }
        Ok(Value::Array(combined.unwrap_or_default()))
    }

    /// Runs one node's share of a batch.
    fn batch_on_node(
        &self,
        ctx: &Context,
        addr: &str,
        cmds: &[&Cmd],
        mode: BatchMode,
    ) -> Result<Vec<Value>> {
        let result = with_retry(ctx, &self.options.retry, || {
            let mut conn = self.pool(addr)?.acquire(ctx)?;
            run_batch(&mut conn, ctx, cmds, mode)
        });
        if let Err(Error::Connection { .. }) = &result {
            self.invalidate_slots();
        }
        result
    }

    /// Groups command indexes by owning node, preserving first-seen order.
    fn group_by_node(&self, ctx: &Context, cmds: &[Cmd]) -> Result<Vec<(String, Vec<usize>)>> {
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, cmd) in cmds.iter().enumerate() {
            let addr = self.node_for(ctx, cmd)?;
            match groups.iter_mut().find(|(node, _)| *node == addr) {
                Some((_, members)) => members.push(idx),
                None => groups.push((addr, vec![idx])),
            }
        }
        Ok(groups)
    }

    fn run_groups(
        &self,
        ctx: &Context,
        cmds: &[Cmd],
        groups: &[(String, Vec<usize>)],
        mode: BatchMode,
    ) -> Vec<Result<Vec<Value>>> {
        thread::scope(|scope| {
            let handles: Vec<_> = groups
                .iter()
                .map(|(addr, members)| {
                    scope.spawn(move || {
                        let refs: Vec<&Cmd> = members.iter().map(|&idx| &cmds[idx]).collect();
                        self.batch_on_node(ctx, addr, &refs, mode)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::connection("batch worker panicked")))
                })
                .collect()
        })
    }
}

fn is_redirect(reply: &Value) -> bool {
    parse_redirect(reply, "").is_some()
}

impl Backend for Cluster {
    fn topology(&self) -> Topology {
        Topology::Cluster
    }

    fn execute(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        self.ensure_open()?;
        if cmd.is("KEYS") {
            return self.keys_everywhere(ctx, cmd);
        }
        if cmd.is("SCRIPT") {
            return self.script_everywhere(ctx, cmd);
        }
        self.execute_routed(ctx, cmd, None)
    }

    fn execute_batch(&self, ctx: &Context, cmds: &[Cmd], mode: BatchMode) -> Result<Vec<Value>> {
        self.ensure_open()?;
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let mut groups = self.group_by_node(ctx, cmds)?;
        let mut results: Vec<Option<Value>> = vec![None; cmds.len()];

        for _ in 0..=self.cluster.max_redirects {
            let outcomes = self.run_groups(ctx, cmds, &groups, mode);
            let mut moved = Vec::new();
            for ((addr, members), outcome) in groups.iter().zip(outcomes) {
                let replies = outcome?;
                let group_redirected = replies.iter().any(is_redirect);
                if mode == BatchMode::Transaction && group_redirected {
                    // Nothing in an aborted transaction ran; replay the whole group.
                    moved.extend(members.iter().copied());
                    continue;
                }
                for (&idx, reply) in members.iter().zip(replies) {
                    let redirect = match mode {
                        BatchMode::Pipeline => parse_redirect(&reply, addr),
                        BatchMode::Transaction => None,
                    };
                    results[idx] = Some(match redirect {
                        Some(redirect) => self.execute_routed(ctx, &cmds[idx], Some(redirect))?,
                        None => reply,
                    });
                }
            }
            if moved.is_empty() {
                return Ok(results.into_iter().map(|r| r.unwrap_or(Value::Nil)).collect());
            }
            debug!(commands = moved.len(), "replaying redirected transaction groups");
            self.refresh(ctx)?;
            let subset: Vec<Cmd> = moved.iter().map(|&idx| cmds[idx].clone()).collect();
            groups = self
                .group_by_node(ctx, &subset)?
                .into_iter()
                .map(|(addr, local)| (addr, local.into_iter().map(|i| moved[i]).collect()))
                .collect();
        }
        Err(Error::TooManyRedirects(self.cluster.max_redirects))
    }

    fn ping(&self, ctx: &Context) -> Result<()> {
        self.ensure_open()?;
        for reply in self.broadcast(ctx, &Cmd::new("PING"))? {
            expect_pong(reply)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.state.write();
        for pool in state.pools.values() {
            pool.close();
        }
        state.pools.clear();
        state.slots = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_moved_and_ask() {
        let moved = Value::error("MOVED 3999 127.0.0.1:6381");
        assert_eq!(
            parse_redirect(&moved, "127.0.0.1:6379"),
            Some(Redirect::Moved("127.0.0.1:6381".into()))
        );
        let ask = Value::error("ASK 3999 10.0.0.9:7000");
        assert_eq!(
            parse_redirect(&ask, "127.0.0.1:6379"),
            Some(Redirect::Ask("10.0.0.9:7000".into()))
        );
    }

    #[test]
    fn empty_redirect_host_means_current_host() {
        let moved = Value::error("MOVED 12182 :7002");
        assert_eq!(
            parse_redirect(&moved, "10.0.0.1:7000"),
            Some(Redirect::Moved("10.0.0.1:7002".into()))
        );
    }

    #[test]
    fn ordinary_errors_are_not_redirects() {
        assert!(!is_redirect(&Value::error("WRONGTYPE Operation against a key")));
        assert!(!is_redirect(&Value::Integer(1)));
    }

    #[test]
    fn requires_seed_addresses() {
        let err = Cluster::connect(ClusterOptions::default(), ConnectOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingConfig { field: "cluster.addrs" }));
    }
}
