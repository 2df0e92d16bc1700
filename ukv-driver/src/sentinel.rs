//! # Sentinel Provider
//!
//! Purpose: Serve commands from the current master of a sentinel-supervised
//! group, re-resolving it after a failover.
//!
//! ## Design Principles
//! 1. **Ask, Then Cache**: The master address comes from the first sentinel
//!    that knows the group and is cached until it misbehaves.
//! 2. **Failover Detection**: A request that never reached the master, or a
//!    `READONLY` reply from a demoted master, drops the cached master and the
//!    call is replayed against a freshly resolved one.
//! 3. **Separate Credentials**: Sentinels use `sentinel_auth`; data nodes use
//!    the regular credentials. TLS settings apply to both.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{info, warn};

use ukv_common::{Backend, BatchMode, Cmd, Context, Error, Result, Topology, Value};

use crate::batch::run_batch;
use crate::options::{ConnectOptions, PoolOptions, SentinelOptions};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};
use crate::retry::with_retry;
use crate::standalone::expect_pong;
use crate::tls::TlsConnector;

/// `Backend` over a sentinel-supervised primary/replica group.
pub struct Sentinel {
    sentinel: SentinelOptions,
    options: ConnectOptions,
    tls: Option<TlsConnector>,
    sentinels: Vec<ConnectionPool>,
    master: RwLock<Option<ConnectionPool>>,
    closed: AtomicBool,
}

fn is_readonly_reply(reply: &Value) -> bool {
    match reply {
        Value::Error(raw) => raw.starts_with(b"READONLY"),
        _ => false,
    }
}

impl Sentinel {
    /// Creates the provider. The master is resolved on first use.
    pub fn connect(sentinel: SentinelOptions, options: ConnectOptions) -> Result<Self> {
        if sentinel.master_name.trim().is_empty() {
            return Err(Error::MissingConfig {
                field: "sentinel.master_name",
            });
        }
        if sentinel.addrs.iter().all(|addr| addr.trim().is_empty()) {
            return Err(Error::MissingConfig {
                field: "sentinel.addrs",
            });
        }
        let tls = options.tls.as_ref().map(TlsConnector::new).transpose()?;

        let sentinels = sentinel
            .addrs
            .iter()
            .filter(|addr| !addr.trim().is_empty())
            .map(|addr| {
                ConnectionPool::new(PoolConfig {
                    addr: addr.clone(),
                    auth: sentinel.sentinel_auth.clone(),
                    db: 0,
                    readonly: false,
                    pool: PoolOptions {
                        size: 2,
                        min_idle: 0,
                        max_idle: 1,
                        ..options.pool.clone()
                    },
                    timeouts: options.timeouts.clone(),
                    tls: tls.clone(),
                })
            })
            .collect();

        info!(
            master = %sentinel.master_name,
            sentinels = sentinel.addrs.len(),
            "sentinel provider ready"
        );
        Ok(Sentinel {
            sentinel,
            options,
            tls,
            sentinels,
            master: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Name of the supervised master group.
    pub fn master_name(&self) -> &str {
        &self.sentinel.master_name
    }

    /// Asks each sentinel in turn for the current master address.
    pub fn resolve_master(&self, ctx: &Context) -> Result<String> {
        let query = Cmd::new("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(&self.sentinel.master_name);
        for pool in &self.sentinels {
            ctx.check()?;
            let reply = pool.acquire(ctx).and_then(|mut conn| conn.exec(ctx, &query));
            match reply {
                Ok(Value::Array(parts)) if parts.len() == 2 => {
                    let host = parts[0].as_bytes().map(String::from_utf8_lossy);
                    let port = parts[1].as_bytes().map(String::from_utf8_lossy);
                    if let (Some(host), Some(port)) = (host, port) {
                        return Ok(if host.contains(':') {
                            format!("[{}]:{}", host, port)
                        } else {
                            format!("{}:{}", host, port)
                        });
                    }
                    warn!(sentinel = %pool.addr(), "malformed master address");
                }
                Ok(Value::Nil) => {
                    warn!(sentinel = %pool.addr(), master = %self.sentinel.master_name, "sentinel does not know master");
                }
                Ok(other) => {
                    warn!(sentinel = %pool.addr(), reply = other.type_name(), "unexpected sentinel reply");
                }
                Err(err) => {
                    warn!(sentinel = %pool.addr(), error = %err, "sentinel unreachable");
                }
            }
        }
        ctx.check()?;
        Err(Error::NoMaster(self.sentinel.master_name.clone()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::unsent(format!(
                "sentinel group {} is closed",
                self.sentinel.master_name
            )));
        }
        Ok(())
    }

    fn master_pool(&self, ctx: &Context) -> Result<ConnectionPool> {
        self.ensure_open()?;
        if let Some(pool) = self.master.read().as_ref() {
            return Ok(pool.clone());
        }
        let addr = self.resolve_master(ctx)?;
        let mut slot = self.master.write();
        self.ensure_open()?;
        if let Some(pool) = slot.as_ref() {
            if pool.addr() == addr {
                return Ok(pool.clone());
            }
        }
        let pool = ConnectionPool::new(PoolConfig::for_node(&addr, &self.options, self.tls.clone()));
        info!(master = %self.sentinel.master_name, addr = %addr, "resolved master");
        if let Some(previous) = slot.replace(pool.clone()) {
            previous.close();
        }
        Ok(pool)
    }

    /// Drops the cached master if it is still `addr`.
    fn invalidate(&self, addr: &str) {
        let mut slot = self.master.write();
        if slot.as_ref().map_or(false, |pool| pool.addr() == addr) {
            if let Some(pool) = slot.take() {
                warn!(master = %self.sentinel.master_name, addr, "dropping cached master");
                pool.close();
            }
        }
    }

    /// Runs `op` on the master, replaying once after a demotion and on every
    /// retry after an undelivered request.
    fn run<T>(
        &self,
        ctx: &Context,
        op: impl Fn(&mut PooledConnection) -> Result<T>,
        demoted: impl Fn(&T) -> bool,
    ) -> Result<T> {
        self.ensure_open()?;
        let mut replayed = false;
        loop {
            let (addr, value) = with_retry(ctx, &self.options.retry, || {
                let pool = self.master_pool(ctx)?;
                let addr = pool.addr().to_string();
                let outcome = pool.acquire(ctx).and_then(|mut conn| op(&mut conn));
                match outcome {
                    Ok(value) => Ok((addr, value)),
                    Err(err) => {
                        if matches!(err, Error::Connection { .. }) {
                            self.invalidate(&addr);
                        }
                        Err(err)
                    }
                }
            })?;
            if !replayed && demoted(&value) {
                replayed = true;
                self.invalidate(&addr);
                continue;
            }
            return Ok(value);
        }
    }
}

impl Backend for Sentinel {
    fn topology(&self) -> Topology {
        Topology::Sentinel
    }

    fn execute(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        self.run(ctx, |conn| conn.exec(ctx, cmd), is_readonly_reply)
    }

    fn execute_batch(&self, ctx: &Context, cmds: &[Cmd], mode: BatchMode) -> Result<Vec<Value>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&Cmd> = cmds.iter().collect();
        self.run(
            ctx,
            |conn| run_batch(conn, ctx, &refs, mode),
            |replies: &Vec<Value>| replies.iter().any(is_readonly_reply),
        )
    }

    fn ping(&self, ctx: &Context) -> Result<()> {
        expect_pong(self.execute(ctx, &Cmd::new("PING"))?)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(pool) = self.master.write().take() {
            pool.close();
        }
        for pool in &self.sentinels {
            pool.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_demoted_master_reply() {
        assert!(is_readonly_reply(&Value::error(
            "READONLY You can't write against a read only replica."
        )));
        assert!(!is_readonly_reply(&Value::error("ERR syntax error")));
        assert!(!is_readonly_reply(&Value::ok()));
    }

    #[test]
    fn requires_master_name_and_sentinels() {
        let options = SentinelOptions {
            addrs: vec!["127.0.0.1:26379".into()],
            ..SentinelOptions::default()
        };
        let err = Sentinel::connect(options, ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, Error::MissingConfig { field: "sentinel.master_name" }));

        let options = SentinelOptions {
            master_name: "mymaster".into(),
            ..SentinelOptions::default()
        };
        let err = Sentinel::connect(options, ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, Error::MissingConfig { field: "sentinel.addrs" }));
    }
}
