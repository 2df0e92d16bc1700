//! # Single-Node Provider
//!
//! Purpose: Serve every command from one pooled node.

use tracing::info;

use ukv_common::{Backend, BatchMode, Cmd, Context, Error, Result, Topology, Value};

use crate::batch::run_batch;
use crate::options::ConnectOptions;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::retry::with_retry;
use crate::tls::TlsConnector;

/// `Backend` over a single store node.
pub struct Standalone {
    pool: ConnectionPool,
    options: ConnectOptions,
}

impl Standalone {
    /// Creates the provider. Connections are dialled lazily (after `min_idle` warm-up).
    pub fn connect(addr: &str, options: ConnectOptions) -> Result<Self> {
        if addr.trim().is_empty() {
            return Err(Error::MissingConfig { field: "addr" });
        }
        let tls = options.tls.as_ref().map(TlsConnector::new).transpose()?;
        let pool = ConnectionPool::new(PoolConfig::for_node(addr, &options, tls));
        info!(addr, db = options.db, "single-node provider ready");
        Ok(Standalone { pool, options })
    }

    /// Address of the node.
    pub fn addr(&self) -> &str {
        self.pool.addr()
    }
}

impl Backend for Standalone {
    fn topology(&self) -> Topology {
        Topology::Single
    }

    fn execute(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        with_retry(ctx, &self.options.retry, || {
            let mut conn = self.pool.acquire(ctx)?;
            conn.exec(ctx, cmd)
        })
    }

    fn execute_batch(&self, ctx: &Context, cmds: &[Cmd], mode: BatchMode) -> Result<Vec<Value>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&Cmd> = cmds.iter().collect();
        with_retry(ctx, &self.options.retry, || {
            let mut conn = self.pool.acquire(ctx)?;
            run_batch(&mut conn, ctx, &refs, mode)
        })
    }

    fn ping(&self, ctx: &Context) -> Result<()> {
        expect_pong(self.execute(ctx, &Cmd::new("PING"))?)
    }

    fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

/// Accepts `+PONG` (or any non-error reply) from a liveness probe.
pub(crate) fn expect_pong(reply: Value) -> Result<()> {
    reply.into_result().map(|_| ())
}
