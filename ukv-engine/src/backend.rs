//! # In-Process Backend
//!
//! Purpose: Serve the `Backend` capability straight from a `Store`, with no
//! sockets in between. Useful for embedding and for exercising the client.
//!
//! ## Design Principles
//! 1. **Same Replies as the Wire**: Commands run through the interpreter the
//!    server uses, so error replies and nil handling match a remote node.
//! 2. **Per-Call Session**: Each call runs in a trusted session bound to the
//!    configured database; a batch shares one session.
//! 3. **Honour the Context**: A cancelled or expired context fails the call
//!    before it touches the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ukv_common::{Backend, BatchMode, Cmd, Context, Error, Result, Topology, Value};

use crate::store::{Session, Store};

/// `Backend` over an in-memory `Store`.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<Store>,
    db: usize,
    closed: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A backend over a fresh store, using database 0.
    pub fn new() -> Self {
        Self::with_store(Arc::new(Store::new()), 0)
    }

    /// A backend over a shared store, bound to database `db`.
    pub fn with_store(store: Arc<Store>, db: usize) -> Self {
        MemoryBackend {
            store,
            db,
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn guard(&self, ctx: &Context) -> Result<Session> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::unsent("memory backend is closed"));
        }
        ctx.check()?;
        if self.db >= self.store.databases() {
            return Err(Error::InvalidConfig {
                field: "db",
                reason: format!("database {} does not exist", self.db),
            });
        }
        Ok(Session::trusted(self.db))
    }
}

impl Backend for MemoryBackend {
    fn topology(&self) -> Topology {
        Topology::Single
    }

    fn execute(&self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        let mut session = self.guard(ctx)?;
        Ok(self.store.execute(&mut session, cmd.as_args()))
    }

    fn execute_batch(&self, ctx: &Context, cmds: &[Cmd], mode: BatchMode) -> Result<Vec<Value>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let mut session = self.guard(ctx)?;
        Ok(match mode {
            BatchMode::Pipeline => cmds
                .iter()
                .map(|cmd| self.store.execute(&mut session, cmd.as_args()))
                .collect(),
            BatchMode::Transaction => {
                let args: Vec<&[Vec<u8>]> = cmds.iter().map(Cmd::as_args).collect();
                self.store.transaction(&mut session, &args)
            }
        })
    }

    fn ping(&self, ctx: &Context) -> Result<()> {
        self.guard(ctx).map(|_| ())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
