//! # Backend Capability
//!
//! Purpose: The single seam between the unified client and whatever actually
//! talks to the store. Single-node, cluster and sentinel providers implement
//! it identically, so the client is written once.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Providers are interchangeable behind `dyn Backend`.
//! 2. **Raw Replies**: Error replies come back as `Value::Error`, not `Err`;
//!    `Err` is reserved for failures of the round trip itself.
//! 3. **Batch as One Call**: `execute_batch` receives the whole ordered command
//!    list so each provider can pipeline it however its topology requires.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cmd::Cmd;
use crate::context::Context;
use crate::error::Result;
use crate::value::Value;

/// Deployment shape of the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One standalone node.
    Single,
    /// Hash-slot sharded cluster.
    Cluster,
    /// Primary/replica group supervised by sentinels.
    Sentinel,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::Single => "single",
            Topology::Cluster => "cluster",
            Topology::Sentinel => "sentinel",
        };
        f.write_str(name)
    }
}

/// How a batch is executed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Grouped round trip without isolation.
    Pipeline,
    /// Wrapped in `MULTI`/`EXEC`; atomic and isolated.
    Transaction,
}

/// A live connection (or pool of connections) to one topology.
///
/// Implementations must be safe to share across threads; the client holds
/// them behind an `Arc` and issues independent calls concurrently.
pub trait Backend: Send + Sync {
    /// Which topology this provider speaks to.
    fn topology(&self) -> Topology;

    /// Executes one command and returns its raw reply.
    ///
    /// `Err` means the round trip failed; a store-side failure is returned as
    /// `Ok(Value::Error(..))`.
    fn execute(&self, ctx: &Context, cmd: &Cmd) -> Result<Value>;

    /// Executes `cmds` as one batch and returns exactly one reply per command,
    /// in order. Per-command failures are `Value::Error` entries.
    fn execute_batch(&self, ctx: &Context, cmds: &[Cmd], mode: BatchMode) -> Result<Vec<Value>>;

    /// Liveness probe.
    fn ping(&self, ctx: &Context) -> Result<()>;

    /// Releases pooled connections. Idempotent.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_tags_are_lowercase() {
        let parsed: Topology = serde_json::from_str("\"sentinel\"").unwrap();
        assert_eq!(parsed, Topology::Sentinel);
        assert_eq!(serde_json::to_string(&Topology::Cluster).unwrap(), "\"cluster\"");
    }

    #[test]
    fn unknown_topology_is_rejected() {
        assert!(serde_json::from_str::<Topology>("\"ring\"").is_err());
    }
}
