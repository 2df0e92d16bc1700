//! # UniKV Store Driver
//!
//! Purpose: Provide blocking, pooled RESP2 connectivity to a store deployed as
//! a single node, a sharded cluster or a sentinel-supervised group, each
//! exposed through the shared `Backend` capability.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Deadline-Bounded IO**: Every socket operation is capped by the call's
//!    `Context`; an interrupted connection is never reused.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Topology Behind a Trait**: `Standalone`, `Cluster` and `Sentinel` are
//!    interchangeable `Backend` implementations.

mod batch;
mod cluster;
mod options;
mod pool;
mod resp;
mod retry;
mod sentinel;
mod slot;
mod standalone;
mod tls;

pub use cluster::Cluster;
pub use options::{
    Auth, ClusterOptions, ConnectOptions, PoolOptions, RetryOptions, Routing, SentinelOptions,
    Timeouts, TlsOptions,
};
pub use resp::{encode_command, read_response};
pub use sentinel::Sentinel;
pub use slot::key_slot;
pub use standalone::Standalone;
