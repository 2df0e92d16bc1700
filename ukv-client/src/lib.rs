//! # UniKV Client
//!
//! Purpose: One command surface over a key-value store deployed as a single
//! node, a sharded cluster or a sentinel-supervised group, with key
//! namespacing and a default TTL enforced in one place.
//!
//! ## Design Principles
//! 1. **Written Once**: `Client` and `Pipeline` talk to `dyn Backend`; the
//!    topology is chosen by the `Factory` and invisible afterwards.
//! 2. **Policy at the Edge**: Every key passes through `Policy` before it
//!    leaves the client; values never do.
//! 3. **Typed Outcomes**: Misses, configuration mistakes, transport failures,
//!    store rejections and API misuse each have their own `ErrorKind`.
//!
//! ```no_run
//! use std::time::Duration;
//! use ukv_client::{connect_single, Context};
//!
//! let client = connect_single("127.0.0.1:6379", 0, None)?;
//! let ctx = Context::with_timeout(Duration::from_secs(1));
//! client.set(&ctx, "greeting", "hello", Duration::ZERO)?;
//! assert_eq!(client.get(&ctx, "greeting")?, "hello");
//! # Ok::<(), ukv_client::Error>(())
//! ```

mod batch;
mod client;
mod command;
pub mod config;
mod factory;
mod policy;
mod reply;

pub use batch::{BatchResults, Handle, Pipeline};
pub use client::Client;
pub use config::{ClusterConfig, CommonConfig, Config, SentinelConfig, SingleConfig, TlsConfig};
pub use factory::{
    connect, connect_cluster, connect_sentinel, connect_single, Factory, PROBE_TIMEOUT,
};
pub use policy::Policy;
pub use reply::{Member, Ttl};

pub use ukv_common::{
    Backend, BatchMode, CancelToken, Cmd, Context, Error, ErrorKind, Result, ToArg, Topology,
    Value,
};
