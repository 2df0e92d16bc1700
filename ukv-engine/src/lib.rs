//! # UniKV Engine
//!
//! Purpose: An in-memory, Redis-compatible store used to embed UniKV without
//! a server and to back the test server.
//!
//! ## Design Principles
//! 1. **Typed Keyspace**: Strings, hashes, lists, sets and sorted sets share
//!    one sharded map with TTL-aware access.
//! 2. **Wire-Shaped Replies**: The interpreter answers with `ukv_common::Value`
//!    so network and in-process callers see identical results.
//! 3. **Transactions by Gate**: `MULTI`/`EXEC` run under an exclusive store gate.

mod backend;
mod command;
pub mod keyspace;
mod store;

pub use backend::MemoryBackend;
pub use command::CmdError;
pub use keyspace::{Data, Entry, Keyspace, SortedSet};
pub use store::{ExpirationHandle, Session, Store, StoreConfig, DEFAULT_DATABASES};
