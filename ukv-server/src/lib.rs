//! # UniKV Server
//!
//! Purpose: Serve the in-memory engine over RESP2 so real clients, in any
//! topology mode, can talk to it.
//!
//! ## Design Principles
//! 1. **One Task per Connection**: Each client gets a Tokio task and its own
//!    session (selected db, auth, open transaction).
//! 2. **Role Impersonation**: The same process can answer as a standalone
//!    node, a single-node cluster or a sentinel.
//! 3. **Embeddable**: `ServerHandle::spawn` runs a server on a private runtime
//!    for tests and tools.

pub mod protocol;
pub mod server;

pub use server::{handle_connection, serve, Role, ServerConfig, ServerHandle, ServerState};
