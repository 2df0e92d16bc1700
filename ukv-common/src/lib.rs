// ukv-common - Shared vocabulary for the UniKV access layer
//
// Every crate in the workspace speaks in these types: the RESP reply model,
// the command builder, per-call contexts, the error taxonomy and the backend
// capability trait that each topology provider implements.

pub mod backend;
pub mod cmd;
pub mod context;
pub mod error;
pub mod value;

// Re-export for convenience
pub use backend::{Backend, BatchMode, Topology};
pub use cmd::{Cmd, ToArg};
pub use context::{CancelToken, Context};
pub use error::{Error, ErrorKind, Result};
pub use value::Value;
