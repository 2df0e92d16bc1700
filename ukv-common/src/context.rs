//! # Call Context
//!
//! Purpose: Carry a deadline and an optional cancellation token down to the
//! socket for every blocking call.
//!
//! ## Design Principles
//! 1. **Cheap to Pass**: A context is two optional fields; clone it freely.
//! 2. **Checked, Not Preemptive**: Cancellation is observed between socket
//!    operations and while waiting on reads, never by killing a thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Shared flag that aborts in-flight calls when set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the "not cancelled" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every call observing this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Per-call deadline and cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl Context {
    /// A context without deadline or cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Context {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Attaches a cancellation token.
    pub fn cancellable(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Returns a context whose deadline is the earlier of ours and `now + timeout`.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Context {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True when the attached token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelToken::is_cancelled)
    }

    /// True when a cancellation token is attached.
    pub fn has_cancel(&self) -> bool {
        self.cancel.is_some()
    }

    /// Fails with `Cancelled` or `Timeout` when the call must stop.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Bounds `configured` by the remaining deadline.
    ///
    /// `None` means "block without limit".
    pub fn bound(&self, configured: Option<Duration>) -> Option<Duration> {
        match (configured, self.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}
