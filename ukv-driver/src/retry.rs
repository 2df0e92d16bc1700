//! Retry with exponential backoff for requests that never reached the store.
//!
//! Only `Error::Connection { unsent: true, .. }` is retried: a request whose
//! bytes may have been delivered is never replayed, and the caller's context
//! stops the loop as soon as it is cancelled or expired.

use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use tracing::warn;

use ukv_common::{Context, Error, Result};

use crate::options::RetryOptions;

fn build_backoff(options: &RetryOptions) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(options.min_backoff)
        .with_max_delay(options.max_backoff)
        .with_max_times(options.max_retries)
        .with_factor(2.0)
        .with_jitter()
}

/// Runs `operation`, retrying unsent failures while `ctx` allows it.
pub(crate) fn with_retry<T, F>(ctx: &Context, options: &RetryOptions, operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    if options.max_retries == 0 {
        let mut operation = operation;
        return operation();
    }

    let max_retries = options.max_retries;
    let mut attempt = 0usize;
    operation
        .retry(build_backoff(options))
        .sleep(std::thread::sleep)
        .when(|err: &Error| err.is_unsent() && ctx.check().is_ok())
        .notify(|err: &Error, delay: Duration| {
            attempt += 1;
            warn!(
                attempt,
                max_retries,
                next_delay_ms = delay.as_millis() as u64,
                error = %err,
                "request not sent, will retry"
            );
        })
        .call()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick() -> RetryOptions {
        RetryOptions {
            max_retries: 3,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn retries_unsent_failures_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&Context::background(), &quick(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::unsent("refused"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn never_replays_a_possibly_delivered_request() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&Context::background(), &quick(), || {
            calls.set(calls.get() + 1);
            Err(Error::connection("reset after write"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&Context::background(), &quick(), || {
            calls.set(calls.get() + 1);
            Err(Error::unsent("refused"))
        });
        assert!(result.unwrap_err().is_unsent());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn zero_retries_runs_once() {
        let calls = Cell::new(0);
        let options = RetryOptions {
            max_retries: 0,
            ..quick()
        };
        let _ = with_retry(&Context::background(), &options, || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(Error::unsent("refused"))
        });
        assert_eq!(calls.get(), 1);
    }
}
