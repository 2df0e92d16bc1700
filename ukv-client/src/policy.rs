//! # Key and TTL Policy
//!
//! Purpose: Apply the two rules every operation shares: keys live under a
//! configured namespace, and writes without an explicit TTL get the default.
//!
//! ## Design Principles
//! 1. **Total Functions**: Neither transform can fail; a missing prefix on the
//!    way back is logged and the key is returned untouched.
//! 2. **Keys Only**: Values, fields and members never pass through here.
//! 3. **Immutable After Construction**: The client and every batch share one
//!    `Arc<Policy>`.

use std::time::Duration;

use tracing::warn;

/// Key namespace and default expiration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Policy {
    prefix: String,
    default_ttl: Duration,
}

impl Policy {
    /// Creates a policy. A zero `default_ttl` means writes never expire by default.
    pub fn new(prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Policy {
            prefix: prefix.into(),
            default_ttl,
        }
    }

    /// The namespace prepended to every key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Expiration applied when a write does not name one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Maps an application key to the stored key.
    pub fn with_prefix(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            return key.to_string();
        }
        let mut out = String::with_capacity(self.prefix.len() + key.len());
        out.push_str(&self.prefix);
        out.push_str(key);
        out
    }

    /// Maps a stored key returned by a listing back to the application key.
    pub fn strip_prefix(&self, key: String) -> String {
        if self.prefix.is_empty() {
            return key;
        }
        match key.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.to_string(),
            None => {
                warn!(key = %key, prefix = %self.prefix, "listed key lacks the namespace prefix");
                key
            }
        }
    }

    /// Resolves the expiration for a write.
    ///
    /// A positive `requested` wins; zero falls back to the default. `None`
    /// means the key is stored without expiration.
    pub fn resolve_ttl(&self, requested: Duration) -> Option<Duration> {
        let effective = if requested.is_zero() {
            self.default_ttl
        } else {
            requested
        };
        (!effective.is_zero()).then_some(effective)
    }
}

/// Whole milliseconds for `PX`/`PEXPIRE`, never rounding a positive TTL to zero.
pub(crate) fn millis(ttl: Duration) -> u64 {
    let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 && !ttl.is_zero() {
        1
    } else {
        ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_prefix_is_identity() {
        let policy = Policy::new("", Duration::ZERO);
        assert_eq!(policy.with_prefix("user:1"), "user:1");
        assert_eq!(policy.strip_prefix("user:1".into()), "user:1");
    }

    #[test]
    fn unprefixed_listing_is_returned_unchanged() {
        let policy = Policy::new("app:", Duration::ZERO);
        assert_eq!(policy.strip_prefix("other:1".into()), "other:1");
        assert_eq!(policy.strip_prefix("app:".into()), "");
    }

    #[test]
    fn zero_default_means_no_expiry() {
        let policy = Policy::new("", Duration::ZERO);
        assert_eq!(policy.resolve_ttl(Duration::ZERO), None);
        assert_eq!(
            policy.resolve_ttl(Duration::from_secs(5)),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn sub_millisecond_ttl_rounds_up() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::ZERO), 0);
    }

    proptest! {
        #[test]
        fn prefix_round_trips(prefix in "[a-z:]{1,8}", key in ".*") {
            let policy = Policy::new(prefix.clone(), Duration::ZERO);
            let stored = policy.with_prefix(&key);
            prop_assert!(stored.starts_with(&prefix));
            prop_assert_eq!(policy.strip_prefix(stored), key);
        }

        #[test]
        fn positive_ttl_is_used_verbatim(ms in 1u64..10_000_000, default_ms in 0u64..10_000_000) {
            let policy = Policy::new("", Duration::from_millis(default_ms));
            let requested = Duration::from_millis(ms);
            prop_assert_eq!(policy.resolve_ttl(requested), Some(requested));
        }

        #[test]
        fn zero_ttl_takes_the_default(default_ms in 1u64..10_000_000) {
            let default_ttl = Duration::from_millis(default_ms);
            let policy = Policy::new("", default_ttl);
            prop_assert_eq!(policy.resolve_ttl(Duration::ZERO), Some(default_ttl));
        }
    }
}
