//! # Sharded Keyspace
//!
//! Provide one logical database: typed entries behind sharded locks with
//! TTL-aware lookups and an optional background sweeper.
//!
//! ## Usage
//!
//! - Use `Keyspace::new()` for a default sharded keyspace.
//! - Use `view` for reads and `update` for read-modify-write on one key.
//! - Use `purge_expired` (or `Store::start_expirer`) for active TTL cleanup.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **TTL Fast Path**: Expiration is checked on access; expired entries are
//!    invisible even before the sweeper removes them.
//! 3. **Closure Access**: Callers get a borrowed entry inside the shard lock,
//!    so a read-modify-write on one key is atomic without extra locking.
//! 4. **Empty Collections Vanish**: A hash, list, set or sorted set emptied by
//!    an update is removed, matching store semantics.
//!
//! ## Structure Overview
//!
//! ```text
//! Keyspace
//!   └── shards: Vec<Shard>
//!         └── Shard
//!               └── map: RwLock<HashMap<Vec<u8>, Entry>>
//!                     └── Entry { data: Data, expires_at }
//! ```

use std::collections::VecDeque;
use std::hash::{BuildHasher, Hasher};
use std::time::Instant;

use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

/// Default shards = CPU count * multiplier to reduce lock contention.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

/// Member -> score map of a sorted set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HashMap<Vec<u8>, f64>,
}

impl SortedSet {
    /// Inserts or updates a member. Returns true when the member is new.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        self.scores.insert(member, score).is_none()
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.scores.remove(member).is_some()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members ordered by score, ties broken by member bytes.
    pub fn ordered(&self) -> Vec<(&[u8], f64)> {
        let mut items: Vec<(&[u8], f64)> = self
            .scores
            .iter()
            .map(|(member, score)| (member.as_slice(), *score))
            .collect();
        items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        items
    }

    /// Zero-based position of `member` in ascending order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        self.score(member)?;
        self.ordered().iter().position(|(m, _)| *m == member)
    }
}

/// Typed payload of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Str(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    ZSet(SortedSet),
}

impl Data {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Data::Str(_) => "string",
            Data::Hash(_) => "hash",
            Data::List(_) => "list",
            Data::Set(_) => "set",
            Data::ZSet(_) => "zset",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Data::Str(_) => false,
            Data::Hash(map) => map.is_empty(),
            Data::List(list) => list.is_empty(),
            Data::Set(set) => set.is_empty(),
            Data::ZSet(zset) => zset.is_empty(),
        }
    }
}

/// A stored value with its optional absolute expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub data: Data,
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry without expiration.
    pub fn new(data: Data) -> Self {
        Entry {
            data,
            expires_at: None,
        }
    }

    /// Returns true when the entry has expired at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Per-shard lock wrapper.
#[derive(Debug)]
struct Shard {
    map: RwLock<HashMap<Vec<u8>, Entry, RandomState>>,
}

/// One logical database.
#[derive(Debug)]
pub struct Keyspace {
    /// Per-shard storage.
    shards: Vec<Shard>,
    /// Bitmask for fast shard selection (power-of-two shard count).
    shard_mask: usize,
    /// Hash state used to pick shards deterministically.
    hash_state: RandomState,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    /// Creates a keyspace with a default shard count based on CPU parallelism.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self::with_shard_count(threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    /// Creates a keyspace with a caller-provided shard count.
    ///
    /// The count is normalized to the next power of two to enable fast masking.
    pub fn with_shard_count(shards: usize) -> Self {
        let shard_count = normalize_shard_count(shards);
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| Shard {
                map: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            })
            .collect();
        Keyspace {
            shards,
            shard_mask: shard_count - 1,
            hash_state,
        }
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Runs `f` with the live entry for `key`, if any.
    pub fn view<R>(&self, key: &[u8], now: Instant, f: impl FnOnce(Option<&Entry>) -> R) -> R {
        let map = self.shard_for(key).map.read();
        f(map.get(key).filter(|entry| !entry.is_expired(now)))
    }

    /// Runs `f` with exclusive access to the slot for `key`.
    ///
    /// `f` sees `None` for a missing or expired key and may fill, change or
    /// clear the slot. Empty collections left behind are removed.
    pub fn update<R>(&self, key: &[u8], now: Instant, f: impl FnOnce(&mut Option<Entry>) -> R) -> R {
        let mut map = self.shard_for(key).map.write();
        let (stored_key, mut slot) = match map.remove_entry(key) {
            Some((stored, entry)) if !entry.is_expired(now) => (Some(stored), Some(entry)),
            Some((stored, _expired)) => (Some(stored), None),
            None => (None, None),
        };

        let result = f(&mut slot);

        if let Some(entry) = slot {
            if !entry.data.is_empty_collection() {
                map.insert(stored_key.unwrap_or_else(|| key.to_vec()), entry);
            }
        }
        result
    }

    /// Removes a key. Returns true when a live entry was removed.
    pub fn remove(&self, key: &[u8], now: Instant) -> bool {
        let mut map = self.shard_for(key).map.write();
        match map.remove(key) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    /// Returns a clone of the live entry for `key`.
    pub fn get_cloned(&self, key: &[u8], now: Instant) -> Option<Entry> {
        self.view(key, now, |entry| entry.cloned())
    }

    /// Number of shards; `scan_shard` accepts `0..shard_count()`.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Live keys of one shard, sorted for stable cursor positions.
    pub fn scan_shard(&self, shard: usize, now: Instant) -> Vec<Vec<u8>> {
        let map = self.shards[shard].map.read();
        let mut keys: Vec<Vec<u8>> = map
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every live key, in no particular order.
    pub fn keys(&self, now: Instant) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            let map = shard.map.read();
            keys.extend(
                map.iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, _)| key.clone()),
            );
        }
        keys
    }

    /// Number of live keys.
    pub fn len(&self, now: Instant) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .map
                    .read()
                    .values()
                    .filter(|entry| !entry.is_expired(now))
                    .count()
            })
            .sum()
    }

    /// Removes every key.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.map.write().clear();
        }
    }

    /// Removes expired entries across all shards.
    ///
    /// This is an O(n) scan and is intended for a periodic background sweep.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.map.write();
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(now));
            removed += before - map.len();
        }
        removed
    }
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn string(value: &[u8]) -> Option<Entry> {
        Some(Entry::new(Data::Str(value.to_vec())))
    }

    #[test]
    fn update_then_view_roundtrip() {
        let keyspace = Keyspace::with_shard_count(4);
        let now = Instant::now();
        keyspace.update(b"alpha", now, |slot| *slot = string(b"value"));
        let value = keyspace.view(b"alpha", now, |entry| entry.map(|e| e.data.clone()));
        assert_eq!(value, Some(Data::Str(b"value".to_vec())));
    }

    #[test]
    fn remove_reports_live_entries_only() {
        let keyspace = Keyspace::with_shard_count(2);
        let now = Instant::now();
        keyspace.update(b"alpha", now, |slot| *slot = string(b"value"));
        assert!(keyspace.remove(b"alpha", now));
        assert!(!keyspace.remove(b"alpha", now));
    }

    #[test]
    fn expired_entries_are_invisible() {
        let keyspace = Keyspace::with_shard_count(2);
        let now = Instant::now();
        keyspace.update(b"alpha", now, |slot| {
            *slot = Some(Entry {
                data: Data::Str(b"value".to_vec()),
                expires_at: Some(now + Duration::from_millis(1)),
            })
        });
        let later = now + Duration::from_millis(5);
        assert!(keyspace.get_cloned(b"alpha", later).is_none());
        keyspace.update(b"alpha", later, |slot| assert!(slot.is_none()));
    }

    #[test]
    fn emptied_collections_are_removed() {
        let keyspace = Keyspace::with_shard_count(2);
        let now = Instant::now();
        keyspace.update(b"list", now, |slot| {
            *slot = Some(Entry::new(Data::List(VecDeque::from(vec![b"a".to_vec()]))))
        });
        keyspace.update(b"list", now, |slot| {
            if let Some(Entry {
                data: Data::List(list),
                ..
            }) = slot
            {
                list.pop_front();
            }
        });
        assert_eq!(keyspace.len(now), 0);
    }

    #[test]
    fn purge_expired_removes_entries() {
        let keyspace = Keyspace::with_shard_count(2);
        let now = Instant::now();
        keyspace.update(b"alpha", now, |slot| {
            *slot = Some(Entry {
                data: Data::Str(b"v".to_vec()),
                expires_at: Some(now),
            })
        });
        keyspace.update(b"beta", now, |slot| *slot = string(b"v"));
        assert_eq!(keyspace.purge_expired(now), 1);
        assert_eq!(keyspace.keys(now), vec![b"beta".to_vec()]);
    }

    #[test]
    fn sorted_set_orders_by_score_then_member() {
        let mut zset = SortedSet::default();
        zset.insert(b"b".to_vec(), 2.0);
        zset.insert(b"a".to_vec(), 2.0);
        zset.insert(b"c".to_vec(), 1.0);
        let order: Vec<&[u8]> = zset.ordered().into_iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec![&b"c"[..], &b"a"[..], &b"b"[..]]);
        assert_eq!(zset.rank(b"b"), Some(2));
    }
}
