//! # Cluster Hash Slots
//!
//! Purpose: Map keys to one of the 16384 cluster slots and slots to the nodes
//! that serve them, as reported by `CLUSTER SLOTS`.
//!
//! ## Design Principles
//! 1. **Store-Compatible Hashing**: CRC16/XMODEM over the key, or over the
//!    first non-empty `{hashtag}` when present.
//! 2. **Immutable Snapshots**: A `SlotMap` is rebuilt on refresh and swapped
//!    whole; readers never observe a half-updated table.

use ukv_common::{Error, Result, Value};

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC16/XMODEM: polynomial 0x1021, initial value 0, no reflection.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Returns the cluster slot owning `key`.
pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// A contiguous slot range and the nodes serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlotRange {
    pub(crate) start: u16,
    pub(crate) end: u16,
    pub(crate) master: String,
    pub(crate) replicas: Vec<String>,
}

/// Slot ownership snapshot, sorted by range start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SlotMap {
    ranges: Vec<SlotRange>,
}

impl SlotMap {
    /// Parses a `CLUSTER SLOTS` reply. An empty host means "the node you asked".
    pub(crate) fn from_reply(reply: Value, seed_host: &str) -> Result<Self> {
        let entries = match reply {
            Value::Array(entries) => entries,
            Value::Error(raw) => return Err(Error::from_reply(&raw)),
            other => {
                return Err(Error::Protocol(format!(
                    "CLUSTER SLOTS returned {}",
                    other.type_name()
                )))
            }
        };

        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut fields = match entry {
                Value::Array(fields) if fields.len() >= 3 => fields.into_iter(),
                _ => return Err(Error::Protocol("malformed CLUSTER SLOTS entry".into())),
            };
            let start = slot_bound(fields.next())?;
            let end = slot_bound(fields.next())?;
            let master = node_addr(fields.next(), seed_host)?;
            let replicas = fields
                .map(|node| node_addr(Some(node), seed_host))
                .collect::<Result<Vec<_>>>()?;
            ranges.push(SlotRange {
                start,
                end,
                master,
                replicas,
            });
        }
        ranges.sort_by_key(|range| range.start);
        Ok(SlotMap { ranges })
    }

    /// The range containing `slot`, if any node claims it.
    pub(crate) fn lookup(&self, slot: u16) -> Option<&SlotRange> {
        let idx = self.ranges.partition_point(|range| range.start <= slot);
        if idx == 0 {
            return None;
        }
        let range = &self.ranges[idx - 1];
        (slot <= range.end).then_some(range)
    }

    /// Distinct master addresses.
    pub(crate) fn masters(&self) -> Vec<String> {
        let mut masters: Vec<String> = Vec::new();
        for range in &self.ranges {
            if !masters.contains(&range.master) {
                masters.push(range.master.clone());
            }
        }
        masters
    }

    /// Distinct addresses of every master and replica.
    pub(crate) fn nodes(&self) -> Vec<String> {
        let mut nodes = self.masters();
        for range in &self.ranges {
            for replica in &range.replicas {
                if !nodes.contains(replica) {
                    nodes.push(replica.clone());
                }
            }
        }
        nodes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn slot_bound(value: Option<Value>) -> Result<u16> {
    match value {
        Some(Value::Integer(n)) if (0..SLOT_COUNT as i64).contains(&n) => Ok(n as u16),
        _ => Err(Error::Protocol("invalid slot bound in CLUSTER SLOTS".into())),
    }
}

fn node_addr(value: Option<Value>, seed_host: &str) -> Result<String> {
    let fields = match value {
        Some(Value::Array(fields)) if fields.len() >= 2 => fields,
        _ => return Err(Error::Protocol("invalid node in CLUSTER SLOTS".into())),
    };
    let host = match &fields[0] {
        Value::Bulk(raw) | Value::Simple(raw) => String::from_utf8_lossy(raw).into_owned(),
        _ => return Err(Error::Protocol("invalid node host".into())),
    };
    let port = match &fields[1] {
        Value::Integer(port) => *port,
        _ => return Err(Error::Protocol("invalid node port".into())),
    };
    let host = if host.is_empty() { seed_host.to_string() } else { host };
    if host.contains(':') {
        Ok(format!("[{}]:{}", host, port))
    } else {
        Ok(format!("{}:{}", host, port))
    }
}
