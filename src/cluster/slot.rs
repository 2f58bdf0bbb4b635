//! Slot hashing and the slot-to-node map (part of C4 Topology).
//!
//! `redis_node::storage` computes a node's own slot assignment from a
//! pre-known range; it never needs to hash an arbitrary key into 1 of
//! 16384 slots the way a cluster-aware client does. The CRC16/XMODEM
//! variant the cluster protocol fixes for `CLUSTER KEYSLOT` is computed
//! with the `crc` crate rather than a hand-rolled table, pinned here
//! against Redis Cluster's published test vectors.

use std::collections::HashMap;
use std::net::SocketAddr;

use crc::{Crc, CRC_16_XMODEM};

pub const SLOT_COUNT: u16 = 16384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Extracts the hash tag from a key per the cluster spec: the substring
/// between the first `{` and the next `}` after it, if that substring is
/// non-empty; otherwise the whole key is used.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(close_rel) = key[open + 1..].iter().position(|&b| b == b'}') {
            if close_rel > 0 {
                return &key[open + 1..open + 1 + close_rel];
            }
        }
    }
    key
}

/// The cluster slot (0..16384) a key maps to.
pub fn slot_for_key(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

/// One contiguous run of slots owned by a shard, with its primary and
/// replica addresses, as parsed from `CLUSTER SLOTS`/`CLUSTER SHARDS`.
#[derive(Debug, Clone)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub primary: SocketAddr,
    pub replicas: Vec<SocketAddr>,
}

impl SlotRange {
    pub fn contains(&self, slot: u16) -> bool {
        (self.start..=self.end).contains(&slot)
    }
}

/// An immutable snapshot of the cluster's slot ownership, swapped in as a
/// whole by the topology refresh (atomic publish, never
/// mutated in place).
#[derive(Debug, Clone, Default)]
pub struct SlotMap {
    ranges: Vec<SlotRange>,
    /// Single-slot owner patches applied inline by a MOVED reply, ahead of
    /// the next full refresh. A full refresh always replaces the whole
    /// `SlotMap` (ranges and overrides both), so a patch never outlives the
    /// refresh that would otherwise make it stale.
    overrides: HashMap<u16, SocketAddr>,
}

impl SlotMap {
    pub fn new(ranges: Vec<SlotRange>) -> Self {
        SlotMap {
            ranges,
            overrides: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range_for_slot(&self, slot: u16) -> Option<&SlotRange> {
        self.ranges.iter().find(|r| r.contains(slot))
    }

    /// A copy of `self` with `slot`'s primary patched to `new_primary`,
    /// leaving every other slot (and this slot's replica set, now stale)
    /// untouched — the cheap MOVED-triggered update (spec §4.5), as opposed
    /// to rebuilding the whole range table from a fresh `CLUSTER SLOTS`.
    pub fn with_moved_slot(&self, slot: u16, new_primary: SocketAddr) -> SlotMap {
        let mut overrides = self.overrides.clone();
        overrides.insert(slot, new_primary);
        SlotMap {
            ranges: self.ranges.clone(),
            overrides,
        }
    }

    pub fn primary_for_slot(&self, slot: u16) -> Option<SocketAddr> {
        if let Some(addr) = self.overrides.get(&slot) {
            return Some(*addr);
        }
        self.range_for_slot(slot).map(|r| r.primary)
    }

    /// Picks a replica round-robin using `counter` as the rotating offset,
    /// falling back to the primary when the shard has no replicas. A slot
    /// patched by `with_moved_slot` has no known replicas yet, so it
    /// always routes to its (possibly overridden) primary until the next
    /// full refresh fills the replica set back in.
    pub fn read_target_for_slot(&self, slot: u16, counter: usize) -> Option<SocketAddr> {
        if let Some(addr) = self.overrides.get(&slot) {
            return Some(*addr);
        }
        let range = self.range_for_slot(slot)?;
        if range.replicas.is_empty() {
            Some(range.primary)
        } else {
            Some(range.replicas[counter % range.replicas.len()])
        }
    }

    pub fn all_primaries(&self) -> Vec<SocketAddr> {
        let mut seen = HashMap::new();
        for range in &self.ranges {
            seen.entry(range.primary).or_insert(());
        }
        seen.into_keys().collect()
    }

    pub fn all_nodes(&self) -> Vec<SocketAddr> {
        let mut seen = HashMap::new();
        for range in &self.ranges {
            seen.entry(range.primary).or_insert(());
            for replica in &range.replicas {
                seen.entry(*replica).or_insert(());
            }
        }
        seen.into_keys().collect()
    }
}
