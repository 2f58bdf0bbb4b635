//! Cluster topology: slot hashing and discovery/refresh (C4).

pub mod slot;
pub mod topology;

pub use slot::{hash_tag, slot_for_key, SlotMap, SlotRange, SLOT_COUNT};
pub use topology::{Topology, TopologyProbe};
