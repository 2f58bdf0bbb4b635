//! Topology discovery and refresh (C4).
//!
//! Grounded on the redirect/refresh loop in `cluster.rs`
//! (`calculate_topology`/`refresh_slots`): parse `CLUSTER SLOTS` into a
//! fresh [`SlotMap`], publish it atomically, and coalesce concurrent
//! refresh requests into a single in-flight call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cluster::slot::{SlotMap, SlotRange};
use crate::error::{ClientError, ClientResult};
use crate::resp::{Cmd, FromValue, Value};

/// Holds the current slot map behind an atomic pointer so readers never
/// block on a refresh in progress (slot map copy-on-write with
/// atomic publish).
pub struct Topology {
    current: ArcSwap<SlotMap>,
    refreshing: Mutex<()>,
    /// Bumped every time a full refresh publishes a new map. Lets a waiter
    /// that was blocked on `refreshing` tell whether another caller's
    /// refresh already landed while it waited, so it can skip running a
    /// redundant one of its own.
    generation: AtomicU64,
    seed_addresses: Vec<SocketAddr>,
}

/// Anything capable of running a single admin command against one node,
/// implemented by the dispatcher/connection layer. Kept as a trait so the
/// refresh logic can be unit-tested against a canned responder.
#[async_trait::async_trait]
pub trait TopologyProbe: Send + Sync {
    async fn query(&self, target: SocketAddr, cmd: Cmd) -> ClientResult<Value>;
}

impl Topology {
    pub fn new(seed_addresses: Vec<SocketAddr>) -> Self {
        Topology {
            current: ArcSwap::from_pointee(SlotMap::default()),
            refreshing: Mutex::new(()),
            generation: AtomicU64::new(0),
            seed_addresses,
        }
    }

    pub fn current(&self) -> Arc<SlotMap> {
        self.current.load_full()
    }

    /// Patches a single slot's owner in place (spec §4.5: MOVED "update[s]
    /// slot map entry (inline, lightweight)"), without the network round
    /// trip a full refresh needs. `rcu` keeps this safe against a
    /// concurrent full refresh replacing the whole map: the patch is
    /// retried against whatever map is current if the publish races.
    pub fn apply_moved(&self, slot: u16, new_primary: SocketAddr) {
        self.current
            .rcu(|current| current.with_moved_slot(slot, new_primary));
    }

    /// Refreshes the slot map by querying `CLUSTER SLOTS` (falling back to
    /// `CLUSTER SHARDS` on servers that don't understand it) against the
    /// first reachable node (seeds, then current topology's primaries).
    /// Concurrent callers observe a single in-flight refresh: the mutex
    /// coalesces them, and a waiter that was blocked on the mutex checks
    /// `generation` once it acquires it — if another caller's refresh
    /// already landed in the meantime, it returns without probing anything
    /// itself.
    pub async fn refresh(&self, probe: &dyn TopologyProbe) -> ClientResult<()> {
        let observed_generation = self.generation.load(Ordering::Acquire);
        let _guard = self.refreshing.lock().await;
        if self.generation.load(Ordering::Acquire) != observed_generation {
            return Ok(());
        }
        let candidates = self.candidate_nodes();
        let mut last_err = None;
        for addr in candidates {
            match self.probe_one(probe, addr).await {
                Ok(ranges) => {
                    debug!(node = %addr, ranges = ranges.len(), "topology refreshed");
                    self.current.store(Arc::new(SlotMap::new(ranges)));
                    self.generation.fetch_add(1, Ordering::Release);
                    return Ok(());
                }
                Err(err) => {
                    warn!(node = %addr, error = %err, "topology probe failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ClientError::connection("no reachable seed node for topology discovery")
        }))
    }

    /// `CLUSTER SLOTS` first; if the server doesn't understand it (an `ERR
    /// unknown command` reply), `CLUSTER SHARDS` — newer servers drop
    /// `SLOTS` in favor of `SHARDS`, and both are parsed into the same
    /// `SlotRange` shape so the rest of the topology logic never sees the
    /// difference.
    async fn probe_one(&self, probe: &dyn TopologyProbe, addr: SocketAddr) -> ClientResult<Vec<SlotRange>> {
        match probe.query(addr, Cmd::new("CLUSTER").arg("SLOTS")).await {
            Ok(value) => parse_cluster_slots(&value),
            Err(err) if is_unknown_command(&err) => {
                let value = probe.query(addr, Cmd::new("CLUSTER").arg("SHARDS")).await?;
                parse_cluster_shards(&value)
            }
            Err(err) => Err(err),
        }
    }

    fn candidate_nodes(&self) -> Vec<SocketAddr> {
        let current = self.current.load();
        if current.is_empty() {
            self.seed_addresses.clone()
        } else {
            current.all_primaries()
        }
    }
}

/// Parses the nested-array reply of `CLUSTER SLOTS` into [`SlotRange`]s.
/// Each element is `[start, end, [ip, port, ...], [ip, port, ...], ...]`
/// where the first address triple is the primary and the rest are
/// replicas.
fn parse_cluster_slots(value: &Value) -> ClientResult<Vec<SlotRange>> {
    let Value::Array(entries) = value else {
        return Err(ClientError::connection(
            "CLUSTER SLOTS reply was not an array",
        ));
    };
    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(fields) = entry else {
            return Err(ClientError::connection("malformed CLUSTER SLOTS entry"));
        };
        if fields.len() < 3 {
            return Err(ClientError::connection("malformed CLUSTER SLOTS entry"));
        }
        let start = as_u16(&fields[0])?;
        let end = as_u16(&fields[1])?;
        let mut addrs = Vec::with_capacity(fields.len() - 2);
        for node_field in &fields[2..] {
            addrs.push(as_socket_addr(node_field)?);
        }
        let primary = addrs.remove(0);
        ranges.push(SlotRange {
            start,
            end,
            primary,
            replicas: addrs,
        });
    }
    Ok(ranges)
}

/// `true` for the `ERR unknown command 'CLUSTER', ...` style reply a server
/// sends when it doesn't implement `CLUSTER SLOTS` (older standalone builds
/// configured as a single-shard cluster, or servers that only ever shipped
/// `CLUSTER SHARDS`).
fn is_unknown_command(err: &ClientError) -> bool {
    match err {
        ClientError::Request { kind, message } => {
            kind == "ERR" && message.to_lowercase().contains("unknown command")
        }
        _ => false,
    }
}

/// Parses the `CLUSTER SHARDS` reply into [`SlotRange`]s. Each shard entry
/// is a `slots`/`nodes` map (a RESP3 map on newer servers, or the RESP2
/// flat-array-of-pairs equivalent); `slots` is a flat list of
/// `start, end` pairs (a shard can own more than one contiguous range) and
/// `nodes` lists each member with its `ip`/`port`/`role`.
fn parse_cluster_shards(value: &Value) -> ClientResult<Vec<SlotRange>> {
    let Value::Array(shards) = value else {
        return Err(ClientError::connection("CLUSTER SHARDS reply was not an array"));
    };
    let mut ranges = Vec::new();
    for shard in shards {
        let fields = as_field_map(shard)?;
        let slots = fields
            .get("slots")
            .ok_or_else(|| ClientError::connection("CLUSTER SHARDS entry missing slots"))?;
        let Value::Array(slot_ints) = slots else {
            return Err(ClientError::connection("malformed slots field in CLUSTER SHARDS"));
        };
        let nodes = fields
            .get("nodes")
            .ok_or_else(|| ClientError::connection("CLUSTER SHARDS entry missing nodes"))?;
        let Value::Array(node_entries) = nodes else {
            return Err(ClientError::connection("malformed nodes field in CLUSTER SHARDS"));
        };

        let mut primary = None;
        let mut replicas = Vec::new();
        for node in node_entries {
            let node_fields = as_field_map(node)?;
            let addr = shard_node_addr(&node_fields)?;
            let role = node_fields
                .get("role")
                .cloned()
                .map(String::from_value)
                .transpose()?
                .unwrap_or_default();
            if role.eq_ignore_ascii_case("master") || role.eq_ignore_ascii_case("primary") {
                primary = Some(addr);
            } else {
                replicas.push(addr);
            }
        }
        let primary = primary
            .ok_or_else(|| ClientError::connection("CLUSTER SHARDS entry has no primary node"))?;

        let mut pairs = slot_ints.iter();
        while let (Some(start), Some(end)) = (pairs.next(), pairs.next()) {
            ranges.push(SlotRange {
                start: as_u16(start)?,
                end: as_u16(end)?,
                primary,
                replicas: replicas.clone(),
            });
        }
    }
    Ok(ranges)
}

fn shard_node_addr(fields: &HashMap<String, Value>) -> ClientResult<SocketAddr> {
    let ip = fields
        .get("ip")
        .or_else(|| fields.get("endpoint"))
        .cloned()
        .map(String::from_value)
        .transpose()?
        .ok_or_else(|| ClientError::connection("CLUSTER SHARDS node missing ip/endpoint"))?;
    let port = fields
        .get("port")
        .or_else(|| fields.get("tls-port"))
        .cloned()
        .map(i64::from_value)
        .transpose()?
        .ok_or_else(|| ClientError::connection("CLUSTER SHARDS node missing port"))?;
    format!("{ip}:{port}")
        .parse()
        .map_err(|_| ClientError::connection("malformed node address in CLUSTER SHARDS"))
}

/// Flattens a map-shaped value into a lookup table, accepting either a
/// genuine RESP3 `Map` or its RESP2 rendering as a flat array of
/// alternating key/value elements.
fn as_field_map(value: &Value) -> ClientResult<HashMap<String, Value>> {
    match value {
        Value::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| Ok((String::from_value(k.clone())?, v.clone())))
            .collect(),
        Value::Array(items) => {
            let mut map = HashMap::with_capacity(items.len() / 2);
            let mut iter = items.iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                map.insert(String::from_value(k.clone())?, v.clone());
            }
            Ok(map)
        }
        other => Err(ClientError::connection(format!(
            "expected a map-shaped CLUSTER SHARDS entry, got {other:?}"
        ))),
    }
}

fn as_u16(value: &Value) -> ClientResult<u16> {
    match value {
        Value::Integer(n) => u16::try_from(*n)
            .map_err(|_| ClientError::connection("slot index out of range")),
        other => Err(ClientError::connection(format!(
            "expected integer slot index, got {other:?}"
        ))),
    }
}

fn as_socket_addr(value: &Value) -> ClientResult<SocketAddr> {
    let Value::Array(fields) = value else {
        return Err(ClientError::connection("malformed node entry"));
    };
    if fields.len() < 2 {
        return Err(ClientError::connection("malformed node entry"));
    }
    let ip = match &fields[0] {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone())?,
        Value::SimpleString(s) => s.clone(),
        other => {
            return Err(ClientError::connection(format!(
                "expected ip string, got {other:?}"
            )));
        }
    };
    let port = match &fields[1] {
        Value::Integer(n) => {
            u16::try_from(*n).map_err(|_| ClientError::connection("port out of range"))?
        }
        other => {
            return Err(ClientError::connection(format!(
                "expected port integer, got {other:?}"
            )));
        }
    };
    format!("{ip}:{port}")
        .parse()
        .map_err(|_| ClientError::connection("malformed node address in CLUSTER SLOTS"))
}
