//! Request routing (C5).
//!
//! `RoutingSpec` mirrors the routing decision
//! `cluster.rs`/`standalone_client.rs` make per-command; fan-out merge
//! strategies are the client-side `ResponsePolicy` table from
//! `standalone_client.rs`, generalized to the cluster case.

use crate::cluster::SlotMap;
use crate::config::ReadFrom;
use crate::error::{ClientError, ClientResult, Redirect};
use crate::resp::{Cmd, Value};
use rand::seq::SliceRandom;
use std::net::SocketAddr;

/// How a single request's target node(s) are chosen.
#[derive(Debug, Clone)]
pub enum RoutingSpec {
    /// Any node, primary or replica, picked at random. Used for commands
    /// with no data dependency (e.g. `PING`, `INFO` on a single node).
    Random,
    /// Every primary shard, merged with a [`ResponsePolicy`].
    AllPrimaries,
    /// Every node (primaries and replicas), merged with a [`ResponsePolicy`].
    AllNodes,
    /// The shard owning the slot for this key. `prefer_replica` overrides
    /// the connection-wide `read_from` strategy for this one request when
    /// set (`Some(true)` forces a replica, `Some(false)` forces the
    /// primary); `None` defers to the configured strategy.
    ByKey {
        key: Vec<u8>,
        prefer_replica: Option<bool>,
    },
    /// The shard owning this exact slot, bypassing key hashing (used to
    /// replay a request after a MOVED/ASK redirect). Same override rule as
    /// `ByKey`.
    BySlotId {
        slot: u16,
        prefer_replica: Option<bool>,
    },
    /// Route every command in a pipeline/transaction batch to wherever the
    /// first command in the batch would route.
    PrimaryFirstOfBatch,
}

/// How replies from a multi-node fan-out are combined into one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// Succeeds only if every node replied without error; returns the last
    /// reply (e.g. `FLUSHALL`).
    AllSucceeded,
    /// Succeeds if any node replied without error; returns that reply
    /// (e.g. `SCRIPT EXISTS` run against one healthy shard).
    OneSucceeded,
    /// Sums integer replies across nodes (e.g. `DBSIZE`).
    Aggregate,
    /// Concatenates array replies across nodes, in node order (e.g.
    /// `KEYS`, `CLIENT LIST`).
    CombineArrays,
    /// Returns one reply per node as a map keyed by address, with no
    /// merging (e.g. `CONFIG GET` across shards).
    PerNode,
}

impl RoutingSpec {
    /// Derives the routing spec for a command from its key, per the
    /// default `ByKey` rule; callers override this for commands that need
    /// `AllPrimaries`/`AllNodes` fan-out.
    pub fn for_command(cmd: &Cmd) -> Self {
        match cmd.key() {
            Some(key) => RoutingSpec::ByKey {
                key: key.to_vec(),
                prefer_replica: None,
            },
            None => RoutingSpec::Random,
        }
    }

    /// Resolves this spec to the concrete node address(es) a command should
    /// be sent to, given the current slot map.
    pub fn resolve(
        &self,
        slot_map: &SlotMap,
        read_from: ReadFrom,
        replica_counter: usize,
    ) -> ClientResult<Vec<SocketAddr>> {
        match self {
            RoutingSpec::Random => {
                let nodes = slot_map.all_nodes();
                let chosen = nodes
                    .choose(&mut rand::thread_rng())
                    .copied()
                    .ok_or_else(no_route)?;
                Ok(vec![chosen])
            }
            RoutingSpec::AllPrimaries | RoutingSpec::PrimaryFirstOfBatch => {
                let nodes = slot_map.all_primaries();
                if nodes.is_empty() {
                    return Err(no_route());
                }
                Ok(nodes)
            }
            RoutingSpec::AllNodes => {
                let nodes = slot_map.all_nodes();
                if nodes.is_empty() {
                    return Err(no_route());
                }
                Ok(nodes)
            }
            RoutingSpec::ByKey { key, prefer_replica } => {
                let slot = crate::cluster::slot_for_key(key);
                self.resolve_slot(slot_map, slot, read_from, *prefer_replica, replica_counter)
            }
            RoutingSpec::BySlotId { slot, prefer_replica } => {
                self.resolve_slot(slot_map, *slot, read_from, *prefer_replica, replica_counter)
            }
        }
    }

    fn resolve_slot(
        &self,
        slot_map: &SlotMap,
        slot: u16,
        read_from: ReadFrom,
        prefer_replica: Option<bool>,
        replica_counter: usize,
    ) -> ClientResult<Vec<SocketAddr>> {
        // `prefer_replica` is a per-request override ("overrides
        // the connection-wide read-from strategy"); `None` falls back to
        // the configured strategy.
        let effective = match prefer_replica {
            Some(true) => ReadFrom::PreferReplica,
            Some(false) => ReadFrom::Primary,
            None => read_from,
        };
        let target = match effective {
            ReadFrom::Primary => slot_map.primary_for_slot(slot),
            ReadFrom::PreferReplica => slot_map.read_target_for_slot(slot, replica_counter),
        };
        target
            .map(|addr| vec![addr])
            .ok_or_else(|| ClientError::connection(format!("no node owns slot {slot}")))
    }
}

fn no_route() -> ClientError {
    ClientError::connection("no nodes available to route request")
}

/// Maximum number of MOVED/ASK hops a single request follows before giving
/// up (bounded redirection chain).
pub const MAX_REDIRECTS: u32 = 5;

/// Applies a redirect reported for a request, returning the address to
/// retry against, and whether the retry must be preceded by an `ASKING`
/// command (true for `ASK`, false for `MOVED`).
pub fn apply_redirect(redirect: &Redirect) -> ClientResult<(SocketAddr, bool)> {
    let (target, asking) = match redirect {
        Redirect::Moved { addr, .. } => (addr, false),
        Redirect::Ask { addr, .. } => (addr, true),
    };
    let addr = target
        .parse()
        .map_err(|_| ClientError::connection(format!("malformed redirect target {target}")))?;
    Ok((addr, asking))
}

/// Merges per-node replies into a single reply according to `policy`.
pub fn merge_replies(
    policy: ResponsePolicy,
    replies: Vec<(SocketAddr, ClientResult<Value>)>,
) -> ClientResult<Value> {
    match policy {
        ResponsePolicy::AllSucceeded => {
            let mut last = None;
            for (_, reply) in replies {
                last = Some(reply?);
            }
            last.ok_or_else(|| ClientError::connection("no nodes to fan out to"))
        }
        ResponsePolicy::OneSucceeded => {
            let mut last_err = None;
            for (_, reply) in replies {
                match reply {
                    Ok(value) => return Ok(value),
                    Err(err) => last_err = Some(err),
                }
            }
            Err(last_err.unwrap_or_else(|| ClientError::connection("no nodes to fan out to")))
        }
        ResponsePolicy::Aggregate => {
            let mut total = 0i64;
            for (_, reply) in replies {
                total += i64::from_value_checked(reply?)?;
            }
            Ok(Value::Integer(total))
        }
        ResponsePolicy::CombineArrays => {
            let mut combined = Vec::new();
            for (_, reply) in replies {
                match reply? {
                    Value::Array(items) => combined.extend(items),
                    other => combined.push(other),
                }
            }
            Ok(Value::Array(combined))
        }
        ResponsePolicy::PerNode => {
            let mut pairs = Vec::with_capacity(replies.len());
            for (addr, reply) in replies {
                pairs.push((Value::BulkString(addr.to_string().into_bytes()), reply?));
            }
            Ok(Value::Map(pairs))
        }
    }
}

trait FromValueChecked {
    fn from_value_checked(value: Value) -> ClientResult<i64>;
}

impl FromValueChecked for i64 {
    fn from_value_checked(value: Value) -> ClientResult<i64> {
        match value {
            Value::Integer(n) => Ok(n),
            other => Err(ClientError::connection(format!(
                "expected integer reply for aggregation, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::slot::SlotRange;

    fn addr(port: u16) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn slot_map() -> SlotMap {
        SlotMap::new(vec![
            SlotRange {
                start: 0,
                end: 8191,
                primary: addr(7000),
                replicas: vec![addr(7003)],
            },
            SlotRange {
                start: 8192,
                end: 16383,
                primary: addr(7001),
                replicas: vec![],
            },
        ])
    }

    #[test]
    fn by_key_resolves_to_owning_primary() {
        let spec = RoutingSpec::ByKey {
            key: b"foo".to_vec(),
            prefer_replica: None,
        };
        let resolved = spec.resolve(&slot_map(), ReadFrom::Primary, 0).unwrap();
        assert_eq!(resolved, vec![addr(7001)]);
    }

    #[test]
    fn prefer_replica_routes_to_replica_when_present() {
        let spec = RoutingSpec::BySlotId {
            slot: 0,
            prefer_replica: None,
        };
        let resolved = spec
            .resolve(&slot_map(), ReadFrom::PreferReplica, 0)
            .unwrap();
        assert_eq!(resolved, vec![addr(7003)]);
    }

    #[test]
    fn per_request_prefer_replica_overrides_primary_strategy() {
        // A per-request override still routes to a replica even though
        // the connection-wide strategy is Primary.
        let spec = RoutingSpec::BySlotId {
            slot: 0,
            prefer_replica: Some(true),
        };
        let resolved = spec.resolve(&slot_map(), ReadFrom::Primary, 0).unwrap();
        assert_eq!(resolved, vec![addr(7003)]);
    }

    #[test]
    fn per_request_override_can_force_primary_under_prefer_replica() {
        let spec = RoutingSpec::BySlotId {
            slot: 0,
            prefer_replica: Some(false),
        };
        let resolved = spec
            .resolve(&slot_map(), ReadFrom::PreferReplica, 0)
            .unwrap();
        assert_eq!(resolved, vec![addr(7000)]);
    }

    #[test]
    fn all_primaries_lists_each_shard_once() {
        let spec = RoutingSpec::AllPrimaries;
        let mut resolved = spec.resolve(&slot_map(), ReadFrom::Primary, 0).unwrap();
        resolved.sort();
        assert_eq!(resolved, vec![addr(7000), addr(7001)]);
    }

    #[test]
    fn moved_redirect_parses_target_without_asking() {
        let (target, asking) = apply_redirect(&Redirect::Moved {
            slot: 1234,
            addr: "127.0.0.1:7001".to_string(),
        })
        .unwrap();
        assert_eq!(target, addr(7001));
        assert!(!asking);
    }

    #[test]
    fn ask_redirect_requires_asking() {
        let (target, asking) = apply_redirect(&Redirect::Ask {
            slot: 1234,
            addr: "127.0.0.1:7002".to_string(),
        })
        .unwrap();
        assert_eq!(target, addr(7002));
        assert!(asking);
    }

    #[test]
    fn aggregate_policy_sums_integers() {
        let replies = vec![
            (addr(7000), Ok(Value::Integer(3))),
            (addr(7001), Ok(Value::Integer(4))),
        ];
        let merged = merge_replies(ResponsePolicy::Aggregate, replies).unwrap();
        assert_eq!(merged, Value::Integer(7));
    }

    #[test]
    fn all_succeeded_policy_fails_if_any_node_errors() {
        let replies = vec![
            (addr(7000), Ok(Value::okay())),
            (addr(7001), Err(ClientError::connection("down"))),
        ];
        assert!(merge_replies(ResponsePolicy::AllSucceeded, replies).is_err());
    }

    #[test]
    fn combine_arrays_concatenates_in_node_order() {
        let replies = vec![
            (addr(7000), Ok(Value::Array(vec![Value::Integer(1)]))),
            (addr(7001), Ok(Value::Array(vec![Value::Integer(2)]))),
        ];
        let merged = merge_replies(ResponsePolicy::CombineArrays, replies).unwrap();
        assert_eq!(
            merged,
            Value::Array(vec![Value::Integer(1), Value::Integer(2)])
        );
    }
}
