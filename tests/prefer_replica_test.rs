//! `PreferReplica`: reads round-robin across a shard's replicas, and fall
//! back to the primary once a refreshed topology reports no replicas left
//! (the client's way of seeing "both replicas disconnected" — a shard with
//! no replicas in the slot map always resolves reads to its primary).

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redis_client::{Client, ClientConfigBuilder, ReadFrom, Value};
use support::{cluster_slots_reply, command_name, MockServer};

fn counting_handler(counter: Arc<AtomicUsize>) -> impl Fn(Vec<Vec<u8>>) -> Option<Value> {
    move |args| match command_name(&args).as_str() {
        "HELLO" => Some(Value::okay()),
        "GET" => {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Value::BulkString(b"v".to_vec()))
        }
        _ => Some(Value::okay()),
    }
}

#[tokio::test]
async fn reads_round_robin_across_replicas_then_fall_back_to_primary() {
    support::init_tracing();

    let primary_hits = Arc::new(AtomicUsize::new(0));
    let replica_a_hits = Arc::new(AtomicUsize::new(0));
    let replica_b_hits = Arc::new(AtomicUsize::new(0));

    let replica_a = MockServer::start(counting_handler(replica_a_hits.clone())).await;
    let replica_b = MockServer::start(counting_handler(replica_b_hits.clone())).await;

    let (listener, primary_addr) = MockServer::reserve().await;
    let cluster_calls = Arc::new(AtomicUsize::new(0));
    let primary_hits_for_handler = primary_hits.clone();
    let replica_addrs = [replica_a.addr, replica_b.addr];
    let _primary = {
        let cluster_calls = cluster_calls.clone();
        MockServer::serve(listener, move |args| match command_name(&args).as_str() {
            "HELLO" => Some(Value::okay()),
            "CLUSTER" => {
                let call = cluster_calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    // Both replicas live: full shard membership.
                    Some(cluster_slots_reply(&[(
                        0,
                        16383,
                        primary_addr,
                        &replica_addrs,
                    )]))
                } else {
                    // Both replicas gone: the shard now only lists its primary.
                    Some(cluster_slots_reply(&[(0, 16383, primary_addr, &[])]))
                }
            }
            "GET" => {
                primary_hits_for_handler.fetch_add(1, Ordering::SeqCst);
                Some(Value::BulkString(b"v".to_vec()))
            }
            _ => Some(Value::okay()),
        })
        .await
    };

    let config = ClientConfigBuilder::new()
        .address(primary_addr)
        .cluster_mode(true)
        .read_from(ReadFrom::PreferReplica)
        .build()
        .unwrap();
    let client = Client::connect(config).await.unwrap();

    for _ in 0..100 {
        let _ = client.get("somekey").await.unwrap();
    }

    assert_eq!(
        primary_hits.load(Ordering::SeqCst),
        0,
        "primary should see no reads while both replicas are up"
    );
    let a = replica_a_hits.load(Ordering::SeqCst);
    let b = replica_b_hits.load(Ordering::SeqCst);
    assert_eq!(a + b, 100);
    assert_eq!(a, 50, "round-robin over 2 replicas should split reads evenly");
    assert_eq!(b, 50, "round-robin over 2 replicas should split reads evenly");

    // Topology refresh now reports neither replica: reads fall back to the
    // primary instead of erroring or re-targeting a node no longer in the
    // slot map.
    client.refresh_topology().await.unwrap();
    for _ in 0..10 {
        let _ = client.get("somekey").await.unwrap();
    }
    assert_eq!(primary_hits.load(Ordering::SeqCst), 10);
    assert_eq!(replica_a_hits.load(Ordering::SeqCst), a);
    assert_eq!(replica_b_hits.load(Ordering::SeqCst), b);
}
