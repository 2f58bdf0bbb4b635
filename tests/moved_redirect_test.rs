//! A stale slot map causes a MOVED reply; the client redirects the
//! request and refreshes, and later requests to the same slot go
//! straight to the new owner.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redis_client::cluster::slot_for_key;
use redis_client::{Client, ClientConfigBuilder, Value};
use support::{arg_str, cluster_slots_reply, command_name, MockServer};

#[tokio::test]
async fn moved_reply_redirects_and_refreshes_topology() {
    support::init_tracing();
    let node_b = MockServer::start(|args| match command_name(&args).as_str() {
        "HELLO" => Some(Value::okay()),
        "GET" => Some(Value::BulkString(b"bar".to_vec())),
        _ => Some(Value::okay()),
    })
    .await;
    let node_b_addr = node_b.addr;

    // node_a's CLUSTER SLOTS answer starts out claiming it owns every
    // slot itself (stale); after the MOVED-triggered refresh it corrects
    // itself to point at node_b. GET always replies MOVED so we can
    // count exactly how many times node_a is asked for the key.
    let (listener, node_a_addr) = MockServer::reserve().await;
    let cluster_calls = Arc::new(AtomicUsize::new(0));
    let moved_hits = Arc::new(AtomicUsize::new(0));
    let node_a = {
        let cluster_calls = cluster_calls.clone();
        let moved_hits = moved_hits.clone();
        MockServer::serve(listener, move |args| match command_name(&args).as_str() {
            "HELLO" => Some(Value::okay()),
            "CLUSTER" => {
                let call = cluster_calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    Some(cluster_slots_reply(&[(0, 16383, node_a_addr, &[])]))
                } else {
                    Some(cluster_slots_reply(&[(0, 16383, node_b_addr, &[])]))
                }
            }
            "GET" => {
                moved_hits.fetch_add(1, Ordering::SeqCst);
                let key = arg_str(&args, 1);
                let slot = slot_for_key(key.as_bytes());
                Some(Value::Error {
                    kind: "MOVED".to_string(),
                    message: format!("{slot} {node_b_addr}"),
                })
            }
            _ => Some(Value::okay()),
        })
        .await
    };

    let config = ClientConfigBuilder::new()
        .address(node_a.addr)
        .cluster_mode(true)
        .build()
        .unwrap();
    let client = Client::connect(config).await.unwrap();

    let value = client.get("somekey").await.unwrap();
    assert_eq!(value, Some("bar".to_string()));
    assert_eq!(moved_hits.load(Ordering::SeqCst), 1);

    // The redirect scheduled a topology refresh that now points straight
    // at node_b, so a second request for the same key never touches
    // node_a again.
    let value_again = client.get("somekey").await.unwrap();
    assert_eq!(value_again, Some("bar".to_string()));
    assert_eq!(
        moved_hits.load(Ordering::SeqCst),
        1,
        "second request should have gone straight to node_b, not hit node_a again"
    );
}
