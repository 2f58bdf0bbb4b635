//! `close()` rejects in-flight work with `Closing` and every later
//! submission rejects synchronously afterwards.

mod support;

use redis_client::{Client, ClientConfigBuilder, ClientError};
use support::MockServer;

#[tokio::test]
async fn close_rejects_further_commands_with_closing() {
    support::init_tracing();
    let server = MockServer::start(|_args| Some(redis_client::Value::okay())).await;
    let config = ClientConfigBuilder::new()
        .address(server.addr)
        .build()
        .unwrap();
    let client = Client::connect(config).await.unwrap();

    client.ping().await.unwrap();
    client.close().await;

    let result = client.ping().await;
    assert!(matches!(result, Err(ClientError::Closing)));
}

#[tokio::test]
async fn close_is_visible_across_client_clones() {
    support::init_tracing();
    let server = MockServer::start(|_args| Some(redis_client::Value::okay())).await;
    let config = ClientConfigBuilder::new()
        .address(server.addr)
        .build()
        .unwrap();
    let client = Client::connect(config).await.unwrap();
    let clone = client.clone();

    clone.close().await;

    let result = client.ping().await;
    assert!(matches!(result, Err(ClientError::Closing)));
}
