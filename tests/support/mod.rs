//! In-process mock RESP server for end-to-end tests.
//!
//! Plays the server side of the wire protocol over a loopback socket so the
//! client's dial/handshake/multiplex/redirect machinery runs against real
//! `tokio::net::TcpStream`s instead of mocked connections, the same way
//! `redis_node` accepts client connections — just scripted rather than
//! backed by real storage.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use redis_client::resp::RespCodec;
use redis_client::Value;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Wires up a `tracing` subscriber for the duration of the test binary so
/// `debug!`/`warn!` events from the dispatcher and node connections show
/// up with `--nocapture`. Safe to call from every test: `try_init` is a
/// no-op once a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A running mock node. Dropping this does not stop the server (the
/// accept loop runs detached); tests are short-lived processes so the
/// tasks are reaped on process exit.
pub struct MockServer {
    pub addr: SocketAddr,
}

impl MockServer {
    /// Starts a server whose only behavior is `handler`: called once per
    /// decoded command (its argument vector, e.g. `["SET", "foo", "bar"]`),
    /// returning the reply to write back, or `None` to deliberately not
    /// reply at all (a wedged node, for timeout tests).
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(Vec<Vec<u8>>) -> Option<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        Self::serve(listener, handler).await
    }

    /// Reserves a loopback port without starting the accept loop yet — for
    /// tests whose handler needs to know its own server's address (e.g. to
    /// embed it in a `CLUSTER SLOTS` reply about itself).
    pub async fn reserve() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local_addr");
        (listener, addr)
    }

    /// Starts the accept loop on an already-bound listener (see
    /// [`MockServer::reserve`]).
    pub async fn serve<F>(listener: TcpListener, handler: F) -> Self
    where
        F: Fn(Vec<Vec<u8>>) -> Option<Value> + Send + Sync + 'static,
    {
        let addr = listener.local_addr().expect("local_addr");
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, RespCodec);
                    while let Some(Ok(value)) = framed.next().await {
                        let Some(args) = as_command_args(value) else {
                            continue;
                        };
                        match handler(args) {
                            Some(reply) => {
                                if framed.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                // Wedged: hold the connection open, never reply.
                                std::future::pending::<()>().await;
                            }
                        }
                    }
                });
            }
        });

        MockServer { addr }
    }
}

fn as_command_args(value: Value) -> Option<Vec<Vec<u8>>> {
    match value {
        Value::Array(items) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    Value::BulkString(bytes) => bytes,
                    Value::SimpleString(s) => s.into_bytes(),
                    other => format!("{other:?}").into_bytes(),
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Uppercases and stringifies the command name (first argument) for easy
/// `match`ing in test handlers.
pub fn command_name(args: &[Vec<u8>]) -> String {
    args.first()
        .map(|b| String::from_utf8_lossy(b).to_uppercase())
        .unwrap_or_default()
}

pub fn arg_str(args: &[Vec<u8>], index: usize) -> String {
    args.get(index)
        .map(|b| String::from_utf8_lossy(b).to_string())
        .unwrap_or_default()
}

/// Builds the nested `CLUSTER SLOTS` reply shape the topology parser
/// expects: `[[start, end, [ip, port], [ip, port]...], ...]`.
pub fn cluster_slots_reply(ranges: &[(u16, u16, SocketAddr, &[SocketAddr])]) -> Value {
    Value::Array(
        ranges
            .iter()
            .map(|(start, end, primary, replicas)| {
                let mut fields = vec![
                    Value::Integer(*start as i64),
                    Value::Integer(*end as i64),
                    node_entry(primary),
                ];
                fields.extend(replicas.iter().map(node_entry));
                Value::Array(fields)
            })
            .collect(),
    )
}

fn node_entry(addr: &SocketAddr) -> Value {
    Value::Array(vec![
        Value::BulkString(addr.ip().to_string().into_bytes()),
        Value::Integer(addr.port() as i64),
    ])
}
