//! The per-node I/O task (C2), grounded on the `Pipeline`/`PipelineSink`
//! pattern in `multiplexed_connection.rs`: a single task owns
//! the socket's read and write halves, multiplexing many concurrent
//! callers' requests onto one connection. A single RESP connection answers
//! in the exact order requests were written, so a FIFO queue of waiters is
//! enough to match each reply to its caller — no `callback_id` needed at
//! this layer (that correlation lives one level up, in the dispatcher,
//! which may fan a single logical request out across several connections).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::conn::handshake::handshake;
use crate::conn::state::ConnState;
use crate::conn::tls::{self, AnyStream};
use crate::error::{ClientError, ClientResult};
use crate::resp::{Cmd, RespCodec, Value};

/// Lock-free holder for the connection's [`ConnState`], shared between the
/// I/O task and every [`NodeHandle`] clone so a caller can inspect a node's
/// lifecycle stage (e.g. to avoid dialing a node already `Connecting`)
/// without round-tripping through the I/O task itself.
#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new(state: ConnState) -> Self {
        SharedState(Arc::new(AtomicU8::new(state as u8)))
    }

    fn set(&self, state: ConnState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// A single outstanding request handed to the connection task.
struct Dispatched {
    cmds: Vec<Cmd>,
    reply_tx: oneshot::Sender<ClientResult<Vec<Value>>>,
}

/// A cheaply-clonable handle used by callers to submit requests to a node's
/// I/O task. Mirrors the `Pipeline` handle.
#[derive(Clone)]
pub struct NodeHandle {
    address: SocketAddr,
    submit_tx: mpsc::Sender<Dispatched>,
    closer: std::sync::Arc<Notify>,
    state: SharedState,
}

impl NodeHandle {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The node's current position in the `Disconnected -> Connecting ->
    /// Handshaking -> Ready -> Closing` state machine (spec §4.2/§3's
    /// `Node.conn_state`). `Ready` is the only state a request may be
    /// written in; callers otherwise treat this as informational (e.g. for
    /// logging or an idle-connection reaper one layer up).
    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// Tells the I/O task to shut down: every currently-queued waiter is
    /// failed with [`ClientError::Closing`] rather than `Connection` (spec
    /// §8 property 9 — an explicit `close()` is distinguishable from the
    /// peer dropping the socket). Idempotent; safe to call from several
    /// `Client` clones racing to close.
    pub fn close(&self) {
        self.state.set(ConnState::Closing);
        self.closer.notify_one();
    }

    /// Submits a command and awaits its reply, honoring the configured
    /// per-request timeout.
    pub async fn send(&self, cmd: Cmd, request_timeout: Duration) -> ClientResult<Value> {
        let mut replies = self.send_pipeline(vec![cmd], request_timeout).await?;
        replies.remove(0).into_result()
    }

    /// Submits several commands as a single pipelined write — the I/O task
    /// writes every frame in the batch before it loops back to accept
    /// another caller's submission, so no other request can land between
    /// them on the wire (`MULTI`/commands/`EXEC` as one
    /// pipelined write to one node). Replies are returned in submission
    /// order.
    pub async fn send_pipeline(
        &self,
        cmds: Vec<Cmd>,
        request_timeout: Duration,
    ) -> ClientResult<Vec<Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit_tx
            .send(Dispatched { cmds, reply_tx })
            .await
            .map_err(|_| ClientError::Closing)?;
        match timeout(request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::connection("connection task dropped the reply")),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

/// Spawns the I/O task for one node and returns a handle to it. The task
/// runs until `close()` drops every `NodeHandle` clone or the socket dies
/// in a way the retry policy gives up on (the reconnect loop lives in
/// `crate::client`, one layer up, since it needs the shared retry state
/// and topology to decide whether to keep trying).
pub async fn connect(address: SocketAddr, config: &ClientConfig) -> ClientResult<NodeHandle> {
    let state = SharedState::new(ConnState::Connecting);
    let result = dial_and_handshake(address, config, &state).await;
    let stream = match result {
        Ok(stream) => stream,
        Err(err) => {
            state.set(ConnState::Disconnected);
            return Err(err);
        }
    };

    let (submit_tx, submit_rx) = mpsc::channel(256);
    let closer = std::sync::Arc::new(Notify::new());
    state.set(ConnState::Ready);
    tokio::spawn(run_io_loop(
        address,
        stream,
        submit_rx,
        closer.clone(),
        state.clone(),
    ));
    debug!(node = %address, "node connection ready");
    Ok(NodeHandle {
        address,
        submit_tx,
        closer,
        state,
    })
}

async fn dial_and_handshake(
    address: SocketAddr,
    config: &ClientConfig,
    state: &SharedState,
) -> ClientResult<Framed<AnyStream, RespCodec>> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    let stream = if config.use_tls {
        tls::upgrade(stream, address).await?
    } else {
        AnyStream::Plain(stream)
    };
    let mut framed = Framed::new(stream, RespCodec);
    state.set(ConnState::Handshaking);
    handshake(&mut framed, config).await?;
    Ok(framed)
}

/// Shared result-collection state for one dispatched batch. Only this
/// task ever touches it, so the lock here is never contended; it exists
/// to make `BatchState` `Send`-shareable across the waiter-queue entries
/// for a multi-command batch, not for cross-task synchronization —
/// `parking_lot::Mutex` avoids the poisoning/`Result` ceremony a
/// never-contended lock has no use for.
struct BatchState {
    results: Vec<Option<Value>>,
    remaining: usize,
    reply_tx: Option<oneshot::Sender<ClientResult<Vec<Value>>>>,
}

/// One outstanding reply slot: the batch it belongs to and its position
/// within that batch's command list.
struct Waiter {
    index: usize,
    state: std::sync::Arc<parking_lot::Mutex<BatchState>>,
}

#[instrument(skip(framed, submit_rx, closer, conn_state), fields(node = %address))]
async fn run_io_loop(
    address: SocketAddr,
    mut framed: Framed<AnyStream, RespCodec>,
    mut submit_rx: mpsc::Receiver<Dispatched>,
    closer: std::sync::Arc<Notify>,
    conn_state: SharedState,
) {
    let mut waiters: VecDeque<Waiter> = VecDeque::new();
    let mut closing = false;

    loop {
        tokio::select! {
            _ = closer.notified() => {
                closing = true;
                break;
            }
            maybe_dispatched = submit_rx.recv() => {
                let Some(dispatched) = maybe_dispatched else {
                    break;
                };
                let n = dispatched.cmds.len();
                let state = std::sync::Arc::new(parking_lot::Mutex::new(BatchState {
                    results: vec![None; n],
                    remaining: n,
                    reply_tx: Some(dispatched.reply_tx),
                }));
                // Every frame in the batch is written here, inside this
                // single `select!` arm, before the loop goes back to
                // accept another caller's submission — this is what
                // guarantees a transaction's MULTI/commands/EXEC land on
                // the wire back-to-back with nothing interleaved (spec
                // §4.7).
                let mut write_failed = false;
                for cmd in dispatched.cmds {
                    if let Err(err) = framed.send(cmd.into_parts()).await {
                        let mut guard = state.lock();
                        if let Some(tx) = guard.reply_tx.take() {
                            let _ = tx.send(Err(err));
                        }
                        write_failed = true;
                        break;
                    }
                }
                if write_failed {
                    break;
                }
                for index in 0..n {
                    waiters.push_back(Waiter { index, state: state.clone() });
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(value)) => {
                        if let Some(waiter) = waiters.pop_front() {
                            complete_slot(&waiter, value);
                        } else {
                            warn!("received a reply with no waiting request");
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "node connection read error");
                        break;
                    }
                    None => {
                        debug!("node connection closed by peer");
                        break;
                    }
                }
            }
        }
    }

    conn_state.set(ConnState::Disconnected);
    let err = if closing {
        ClientError::Closing
    } else {
        ClientError::connection(format!("connection to {address} closed"))
    };
    fail_all(waiters, err);
}

/// Records `value` in its batch's result slot; when every slot in the
/// batch has arrived, sends the assembled `Vec<Value>` (in submission
/// order) to the caller awaiting it.
fn complete_slot(waiter: &Waiter, value: Value) {
    let mut guard = waiter.state.lock();
    guard.results[waiter.index] = Some(value);
    guard.remaining -= 1;
    if guard.remaining == 0 {
        if let Some(tx) = guard.reply_tx.take() {
            let results = guard
                .results
                .iter_mut()
                .map(|slot| slot.take().expect("every batch slot was filled"))
                .collect();
            let _ = tx.send(Ok(results));
        }
    }
}

fn fail_all(waiters: VecDeque<Waiter>, err: ClientError) {
    for waiter in waiters {
        let mut guard = waiter.state.lock();
        if let Some(tx) = guard.reply_tx.take() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_handle_address_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NodeHandle {
            address: "127.0.0.1:6379".parse().unwrap(),
            submit_tx: tx,
            closer: std::sync::Arc::new(Notify::new()),
            state: SharedState::new(ConnState::Ready),
        };
        assert_eq!(handle.address().port(), 6379);
    }

    #[tokio::test]
    async fn send_times_out_when_no_reply_arrives() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = NodeHandle {
            address: "127.0.0.1:6379".parse().unwrap(),
            submit_tx: tx,
            closer: std::sync::Arc::new(Notify::new()),
            state: SharedState::new(ConnState::Ready),
        };
        tokio::spawn(async move {
            let _dispatched = rx.recv().await;
        });
        let result = handle
            .send(Cmd::new("PING"), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn closing_the_handle_fails_pending_waiters_with_closing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // The peer side just needs to hold the socket open; it never has to
        // reply for this test, since `close()` wins the race against the
        // (never-arriving) reply.
        tokio::spawn(async move {
            let _peer = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let framed = Framed::new(AnyStream::Plain(stream), RespCodec);
        let (submit_tx, submit_rx) = mpsc::channel(1);
        let closer = std::sync::Arc::new(Notify::new());
        let state = SharedState::new(ConnState::Ready);
        tokio::spawn(run_io_loop(addr, framed, submit_rx, closer.clone(), state.clone()));
        let handle = NodeHandle {
            address: addr,
            submit_tx,
            closer: closer.clone(),
            state,
        };

        let sent = handle.send(Cmd::new("GET").arg("k"), Duration::from_secs(5));
        tokio::pin!(sent);
        // Poll the send once so its waiter is registered with the I/O loop
        // before we close it, then race it against the close.
        tokio::select! {
            _ = &mut sent => unreachable!("reply should never arrive"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        handle.close();

        let result = sent.await;
        assert!(matches!(result, Err(ClientError::Closing)));
        // By the time the failed waiter's reply has actually been sent, the
        // I/O loop has already finished tearing down and marked itself
        // `Disconnected` (it sets that before failing any waiter).
        assert_eq!(handle.state(), ConnState::Disconnected);
    }

    #[test]
    fn connecting_node_reports_its_state() {
        let state = SharedState::new(ConnState::Connecting);
        assert_eq!(state.get(), ConnState::Connecting);
        state.set(ConnState::Ready);
        assert_eq!(state.get(), ConnState::Ready);
    }
}
