//! Request dispatch (C6).
//!
//! A single call to [`Dispatcher::submit`] goes through these steps:
//!
//! 1. derive (or accept) a [`RoutingSpec`] for the command,
//! 2. resolve it to one or more target addresses against the current slot map,
//! 3. obtain (lazily connecting) a [`NodeHandle`] for each target,
//! 4. write the command and register a waiter,
//! 5. await the reply under the configured request timeout,
//! 6. on a MOVED/ASK error, follow the redirect (pipelining `ASKING` with
//!    the retried command for `ASK`; patching the slot map inline and
//!    scheduling a background refresh for `MOVED`) up to [`MAX_REDIRECTS`]
//!    hops,
//! 7. on a connection-level error, drop the dead handle, refresh topology in
//!    cluster mode, and retry once against the freshly resolved target,
//! 8. for multi-node fan-out, merge replies per the given
//!    [`ResponsePolicy`] once every node has answered.
//!
//! [`Dispatcher::close`] short-circuits step 0: once called, every
//! subsequent `submit*` rejects with [`ClientError::Closing`] before
//! touching the network.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::cluster::{Topology, TopologyProbe};
use crate::config::ClientConfig;
use crate::conn::{connect, NodeHandle};
use crate::error::{ClientError, ClientResult};
use crate::resp::{Cmd, Value};
use crate::routing::{apply_redirect, merge_replies, ResponsePolicy, RoutingSpec, MAX_REDIRECTS};

/// Owns the live connections to every node this client currently talks to
/// and carries out the routing/redirect/fan-out contract above.
pub struct Dispatcher {
    config: Arc<ClientConfig>,
    topology: Arc<Topology>,
    connections: Mutex<HashMap<SocketAddr, NodeHandle>>,
    /// One lock per target currently being dialed, so a slow/wedged dial
    /// to one node only ever blocks other callers dialing that *same*
    /// node — never callers of `submit` targeting a different, healthy
    /// node. `connections` itself is only ever held for a quick map
    /// lookup/insert, never across the dial's own I/O or backoff sleep.
    dial_locks: Mutex<HashMap<SocketAddr, Arc<Mutex<()>>>>,
    replica_counter: std::sync::atomic::AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
    /// Set once, right after construction, by whoever wraps this
    /// `Dispatcher` in an `Arc` (see `set_self_ref`). Lets a MOVED
    /// redirect schedule its background topology refresh against an
    /// owned, `'static` handle to `self` rather than blocking the
    /// redirected request on it. A `Dispatcher` never wrapped in an `Arc`
    /// (e.g. a unit test constructing one directly) just never runs a
    /// background refresh.
    self_weak: OnceLock<Weak<Dispatcher>>,
}

impl Dispatcher {
    pub fn new(config: Arc<ClientConfig>, topology: Arc<Topology>) -> Self {
        Dispatcher {
            config,
            topology,
            connections: Mutex::new(HashMap::new()),
            dial_locks: Mutex::new(HashMap::new()),
            replica_counter: std::sync::atomic::AtomicUsize::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            self_weak: OnceLock::new(),
        }
    }

    /// Must be called once, right after `Arc::new(Dispatcher::new(..))`,
    /// so `schedule_background_refresh` has something to upgrade.
    pub fn set_self_ref(self: &Arc<Self>) {
        let _ = self.self_weak.set(Arc::downgrade(self));
    }

    /// Submits a single command, letting the command's key (if any) decide
    /// routing, and following MOVED/ASK redirects transparently.
    pub async fn submit(&self, cmd: Cmd) -> ClientResult<Value> {
        let routing = RoutingSpec::for_command(&cmd);
        self.submit_routed(cmd, routing).await
    }

    /// Ends every live node connection and rejects every request still
    /// in flight with [`ClientError::Closing`].
    /// Further calls into `submit_routed`/`submit_pipeline`/
    /// `submit_fan_out_with_policy` reject synchronously afterwards,
    /// without attempting to dial or write anything.
    pub async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut connections = self.connections.lock().await;
        for (_, handle) in connections.drain() {
            handle.close();
        }
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            Err(ClientError::Closing)
        } else {
            Ok(())
        }
    }

    #[instrument(skip(self, cmd))]
    pub async fn submit_routed(&self, cmd: Cmd, routing: RoutingSpec) -> ClientResult<Value> {
        self.ensure_open()?;
        let targets = self.resolve(&routing)?;
        if targets.len() == 1 {
            self.submit_to_one(cmd, targets[0], false, 0).await
        } else {
            self.submit_fan_out(cmd, targets, ResponsePolicy::AllSucceeded)
                .await
        }
    }

    /// Sends a batch of commands as a single pipelined write to the one
    /// node the batch routes to (transactions get no
    /// intra-batch retry or redirect — a connection-level failure is
    /// surfaced directly, same as any other command). Replies are
    /// returned raw (uninspected for server errors) in submission order.
    #[instrument(skip(self, cmds))]
    pub async fn submit_pipeline(
        &self,
        cmds: Vec<Cmd>,
        routing: RoutingSpec,
    ) -> ClientResult<Vec<Value>> {
        self.ensure_open()?;
        let targets = self.resolve(&routing)?;
        let target = *targets
            .first()
            .ok_or_else(|| ClientError::connection("no node to route transaction to"))?;
        let handle = self.handle_for(target).await?;
        let result = handle.send_pipeline(cmds, self.config.request_timeout).await;
        if let Err(err) = &result {
            if err.is_connection_level() {
                self.drop_handle(target).await;
                if self.config.cluster_mode {
                    let _ = self.topology.refresh(self.probe()).await;
                }
            }
        }
        result
    }

    /// Explicit fan-out entry point for commands whose correct merge
    /// strategy is not `AllSucceeded` (e.g. `DBSIZE` aggregation).
    pub async fn submit_fan_out_with_policy(
        &self,
        cmd: Cmd,
        routing: RoutingSpec,
        policy: ResponsePolicy,
    ) -> ClientResult<Value> {
        self.ensure_open()?;
        let targets = self.resolve(&routing)?;
        self.submit_fan_out(cmd, targets, policy).await
    }

    fn resolve(&self, routing: &RoutingSpec) -> ClientResult<Vec<SocketAddr>> {
        if !self.config.cluster_mode {
            return Ok(vec![self.config.addresses[0]]);
        }
        let slot_map = self.topology.current();
        let counter = self
            .replica_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        routing.resolve(&slot_map, self.config.read_from, counter)
    }

    /// Fans a command out to every target concurrently — a small
    /// aggregator awaiting N independent sub-requests — then
    /// merges the replies once every target has answered.
    async fn submit_fan_out(
        &self,
        cmd: Cmd,
        targets: Vec<SocketAddr>,
        policy: ResponsePolicy,
    ) -> ClientResult<Value> {
        let futures = targets.into_iter().map(|target| {
            let cmd = cmd.clone();
            async move {
                let reply = self.submit_to_one(cmd, target, false, 0).await;
                (target, reply)
            }
        });
        let replies = futures::future::join_all(futures).await;
        merge_replies(policy, replies)
    }

    /// Boxed because following a redirect recurses into this same method;
    /// a plain `async fn` cannot describe a self-referential future.
    ///
    /// `asking` means this attempt must be prefixed with `ASKING` (set
    /// when following an `ASK` redirect): the prefix and the command are
    /// written as a single pipelined batch (`NodeHandle::send_pipeline`
    /// writes a whole batch atomically within one I/O-task iteration), so
    /// no other caller's request can land on the wire between them.
    fn submit_to_one<'a>(
        &'a self,
        cmd: Cmd,
        target: SocketAddr,
        asking: bool,
        redirects: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ClientResult<Value>> + Send + 'a>>
    {
        Box::pin(async move {
            if redirects > MAX_REDIRECTS {
                return Err(ClientError::connection(
                    "too many MOVED/ASK redirects for one request",
                ));
            }
            let handle = self.handle_for(target).await?;
            let result = if asking {
                let mut replies = handle
                    .send_pipeline(
                        vec![Cmd::new("ASKING"), cmd.clone()],
                        self.config.request_timeout,
                    )
                    .await?;
                replies
                    .pop()
                    .expect("ASKING pipeline always returns two replies")
                    .into_result()
            } else {
                handle.send(cmd.clone(), self.config.request_timeout).await
            };
            match result {
                Ok(value) => Ok(value),
                Err(err) if err.is_connection_level() => {
                    self.drop_handle(target).await;
                    if self.config.cluster_mode {
                        let _ = self.topology.refresh(self.probe()).await;
                    }
                    Err(err)
                }
                Err(err) => match err.redirect() {
                    Some(redirect) => {
                        let (new_target, needs_asking) = apply_redirect(&redirect)?;
                        if !needs_asking && self.config.cluster_mode {
                            // MOVED: patch the slot map inline so any other
                            // request for this slot routes straight to the
                            // new owner without a network round trip, then
                            // schedule a full refresh in the background
                            // (coalesced via `Topology::refresh`) to
                            // reconcile the rest of the topology (replica
                            // membership etc.) — the redirected retry below
                            // does not wait on it.
                            self.topology.apply_moved(redirect.slot(), new_target);
                            self.schedule_background_refresh();
                        }
                        self.submit_to_one(cmd, new_target, needs_asking, redirects + 1)
                            .await
                    }
                    None => Err(err),
                },
            }
        })
    }

    /// Fires a full topology refresh without blocking the caller that
    /// triggered it. A no-op if this `Dispatcher` was never wrapped in an
    /// `Arc` via `set_self_ref` (unit tests constructing one directly get
    /// the inline slot-map patch but not the background refresh).
    fn schedule_background_refresh(&self) {
        let Some(dispatcher) = self.self_weak.get().and_then(Weak::upgrade) else {
            return;
        };
        tokio::spawn(async move {
            let _ = dispatcher
                .topology
                .refresh(dispatcher.as_ref() as &dyn TopologyProbe)
                .await;
        });
    }

    /// Dial + handshake are bounded by the same per-request deadline as
    /// the request itself: a node wedged during `HELLO`/`AUTH` must reject
    /// with `Timeout`, not hang forever — a wedged node during the
    /// handshake is no different from one wedged after it's `Ready`.
    async fn handle_for(&self, target: SocketAddr) -> ClientResult<NodeHandle> {
        self.ensure_open()?;
        if let Some(handle) = self.connections.lock().await.get(&target).cloned() {
            return Ok(handle);
        }

        // Serialize dials to this one target without holding `connections`
        // (and so blocking every other target) across the dial itself.
        let dial_lock = {
            let mut locks = self.dial_locks.lock().await;
            locks
                .entry(target)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _dial_guard = dial_lock.lock().await;

        // Another caller may have finished dialing this exact target while
        // we were waiting for the per-target lock above.
        if let Some(handle) = self.connections.lock().await.get(&target).cloned() {
            return Ok(handle);
        }

        let handle = self.dial_with_backoff(target).await?;
        self.connections.lock().await.insert(target, handle.clone());
        Ok(handle)
    }

    /// Dials `target`, retrying a failed attempt per the configured
    /// `reconnect_strategy` (spec §4.3/§8 property 6): each single
    /// dial+handshake is capped by `request_timeout`, and a failed attempt
    /// is followed by the strategy's next backoff delay before redialing,
    /// up to `retries` redials. Once those are exhausted the last error is
    /// surfaced to every request waiting on this node.
    async fn dial_with_backoff(&self, target: SocketAddr) -> ClientResult<NodeHandle> {
        let strategy = &self.config.reconnect_strategy;
        let mut retry = crate::retry::RetryState::new();
        let mut last_err = None;
        for attempt in 0..=strategy.retries {
            if attempt > 0 {
                tokio::time::sleep(retry.next_delay(strategy)).await;
            }
            match tokio::time::timeout(self.config.request_timeout, connect(target, &self.config)).await {
                Ok(Ok(handle)) => return Ok(handle),
                Ok(Err(err)) => last_err = Some(err),
                Err(_) => last_err = Some(ClientError::Timeout),
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::connection("failed to connect")))
    }

    async fn drop_handle(&self, target: SocketAddr) {
        let mut connections = self.connections.lock().await;
        connections.remove(&target);
        warn!(node = %target, "dropped connection after connection-level error");
    }

    fn probe(&self) -> &dyn TopologyProbe {
        self
    }
}

#[async_trait::async_trait]
impl TopologyProbe for Dispatcher {
    async fn query(&self, target: SocketAddr, cmd: Cmd) -> ClientResult<Value> {
        self.submit_to_one(cmd, target, false, 0).await
    }
}
