//! The public client facade, unifying standalone and cluster deployments
//! behind one API — the same shape `StandaloneClient`
//! (`standalone_client.rs`) exposes, generalized with a `cluster_mode` flag
//! instead of a separate cluster type, since routing/redirect handling
//! already lives uniformly in the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::cluster::{Topology, TopologyProbe};
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ClientResult;
use crate::resp::{Cmd, FromValue, Value};
use crate::routing::{ResponsePolicy, RoutingSpec};
use crate::transaction::Transaction;

/// An async handle to a standalone server or a cluster, depending on
/// `config.cluster_mode`. Cheap to clone: it shares its dispatcher and
/// topology with every clone, the same sharing model as
/// `redis_node::Node`'s `Arc`-wrapped fields.
#[derive(Clone)]
pub struct Client {
    dispatcher: Arc<Dispatcher>,
    topology: Arc<Topology>,
}

impl Client {
    /// Connects and, in cluster mode, performs the initial topology
    /// discovery against the configured seed addresses.
    #[instrument(skip(config))]
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let cluster_mode = config.cluster_mode;
        let topology = Arc::new(Topology::new(config.addresses.clone()));
        let config = Arc::new(config);
        let dispatcher = Arc::new(Dispatcher::new(config, topology.clone()));
        dispatcher.set_self_ref();

        if cluster_mode {
            topology.refresh(dispatcher.as_ref() as &dyn TopologyProbe).await?;
        }

        Ok(Client {
            dispatcher,
            topology,
        })
    }

    /// Issues a single command and converts its reply to `T`.
    pub async fn command<T: FromValue>(&self, cmd: Cmd) -> ClientResult<T> {
        let value = self.dispatcher.submit(cmd).await?;
        T::from_value(value)
    }

    /// Issues a command with an explicit routing override, for callers that
    /// need fan-out (`AllPrimaries`/`AllNodes`) rather than the default
    /// key-derived routing.
    pub async fn command_routed<T: FromValue>(
        &self,
        cmd: Cmd,
        routing: RoutingSpec,
        policy: Option<ResponsePolicy>,
    ) -> ClientResult<T> {
        let value = match policy {
            Some(policy) => {
                self.dispatcher
                    .submit_fan_out_with_policy(cmd, routing, policy)
                    .await?
            }
            None => self.dispatcher.submit_routed(cmd, routing).await?,
        };
        T::from_value(value)
    }

    /// Starts a `MULTI`/`EXEC` transaction pinned to the node that the
    /// first queued command routes to.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(&self.dispatcher)
    }

    /// Forces a topology refresh (cluster mode only); a no-op in
    /// standalone mode.
    pub async fn refresh_topology(&self) -> ClientResult<()> {
        self.topology
            .refresh(self.dispatcher.as_ref() as &dyn TopologyProbe)
            .await
    }

    pub async fn ping(&self) -> ClientResult<()> {
        self.command(Cmd::new("PING")).await
    }

    /// Ends every node connection this client (or any of its clones) has
    /// open, failing every in-flight request with [`crate::ClientError::Closing`].
    /// Terminal: every `Client` clone shares the same dispatcher, so a
    /// subsequent `command`/`transaction` call on any clone rejects
    /// synchronously with `Closing` rather than dialing anything.
    pub async fn close(&self) {
        self.dispatcher.close().await;
    }
}

/// Reconnect/backoff timing surfaced for callers who want to log or test
/// against it directly, without reaching into the retry module.
pub fn default_request_timeout() -> Duration {
    Duration::from_secs(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfigBuilder;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn standalone_connect_skips_topology_discovery() {
        let config = ClientConfigBuilder::new()
            .address(addr(6380))
            .build()
            .unwrap();
        let client = Client::connect(config).await.unwrap();
        assert!(client.topology.current().is_empty());
    }

    #[test]
    fn default_request_timeout_matches_config_default() {
        assert_eq!(default_request_timeout(), Duration::from_secs(1));
    }
}
