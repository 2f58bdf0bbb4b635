//! Client configuration (A2).
//!
//! Generalizes `NodeBuilder` (`redis_node/src/node_builder.rs`) — an
//! `Option`-field struct consumed by a validating `build()` — to the set
//! of options an application supplies when constructing a client, instead
//! of the metadata a cluster node builds itself from.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ClientError;

/// Which protocol to negotiate with `HELLO` at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerProtocol {
    Resp2,
    Resp3,
}

/// Read placement for a request that does not require primary consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    Primary,
    PreferReplica,
}

/// Username/password pair sent during the connect handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: String,
}

/// Reconnect backoff parameters consumed by the retry policy (C3).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectStrategy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Maximum number of redial attempts after the first one fails, before
    /// a dial gives up and surfaces `ClientError::Connection` to every
    /// request waiting on that node (spec §8 property 6).
    pub retries: u32,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        ReconnectStrategy {
            base_delay: Duration::from_millis(100),
            factor: 2,
            max_delay: Duration::from_secs(8),
            // No automatic redial by default: a dial failure surfaces
            // immediately as a `Connection`/`Timeout` error on the request
            // that triggered it, same as a bare single attempt. Callers opt
            // into bounded, backed-off redialing by setting this above 0.
            retries: 0,
        }
    }
}

/// Immutable client configuration, built via [`ClientConfigBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addresses: Vec<SocketAddr>,
    pub use_tls: bool,
    pub credentials: Option<Credentials>,
    pub request_timeout: Duration,
    pub read_from: ReadFrom,
    pub server_protocol: ServerProtocol,
    pub client_name: Option<String>,
    pub database_id: Option<i64>,
    pub reconnect_strategy: ReconnectStrategy,
    pub cluster_mode: bool,
}

#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    addresses: Vec<SocketAddr>,
    use_tls: bool,
    credentials: Option<Credentials>,
    request_timeout: Option<Duration>,
    read_from: Option<ReadFrom>,
    server_protocol: Option<ServerProtocol>,
    client_name: Option<String>,
    database_id: Option<i64>,
    reconnect_strategy: Option<ReconnectStrategy>,
    cluster_mode: bool,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, addr: SocketAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    pub fn addresses(mut self, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses.extend(addrs);
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn read_from(mut self, read_from: ReadFrom) -> Self {
        self.read_from = Some(read_from);
        self
    }

    pub fn server_protocol(mut self, protocol: ServerProtocol) -> Self {
        self.server_protocol = Some(protocol);
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn database_id(mut self, db: i64) -> Self {
        self.database_id = Some(db);
        self
    }

    pub fn reconnect_strategy(mut self, strategy: ReconnectStrategy) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    pub fn cluster_mode(mut self, cluster_mode: bool) -> Self {
        self.cluster_mode = cluster_mode;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ClientError> {
        if self.addresses.is_empty() {
            return Err(ClientError::configuration(
                "at least one server address is required",
            ));
        }
        if self.cluster_mode && self.database_id.is_some() {
            return Err(ClientError::configuration(
                "database_id is not supported in cluster mode",
            ));
        }
        Ok(ClientConfig {
            addresses: self.addresses,
            use_tls: self.use_tls,
            credentials: self.credentials,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(1)),
            read_from: self.read_from.unwrap_or(ReadFrom::Primary),
            server_protocol: self.server_protocol.unwrap_or(ServerProtocol::Resp3),
            client_name: self.client_name,
            database_id: self.database_id,
            reconnect_strategy: self.reconnect_strategy.unwrap_or_default(),
            cluster_mode: self.cluster_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn build_requires_at_least_one_address() {
        let err = ClientConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn build_applies_defaults() {
        let config = ClientConfigBuilder::new()
            .address(addr(6379))
            .build()
            .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.read_from, ReadFrom::Primary);
        assert_eq!(config.server_protocol, ServerProtocol::Resp3);
        assert!(!config.cluster_mode);
    }

    #[test]
    fn cluster_mode_rejects_database_id() {
        let err = ClientConfigBuilder::new()
            .address(addr(7000))
            .cluster_mode(true)
            .database_id(3)
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn build_keeps_multiple_seed_addresses() {
        let config = ClientConfigBuilder::new()
            .addresses([addr(7000), addr(7001), addr(7002)])
            .cluster_mode(true)
            .build()
            .unwrap();
        assert_eq!(config.addresses.len(), 3);
    }
}
