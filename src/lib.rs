//! Async client core for a standalone/cluster key-value server.
//!
//! This crate implements connection multiplexing, cluster slot routing,
//! MOVED/ASK redirection, reconnect backoff and `MULTI`/`EXEC`
//! transactions on top of RESP2/RESP3. It does not implement the server,
//! and it stops at a representative slice of the command surface —
//! `crate::commands` shows the pattern the rest would follow.

pub mod client;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod conn;
pub mod dispatcher;
pub mod error;
pub mod resp;
pub mod retry;
pub mod routing;
pub mod transaction;

pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, Credentials, ReadFrom, ReconnectStrategy, ServerProtocol};
pub use error::{ClientError, ClientResult, Redirect};
pub use resp::{Cmd, FromValue, Value};
pub use routing::{ResponsePolicy, RoutingSpec};
