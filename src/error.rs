//! Error taxonomy for the client core.
//!
//! Mirrors the kind hierarchy of the original driver error
//! (`RedisDriverErrorKind`), but expressed as a `thiserror` enum so
//! conversions from I/O and codec failures fall out automatically instead of
//! being threaded through `From` impls by hand.

use std::fmt;

use thiserror::Error;

/// A server-returned error kind as carried on the wire (`-ERR ...`,
/// `-WRONGTYPE ...`, `-MOVED ...`). Kept as a plain string: the set of
/// kinds a server may send is open-ended and not enumerable by the client.
pub type ServerErrorKind = String;

/// The single public error type returned by every fallible operation.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The socket is not usable; the request was not guaranteed to have
    /// reached the server.
    #[error("connection error: {0}")]
    Connection(String),

    /// The per-request deadline elapsed before a reply arrived.
    #[error("request timed out")]
    Timeout,

    /// The server aborted a transaction (e.g. CROSSSLOT). A `WATCH`
    /// conflict is not an error — it surfaces as a `None` result.
    #[error("transaction aborted: {0}")]
    ExecAbort(String),

    /// A server-returned error, passed through unchanged.
    #[error("{kind} {message}")]
    Request {
        kind: ServerErrorKind,
        message: String,
    },

    /// The client is closed or closing. Terminal: no further operation
    /// on this client will succeed.
    #[error("client is closed")]
    Closing,

    /// Bad configuration supplied at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    pub fn connection(message: impl fmt::Display) -> Self {
        ClientError::Connection(message.to_string())
    }

    pub fn request(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Request {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ClientError::Configuration(message.into())
    }

    /// Connection-level errors (and timeouts) are eligible for reconnect;
    /// everything else is surfaced unchanged per the retry policy.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Timeout)
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, ClientError::Closing)
    }

    /// `true` for the two redirection kinds a cluster server sends as a
    /// `Request` error whose kind is literally `MOVED`/`ASK`.
    pub fn redirect(&self) -> Option<Redirect> {
        let ClientError::Request { kind, message } = self else {
            return None;
        };
        match kind.as_str() {
            "MOVED" => parse_redirect(message).map(|(slot, addr)| Redirect::Moved { slot, addr }),
            "ASK" => parse_redirect(message).map(|(slot, addr)| Redirect::Ask { slot, addr }),
            _ => None,
        }
    }
}

/// A redirection target parsed out of a MOVED/ASK server error. The slot is
/// kept (not just the address) so a MOVED can patch the slot map for that
/// one slot inline, ahead of a full topology refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Moved { slot: u16, addr: String },
    Ask { slot: u16, addr: String },
}

impl Redirect {
    pub fn slot(&self) -> u16 {
        match self {
            Redirect::Moved { slot, .. } | Redirect::Ask { slot, .. } => *slot,
        }
    }
}

/// `MOVED <slot> <addr>` / `ASK <slot> <addr>`.
fn parse_redirect(message: &str) -> Option<(u16, String)> {
    let mut parts = message.split_whitespace();
    let slot = parts.next()?.parse().ok()?;
    let addr = parts.next()?.to_string();
    Some((slot, addr))
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ClientError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ClientError::Connection(format!("invalid utf8 in reply: {err}"))
    }
}

impl From<std::num::ParseIntError> for ClientError {
    fn from(err: std::num::ParseIntError) -> Self {
        ClientError::Connection(format!("malformed integer in reply: {err}"))
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
