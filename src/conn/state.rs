//! Per-node connection state machine (C2).
//!
//! `Disconnected -> Connecting -> Handshaking -> Ready`, with any of the
//! first three able to fall back to `Disconnected` on failure, and
//! `Ready -> Closing -> Disconnected` on `close()`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Handshaking = 2,
    Ready = 3,
    Closing = 4,
}

impl ConnState {
    /// Whether a request may be written on this connection right now.
    pub fn accepts_requests(self) -> bool {
        matches!(self, ConnState::Ready)
    }

    /// Inverse of the `as u8` cast, for the atomic holder shared between a
    /// node's I/O task and its handles. Panics on a value this enum never
    /// produces, which would indicate memory corruption in the atomic.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnState::Disconnected,
            1 => ConnState::Connecting,
            2 => ConnState::Handshaking,
            3 => ConnState::Ready,
            4 => ConnState::Closing,
            other => unreachable!("invalid ConnState discriminant {other}"),
        }
    }

    pub fn is_terminal_for_client(self) -> bool {
        matches!(self, ConnState::Closing)
    }

    /// Validates a transition, returning `false` for anything not reachable
    /// per the connection state diagram.
    pub fn can_transition_to(self, next: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Handshaking)
                | (Connecting, Disconnected)
                | (Handshaking, Ready)
                | (Handshaking, Disconnected)
                | (Ready, Disconnected)
                | (Ready, Closing)
                | (Closing, Disconnected)
        )
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnState::Disconnected => "disconnected",
            ConnState::Connecting => "connecting",
            ConnState::Handshaking => "handshaking",
            ConnState::Ready => "ready",
            ConnState::Closing => "closing",
        };
        f.write_str(label)
    }
}
