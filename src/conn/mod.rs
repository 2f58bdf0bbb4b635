//! Per-node connection: state machine, handshake and the multiplexed I/O
//! task (C2).

mod handshake;
pub mod node_connection;
pub mod state;
mod tls;

pub use node_connection::{connect, NodeHandle};
pub use state::ConnState;
