//! RESP2/RESP3 wire types: decoding, encoding and command construction (C1).

mod cmd;
mod codec;
mod value;

pub use cmd::{Cmd, IntoCmdArg};
pub use codec::RespCodec;
pub use value::{FromValue, Value};
