//! Command construction.
//!
//! `resp_client_command_write` hand-assembles RESP arrays inline at each
//! call site. `Cmd` instead accumulates argument bytes behind a small
//! builder so the representative command wrappers in `crate::commands`
//! stay one-liners, and so the dispatcher has a single
//! `Cmd -> Vec<Vec<u8>>` boundary to route and encode uniformly.

use bytes::Bytes;

/// One RESP command: a name plus its arguments, not yet encoded.
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    pub fn new(name: &str) -> Self {
        Cmd {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    pub fn arg(mut self, arg: impl IntoCmdArg) -> Self {
        self.args.push(arg.into_cmd_arg());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl IntoCmdArg>) -> Self {
        for arg in args {
            self.args.push(arg.into_cmd_arg());
        }
        self
    }

    /// The key this command addresses, if any — the first argument after
    /// the command name, which is what the router hashes for `ByKey`
    /// routing.
    pub fn key(&self) -> Option<&[u8]> {
        self.args.get(1).map(|b| b.as_ref())
    }

    pub fn command_name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Lowers this command to the raw arrays the codec encodes.
    pub fn into_parts(self) -> Vec<Vec<u8>> {
        self.args.into_iter().map(|b| b.to_vec()).collect()
    }
}

/// Types that can be appended as a single command argument, mirroring the
/// conversions the `TipoDatoRedis` impls provide for building a request
/// from plain Rust values.
pub trait IntoCmdArg {
    fn into_cmd_arg(self) -> Bytes;
}

impl IntoCmdArg for &str {
    fn into_cmd_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoCmdArg for String {
    fn into_cmd_arg(self) -> Bytes {
        Bytes::from(self.into_bytes())
    }
}

impl IntoCmdArg for &String {
    fn into_cmd_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoCmdArg for Vec<u8> {
    fn into_cmd_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoCmdArg for &[u8] {
    fn into_cmd_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoCmdArg for Bytes {
    fn into_cmd_arg(self) -> Bytes {
        self
    }
}

macro_rules! impl_into_cmd_arg_display {
    ($($t:ty),*) => {
        $(
            impl IntoCmdArg for $t {
                fn into_cmd_arg(self) -> Bytes {
                    Bytes::from(self.to_string().into_bytes())
                }
            }
        )*
    };
}

impl_into_cmd_arg_display!(i64, u64, i32, u32, f64);
