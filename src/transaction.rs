//! Transaction engine (C7).
//!
//! `MULTI`, the queued commands and `EXEC` are written as a single
//! pipelined batch against one connection: once `EXEC` is
//! queued, there is no chance for another caller's command to land between
//! `MULTI` and `EXEC` on the same connection. A transaction is therefore
//! pinned to a single node for its whole lifetime, decided by the first
//! command's routing.

use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, ClientResult};
use crate::resp::{Cmd, Value};
use crate::routing::RoutingSpec;

/// Accumulates commands for a single `MULTI`/`EXEC` batch.
pub struct Transaction<'a> {
    dispatcher: &'a Dispatcher,
    commands: Vec<Cmd>,
}

impl<'a> Transaction<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Transaction {
            dispatcher,
            commands: Vec::new(),
        }
    }

    /// Queues a command for the transaction. Queuing never talks to the
    /// network; nothing is sent until [`Transaction::exec`].
    pub fn queue(&mut self, cmd: Cmd) -> &mut Self {
        self.commands.push(cmd);
        self
    }

    /// Sends `MULTI`, every queued command, and `EXEC` as one pipelined
    /// write to a single node, so no other caller's command can
    /// land between `MULTI` and `EXEC` on that connection.
    ///
    /// A server-side `WATCH` conflict causes `EXEC` to reply with a null
    /// array, which surfaces here as `Ok(None)`, not an error. A `CROSSSLOT`
    /// or other server error on `MULTI`, on queuing, or on `EXEC` itself
    /// aborts the transaction and is returned as `ClientError::ExecAbort`.
    pub async fn exec(self) -> ClientResult<Option<Vec<Value>>> {
        if self.commands.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let routing = RoutingSpec::for_command(&self.commands[0]);

        let mut batch = Vec::with_capacity(self.commands.len() + 2);
        batch.push(Cmd::new("MULTI"));
        batch.extend(self.commands.iter().cloned());
        batch.push(Cmd::new("EXEC"));

        let mut replies = self.dispatcher.submit_pipeline(batch, routing).await?;
        let exec_reply = replies.pop().expect("EXEC reply is always present");

        // `replies[0]` is MULTI's own reply; anything after it up to (but
        // excluding, already popped) EXEC is a per-command queuing reply.
        // No intra-transaction retries: the first error anywhere in the
        // batch aborts the whole thing.
        for reply in &replies[1..] {
            if let Value::Error { kind, message } = reply {
                return Err(ClientError::ExecAbort(format!("{kind} {message}")));
            }
        }
        if let Value::Error { kind, message } = &replies[0] {
            return Err(ClientError::ExecAbort(format!("{kind} {message}")));
        }

        match exec_reply {
            Value::Nil => Ok(None),
            Value::Array(items) => Ok(Some(items)),
            Value::Error { kind, message } => {
                Err(ClientError::ExecAbort(format!("{kind} {message}")))
            }
            other => Err(ClientError::connection(format!(
                "unexpected EXEC reply shape: {other:?}"
            ))),
        }
    }
}
