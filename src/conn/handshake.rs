//! Connect-time handshake (`HELLO`/`AUTH`/`SETNAME`/`SELECT`).
//!
//! `auth_handshake_connect` (`redis_client/src/driver/redis_driver.rs`)
//! opens a socket and then writes an `AUTH` command before anything
//! else; here the same ordering is generalized into a single negotiated
//! `HELLO` call (RESP2/RESP3 feature detection), falling back to
//! RESP2-style separate `AUTH`/`SELECT` when the server does not
//! understand `HELLO`.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::config::{ClientConfig, ServerProtocol};
use crate::error::{ClientError, ClientResult};
use crate::resp::{Cmd, RespCodec, Value};

/// Runs the handshake over an already-connected transport, leaving the
/// framed connection ready to accept application commands.
pub async fn handshake<T>(
    framed: &mut Framed<T, RespCodec>,
    config: &ClientConfig,
) -> ClientResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match try_hello(framed, config).await {
        Ok(()) => {}
        Err(err) if is_unknown_command(&err) => fallback_resp2(framed, config).await?,
        Err(err) => return Err(err),
    }
    if let Some(db) = config.database_id {
        send(framed, Cmd::new("SELECT").arg(db)).await?;
    }
    if let Some(name) = &config.client_name {
        send(framed, Cmd::new("CLIENT").arg("SETNAME").arg(name.as_str())).await?;
    }
    Ok(())
}

async fn try_hello<T>(framed: &mut Framed<T, RespCodec>, config: &ClientConfig) -> ClientResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let version = match config.server_protocol {
        ServerProtocol::Resp2 => "2",
        ServerProtocol::Resp3 => "3",
    };
    let mut cmd = Cmd::new("HELLO").arg(version);
    if let Some(creds) = &config.credentials {
        let username = creds.username.as_deref().unwrap_or("default");
        cmd = cmd.arg("AUTH").arg(username).arg(creds.password.as_str());
    }
    send(framed, cmd).await.map(|_| ())
}

async fn fallback_resp2<T>(
    framed: &mut Framed<T, RespCodec>,
    config: &ClientConfig,
) -> ClientResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(creds) = &config.credentials {
        let cmd = match &creds.username {
            Some(username) => Cmd::new("AUTH").arg(username.as_str()).arg(creds.password.as_str()),
            None => Cmd::new("AUTH").arg(creds.password.as_str()),
        };
        send(framed, cmd).await?;
    }
    Ok(())
}

fn is_unknown_command(err: &ClientError) -> bool {
    matches!(err, ClientError::Request { kind, .. } if kind == "ERR")
}

async fn send<T>(framed: &mut Framed<T, RespCodec>, cmd: Cmd) -> ClientResult<Value>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(cmd.into_parts()).await?;
    let reply = framed
        .next()
        .await
        .ok_or_else(|| ClientError::connection("connection closed during handshake"))??;
    reply.into_result()
}

/// Helper kept for callers that need to hand-assemble the outgoing bytes
/// rather than going through a `Framed` sink (not used on the hot path,
/// only by the handshake's own tests).
#[allow(dead_code)]
fn encode(cmd: Cmd) -> BytesMut {
    use tokio_util::codec::Encoder;
    let mut buf = BytesMut::new();
    RespCodec.encode(cmd.into_parts(), &mut buf).unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_error_is_detected() {
        let err = ClientError::request("ERR", "unknown command 'HELLO'");
        assert!(is_unknown_command(&err));
    }

    #[test]
    fn auth_errors_are_not_treated_as_unknown_command() {
        let err = ClientError::request("WRONGPASS", "invalid username-password pair");
        assert!(!is_unknown_command(&err));
    }

    #[test]
    fn encode_produces_well_formed_array() {
        let buf = encode(Cmd::new("PING"));
        assert_eq!(&buf[..], &b"*1\r\n$4\r\nPING\r\n"[..]);
    }
}
