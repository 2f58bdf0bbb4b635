//! Optional TLS upgrade for a node socket (C2's "optional TLS upgrade"
//! handshake step).
//!
//! `spineldb`'s `AnyStream` (`server/stream.rs`) wraps a plain/TLS socket
//! behind one `AsyncRead`/`AsyncWrite` type on the accept side; the same
//! shape is used here on the connect side so `node_connection::connect`
//! can hand either variant to the same `Framed<_, RespCodec>` without the
//! rest of the connection machinery caring which one it got.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{client::TlsStream, rustls, TlsConnector};

use crate::error::{ClientError, ClientResult};

/// A connected node socket, plain or TLS, behind one type.
pub enum AnyStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for AnyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            AnyStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AnyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            AnyStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_flush(cx),
            AnyStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            AnyStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Upgrades an already-connected TCP socket to TLS using the platform's
/// webpki root store. The server address has no DNS name attached to it
/// by the time it reaches this layer (`ClientConfig::addresses` is
/// resolved `SocketAddr`s, not hostnames) so the peer is verified by IP
/// SAN rather than a DNS `ServerName` — documented as a resolved Open
/// Question in DESIGN.md.
pub async fn upgrade(stream: TcpStream, addr: std::net::SocketAddr) -> ClientResult<AnyStream> {
    let connector = TlsConnector::from(client_tls_config());
    let server_name = ServerName::IpAddress(addr.ip().into());
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|err| ClientError::connection(format!("TLS handshake failed: {err}")))?;
    Ok(AnyStream::Tls(Box::new(tls)))
}

fn client_tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let roots =
                rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}
