/*
 * net.rs
 * Copyright (C) 2026 The mockmail authors
 *
 * This file is part of mockmail, an in-memory multi-protocol (SMTP/IMAP/POP3) mail
 * server used as a test double.
 *
 * mockmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mockmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mockmail.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Server-side TLS: wrap an accepted `TcpStream` with rustls, either immediately (implicit TLS
//! listeners) or after a protocol STARTTLS/STLS command (plain listeners that upgrade in
//! place). `Stream` erases the plain/TLS distinction behind one `AsyncRead + AsyncWrite` type
//! so session code never needs to know which one it holds.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream as TokioServerTlsStream;
use tokio_rustls::TlsAcceptor;

/// Build a server TLS config from a PEM certificate chain and private key, both already
/// decoded. Self-signed certificates are fine; this server never validates a client cert.
pub fn build_server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> io::Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    Ok(Arc::new(config))
}

/// Parse a PEM-encoded certificate chain and the first private key found in `key_pem`.
pub fn load_pem(cert_pem: &[u8], key_pem: &[u8]) -> io::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key found in PEM"))?;
    Ok((certs, key))
}

/// A connection that may be plain TCP or TLS-wrapped TCP, exposed through one type so session
/// loops don't need a generic parameter. STARTTLS/STLS replace a `Plain` value with `Tls` in
/// place; implicit-TLS listeners construct `Tls` directly from `accept_tls`.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TokioServerTlsStream<TcpStream>>),
}

impl Stream {
    pub fn plain(tcp: TcpStream) -> Self {
        Stream::Plain(tcp)
    }

    /// Accept a TLS handshake on an already-accepted TCP stream (implicit-TLS listener).
    pub async fn accept_tls(tcp: TcpStream, acceptor: &TlsAcceptor) -> io::Result<Self> {
        let tls = acceptor.accept(tcp).await?;
        Ok(Stream::Tls(Box::new(tls)))
    }

    /// Upgrade a plain stream to TLS in place (STARTTLS/STLS). Consumes `self`; fails (and
    /// drops the connection) if `self` is already TLS, since STARTTLS on top of TLS is nonsense.
    pub async fn starttls(self, acceptor: &TlsAcceptor) -> io::Result<Self> {
        match self {
            Stream::Plain(tcp) => {
                let tls = acceptor.accept(tcp).await?;
                Ok(Stream::Tls(Box::new(tls)))
            }
            Stream::Tls(_) => Err(io::Error::new(io::ErrorKind::Other, "already using TLS")),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }
}

/// Lets the generic session loop in each protocol module request a STARTTLS/STLS upgrade
/// without knowing whether its stream type is actually TLS-capable. `Stream` performs a real
/// upgrade; the in-memory `tokio::io::Join` streams used by unit tests always refuse, since
/// they have no handshake to perform.
pub trait MaybeTls: Sized {
    fn is_tls(&self) -> bool {
        false
    }

    async fn try_starttls(self, acceptor: Option<&TlsAcceptor>) -> io::Result<Self>;
}

impl MaybeTls for Stream {
    fn is_tls(&self) -> bool {
        Stream::is_tls(self)
    }

    async fn try_starttls(self, acceptor: Option<&TlsAcceptor>) -> io::Result<Self> {
        match acceptor {
            Some(acceptor) => self.starttls(acceptor).await,
            None => Err(io::Error::new(io::ErrorKind::Other, "STARTTLS not configured on this listener")),
        }
    }
}

impl<R, W> MaybeTls for tokio::io::Join<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn try_starttls(self, _acceptor: Option<&TlsAcceptor>) -> io::Result<Self> {
        Err(io::Error::new(io::ErrorKind::Other, "STARTTLS not supported on this stream"))
    }
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
