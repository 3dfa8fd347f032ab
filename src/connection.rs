//! Internal module for establishing the transport to the IMAP server.
//!
//! Supports implicit TLS (IMAPS) and plaintext connections that are upgraded
//! with `STARTTLS` when the server accepts it.

use crate::config::TlsMode;
use crate::error::{Error, Result};
use rustls::ClientConfig;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};
use webpki_roots::TLS_SERVER_ROOTS;

/// A TLS stream over TCP.
pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// The stream an IMAP session runs on: TLS when available, plaintext otherwise.
#[derive(Debug)]
pub(crate) enum MailStream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl MailStream {
    pub(crate) fn is_encrypted(&self) -> bool {
        matches!(self, MailStream::Tls(_))
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MailStream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MailStream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MailStream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MailStream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// Connects to the IMAP server and secures the stream according to `mode`.
#[instrument(
    name = "connection::establish",
    skip_all,
    fields(imap_host = %imap_host, target_addr = %target_addr, tls_mode = ?mode)
)]
pub(crate) async fn establish(imap_host: &str, target_addr: &str, mode: TlsMode) -> Result<MailStream> {
    let tcp_stream = connect_tcp(target_addr).await?;

    match mode {
        TlsMode::Implicit => {
            let tls = tls_handshake(imap_host, target_addr, tcp_stream).await?;
            Ok(MailStream::Tls(Box::new(tls)))
        }
        TlsMode::StartTls => upgrade_with_starttls(imap_host, target_addr, tcp_stream).await,
    }
}

/// Issues `STARTTLS` and performs the handshake if the server accepts.
///
/// The command is sent without reading `CAPABILITY` first; a server that
/// does not support it answers `NO` or `BAD`, which keeps the plaintext stream.
async fn upgrade_with_starttls(
    imap_host: &str,
    target_addr: &str,
    tcp_stream: TcpStream,
) -> Result<MailStream> {
    let mut client = async_imap::Client::new(tcp_stream);

    match client.run_command_and_check_ok("STARTTLS", None).await {
        Ok(()) => {
            debug!("Server accepted STARTTLS");
            let tls = tls_handshake(imap_host, target_addr, client.into_inner()).await?;
            Ok(MailStream::Tls(Box::new(tls)))
        }
        Err(async_imap::error::Error::No(reason) | async_imap::error::Error::Bad(reason)) => {
            warn!(reason = %reason, "Server refused STARTTLS, continuing unencrypted");
            Ok(MailStream::Plain(client.into_inner()))
        }
        Err(source) => Err(Error::StartTls {
            target: target_addr.to_string(),
            source,
        }),
    }
}

async fn tls_handshake(imap_host: &str, target_addr: &str, tcp_stream: TcpStream) -> Result<TlsStream> {
    let connector = create_tls_connector();
    let server_name = parse_server_name(imap_host)?;

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Creates a TLS connector with the Mozilla root certificates.
fn create_tls_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

/// Parses server name for TLS SNI.
fn parse_server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

#[instrument(name = "connection::tcp_connect", skip_all, fields(target_addr = %target_addr))]
async fn connect_tcp(target_addr: &str) -> Result<TcpStream> {
    debug!("Establishing TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}
