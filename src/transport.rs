//! Network I/O layer (spec §1, §6) — out of scope for the core logic, but
//! a real tool needs one concrete implementation to run against a server.
//!
//! Grounded on the teacher's `src/connection.rs`: TCP connect, STARTTLS,
//! rustls handshake with a certificate verifier that accepts whatever the
//! test server presents (stress-testing a local/lab IMAP server, not
//! browsing the public Internet). Unlike the teacher, nothing here parses
//! IMAP — it hands the core raw logical response lines, splicing literal
//! bodies (`{n}` / `{n+}`) into a quoted string so [`crate::wire`] never
//! has to know about partial reads.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;
use tracing::debug;

use crate::error::{Error, Result};

/// Bound imposed on a connection's read buffer by anything that can read
/// and write asynchronously without requiring `Send` (spec §5: one
/// cooperative thread; nothing here demands `Send`/`Sync`).
pub trait Transport: AsyncRead + AsyncWrite + Unpin {}
impl<T: AsyncRead + AsyncWrite + Unpin> Transport for T {}

/// Plain TCP connect, no TLS.
pub async fn connect_plain(host: &str, port: u16) -> Result<TcpStream> {
    debug!(host, port, "connecting (plaintext)");
    Ok(TcpStream::connect((host, port)).await?)
}

/// Connect, then STARTTLS and complete a rustls handshake, returning the
/// wrapped stream. Certificate verification is intentionally disabled —
/// see [`DangerousVerifier`] — since this tool targets test/lab servers
/// the operator already trusts, the same tradeoff the teacher made for
/// Proton Bridge's self-signed certificate.
pub async fn connect_starttls(host: &str, port: u16) -> Result<TlsStream<TcpStream>> {
    let mut stream = connect_plain(host, port).await?;
    // Read the greeting before issuing STARTTLS.
    let mut reader = BufReader::new(&mut stream);
    let mut greeting = String::new();
    reader.read_line(&mut greeting).await?;
    debug!(%greeting, "received greeting");

    stream.write_all(b"starttls1 STARTTLS\r\n").await?;
    let mut reply = String::new();
    let mut reader = BufReader::new(&mut stream);
    reader.read_line(&mut reply).await?;
    if !reply.to_ascii_uppercase().contains("OK") {
        return Err(Error::Tls(format!("STARTTLS rejected: {reply}")));
    }

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("invalid server name: {e}")))?;

    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(TlsStream::Client(tls))
}

/// Reads logical IMAP response lines off a transport, splicing literal
/// bodies into a quoted string so the tokenizer in [`crate::wire`] only
/// ever sees ordinary text.
pub struct LineReader<T> {
    inner: BufReader<T>,
}

impl<T: Transport> LineReader<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            inner: BufReader::new(transport),
        }
    }

    /// Read one logical response line, resolving any `{n}`/`{n+}` literal
    /// markers by reading exactly `n` raw bytes and splicing them in as a
    /// quoted string (backslash/quote-escaped).
    pub async fn read_logical_line(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            let mut chunk = String::new();
            let n = self.inner.read_line(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }
            let trimmed = chunk.trim_end_matches(['\r', '\n']);
            out.push_str(trimmed);

            if let Some(size) = literal_size(trimmed) {
                let mut buf = vec![0u8; size];
                self.inner.read_exact(&mut buf).await?;
                out.push(' ');
                out.push('"');
                out.push_str(&escape_literal(&buf));
                out.push('"');
                // A literal may be followed by more of the same logical
                // line (rare, but RFC-legal); keep reading until a bare
                // CRLF terminates it with no trailing literal marker.
                continue;
            }
            break;
        }
        Ok(out)
    }

    /// Write raw bytes straight to the underlying transport: command text,
    /// literal bodies, and continuation responses all go through here.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.get_mut().write_all(buf).await?;
        Ok(())
    }
}

/// Parses a trailing `{n}` or `{n+}` off `line`, if present.
fn literal_size(line: &str) -> Option<usize> {
    let line = line.strip_suffix('}')?;
    let line = line.strip_suffix('+').unwrap_or(line);
    let brace = line.rfind('{')?;
    line[brace + 1..].parse().ok()
}

fn escape_literal(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

/// Certificate verifier that accepts anything — see module docs.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_size_parses_plus_and_plain() {
        assert_eq!(literal_size("a1 LOGIN {5+}"), Some(5));
        assert_eq!(literal_size("a1 LOGIN {12}"), Some(12));
        assert_eq!(literal_size("a1 NOOP"), None);
    }

    #[tokio::test]
    async fn read_logical_line_splices_literal() {
        let (mut client, server) = tokio::io::duplex(256);
        let write_task = tokio::spawn(async move {
            client.write_all(b"* 1 FETCH (BODY[] {5}\r\nhello)\r\n").await.unwrap();
        });
        let mut reader = LineReader::new(server);
        let line = reader.read_logical_line().await.unwrap();
        assert_eq!(line, "* 1 FETCH (BODY[] \"hello\")");
        write_task.await.unwrap();
    }
}
