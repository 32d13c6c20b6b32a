//! WebSocket transport helpers shared by the CP client and the CSMS.
//!
//! TLS is optional and development-grade only, per the non-goal in §1: no
//! certificate rotation, no mutual-TLS policy engine, just "dial wss:// with
//! an optional CA bundle" on the CP side and "accept behind a cert/key pair,
//! falling back to plaintext with a warning" on the CSMS side.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::warn;

/// Reads `CP_USE_TLS` / an explicit `wss://` scheme to decide whether the CP
/// client should dial over TLS.
pub fn cp_wants_tls(url: &str) -> bool {
    url.starts_with("wss://") || env_flag("CP_USE_TLS")
}

pub fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => false,
    }
}

/// Build a rustls client config for the CP side. Uses `CP_CA_FILE` if set;
/// otherwise falls back to accepting any server certificate, which is the
/// development-mode fallback §4.1 and §9 require to be visibly logged.
pub fn client_tls_connector() -> io::Result<tokio_tungstenite::Connector> {
    let config = if let Ok(ca_path) = std::env::var("CP_CA_FILE") {
        let mut roots = rustls::RootCertStore::empty();
        let certs = load_certs(Path::new(&ca_path))?;
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| io::Error::other(format!("invalid CA certificate: {e}")))?;
        }
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        warn!(
            "CP_CA_FILE not set; TLS peer verification disabled (development mode only)"
        );
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth()
    };

    Ok(tokio_tungstenite::Connector::Rustls(Arc::new(config)))
}

fn load_certs(path: &Path) -> io::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()
}

fn load_private_key(path: &Path) -> io::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| io::Error::other("no private key found in key file"))
}

/// Builds the CSMS-side TLS acceptor if `CSMS_USE_TLS` is set and both the
/// cert and key files can be read. Per §6, a missing cert/key silently
/// falls back to plaintext with a warning rather than failing startup.
pub fn server_tls_acceptor() -> Option<tokio_rustls::TlsAcceptor> {
    if !env_flag("CSMS_USE_TLS") {
        return None;
    }

    let cert_path = std::env::var("CSMS_CERT_FILE").ok();
    let key_path = std::env::var("CSMS_KEY_FILE").ok();

    let (cert_path, key_path) = match (cert_path, key_path) {
        (Some(c), Some(k)) => (c, k),
        _ => {
            warn!(
                "CSMS_USE_TLS set but CSMS_CERT_FILE/CSMS_KEY_FILE missing; falling back to plaintext"
            );
            return None;
        }
    };

    let build = || -> io::Result<tokio_rustls::TlsAcceptor> {
        let certs = load_certs(Path::new(&cert_path))?;
        let key = load_private_key(Path::new(&key_path))?;
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::other(format!("invalid certificate/key pair: {e}")))?;
        Ok(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
    };

    match build() {
        Ok(acceptor) => Some(acceptor),
        Err(e) => {
            warn!(error = %e, "failed to build TLS acceptor from CSMS_CERT_FILE/CSMS_KEY_FILE; falling back to plaintext");
            None
        }
    }
}

/// A certificate verifier that accepts anything. Only reachable when
/// `CP_CA_FILE` is unset, which already emits a warning at the call site.
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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

/// The accepted-connection stream on the CSMS side: either a bare TCP
/// socket or one wrapped in a TLS session. Both variants are `Unpin`, so
/// the enum is too, and the tokio-tungstenite handshake is generic over any
/// `AsyncRead + AsyncWrite + Unpin` stream.
pub enum CsmsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for CsmsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            CsmsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            CsmsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for CsmsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            CsmsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            CsmsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            CsmsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            CsmsStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            CsmsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            CsmsStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wss_scheme_implies_tls() {
        assert!(cp_wants_tls("wss://localhost:9000/CP_001"));
        assert!(!cp_wants_tls("ws://localhost:9000/CP_001"));
    }

    #[test]
    fn env_flag_accepts_common_truthy_spellings() {
        std::env::set_var("CP_ANOMALY_SIM_TEST_FLAG", "yes");
        assert!(env_flag("CP_ANOMALY_SIM_TEST_FLAG"));
        std::env::set_var("CP_ANOMALY_SIM_TEST_FLAG", "0");
        assert!(!env_flag("CP_ANOMALY_SIM_TEST_FLAG"));
        std::env::remove_var("CP_ANOMALY_SIM_TEST_FLAG");
    }
}
