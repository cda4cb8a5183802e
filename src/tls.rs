//! TLS-first connection establishment.
//!
//! Unlike classic PostgreSQL there is no plaintext negotiation phase:
//! the client opens TCP, immediately runs a TLS handshake with ALPN
//! `edgedb-binary`, and speaks the protocol over the encrypted stream.
//!
//! Verification policy per [`TlsSecurity`]:
//! - `Strict`: verify chain and hostname against the system roots plus
//!   the optional CA.
//! - `NoHostVerification`: verify the chain, ignore hostname mismatch.
//! - `Insecure`: encrypt only, accept any certificate.

use std::{fs::File, io::BufReader, sync::Arc};

use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::config::{TlsConfig, TlsSecurity};
use crate::error::{Error, Result};

/// The ALPN protocol name of the binary protocol.
pub const ALPN_PROTOCOL: &[u8] = b"edgedb-binary";

/// Open a TCP connection and wrap it in TLS.
pub async fn connect(host: &str, port: u16, tls: &TlsConfig) -> Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;

    let cfg = build_client_config(tls, host)?;
    let connector = TlsConnector::from(Arc::new(cfg));

    let sni = tls.sni_hostname.as_deref().unwrap_or(host);
    let server_name = rustls::pki_types::ServerName::try_from(sni.to_string())
        .map_err(|_| Error::Tls(format!("invalid SNI hostname '{sni}'")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(format!("tls handshake failed: {e}")))?;

    Ok(stream)
}

fn build_client_config(tls: &TlsConfig, host: &str) -> Result<ClientConfig> {
    // Operator hint: Strict + IP literal host is a common failure mode.
    if tls.security == TlsSecurity::Strict
        && host.parse::<std::net::IpAddr>().is_ok()
        && tls.sni_hostname.is_none()
    {
        return Err(Error::Tls(format!(
            "TLS config error: strict verification enabled but host '{host}' is an IP address. \
             Hint: use a DNS name matching the certificate, or set tls.sni_hostname to that \
             DNS name, or use NoHostVerification."
        )));
    }

    let roots = load_root_store(tls)?;
    let roots_arc = Arc::new(roots.clone());

    let mut cfg = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    match tls.security {
        TlsSecurity::Strict => {
            // rustls default verifier already checks chain + hostname.
        }
        TlsSecurity::NoHostVerification => {
            let inner = rustls::client::WebPkiServerVerifier::builder(roots_arc)
                .build()
                .map_err(|e| Error::Tls(format!("TLS config error: build verifier: {e}")))?;
            cfg.dangerous()
                .set_certificate_verifier(Arc::new(VerifyChainNoHostname { inner }));
        }
        TlsSecurity::Insecure => {
            cfg.dangerous()
                .set_certificate_verifier(Arc::new(NoVerifyAll));
        }
    }

    cfg.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    Ok(cfg)
}

/// Build the trust store: the configured CA file if one is given,
/// otherwise the bundled Mozilla roots. A configured CA that yields no
/// usable certificate is an error, not a silent fallback.
fn load_root_store(tls: &TlsConfig) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    let Some(path) = &tls.ca_pem_path else {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(store);
    };

    let pem = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open CA file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(pem);

    for entry in rustls_pemfile::certs(&mut reader) {
        let der = entry
            .map_err(|e| Error::Tls(format!("bad PEM entry in {}: {e}", path.display())))?;
        store
            .add(der)
            .map_err(|e| Error::Tls(format!("rejected CA in {}: {e}", path.display())))?;
    }

    if store.is_empty() {
        return Err(Error::Tls(format!(
            "{} holds no CA certificates",
            path.display()
        )));
    }

    Ok(store)
}

// ---------------- Verifiers ----------------

#[derive(Debug)]
struct NoVerifyAll;

impl rustls::client::danger::ServerCertVerifier for NoVerifyAll {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp: &[u8],
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
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

#[derive(Debug)]
struct VerifyChainNoHostname {
    inner: Arc<dyn rustls::client::danger::ServerCertVerifier>,
}

impl rustls::client::danger::ServerCertVerifier for VerifyChainNoHostname {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::pki_types::CertificateDer<'_>,
        intermediates: &[rustls::pki_types::CertificateDer<'_>],
        server_name: &rustls::pki_types::ServerName<'_>,
        ocsp: &[u8],
        now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
        {
            Ok(ok) => Ok(ok),
            Err(rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName)) => {
                // Chain validation passed; only the name failed.
                Ok(rustls::client::danger::ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
