//! TLS session setup for the TCP connector
//!
//! Certificate material comes from PEM files named in a `[*.certificate]`
//! section. Without a CA file the server is checked against the bundled web
//! PKI roots.

use crate::config::CertificateSection;
use crate::error::TransportError;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::TlsConnector;

/// Client TLS configuration bound to one server name
#[derive(Clone)]
pub struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsSettings {
    /// Load certificate material and build the client config
    ///
    /// The server name is `certificate.name` when set, else `host`.
    pub fn new(certificate: Option<&CertificateSection>, host: &str) -> Result<Self, TransportError> {
        let name = certificate
            .and_then(|c| c.name.as_deref())
            .unwrap_or(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name {name}: {e}")))?;

        let config = client_config(certificate)?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Run the client handshake over an established TCP stream
    pub async fn wrap(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, TransportError> {
        let stream = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await?;
        Ok(stream)
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn client_config(
    certificate: Option<&CertificateSection>,
) -> Result<rustls::ClientConfig, TransportError> {
    install_crypto_provider();

    let insecure = certificate.is_some_and(|c| c.insecure_skip_verify);
    let builder = if insecure {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
    } else {
        rustls::ClientConfig::builder().with_root_certificates(root_store(certificate)?)
    };

    let (cert, key) = match certificate {
        Some(c) => (c.cert.as_deref(), c.key.as_deref()),
        None => (None, None),
    };
    match (cert, key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| TransportError::Tls(format!("client certificate rejected: {e}"))),
        (None, None) => Ok(builder.with_no_client_auth()),
        (Some(_), None) => Err(TransportError::Tls(
            "client certificate configured without a key".to_string(),
        )),
        (None, Some(_)) => Err(TransportError::Tls(
            "client key configured without a certificate".to_string(),
        )),
    }
}

fn root_store(
    certificate: Option<&CertificateSection>,
) -> Result<rustls::RootCertStore, TransportError> {
    let Some(ca) = certificate.and_then(|c| c.ca.as_deref()) else {
        return Ok(rustls::RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        ));
    };

    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(ca)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("{ca}: {e}")))?;
    }
    Ok(roots)
}

fn open(path: &str) -> Result<BufReader<File>, TransportError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TransportError::Tls(format!("{path}: {e}")))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("{path}: {e}")))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!("{path}: no certificates found")));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TransportError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| TransportError::Tls(format!("{path}: {e}")))?
        .ok_or_else(|| TransportError::Tls(format!("{path}: no private key found")))
}

/// Accepts any server certificate (`insecure_skip_verify`)
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}
