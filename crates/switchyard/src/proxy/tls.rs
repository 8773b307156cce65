//! TLS termination for the catch-all listener.
//!
//! Certificates are chosen per connection from the SNI server name: an exact
//! DNS name match first, then a `*.` wildcard covering one label, otherwise
//! the first configured certificate.

use crate::config::CertificatePair;
use crate::error::StartupError;
use rustls::crypto::ring;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// A loaded certificate chain with its key and the DNS names it covers.
#[derive(Debug, Clone)]
pub struct LoadedCertificate {
    pub names: Vec<String>,
    pub key: Arc<CertifiedKey>,
}

/// Load a PEM certificate chain and private key.
pub fn load_certificate_pair(pair: &CertificatePair) -> Result<LoadedCertificate, StartupError> {
    let fail = |reason: String| StartupError::Certificate {
        certificate: pair.certificate.clone(),
        key: pair.key.clone(),
        reason,
    };

    let cert_file = File::open(&pair.certificate)
        .map_err(|e| fail(format!("failed to open certificate file: {e}")))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| fail(format!("failed to parse certificate file: {e}")))?;
    let Some(leaf) = certs.first() else {
        return Err(fail("no certificates found in certificate file".to_string()));
    };

    let names = webpki::EndEntityCert::try_from(leaf)
        .map_err(|e| fail(format!("invalid leaf certificate: {e}")))?
        .valid_dns_names()
        .map(str::to_ascii_lowercase)
        .collect();

    let key_file =
        File::open(&pair.key).map_err(|e| fail(format!("failed to open private key file: {e}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| fail(format!("failed to parse private key file: {e}")))?
        .ok_or_else(|| fail("no private key found in key file".to_string()))?;
    let signing_key = ring::sign::any_supported_type(&key)
        .map_err(|e| fail(format!("unsupported private key: {e}")))?;

    Ok(LoadedCertificate {
        names,
        key: Arc::new(CertifiedKey::new(certs, signing_key)),
    })
}

/// Selects a certificate from the client's SNI server name.
#[derive(Debug)]
pub struct SniCertResolver {
    by_name: HashMap<String, Arc<CertifiedKey>>,
    default: Arc<CertifiedKey>,
}

impl SniCertResolver {
    /// Returns `None` when there are no certificates to serve. When several
    /// certificates claim a name, the first one configured wins.
    pub fn new(certificates: Vec<LoadedCertificate>) -> Option<Self> {
        let default = certificates.first()?.key.clone();
        let mut by_name = HashMap::new();
        for certificate in certificates {
            for name in certificate.names {
                by_name.entry(name).or_insert_with(|| certificate.key.clone());
            }
        }
        Some(Self { by_name, default })
    }

    pub fn select(&self, server_name: Option<&str>) -> Arc<CertifiedKey> {
        let Some(name) = server_name else {
            return self.default.clone();
        };
        let name = name.trim_end_matches('.').to_ascii_lowercase();

        if let Some(key) = self.by_name.get(&name) {
            return key.clone();
        }
        if let Some((_, parent)) = name.split_once('.') {
            if let Some(key) = self.by_name.get(&format!("*.{parent}")) {
                return key.clone();
            }
        }
        debug!("No certificate for '{}', using default", name);
        self.default.clone()
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.select(client_hello.server_name()))
    }
}

/// Build the TLS acceptor for the catch-all listener, or `None` when no
/// certificates are configured.
pub fn create_tls_acceptor(
    certificates: &[CertificatePair],
) -> Result<Option<TlsAcceptor>, StartupError> {
    let loaded = certificates
        .iter()
        .map(load_certificate_pair)
        .collect::<Result<Vec<_>, _>>()?;
    for certificate in &loaded {
        info!("Loaded certificate for {:?}", certificate.names);
    }

    let Some(resolver) = SniCertResolver::new(loaded) else {
        return Ok(None);
    };

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
pub(crate) mod test_support {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::DigitallySignedStruct;

    /// Accepts any server certificate, so tests can inspect what was served.
    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
