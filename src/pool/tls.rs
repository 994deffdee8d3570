//! Outbound TLS configuration.
//!
//! Hostname validation can be switched off on its own. Certificate chain
//! trust, validity and signatures are always checked: the verifier delegates
//! to webpki and only forgives a name mismatch. Webpki checks the chain before
//! the name, so a name error implies the chain itself was trusted.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::ProxyError;

/// Certificate verifier with an optional hostname check.
#[derive(Debug)]
pub struct HostnameAwareVerifier {
    inner: Arc<WebPkiServerVerifier>,
    validate_hostnames: bool,
}

impl HostnameAwareVerifier {
    pub fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
        validate_hostnames: bool,
    ) -> Result<Self, ProxyError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| ProxyError::TlsSetup(Box::new(e)))?;
        Ok(Self {
            inner,
            validate_hostnames,
        })
    }

    pub fn validates_hostnames(&self) -> bool {
        self.validate_hostnames
    }
}

impl ServerCertVerifier for HostnameAwareVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(ref err))
                if !self.validate_hostnames && is_name_mismatch(err) =>
            {
                tracing::debug!(
                    server_name = ?server_name,
                    "Accepting certificate despite hostname mismatch"
                );
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

/// Public web PKI roots.
pub fn default_roots() -> Arc<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(roots)
}

/// Build the client configuration used for every HTTPS route.
pub fn client_config(
    roots: Arc<RootCertStore>,
    validate_hostnames: bool,
) -> Result<Arc<ClientConfig>, ProxyError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = HostnameAwareVerifier::new(roots, provider.clone(), validate_hostnames)?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::TlsSetup(Box::new(e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
