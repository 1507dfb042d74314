//! TLS configuration for loopback connections.
//!
//! The client serves its API with a per-install self-signed certificate on
//! 127.0.0.1, so the websocket connector accepts any server certificate while
//! still checking handshake signatures with the installed crypto provider.

use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

/// Install the process-wide rustls crypto provider. Idempotent.
pub fn install_crypto_provider() {
    let _ = crypto::aws_lc_rs::default_provider().install_default();
}

/// Build a client config that skips certificate verification.
pub fn loopback_client_config() -> Arc<ClientConfig> {
    install_crypto_provider();

    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(crypto::aws_lc_rs::default_provider()));

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();

    Arc::new(config)
}

#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        install_crypto_provider();
        install_crypto_provider();
        assert!(CryptoProvider::get_default().is_some());
    }

    #[test]
    fn verifier_accepts_self_signed_certificate() {
        let verifier = AcceptAnyCertificate {
            provider: Arc::new(crypto::aws_lc_rs::default_provider()),
        };
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let name = ServerName::try_from("127.0.0.1").unwrap();

        let verified = verifier.verify_server_cert(cert.cert.der(), &[], &name, &[], UnixTime::now());
        assert!(verified.is_ok());
    }

    #[test]
    fn loopback_config_builds() {
        let config = loopback_client_config();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn loopback_config_advertises_signature_schemes() {
        let verifier = AcceptAnyCertificate {
            provider: Arc::new(crypto::aws_lc_rs::default_provider()),
        };
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
