//! # TLS Transport
//!
//! Purpose: Build one `rustls` client configuration per provider and wrap
//! freshly dialled sockets with it.
//!
//! ## Notes
//! - Certificates and keys are loaded once, when the provider is created, so a
//!   bad path is a configuration error rather than a per-call failure.
//! - The handshake runs lazily on the first write.

use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};

use ukv_common::{Error, Result};

use crate::options::TlsOptions;

/// TLS-wrapped TCP stream.
pub(crate) type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Shared TLS client configuration.
#[derive(Debug, Clone)]
pub(crate) struct TlsConnector {
    config: Arc<ClientConfig>,
    server_name: Option<String>,
}

impl TlsConnector {
    /// Loads certificates and builds the client configuration.
    pub(crate) fn new(options: &TlsOptions) -> Result<Self> {
        let provider = Arc::new(ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|err| invalid("tls", err.to_string()))?;

        let builder = if options.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipVerification(provider)))
        } else {
            let mut roots = RootCertStore::empty();
            match &options.ca_file {
                Some(path) => {
                    for cert in load_certs(path, "tls.ca_file")? {
                        roots
                            .add(cert)
                            .map_err(|err| invalid("tls.ca_file", err.to_string()))?;
                    }
                }
                None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
            }
            builder.with_root_certificates(roots)
        };

        let config = match (&options.cert_file, &options.key_file) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs(cert, "tls.cert_file")?, load_key(key)?)
                .map_err(|err| invalid("tls.key_file", err.to_string()))?,
            (None, None) => builder.with_no_client_auth(),
            (Some(_), None) => return Err(Error::MissingConfig { field: "tls.key_file" }),
            (None, Some(_)) => return Err(Error::MissingConfig { field: "tls.cert_file" }),
        };

        Ok(TlsConnector {
            config: Arc::new(config),
            server_name: options.server_name.clone(),
        })
    }

    /// Wraps a connected socket. `host` is used for SNI unless overridden.
    pub(crate) fn wrap(&self, host: &str, tcp: TcpStream) -> Result<TlsStream> {
        let name = self.server_name.clone().unwrap_or_else(|| host.to_string());
        let server_name =
            ServerName::try_from(name).map_err(|err| invalid("tls.server_name", err.to_string()))?;
        let conn = ClientConnection::new(Arc::clone(&self.config), server_name)
            .map_err(|err| Error::unsent(format!("tls setup failed: {}", err)))?;
        Ok(StreamOwned::new(conn, tcp))
    }
}

fn invalid(field: &'static str, reason: String) -> Error {
    Error::InvalidConfig { field, reason }
}

fn load_certs(path: &Path, field: &'static str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|err| invalid(field, format!("{}: {}", path.display(), err)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| invalid(field, format!("{}: {}", path.display(), err)))?;
    if certs.is_empty() {
        return Err(invalid(field, format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).map_err(|err| invalid("tls.key_file", format!("{}: {}", path.display(), err)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|err| invalid("tls.key_file", format!("{}: {}", path.display(), err)))?
        .ok_or_else(|| invalid("tls.key_file", format!("{}: no private key found", path.display())))
}

/// Accepts every certificate; signatures are still checked for well-formedness.
#[derive(Debug)]
struct SkipVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_roots_build() {
        let connector = TlsConnector::new(&TlsOptions::default());
        assert!(connector.is_ok());
    }

    #[test]
    fn insecure_mode_builds() {
        let options = TlsOptions {
            insecure_skip_verify: true,
            ..TlsOptions::default()
        };
        assert!(TlsConnector::new(&options).is_ok());
    }

    #[test]
    fn missing_ca_file_is_config_error() {
        let options = TlsOptions {
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsOptions::default()
        };
        let err = TlsConnector::new(&options).unwrap_err();
        assert_eq!(err.kind(), ukv_common::ErrorKind::Config);
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let options = TlsOptions {
            cert_file: Some(PathBuf::from("/nonexistent/client.pem")),
            ..TlsOptions::default()
        };
        let err = TlsConnector::new(&options).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { field: "tls.key_file" }));
    }
}
