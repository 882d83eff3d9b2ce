//! TLS options for the database session.
//!
//! The mode comes from `ConnectionInfo::ssl_type`. Certificate-validated modes
//! load whichever of the CA, client certificate and client key files exist and
//! log every server certificate presented during the handshake.

use crate::diagnostics::DiagnosticLogger;
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{CertificateBundle, ConnectionInfo, TlsMode};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use x509_parser::prelude::{FromDer, X509Certificate};

/// TLS settings for one connection attempt.
#[derive(Debug, Clone)]
pub enum TlsOptions {
    /// Plaintext
    Disabled,
    /// Encrypted, any server certificate accepted
    Opportunistic,
    /// Encrypted, server certificate chain validated and logged
    Verified { bundle: CertificateBundle, inspector: CertificateInspector },
}

impl TlsOptions {
    /// Build TLS options from connection parameters.
    ///
    /// Missing certificate files are skipped; only unreadable existing files fail.
    pub fn resolve(info: &ConnectionInfo, logger: &DiagnosticLogger) -> ConnectionResult<Self> {
        let mode = info.tls_mode();
        let options = match mode {
            TlsMode::Disabled => Self::Disabled,
            TlsMode::AllowUnverified => Self::Opportunistic,
            _ => Self::Verified {
                bundle: CertificateBundle {
                    ca: load_optional_file(info.cert_authority.as_deref())?,
                    cert: load_optional_file(info.client_cert.as_deref())?,
                    key: load_optional_file(info.client_private_key.as_deref())?,
                },
                inspector: CertificateInspector::new(logger.clone()),
            },
        };

        tracing::debug!(mode = %mode, options = ?options, "Resolved TLS options");
        Ok(options)
    }

    /// Whether the session is encrypted.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Certificate bundle, for validated modes.
    pub fn bundle(&self) -> Option<&CertificateBundle> {
        match self {
            Self::Verified { bundle, .. } => Some(bundle),
            _ => None,
        }
    }

    /// rustls client configuration, or `None` for plaintext.
    pub fn client_config(&self) -> ConnectionResult<Option<ClientConfig>> {
        let provider = Arc::new(ring::default_provider());

        match self {
            Self::Disabled => Ok(None),
            Self::Opportunistic => {
                let verifier = AcceptAnyCertificate {
                    algorithms: provider.signature_verification_algorithms,
                };
                let config = ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(|e| ConnectionError::tls_with_source("Unsupported TLS protocol versions", e))?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth();
                Ok(Some(config))
            }
            Self::Verified { bundle, inspector } => {
                let roots = root_store(bundle.ca.as_deref())?;
                let verifier = InspectingVerifier::new(roots, provider.clone(), inspector.clone())?;
                let builder = ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(|e| ConnectionError::tls_with_source("Unsupported TLS protocol versions", e))?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier));

                let config = match (bundle.cert.as_deref(), bundle.key.as_deref()) {
                    (Some(cert), Some(key)) => builder
                        .with_client_auth_cert(parse_certificates(cert, "client certificate")?, parse_private_key(key)?)
                        .map_err(|e| ConnectionError::tls_with_source("Invalid client certificate or key", e))?,
                    (Some(_), None) | (None, Some(_)) => {
                        tracing::warn!("Client certificate and key must both be present; skipping client authentication");
                        builder.with_no_client_auth()
                    }
                    (None, None) => builder.with_no_client_auth(),
                };
                Ok(Some(config))
            }
        }
    }
}

/// Read a file if it exists. Absence is not an error.
pub fn load_optional_file(path: Option<&Path>) -> ConnectionResult<Option<Vec<u8>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Certificate file not found, omitting");
        return Ok(None);
    }
    std::fs::read(path).map(Some).map_err(|e| ConnectionError::file_read(path, e))
}

/// Trust anchors: the configured CA only, or the bundled web roots without one.
fn root_store(ca: Option<&[u8]>) -> ConnectionResult<RootCertStore> {
    let Some(ca) = ca else {
        return Ok(RootCertStore { roots: webpki_roots::TLS_SERVER_ROOTS.to_vec() });
    };

    let mut store = RootCertStore::empty();
    for cert in parse_certificates(ca, "CA certificate")? {
        store
            .add(cert)
            .map_err(|e| ConnectionError::tls_with_source("Invalid CA certificate", e))?;
    }
    Ok(store)
}

fn parse_certificates(pem: &[u8], what: &str) -> ConnectionResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectionError::tls_with_source(format!("Failed to parse {what}"), e))?;
    if certs.is_empty() {
        return Err(ConnectionError::tls(format!("No PEM certificates found in {what}")));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> ConnectionResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| ConnectionError::tls_with_source("Failed to parse client private key", e))?
        .ok_or_else(|| ConnectionError::tls("No PEM private key found in client key"))
}

// ============================================================================
// Certificate inspection
// ============================================================================

/// Subject, issuer and validity window of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub valid_from: String,
    pub valid_to: String,
}

impl CertificateSummary {
    /// Parse a DER certificate. Returns `None` if it is not valid X.509.
    pub fn from_der(der: &[u8]) -> Option<Self> {
        let (_, cert) = X509Certificate::from_der(der).ok()?;
        let validity = cert.validity();
        Some(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            valid_from: format_asn1_time(validity.not_before.timestamp()),
            valid_to: format_asn1_time(validity.not_after.timestamp()),
        })
    }
}

fn format_asn1_time(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Logs each server certificate through the diagnostic logger.
///
/// Never influences the handshake outcome.
#[derive(Debug, Clone)]
pub struct CertificateInspector {
    logger: DiagnosticLogger,
}

impl CertificateInspector {
    pub fn new(logger: DiagnosticLogger) -> Self {
        Self { logger }
    }

    /// Log `{hostname, cert}` for a presented certificate.
    pub fn inspect(&self, hostname: &str, der: &[u8]) {
        let cert = match CertificateSummary::from_der(der) {
            Some(summary) => json!(summary),
            None => json!({ "error": "unparseable certificate", "length": der.len() }),
        };
        self.logger.info("Certificate", json!({ "hostname": hostname, "cert": cert }));
    }
}

fn server_name_str(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_string(),
        ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
        other => format!("{other:?}"),
    }
}

fn is_name_mismatch(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

/// Chain validation by webpki, hostname mismatch logged instead of fatal.
///
/// Tunneled sessions connect to `127.0.0.1`, which the server certificate
/// never names.
#[derive(Debug)]
struct InspectingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    inspector: CertificateInspector,
}

impl InspectingVerifier {
    fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
        inspector: CertificateInspector,
    ) -> ConnectionResult<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| ConnectionError::tls_with_source("Failed to build certificate verifier", e))?;
        Ok(Self { inner, inspector })
    }
}

impl ServerCertVerifier for InspectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let hostname = server_name_str(server_name);
        self.inspector.inspect(&hostname, end_entity.as_ref());

        match self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
            Err(err) if is_name_mismatch(&err) => {
                tracing::warn!(%hostname, "Server certificate does not name this host; chain is trusted");
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

/// Accepts any server certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{LogLevel, RecordingSink};
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
    use std::io::Write;

    struct TestPki {
        ca_pem: String,
        leaf_der: CertificateDer<'static>,
        leaf_pem: String,
        leaf_key_pem: String,
    }

    fn test_pki(ca_name: &str) -> TestPki {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, ca_name);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        leaf_params.distinguished_name.push(DnType::CommonName, "db.localhost");
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        TestPki {
            ca_pem: ca_cert.pem(),
            leaf_der: CertificateDer::from(leaf.der().to_vec()),
            leaf_pem: leaf.pem(),
            leaf_key_pem: leaf_key.serialize_pem(),
        }
    }

    fn recording_logger() -> (Arc<RecordingSink>, DiagnosticLogger) {
        let sink = Arc::new(RecordingSink::new());
        (sink.clone(), DiagnosticLogger::new("PostgreSQL", sink))
    }

    fn verifier_for(pki: &TestPki, logger: DiagnosticLogger) -> InspectingVerifier {
        let roots = root_store(Some(pki.ca_pem.as_bytes())).unwrap();
        InspectingVerifier::new(
            roots,
            Arc::new(ring::default_provider()),
            CertificateInspector::new(logger),
        )
        .unwrap()
    }

    fn write_temp(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_disabled_and_unverified_ignore_cert_paths() {
        let (_sink, logger) = recording_logger();
        let mut info = ConnectionInfo::new("db.internal", 5432, "app").with_ssl_type("Off");
        info.cert_authority = Some("/nonexistent/ca.pem".into());

        let options = TlsOptions::resolve(&info, &logger).unwrap();
        assert!(matches!(options, TlsOptions::Disabled));
        assert!(options.client_config().unwrap().is_none());

        let options = TlsOptions::resolve(&info.clone().with_ssl_type("TRUST_ALL_CERTIFICATES"), &logger).unwrap();
        assert!(matches!(options, TlsOptions::Opportunistic));
        assert!(options.bundle().is_none());
        assert!(options.client_config().unwrap().is_some());
    }

    #[test]
    fn test_absent_ssl_type_is_plaintext() {
        let (_sink, logger) = recording_logger();
        let info = ConnectionInfo::new("db.internal", 5432, "app");
        assert!(!TlsOptions::resolve(&info, &logger).unwrap().is_enabled());
    }

    #[test]
    fn test_missing_certificate_files_are_omitted() {
        let (_sink, logger) = recording_logger();
        let mut info = ConnectionInfo::new("db.internal", 5432, "app").with_ssl_type("verify-full");
        info.cert_authority = Some("/nonexistent/ca.pem".into());
        info.client_cert = Some("/nonexistent/client.pem".into());
        info.client_private_key = Some("/nonexistent/client.key".into());

        let options = TlsOptions::resolve(&info, &logger).unwrap();
        assert!(options.bundle().unwrap().is_empty());
        assert!(options.client_config().unwrap().is_some());
    }

    #[test]
    fn test_existing_files_are_loaded() {
        let pki = test_pki("pgbridge test CA");
        let ca = write_temp(pki.ca_pem.as_bytes());
        let (_sink, logger) = recording_logger();
        let mut info = ConnectionInfo::new("db.internal", 5432, "app").with_ssl_type("require");
        info.cert_authority = Some(ca.path().to_path_buf());
        info.client_cert = Some("/nonexistent/client.pem".into());

        let options = TlsOptions::resolve(&info, &logger).unwrap();
        let bundle = options.bundle().unwrap();
        assert_eq!(bundle.ca.as_deref(), Some(pki.ca_pem.as_bytes()));
        assert!(bundle.cert.is_none());
        assert!(bundle.key.is_none());
    }

    #[test]
    fn test_client_auth_with_cert_and_key() {
        let pki = test_pki("pgbridge test CA");
        let (_sink, logger) = recording_logger();
        let options = TlsOptions::Verified {
            bundle: CertificateBundle {
                ca: Some(pki.ca_pem.clone().into_bytes()),
                cert: Some(pki.leaf_pem.clone().into_bytes()),
                key: Some(pki.leaf_key_pem.clone().into_bytes()),
            },
            inspector: CertificateInspector::new(logger),
        };
        let config = options.client_config().unwrap().unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_garbage_ca_is_tls_error() {
        let (_sink, logger) = recording_logger();
        let options = TlsOptions::Verified {
            bundle: CertificateBundle { ca: Some(b"not a certificate".to_vec()), ..Default::default() },
            inspector: CertificateInspector::new(logger),
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(err.category(), "TLS");
    }

    #[test]
    fn test_verifier_accepts_trusted_chain_and_logs_certificate() {
        let pki = test_pki("pgbridge test CA");
        let (sink, logger) = recording_logger();
        let verifier = verifier_for(&pki, logger);

        let name = ServerName::try_from("localhost").unwrap();
        verifier
            .verify_server_cert(&pki.leaf_der, &[], &name, &[], UnixTime::now())
            .unwrap();

        let payloads = sink.payloads(LogLevel::Info);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["message"], "Certificate");
        assert_eq!(payloads[0]["hostname"], "localhost");
        assert!(payloads[0]["cert"]["subject"].as_str().unwrap().contains("db.localhost"));
        assert!(payloads[0]["cert"]["issuer"].as_str().unwrap().contains("pgbridge test CA"));
        assert!(payloads[0]["cert"]["validFrom"].is_string());
        assert!(payloads[0]["cert"]["validTo"].is_string());
    }

    #[test]
    fn test_verifier_tolerates_name_mismatch() {
        let pki = test_pki("pgbridge test CA");
        let (sink, logger) = recording_logger();
        let verifier = verifier_for(&pki, logger);

        let loopback = ServerName::try_from("127.0.0.1").unwrap();
        assert!(verifier
            .verify_server_cert(&pki.leaf_der, &[], &loopback, &[], UnixTime::now())
            .is_ok());
        assert_eq!(sink.payloads(LogLevel::Info)[0]["hostname"], "127.0.0.1");
    }

    #[test]
    fn test_verifier_rejects_untrusted_chain() {
        let trusted = test_pki("trusted CA");
        let untrusted = test_pki("someone else's CA");
        let (sink, logger) = recording_logger();
        let verifier = verifier_for(&trusted, logger);

        let name = ServerName::try_from("localhost").unwrap();
        let err = verifier
            .verify_server_cert(&untrusted.leaf_der, &[], &name, &[], UnixTime::now())
            .unwrap_err();
        assert!(!is_name_mismatch(&err));
        // Still inspected before rejection.
        assert_eq!(sink.payloads(LogLevel::Info).len(), 1);
    }

    #[test]
    fn test_name_mismatch_variants() {
        let plain = rustls::Error::InvalidCertificate(CertificateError::NotValidForName);
        let with_context = rustls::Error::InvalidCertificate(CertificateError::NotValidForNameContext {
            expected: ServerName::try_from("127.0.0.1").unwrap(),
            presented: vec!["DnsName(\"localhost\")".to_string()],
        });
        let untrusted = rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer);

        assert!(is_name_mismatch(&plain));
        assert!(is_name_mismatch(&with_context));
        assert!(!is_name_mismatch(&untrusted));
        assert!(!is_name_mismatch(&rustls::Error::DecryptError));
    }

    #[test]
    fn test_summary_of_garbage_is_none() {
        assert!(CertificateSummary::from_der(b"garbage").is_none());
    }

    #[test]
    fn test_load_optional_file() {
        assert!(load_optional_file(None).unwrap().is_none());
        assert!(load_optional_file(Some(Path::new("/nonexistent/file.pem"))).unwrap().is_none());

        let file = write_temp(b"pem bytes");
        assert_eq!(load_optional_file(Some(file.path())).unwrap(), Some(b"pem bytes".to_vec()));
    }
}
