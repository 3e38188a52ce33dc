//! Certificate handling for the rustls provider.

use crate::tls::provider::ClientCertificateSource;
use crate::tls::types::CertificateStatus;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

// ─── Handshake verifier ──────────────────────────────────────────────

/// Accepts any chain during the handshake; trust is decided afterwards
/// from the status bitmask. Handshake signatures are still checked.
#[derive(Debug)]
pub(crate) struct AdvisoryVerifier {
    crypto: Arc<CryptoProvider>,
}

impl AdvisoryVerifier {
    pub fn new(crypto: Arc<CryptoProvider>) -> Self {
        Self { crypto }
    }
}

impl ServerCertVerifier for AdvisoryVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.crypto.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.crypto.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.crypto
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Status bits for a WebPKI verification failure.
pub(crate) fn status_for(error: &rustls::Error) -> CertificateStatus {
    let detail = match error {
        rustls::Error::InvalidCertificate(e) => match e {
            CertificateError::Expired => CertificateStatus::EXPIRED,
            CertificateError::NotValidYet => CertificateStatus::NOT_ACTIVATED,
            CertificateError::Revoked => CertificateStatus::REVOKED,
            CertificateError::UnknownIssuer => CertificateStatus::SIGNER_NOT_FOUND,
            CertificateError::BadSignature => CertificateStatus::SIGNATURE_FAILURE,
            CertificateError::NotValidForName => CertificateStatus::UNEXPECTED_OWNER,
            CertificateError::InvalidPurpose => CertificateStatus::PURPOSE_MISMATCH,
            CertificateError::UnhandledCriticalExtension => {
                CertificateStatus::UNKNOWN_CRIT_EXTENSIONS
            }
            // Newer rustls releases add context-carrying variants.
            other => {
                let name = format!("{:?}", other);
                if name.starts_with("Expired") {
                    CertificateStatus::EXPIRED
                } else if name.starts_with("NotValidForName") {
                    CertificateStatus::UNEXPECTED_OWNER
                } else if name.starts_with("NotValidYet") {
                    CertificateStatus::NOT_ACTIVATED
                } else {
                    CertificateStatus::empty()
                }
            }
        },
        _ => CertificateStatus::empty(),
    };
    CertificateStatus::INVALID | detail
}

// ─── Client certificates ─────────────────────────────────────────────

thread_local! {
    static CERTIFICATE_REQUESTED: Cell<bool> = const { Cell::new(false) };
}

/// Clear the request mark of the calling thread, returning its old value.
///
/// The resolver runs on the thread that drives the handshake, so the mark
/// belongs to whichever connection that thread is handshaking.
pub(crate) fn take_request_mark() -> bool {
    CERTIFICATE_REQUESTED.with(|c| c.replace(false))
}

/// Client-certificate resolver shared by a connection group. Each request
/// sets the calling thread's mark (see [`take_request_mark`]).
pub(crate) struct RecordingResolver {
    source: Option<Arc<dyn ClientCertificateSource>>,
    crypto: Arc<CryptoProvider>,
}

impl RecordingResolver {
    pub fn new(source: Option<Arc<dyn ClientCertificateSource>>, crypto: Arc<CryptoProvider>) -> Self {
        Self { source, crypto }
    }

    pub fn source(&self) -> Option<&Arc<dyn ClientCertificateSource>> {
        self.source.as_ref()
    }
}

impl fmt::Debug for RecordingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingResolver")
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl ResolvesClientCert for RecordingResolver {
    fn resolve(
        &self,
        root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        CERTIFICATE_REQUESTED.with(|c| c.set(true));
        let identity = self.source.as_ref()?.select(root_hint_subjects)?;
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.private_key));
        let signer = match self.crypto.key_provider.load_private_key(key) {
            Ok(k) => k,
            Err(e) => {
                log::warn!("client certificate key rejected: {}", e);
                return None;
            }
        };
        let chain = identity.chain.into_iter().map(CertificateDer::from).collect();
        Some(Arc::new(CertifiedKey::new(chain, signer)))
    }

    fn has_certs(&self) -> bool {
        // Always offer; `resolve` records the request and may decline.
        true
    }
}
