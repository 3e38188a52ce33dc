//! Provider contract.
//!
//! A provider is the TLS library doing the actual cryptography. The session
//! layer drives it through these traits and interprets every integer it
//! returns through the provider's [`ErrorClassifier`]. Negative values are
//! errors; zero or positive values are success (byte counts for record I/O).

use crate::tls::broker::ResumptionBlob;
use crate::tls::classify::ErrorClassifier;
use crate::tls::credentials::CredentialStore;
use crate::tls::types::{CertificateStatus, CertificateType, HandshakeEvent, SessionFlags};
use std::any::Any;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// Process-wide entry points of a TLS library.
pub trait TlsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Version string compared against the required version on first use.
    fn version(&self) -> String;

    fn global_init(&self) -> i32;

    fn global_deinit(&self);

    fn allocate_credentials(&self) -> Result<Arc<dyn ProviderCredentials>, i32>;

    fn new_session(&self) -> Result<Box<dyn ProviderSession>, i32>;

    fn classifier(&self) -> &dyn ErrorClassifier;
}

/// Provider-specific certificate credential object.
pub trait ProviderCredentials: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn describe(&self) -> String {
        String::from("certificate credentials")
    }
}

/// Read-only view used to export resumption state.
pub trait SessionExport {
    fn export_session(&self) -> Result<ResumptionBlob, i32>;

    fn session_flags(&self) -> SessionFlags;
}

/// Receives handshake-message notifications from a provider session.
pub trait HandshakeHook: Send + Sync {
    fn on_message(&self, event: HandshakeEvent, source: &dyn SessionExport);
}

/// Client identity presented when the server asks for one.
#[derive(Clone)]
pub struct ClientIdentity {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// PKCS#8 DER private key.
    pub private_key: Vec<u8>,
}

/// Picks a client identity for a certificate request.
pub trait ClientCertificateSource: Send + Sync {
    /// `acceptable_issuers` holds DER-encoded distinguished names.
    fn select(&self, acceptable_issuers: &[&[u8]]) -> Option<ClientIdentity>;
}

/// One handshake context bound to one socket.
pub trait ProviderSession: SessionExport + Send {
    // ── Configuration ────────────────────────────────────────────────

    fn set_cache_expiration(&mut self, seconds: u32) -> i32;

    fn set_default_priority(&mut self) -> i32;

    /// Append a `+`/`-`/`%` delta to the default priority.
    fn set_priority_append(&mut self, delta: &str) -> i32;

    fn set_priority_direct(&mut self, priority: &str) -> i32;

    fn set_dh_prime_bits(&mut self, bits: u32);

    fn bind_credentials(&mut self, credentials: &CredentialStore) -> i32;

    fn set_server_name(&mut self, hostname: &str) -> i32;

    fn set_alpn_protocols(&mut self, protocols: &[&str]) -> i32;

    fn bind_transport(&mut self, socket: TcpStream);

    fn set_handshake_timeout(&mut self, timeout: Option<Duration>);

    fn set_handshake_hook(&mut self, hook: Arc<dyn HandshakeHook>);

    fn set_client_certificate_source(
        &mut self,
        source: Option<Arc<dyn ClientCertificateSource>>,
    ) -> i32;

    // ── Handshake ────────────────────────────────────────────────────

    /// Install resumption state; only valid before the handshake.
    fn import_session(&mut self, blob: &ResumptionBlob) -> i32;

    fn handshake(&mut self) -> i32;

    // ── Records ──────────────────────────────────────────────────────

    fn record_recv(&mut self, buf: &mut [u8]) -> isize;

    /// May accept fewer bytes than offered.
    fn record_send(&mut self, buf: &[u8]) -> isize;

    /// Decrypted bytes buffered and ready to be received.
    fn record_check_pending(&mut self) -> usize;

    /// Bidirectional close-notify.
    fn bye(&mut self) -> i32;

    // ── Negotiated facts ─────────────────────────────────────────────

    fn is_resumed(&self) -> bool;

    /// `"TLS1.2"`, `"TLS1.3"`, ...
    fn protocol_name(&self) -> Option<String>;

    fn session_description(&self) -> String;

    fn alpn_selected(&self) -> Option<String>;

    fn max_record_size(&self) -> usize;

    /// Name of the most recent alert received.
    fn last_alert(&self) -> Option<String>;

    /// Provider-side detail for the last failure, if it has more to say
    /// than the classifier.
    fn last_error_detail(&self) -> Option<String>;

    fn client_certificate_requested(&self) -> bool;

    // ── Peer certificates ────────────────────────────────────────────

    fn verify_peers(&self, hostname: &str) -> Result<CertificateStatus, i32>;

    fn peer_certificate_type(&self) -> CertificateType;

    /// Raw peer credentials, leaf first. DER certificates for X.509, a
    /// DER SubjectPublicKeyInfo for raw public keys.
    fn peer_certificates(&self) -> Vec<Vec<u8>>;
}
