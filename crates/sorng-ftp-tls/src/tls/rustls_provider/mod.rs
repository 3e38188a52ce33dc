//! rustls-backed provider.
//!
//! - `global_init` installs the ring crypto provider as process default
//! - credentials hold the trust anchors and a WebPKI verifier; the verifier
//!   runs after the handshake and only produces a status bitmask
//! - priority strings are mapped onto protocol versions, cipher suites and
//!   the resumption mode (see [`ConfigPlan`])
//! - resumption blobs hand a connection group's session cache, verifier
//!   and client-certificate resolver to the next session

mod session;
mod tickets;
mod verifier;

pub use session::RustlsSession;

use crate::tls::classify::{codes, ErrorClassifier, StandardClassifier};
use crate::tls::priority::{AdvancedOption, CipherToken, PriorityDirectives, SecuritySuite, VersionToken};
use crate::tls::provider::{ProviderCredentials, ProviderSession, TlsProvider};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::{RootCertStore, SupportedCipherSuite, SupportedProtocolVersion};
use std::any::Any;
use std::sync::Arc;

// ─── Provider ────────────────────────────────────────────────────────

pub struct RustlsProvider {
    /// Explicit trust anchors; `None` loads the platform store.
    roots: Option<Vec<CertificateDer<'static>>>,
    classifier: StandardClassifier,
}

impl RustlsProvider {
    pub const VERSION: &'static str = "rustls-0.23";

    /// Provider trusting the platform's native root store.
    pub fn new() -> Self {
        Self {
            roots: None,
            classifier: StandardClassifier,
        }
    }

    /// Provider trusting exactly `roots`.
    pub fn with_roots(roots: Vec<CertificateDer<'static>>) -> Self {
        Self {
            roots: Some(roots),
            classifier: StandardClassifier,
        }
    }

    fn root_store(&self) -> RootCertStore {
        let mut store = RootCertStore::empty();
        match &self.roots {
            Some(roots) => {
                let (added, ignored) = store.add_parsable_certificates(roots.iter().cloned());
                log::debug!("rustls provider: {} explicit roots ({} ignored)", added, ignored);
            }
            None => {
                let native = rustls_native_certs::load_native_certs();
                for err in &native.errors {
                    log::warn!("rustls provider: native root store: {}", err);
                }
                let (added, ignored) = store.add_parsable_certificates(native.certs);
                log::debug!("rustls provider: {} native roots ({} ignored)", added, ignored);
            }
        }
        store
    }
}

impl Default for RustlsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsProvider for RustlsProvider {
    fn name(&self) -> &str {
        "rustls"
    }

    fn version(&self) -> String {
        Self::VERSION.to_string()
    }

    fn global_init(&self) -> i32 {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            log::debug!("rustls provider: a process-default crypto provider is already installed");
        }
        codes::SUCCESS
    }

    fn global_deinit(&self) {
        // The process-default crypto provider cannot be uninstalled.
    }

    fn allocate_credentials(&self) -> Result<Arc<dyn ProviderCredentials>, i32> {
        let crypto = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(self.root_store());
        let verifier = if roots.is_empty() {
            log::warn!("rustls provider: no trust anchors, every peer will be reported unverified");
            None
        } else {
            match WebPkiServerVerifier::builder_with_provider(roots.clone(), crypto.clone()).build() {
                Ok(v) => Some(v),
                Err(e) => {
                    log::error!("rustls provider: cannot build verifier: {}", e);
                    return Err(codes::INSUFFICIENT_CREDENTIALS);
                }
            }
        };
        Ok(Arc::new(RustlsCredentials {
            roots,
            crypto,
            verifier,
        }))
    }

    fn new_session(&self) -> Result<Box<dyn ProviderSession>, i32> {
        Ok(Box::new(RustlsSession::new()))
    }

    fn classifier(&self) -> &dyn ErrorClassifier {
        &self.classifier
    }
}

// ─── Credentials ─────────────────────────────────────────────────────

pub struct RustlsCredentials {
    roots: Arc<RootCertStore>,
    crypto: Arc<CryptoProvider>,
    verifier: Option<Arc<WebPkiServerVerifier>>,
}

impl RustlsCredentials {
    pub fn trust_anchor_count(&self) -> usize {
        self.roots.len()
    }

    pub(crate) fn crypto(&self) -> &Arc<CryptoProvider> {
        &self.crypto
    }

    pub(crate) fn verifier(&self) -> Option<&Arc<WebPkiServerVerifier>> {
        self.verifier.as_ref()
    }
}

impl ProviderCredentials for RustlsCredentials {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> String {
        format!("rustls credentials ({} trust anchors)", self.roots.len())
    }
}

// ─── Priority mapping ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumptionMode {
    Tickets,
    /// TLS 1.2 resumes by session id only; TLS 1.3 tickets unaffected.
    SessionIdOnlyTls12,
    Disabled,
}

/// What a priority string means for a rustls client configuration.
#[derive(Debug)]
pub(crate) struct ConfigPlan {
    pub versions: Vec<&'static SupportedProtocolVersion>,
    pub suites: Vec<SupportedCipherSuite>,
    pub resumption: ResumptionMode,
    /// Tokens with no rustls counterpart.
    pub not_applicable: Vec<String>,
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

fn matches_cipher(suite: &SupportedCipherSuite, cipher: CipherToken) -> bool {
    cipher == CipherToken::All || suite_name(suite).contains(cipher.suite_fragment())
}

fn toggle(enable: bool, token: &str) -> String {
    format!("{}{}", if enable { '+' } else { '-' }, token)
}

impl ConfigPlan {
    pub fn from_directives(
        directives: &PriorityDirectives,
        available: &[SupportedCipherSuite],
    ) -> Result<Self, i32> {
        let base = directives.base.unwrap_or_default();
        let mut not_applicable = Vec::new();

        let (mut tls12, mut tls13) = (base != SecuritySuite::None, base != SecuritySuite::None);
        for &(enable, version) in &directives.versions {
            match version {
                VersionToken::All => {
                    tls12 = enable;
                    tls13 = enable;
                }
                VersionToken::Tls12 => tls12 = enable,
                VersionToken::Tls13 => tls13 = enable,
                VersionToken::Tls10 | VersionToken::Tls11 => {
                    not_applicable.push(toggle(enable, version.token()))
                }
            }
        }

        let mut suites: Vec<SupportedCipherSuite> = match base {
            SecuritySuite::None => Vec::new(),
            SecuritySuite::Secure192 | SecuritySuite::Secure256 | SecuritySuite::NsaSuiteB192 => {
                available
                    .iter()
                    .copied()
                    .filter(|s| suite_name(s).contains("AES_256"))
                    .collect()
            }
            _ => available.to_vec(),
        };
        for &(enable, cipher) in &directives.ciphers {
            if enable {
                for s in available {
                    if matches_cipher(s, cipher) && !suites.iter().any(|x| x.suite() == s.suite()) {
                        suites.push(*s);
                    }
                }
            } else {
                suites.retain(|s| !matches_cipher(s, cipher));
            }
        }

        let mut versions: Vec<&'static SupportedProtocolVersion> = Vec::new();
        if tls13 {
            versions.push(&rustls::version::TLS13);
        }
        if tls12 {
            versions.push(&rustls::version::TLS12);
        }
        suites.retain(|s| versions.iter().any(|v| v.version == s.version().version));
        if suites.is_empty() {
            return Err(codes::NO_CIPHER_SUITES);
        }

        let resumption = if directives.has_flag(AdvancedOption::NoTickets) {
            ResumptionMode::Disabled
        } else if directives.has_flag(AdvancedOption::NoTicketsTls12) {
            ResumptionMode::SessionIdOnlyTls12
        } else {
            ResumptionMode::Tickets
        };
        for flag in &directives.flags {
            if !matches!(flag, AdvancedOption::NoTickets | AdvancedOption::NoTicketsTls12) {
                not_applicable.push(flag.keyword().to_string());
            }
        }
        for (enable, token) in &directives.others {
            not_applicable.push(toggle(*enable, token));
        }
        if let Some(kw) = directives.profile.and_then(|p| p.keyword()) {
            not_applicable.push(kw.to_string());
        }

        Ok(Self {
            versions,
            suites,
            resumption,
            not_applicable,
        })
    }
}
