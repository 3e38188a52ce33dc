//! Post-handshake certificate bridge.
//!
//! Pulls the peer's credentials out of the provider, turns them into
//! rustls `CertificateDer` values and asks the caller's validator whether
//! to trust them. The provider's own verification result is advisory and
//! only reaches the validator as status text.

use crate::tls::classify::ErrorClassifier;
use crate::tls::error::{FtpTlsError, TlsResult};
use crate::tls::logging::{LogCategories, TlsLog};
use crate::tls::provider::ProviderSession;
use crate::tls::types::{CertificateStatus, CertificateType, SessionInfo};
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use x509_parser::prelude::*;

// ─── Validator ───────────────────────────────────────────────────────

/// Decides whether a peer is trusted.
///
/// `certificate` is the leaf, present for control connections. `chain` is
/// every certificate the peer sent, leaf first. `status` is the provider's
/// verification status as text, empty when verification found no problem.
pub trait CertificateValidator: Send + Sync {
    fn validate(
        &self,
        session: &SessionInfo,
        certificate: Option<&CertificateDer<'static>>,
        chain: Option<&[CertificateDer<'static>]>,
        status: &str,
    ) -> bool;
}

impl<F> CertificateValidator for F
where
    F: Fn(&SessionInfo, Option<&CertificateDer<'static>>, Option<&[CertificateDer<'static>]>, &str) -> bool
        + Send
        + Sync,
{
    fn validate(
        &self,
        session: &SessionInfo,
        certificate: Option<&CertificateDer<'static>>,
        chain: Option<&[CertificateDer<'static>]>,
        status: &str,
    ) -> bool {
        self(session, certificate, chain, status)
    }
}

/// Wrap a closure as a shareable validator.
pub fn validator_fn<F>(f: F) -> Arc<dyn CertificateValidator>
where
    F: Fn(&SessionInfo, Option<&CertificateDer<'static>>, Option<&[CertificateDer<'static>]>, &str) -> bool
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Trusts exactly what the provider verified.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequireVerified;

impl CertificateValidator for RequireVerified {
    fn validate(
        &self,
        _session: &SessionInfo,
        _certificate: Option<&CertificateDer<'static>>,
        _chain: Option<&[CertificateDer<'static>]>,
        status: &str,
    ) -> bool {
        status.is_empty()
    }
}

// ─── Extraction ──────────────────────────────────────────────────────

/// What the bridge learned about the peer.
#[derive(Debug, Clone)]
pub struct PeerCredentials {
    pub kind: CertificateType,
    pub status: CertificateStatus,
    pub leaf: Option<CertificateDer<'static>>,
    pub chain: Vec<CertificateDer<'static>>,
    pub leaf_pem: Option<String>,
}

/// Multi-line summary of a DER certificate.
pub fn describe_certificate(der: &[u8]) -> TlsResult<String> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| FtpTlsError::certificate_rejected(format!("cannot decode certificate: {}", e)))?;

    let mut out = String::new();
    out.push_str(&format!("subject: {}\n", cert.subject()));
    out.push_str(&format!("issuer: {}\n", cert.issuer()));
    out.push_str(&format!("serial: {}\n", cert.raw_serial_as_string()));
    out.push_str(&format!(
        "validity: {} to {}\n",
        cert.validity().not_before,
        cert.validity().not_after
    ));
    out.push_str(&format!(
        "key algorithm: {}\n",
        cert.public_key().algorithm.algorithm.to_id_string()
    ));
    out.push_str(&format!(
        "signature algorithm: {}\n",
        cert.signature_algorithm.algorithm.to_id_string()
    ));
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        let names: Vec<String> = san
            .value
            .general_names
            .iter()
            .map(|n| match n {
                GeneralName::DNSName(d) => format!("DNS:{}", d),
                GeneralName::IPAddress(ip) => format!("IP:{}", format_ip(ip)),
                other => format!("{:?}", other),
            })
            .collect();
        out.push_str(&format!("alt names: {}\n", names.join(", ")));
    }
    out.push_str(&format!("sha256 fingerprint: {}", fingerprint(der)));
    Ok(out)
}

fn format_ip(raw: &[u8]) -> String {
    match raw.len() {
        4 => std::net::Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string(),
        16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(raw);
            std::net::Ipv6Addr::from(b).to_string()
        }
        _ => hex::encode(raw),
    }
}

pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// One-line summary of a DER SubjectPublicKeyInfo.
pub fn describe_public_key(spki: &[u8]) -> TlsResult<String> {
    let (_, key) = SubjectPublicKeyInfo::from_der(spki)
        .map_err(|e| FtpTlsError::certificate_rejected(format!("cannot decode public key: {}", e)))?;
    Ok(format!(
        "public key: {} ({} bits), sha256 {}",
        key.algorithm.algorithm.to_id_string(),
        key.subject_public_key.data.len() * 8,
        fingerprint(spki)
    ))
}

pub fn der_to_pem(der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new("CERTIFICATE", der.to_vec()))
}

pub fn pem_to_der(text: &str) -> TlsResult<CertificateDer<'static>> {
    let block = ::pem::parse(text)
        .map_err(|e| FtpTlsError::certificate_rejected(format!("invalid PEM: {}", e)))?;
    if block.tag() != "CERTIFICATE" {
        return Err(FtpTlsError::certificate_rejected(format!(
            "expected a CERTIFICATE block, got {}",
            block.tag()
        )));
    }
    Ok(CertificateDer::from(block.into_contents()))
}

// ─── Bridge ──────────────────────────────────────────────────────────

pub struct CertificateBridge<'a> {
    log: &'a TlsLog,
    classifier: &'a dyn ErrorClassifier,
}

impl<'a> CertificateBridge<'a> {
    pub fn new(log: &'a TlsLog, classifier: &'a dyn ErrorClassifier) -> Self {
        Self { log, classifier }
    }

    /// Collect the peer's credentials. The leaf is only exported (dump, PEM
    /// and platform certificate) for control connections.
    pub fn extract(
        &self,
        ctx: &dyn ProviderSession,
        hostname: &str,
        is_control: bool,
    ) -> TlsResult<PeerCredentials> {
        let status = ctx.verify_peers(hostname).map_err(|rc| {
            FtpTlsError::certificate_rejected(format!(
                "peer verification could not run: {}",
                self.classifier.describe(rc)
            ))
            .with_code(rc)
        })?;
        self.log.debug(
            LogCategories::CERTIFICATE_VALIDATION,
            format!(
                "certificate status: {}",
                if status.is_empty() { "ok".to_string() } else { status.describe() }
            ),
        );

        let kind = ctx.peer_certificate_type();
        let raw = ctx.peer_certificates();
        let mut creds = PeerCredentials {
            kind,
            status,
            leaf: None,
            chain: Vec::new(),
            leaf_pem: None,
        };

        match kind {
            CertificateType::X509 => {
                for (i, der) in raw.iter().enumerate() {
                    let summary = describe_certificate(der)?;
                    self.log.trace(
                        LogCategories::X509,
                        format!("peer certificate {}: {}", i, summary.lines().next().unwrap_or("")),
                    );
                    if i == 0 && is_control {
                        self.log.debug(LogCategories::CERTIFICATE_INFO, summary);
                        let pem = der_to_pem(der);
                        self.log.debug(LogCategories::CERTIFICATE_PEM, pem.clone());
                        creds.leaf = Some(pem_to_der(&pem)?);
                        creds.leaf_pem = Some(pem);
                    }
                    creds.chain.push(CertificateDer::from(der.clone()));
                }
            }
            CertificateType::RawPublicKey => {
                if let Some(spki) = raw.first() {
                    self.log
                        .debug(LogCategories::RAW_PUBLIC_KEY, describe_public_key(spki)?);
                }
            }
            CertificateType::Unknown => {
                self.log.warn(
                    LogCategories::CERTIFICATE_VALIDATION,
                    "peer presented no usable certificate type",
                );
            }
        }
        Ok(creds)
    }

    /// Hand the extracted credentials to the validator.
    pub fn validate(
        &self,
        info: &SessionInfo,
        creds: &PeerCredentials,
        validator: &dyn CertificateValidator,
    ) -> TlsResult<()> {
        let status_text = creds.status.describe();
        let chain = if creds.chain.is_empty() {
            None
        } else {
            Some(creds.chain.as_slice())
        };
        if validator.validate(info, creds.leaf.as_ref(), chain, &status_text) {
            self.log.debug(
                LogCategories::CERTIFICATE_VALIDATION,
                format!("certificate for {} accepted", info.hostname),
            );
            return Ok(());
        }
        let reason = if status_text.is_empty() {
            format!("certificate for {} rejected by validator", info.hostname)
        } else {
            status_text
        };
        self.log
            .warn(LogCategories::CERTIFICATE_VALIDATION, reason.clone());
        Err(FtpTlsError::certificate_rejected(reason))
    }
}
