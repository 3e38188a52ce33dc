//! Priority strings: vocabulary, builder and parser.
//!
//! A priority string is a colon-separated list:
//!
//! ```text
//! NORMAL:-VERS-TLS1.2:+VERS-TLS1.3:-CHACHA20-POLY1305:%NO_TICKETS_TLS12:%PROFILE_HIGH
//! ```
//!
//! - the first token names a base suite (`NORMAL`, `SECURE256`, ...)
//! - `+TOKEN` / `-TOKEN` enable or disable versions, ciphers and other algorithms
//! - `%KEYWORD` sets behaviour flags, `%PROFILE_*` a security profile
//!
//! A string starting with `+`, `-` or `%` has no base and is a delta to be
//! appended to the provider default.

use crate::tls::error::{FtpTlsError, TlsResult};
use serde::{Deserialize, Serialize};

// ─── Vocabulary ──────────────────────────────────────────────────────

/// Pre-configured starting point for the priority string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SecuritySuite {
    /// Fast algorithms first.
    Performance,
    /// Secure algorithms, performance first.
    #[default]
    Normal,
    /// Widest compatibility, including weak algorithms.
    Legacy,
    /// Forward-secret key exchanges only.
    PerfectForwardSecrecy,
    Secure128,
    Secure192,
    Secure256,
    NsaSuiteB128,
    NsaSuiteB192,
    /// Nothing enabled; everything comes from options.
    None,
}

impl SecuritySuite {
    pub fn keyword(self) -> &'static str {
        match self {
            SecuritySuite::Performance => "PERFORMANCE",
            SecuritySuite::Normal => "NORMAL",
            SecuritySuite::Legacy => "LEGACY",
            SecuritySuite::PerfectForwardSecrecy => "PFS",
            SecuritySuite::Secure128 => "SECURE128",
            SecuritySuite::Secure192 => "SECURE192",
            SecuritySuite::Secure256 => "SECURE256",
            SecuritySuite::NsaSuiteB128 => "SUITEB128",
            SecuritySuite::NsaSuiteB192 => "SUITEB192",
            SecuritySuite::None => "NONE",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        Some(match s {
            "PERFORMANCE" => SecuritySuite::Performance,
            "NORMAL" => SecuritySuite::Normal,
            "LEGACY" => SecuritySuite::Legacy,
            "PFS" => SecuritySuite::PerfectForwardSecrecy,
            "SECURE128" | "SECURE" => SecuritySuite::Secure128,
            "SECURE192" => SecuritySuite::Secure192,
            "SECURE256" => SecuritySuite::Secure256,
            "SUITEB128" => SecuritySuite::NsaSuiteB128,
            "SUITEB192" => SecuritySuite::NsaSuiteB192,
            "NONE" => SecuritySuite::None,
            _ => return None,
        })
    }
}

/// Protocol-version tokens (`VERS-*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionToken {
    All,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl VersionToken {
    pub fn token(self) -> &'static str {
        match self {
            VersionToken::All => "VERS-ALL",
            VersionToken::Tls10 => "VERS-TLS1.0",
            VersionToken::Tls11 => "VERS-TLS1.1",
            VersionToken::Tls12 => "VERS-TLS1.2",
            VersionToken::Tls13 => "VERS-TLS1.3",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "VERS-ALL" | "VERS-TLS-ALL" => VersionToken::All,
            "VERS-TLS1.0" => VersionToken::Tls10,
            "VERS-TLS1.1" => VersionToken::Tls11,
            "VERS-TLS1.2" => VersionToken::Tls12,
            "VERS-TLS1.3" => VersionToken::Tls13,
            _ => return None,
        })
    }
}

/// Bulk-cipher tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CipherToken {
    All,
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
    Aes128Ccm,
    Aes256Ccm,
    Aes128Cbc,
    Aes256Cbc,
}

impl CipherToken {
    pub fn token(self) -> &'static str {
        match self {
            CipherToken::All => "CIPHER-ALL",
            CipherToken::Aes128Gcm => "AES-128-GCM",
            CipherToken::Aes256Gcm => "AES-256-GCM",
            CipherToken::Chacha20Poly1305 => "CHACHA20-POLY1305",
            CipherToken::Aes128Ccm => "AES-128-CCM",
            CipherToken::Aes256Ccm => "AES-256-CCM",
            CipherToken::Aes128Cbc => "AES-128-CBC",
            CipherToken::Aes256Cbc => "AES-256-CBC",
        }
    }

    /// Fragment that appears in IANA cipher-suite names using this cipher.
    pub fn suite_fragment(self) -> &'static str {
        match self {
            CipherToken::All => "",
            CipherToken::Aes128Gcm => "AES_128_GCM",
            CipherToken::Aes256Gcm => "AES_256_GCM",
            CipherToken::Chacha20Poly1305 => "CHACHA20_POLY1305",
            CipherToken::Aes128Ccm => "AES_128_CCM",
            CipherToken::Aes256Ccm => "AES_256_CCM",
            CipherToken::Aes128Cbc => "AES_128_CBC",
            CipherToken::Aes256Cbc => "AES_256_CBC",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        [
            CipherToken::All,
            CipherToken::Aes128Gcm,
            CipherToken::Aes256Gcm,
            CipherToken::Chacha20Poly1305,
            CipherToken::Aes128Ccm,
            CipherToken::Aes256Ccm,
            CipherToken::Aes128Cbc,
            CipherToken::Aes256Cbc,
        ]
        .into_iter()
        .find(|c| c.token() == s)
    }
}

/// One `+`/`-` adjustment applied on top of the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum SecurityOption {
    EnableVersion(VersionToken),
    DisableVersion(VersionToken),
    EnableCipher(CipherToken),
    DisableCipher(CipherToken),
}

impl SecurityOption {
    pub fn token(self) -> String {
        match self {
            SecurityOption::EnableVersion(v) => format!("+{}", v.token()),
            SecurityOption::DisableVersion(v) => format!("-{}", v.token()),
            SecurityOption::EnableCipher(c) => format!("+{}", c.token()),
            SecurityOption::DisableCipher(c) => format!("-{}", c.token()),
        }
    }
}

/// Behaviour flags (`%KEYWORD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdvancedOption {
    Compat,
    DumbFirewall,
    NoExtensions,
    NoStatusRequest,
    NoTickets,
    NoTicketsTls12,
    NoSessionHash,
    ServerPrecedence,
    Ssl3RecordVersion,
    LatestRecordVersion,
    DisableWildcards,
    NoEtm,
    ForceEtm,
    DisableSafeRenegotiation,
    UnsafeRenegotiation,
    PartialRenegotiation,
    SafeRenegotiation,
    FallbackScsv,
    DisableTls13CompatMode,
    VerifyAllowBroken,
    VerifyAllowSignRsaMd5,
    VerifyAllowSignWithSha1,
    VerifyDisableCrlChecks,
    VerifyAllowX509V1CaCrt,
}

impl AdvancedOption {
    pub const ALL: [AdvancedOption; 24] = [
        AdvancedOption::Compat,
        AdvancedOption::DumbFirewall,
        AdvancedOption::NoExtensions,
        AdvancedOption::NoStatusRequest,
        AdvancedOption::NoTickets,
        AdvancedOption::NoTicketsTls12,
        AdvancedOption::NoSessionHash,
        AdvancedOption::ServerPrecedence,
        AdvancedOption::Ssl3RecordVersion,
        AdvancedOption::LatestRecordVersion,
        AdvancedOption::DisableWildcards,
        AdvancedOption::NoEtm,
        AdvancedOption::ForceEtm,
        AdvancedOption::DisableSafeRenegotiation,
        AdvancedOption::UnsafeRenegotiation,
        AdvancedOption::PartialRenegotiation,
        AdvancedOption::SafeRenegotiation,
        AdvancedOption::FallbackScsv,
        AdvancedOption::DisableTls13CompatMode,
        AdvancedOption::VerifyAllowBroken,
        AdvancedOption::VerifyAllowSignRsaMd5,
        AdvancedOption::VerifyAllowSignWithSha1,
        AdvancedOption::VerifyDisableCrlChecks,
        AdvancedOption::VerifyAllowX509V1CaCrt,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            AdvancedOption::Compat => "%COMPAT",
            AdvancedOption::DumbFirewall => "%DUMBFW",
            AdvancedOption::NoExtensions => "%NO_EXTENSIONS",
            AdvancedOption::NoStatusRequest => "%NO_STATUS_REQUEST",
            AdvancedOption::NoTickets => "%NO_TICKETS",
            AdvancedOption::NoTicketsTls12 => "%NO_TICKETS_TLS12",
            AdvancedOption::NoSessionHash => "%NO_SESSION_HASH",
            AdvancedOption::ServerPrecedence => "%SERVER_PRECEDENCE",
            AdvancedOption::Ssl3RecordVersion => "%SSL3_RECORD_VERSION",
            AdvancedOption::LatestRecordVersion => "%LATEST_RECORD_VERSION",
            AdvancedOption::DisableWildcards => "%DISABLE_WILDCARDS",
            AdvancedOption::NoEtm => "%NO_ETM",
            AdvancedOption::ForceEtm => "%FORCE_ETM",
            AdvancedOption::DisableSafeRenegotiation => "%DISABLE_SAFE_RENEGOTIATION",
            AdvancedOption::UnsafeRenegotiation => "%UNSAFE_RENEGOTIATION",
            AdvancedOption::PartialRenegotiation => "%PARTIAL_RENEGOTIATION",
            AdvancedOption::SafeRenegotiation => "%SAFE_RENEGOTIATION",
            AdvancedOption::FallbackScsv => "%FALLBACK_SCSV",
            AdvancedOption::DisableTls13CompatMode => "%DISABLE_TLS13_COMPAT_MODE",
            AdvancedOption::VerifyAllowBroken => "%VERIFY_ALLOW_BROKEN",
            AdvancedOption::VerifyAllowSignRsaMd5 => "%VERIFY_ALLOW_SIGN_RSA_MD5",
            AdvancedOption::VerifyAllowSignWithSha1 => "%VERIFY_ALLOW_SIGN_WITH_SHA1",
            AdvancedOption::VerifyDisableCrlChecks => "%VERIFY_DISABLE_CRL_CHECKS",
            AdvancedOption::VerifyAllowX509V1CaCrt => "%VERIFY_ALLOW_X509_V1_CA_CRT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.keyword() == s)
    }
}

/// Security profile (`%PROFILE_*`), a minimum-strength policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SecurityProfile {
    #[default]
    None,
    Low,
    Legacy,
    Medium,
    High,
    Ultra,
    Future,
    SuiteB128,
    SuiteB192,
}

impl SecurityProfile {
    pub fn keyword(self) -> Option<&'static str> {
        Some(match self {
            SecurityProfile::None => return None,
            SecurityProfile::Low => "%PROFILE_LOW",
            SecurityProfile::Legacy => "%PROFILE_LEGACY",
            SecurityProfile::Medium => "%PROFILE_MEDIUM",
            SecurityProfile::High => "%PROFILE_HIGH",
            SecurityProfile::Ultra => "%PROFILE_ULTRA",
            SecurityProfile::Future => "%PROFILE_FUTURE",
            SecurityProfile::SuiteB128 => "%PROFILE_SUITEB128",
            SecurityProfile::SuiteB192 => "%PROFILE_SUITEB192",
        })
    }

    fn parse(s: &str) -> Option<Self> {
        [
            SecurityProfile::Low,
            SecurityProfile::Legacy,
            SecurityProfile::Medium,
            SecurityProfile::High,
            SecurityProfile::Ultra,
            SecurityProfile::Future,
            SecurityProfile::SuiteB128,
            SecurityProfile::SuiteB192,
        ]
        .into_iter()
        .find(|p| p.keyword() == Some(s))
    }
}

// ─── Builder ─────────────────────────────────────────────────────────

/// Assemble a priority string from its parts.
///
/// Returns an empty string for the plain `Normal` suite with nothing on
/// top, which tells the session to use the provider default.
pub fn build_priority(
    suite: SecuritySuite,
    options: &[SecurityOption],
    advanced: &[AdvancedOption],
    profile: SecurityProfile,
) -> String {
    if suite == SecuritySuite::Normal
        && options.is_empty()
        && advanced.is_empty()
        && profile == SecurityProfile::None
    {
        return String::new();
    }

    let mut parts: Vec<String> = vec![suite.keyword().to_string()];
    parts.extend(options.iter().map(|o| o.token()));
    for a in advanced {
        let kw = a.keyword().to_string();
        if !parts.contains(&kw) {
            parts.push(kw);
        }
    }
    if let Some(kw) = profile.keyword() {
        parts.push(kw.to_string());
    }
    parts.join(":")
}

// ─── Parser ──────────────────────────────────────────────────────────

/// Algorithm families accepted as opaque `+`/`-` toggles.
const OPAQUE_PREFIXES: &[&str] = &[
    "MAC-", "SIGN-", "GROUP-", "CURVE-", "COMP-", "CTYPE-", "KX-",
];
const OPAQUE_TOKENS: &[&str] = &[
    "AEAD", "SHA1", "SHA256", "SHA384", "RSA", "DHE-RSA", "ECDHE-RSA", "ECDHE-ECDSA",
    "RSA-PSK", "DHE-PSK", "ECDHE-PSK", "PSK",
];

/// Parsed form of a priority string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityDirectives {
    /// `None` means the provider default base.
    pub base: Option<SecuritySuite>,
    /// `(enabled, token)` in order of appearance.
    pub versions: Vec<(bool, VersionToken)>,
    pub ciphers: Vec<(bool, CipherToken)>,
    /// Recognised algorithm toggles with no dedicated handling.
    pub others: Vec<(bool, String)>,
    pub flags: Vec<AdvancedOption>,
    pub profile: Option<SecurityProfile>,
}

impl PriorityDirectives {
    pub fn parse(expr: &str) -> TlsResult<Self> {
        let mut out = PriorityDirectives::default();
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(out);
        }
        let mut tokens = expr.split(':').map(str::trim).peekable();
        if let Some(&first) = tokens.peek() {
            if !first.starts_with(['+', '-', '%']) {
                out.base = Some(SecuritySuite::from_keyword(first).ok_or_else(|| {
                    FtpTlsError::invalid_config(format!("unknown priority keyword '{}'", first))
                })?);
                tokens.next();
            }
        }
        for tok in tokens {
            out.push_token(tok)?;
        }
        Ok(out)
    }

    /// Append a delta expression (tokens only, no base keyword).
    pub fn append(&mut self, delta: &str) -> TlsResult<()> {
        for tok in delta.trim().split(':').map(str::trim) {
            self.push_token(tok)?;
        }
        Ok(())
    }

    pub fn has_flag(&self, flag: AdvancedOption) -> bool {
        self.flags.contains(&flag)
    }

    fn push_token(&mut self, tok: &str) -> TlsResult<()> {
        if tok.is_empty() {
            return Ok(());
        }
        if let Some(kw) = tok.strip_prefix('%') {
            let full = format!("%{}", kw);
            if let Some(flag) = AdvancedOption::parse(&full) {
                if !self.flags.contains(&flag) {
                    self.flags.push(flag);
                }
                return Ok(());
            }
            if let Some(profile) = SecurityProfile::parse(&full) {
                self.profile = Some(profile);
                return Ok(());
            }
            return Err(FtpTlsError::invalid_config(format!(
                "unknown priority flag '{}'",
                tok
            )));
        }

        let (enable, name) = if let Some(n) = tok.strip_prefix('+') {
            (true, n)
        } else if let Some(n) = tok.strip_prefix('-').or_else(|| tok.strip_prefix('!')) {
            (false, n)
        } else {
            return Err(FtpTlsError::invalid_config(format!(
                "priority token '{}' must start with '+', '-' or '%'",
                tok
            )));
        };

        if let Some(v) = VersionToken::parse(name) {
            self.versions.push((enable, v));
        } else if let Some(c) = CipherToken::parse(name) {
            self.ciphers.push((enable, c));
        } else if OPAQUE_TOKENS.contains(&name)
            || OPAQUE_PREFIXES.iter().any(|p| name.starts_with(p))
        {
            self.others.push((enable, name.to_string()));
        } else {
            return Err(FtpTlsError::invalid_config(format!(
                "unknown priority token '{}'",
                tok
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_is_empty() {
        let s = build_priority(SecuritySuite::Normal, &[], &[], SecurityProfile::None);
        assert_eq!(s, "");
    }

    #[test]
    fn test_build_full() {
        let s = build_priority(
            SecuritySuite::Secure256,
            &[
                SecurityOption::DisableVersion(VersionToken::Tls12),
                SecurityOption::EnableCipher(CipherToken::Aes256Gcm),
            ],
            &[AdvancedOption::NoTicketsTls12, AdvancedOption::NoTicketsTls12],
            SecurityProfile::High,
        );
        assert_eq!(
            s,
            "SECURE256:-VERS-TLS1.2:+AES-256-GCM:%NO_TICKETS_TLS12:%PROFILE_HIGH"
        );
    }

    #[test]
    fn test_build_then_parse() {
        let s = build_priority(
            SecuritySuite::None,
            &[SecurityOption::EnableVersion(VersionToken::Tls13)],
            &[AdvancedOption::NoTickets],
            SecurityProfile::None,
        );
        let d = PriorityDirectives::parse(&s).unwrap();
        assert_eq!(d.base, Some(SecuritySuite::None));
        assert_eq!(d.versions, vec![(true, VersionToken::Tls13)]);
        assert!(d.has_flag(AdvancedOption::NoTickets));
    }

    #[test]
    fn test_parse_delta_has_no_base() {
        let d = PriorityDirectives::parse("-VERS-TLS1.3:%NO_TICKETS_TLS12").unwrap();
        assert_eq!(d.base, None);
        assert_eq!(d.versions, vec![(false, VersionToken::Tls13)]);
        assert_eq!(d.flags, vec![AdvancedOption::NoTicketsTls12]);
    }

    #[test]
    fn test_parse_opaque_tokens() {
        let d = PriorityDirectives::parse("NORMAL:-SHA1:+GROUP-X25519:-ECDHE-RSA").unwrap();
        assert_eq!(d.others.len(), 3);
        assert_eq!(d.others[1], (true, "GROUP-X25519".to_string()));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(PriorityDirectives::parse("BOGUS").is_err());
        assert!(PriorityDirectives::parse("NORMAL:+FROB").is_err());
        assert!(PriorityDirectives::parse("NORMAL:%NOPE").is_err());
        assert!(PriorityDirectives::parse("NORMAL:VERS-TLS1.2").is_err());
    }

    #[test]
    fn test_append_delta() {
        let mut d = PriorityDirectives::parse("").unwrap();
        d.append("+VERS-TLS1.2:%PROFILE_MEDIUM").unwrap();
        assert_eq!(d.profile, Some(SecurityProfile::Medium));
        assert_eq!(d.versions, vec![(true, VersionToken::Tls12)]);
    }

    #[test]
    fn test_all_advanced_keywords_round_trip() {
        for a in AdvancedOption::ALL {
            assert_eq!(AdvancedOption::parse(a.keyword()), Some(a));
        }
    }
}
