//! TLS-layer error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised secure-transport error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpTlsError {
    pub kind: TlsErrorKind,
    pub message: String,
    /// Raw provider result code that triggered the error, if any.
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TlsErrorKind {
    /// Caller passed an out-of-range buffer window or an unusable parent.
    InvalidArgument,
    /// The loaded provider does not report the required version.
    ProviderVersionMismatch,
    /// Provider global init or context allocation failed.
    ProviderFailure,
    /// A configuration step was refused by the provider.
    InvalidConfig,
    /// Handshake aborted with a non-transient result (includes timeout).
    HandshakeFailure,
    /// The certificate validator rejected the peer.
    CertificateRejected,
    /// Record send/receive failed with a non-transient result.
    RecordIoFailure,
    /// I/O attempted on a session that is closed or failed.
    SessionClosed,
}

pub type TlsResult<T> = Result<T, FtpTlsError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpTlsError {
    pub fn new(kind: TlsErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::InvalidArgument, msg)
    }

    pub fn version_mismatch(required: &str, found: &str) -> Self {
        Self::new(
            TlsErrorKind::ProviderVersionMismatch,
            format!(
                "TLS provider version mismatch: required '{}', loaded '{}'",
                required, found
            ),
        )
    }

    pub fn provider_failure(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::ProviderFailure, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::InvalidConfig, msg)
    }

    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::HandshakeFailure, msg)
    }

    pub fn certificate_rejected(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::CertificateRejected, msg)
    }

    pub fn record_io(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::RecordIoFailure, msg)
    }

    pub fn session_closed(msg: impl Into<String>) -> Self {
        Self::new(TlsErrorKind::SessionClosed, msg)
    }
}

impl fmt::Display for FtpTlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[TLS {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[TLS {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpTlsError {}

impl From<std::io::Error> for FtpTlsError {
    fn from(e: std::io::Error) -> Self {
        Self::record_io(format!("socket error: {}", e))
    }
}

impl From<FtpTlsError> for std::io::Error {
    fn from(e: FtpTlsError) -> Self {
        use std::io::ErrorKind;
        let kind = match e.kind {
            TlsErrorKind::InvalidArgument => ErrorKind::InvalidInput,
            TlsErrorKind::SessionClosed => ErrorKind::NotConnected,
            TlsErrorKind::CertificateRejected => ErrorKind::PermissionDenied,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}
