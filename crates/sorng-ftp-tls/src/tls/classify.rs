//! Provider result-code classification.
//!
//! Every integer a provider returns is interpreted here and nowhere else.
//! Callers only ever see a [`Classification`]:
//! - `Success`: non-negative result
//! - `Retryable`: try the same call again
//! - `WarningAlert` / `FatalAlert`: an alert arrived; log and decide
//! - `HardFailure`: abort the operation

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Policy bucket for a provider result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Retryable,
    WarningAlert,
    FatalAlert,
    HardFailure,
}

impl Classification {
    /// Transient for the handshake loop.
    pub fn retry_handshake(self) -> bool {
        matches!(self, Classification::Retryable | Classification::WarningAlert)
    }

    /// Transient for record send/receive. Fatal alerts are retried here
    /// too: the next call surfaces the broken session as a hard failure.
    pub fn retry_record(self) -> bool {
        matches!(
            self,
            Classification::Retryable | Classification::WarningAlert | Classification::FatalAlert
        )
    }

    /// Transient for close-notify.
    pub fn retry_bye(self) -> bool {
        matches!(self, Classification::Retryable)
    }
}

/// Interprets raw provider results.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, code: i32) -> Classification;

    /// Symbolic name of the code, e.g. `"AGAIN"`.
    fn code_name(&self, code: i32) -> String;

    /// Human-readable description of the code.
    fn describe(&self, code: i32) -> String;
}

/// Result codes shared by the bundled providers.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const UNSUPPORTED_VERSION_PACKET: i32 = -8;
    pub const UNEXPECTED_PACKET_LENGTH: i32 = -9;
    pub const INVALID_SESSION: i32 = -10;
    pub const FATAL_ALERT_RECEIVED: i32 = -12;
    pub const UNEXPECTED_PACKET: i32 = -15;
    pub const WARNING_ALERT_RECEIVED: i32 = -16;
    pub const DECRYPTION_FAILED: i32 = -24;
    pub const MEMORY_ERROR: i32 = -25;
    pub const AGAIN: i32 = -28;
    pub const INSUFFICIENT_CREDENTIALS: i32 = -32;
    pub const GOT_APPLICATION_DATA: i32 = -38;
    pub const CERTIFICATE_ERROR: i32 = -43;
    pub const INVALID_REQUEST: i32 = -50;
    pub const INTERRUPTED: i32 = -52;
    pub const PUSH_ERROR: i32 = -53;
    pub const PULL_ERROR: i32 = -54;
    pub const REQUESTED_DATA_NOT_AVAILABLE: i32 = -56;
    pub const INTERNAL_ERROR: i32 = -59;
    pub const NO_CIPHER_SUITES: i32 = -87;
    pub const PREMATURE_TERMINATION: i32 = -110;
    pub const TIMEDOUT: i32 = -319;
}

lazy_static! {
    static ref CODE_TABLE: HashMap<i32, (&'static str, &'static str)> = {
        use codes::*;
        let mut m = HashMap::new();
        m.insert(SUCCESS, ("SUCCESS", "Success."));
        m.insert(UNSUPPORTED_VERSION_PACKET, ("UNSUPPORTED_VERSION_PACKET", "A packet with illegal or unsupported version was received."));
        m.insert(UNEXPECTED_PACKET_LENGTH, ("UNEXPECTED_PACKET_LENGTH", "A TLS packet with unexpected length was received."));
        m.insert(INVALID_SESSION, ("INVALID_SESSION", "The specified session has been invalidated for some reason."));
        m.insert(FATAL_ALERT_RECEIVED, ("FATAL_ALERT_RECEIVED", "A TLS fatal alert has been received."));
        m.insert(UNEXPECTED_PACKET, ("UNEXPECTED_PACKET", "An unexpected TLS packet was received."));
        m.insert(WARNING_ALERT_RECEIVED, ("WARNING_ALERT_RECEIVED", "A TLS warning alert has been received."));
        m.insert(DECRYPTION_FAILED, ("DECRYPTION_FAILED", "Decryption has failed."));
        m.insert(MEMORY_ERROR, ("MEMORY_ERROR", "Internal error in memory allocation."));
        m.insert(AGAIN, ("AGAIN", "Resource temporarily unavailable, try again."));
        m.insert(INSUFFICIENT_CREDENTIALS, ("INSUFFICIENT_CREDENTIALS", "Insufficient credentials for that request."));
        m.insert(GOT_APPLICATION_DATA, ("GOT_APPLICATION_DATA", "TLS Application data were received, while expecting handshake data."));
        m.insert(CERTIFICATE_ERROR, ("CERTIFICATE_ERROR", "Error in the certificate."));
        m.insert(INVALID_REQUEST, ("INVALID_REQUEST", "The request is invalid."));
        m.insert(INTERRUPTED, ("INTERRUPTED", "Function was interrupted."));
        m.insert(PUSH_ERROR, ("PUSH_ERROR", "Error in the push function."));
        m.insert(PULL_ERROR, ("PULL_ERROR", "Error in the pull function."));
        m.insert(REQUESTED_DATA_NOT_AVAILABLE, ("REQUESTED_DATA_NOT_AVAILABLE", "The requested data were not available."));
        m.insert(INTERNAL_ERROR, ("INTERNAL_ERROR", "An unexpected internal error occurred."));
        m.insert(NO_CIPHER_SUITES, ("NO_CIPHER_SUITES", "No supported cipher suites have been found."));
        m.insert(PREMATURE_TERMINATION, ("PREMATURE_TERMINATION", "The TLS connection was non-properly terminated."));
        m.insert(TIMEDOUT, ("TIMEDOUT", "The operation timed out."));
        m
    };
}

/// Classifier for the [`codes`] table.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardClassifier;

impl ErrorClassifier for StandardClassifier {
    fn classify(&self, code: i32) -> Classification {
        match code {
            c if c >= 0 => Classification::Success,
            codes::AGAIN | codes::INTERRUPTED => Classification::Retryable,
            // Application data during a renegotiation; the handshake loop resumes.
            codes::GOT_APPLICATION_DATA => Classification::Retryable,
            codes::WARNING_ALERT_RECEIVED => Classification::WarningAlert,
            codes::FATAL_ALERT_RECEIVED => Classification::FatalAlert,
            _ => Classification::HardFailure,
        }
    }

    fn code_name(&self, code: i32) -> String {
        match CODE_TABLE.get(&code) {
            Some((name, _)) => (*name).to_string(),
            None if code >= 0 => "SUCCESS".to_string(),
            None => format!("UNKNOWN({})", code),
        }
    }

    fn describe(&self, code: i32) -> String {
        match CODE_TABLE.get(&code) {
            Some((_, text)) => (*text).to_string(),
            None if code >= 0 => "Success.".to_string(),
            None => format!("Unknown error code {}.", code),
        }
    }
}

// ─── Alerts ──────────────────────────────────────────────────────────

/// Name of a TLS alert description value.
pub fn alert_name(value: u8) -> &'static str {
    match value {
        0 => "close_notify",
        10 => "unexpected_message",
        20 => "bad_record_mac",
        21 => "decryption_failed",
        22 => "record_overflow",
        30 => "decompression_failure",
        40 => "handshake_failure",
        41 => "ssl3_no_certificate",
        42 => "bad_certificate",
        43 => "unsupported_certificate",
        44 => "certificate_revoked",
        45 => "certificate_expired",
        46 => "certificate_unknown",
        47 => "illegal_parameter",
        48 => "unknown_ca",
        49 => "access_denied",
        50 => "decode_error",
        51 => "decrypt_error",
        60 => "export_restriction",
        70 => "protocol_version",
        71 => "insufficient_security",
        80 => "internal_error",
        86 => "inappropriate_fallback",
        90 => "user_canceled",
        100 => "no_renegotiation",
        109 => "missing_extension",
        110 => "unsupported_extension",
        111 => "certificate_unobtainable",
        112 => "unrecognized_name",
        115 => "unknown_psk_identity",
        116 => "certificate_required",
        120 => "no_application_protocol",
        _ => "unknown_alert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let c = StandardClassifier;
        assert_eq!(c.classify(0), Classification::Success);
        assert_eq!(c.classify(1500), Classification::Success);
    }

    #[test]
    fn test_classify_transient() {
        let c = StandardClassifier;
        assert_eq!(c.classify(codes::AGAIN), Classification::Retryable);
        assert_eq!(c.classify(codes::INTERRUPTED), Classification::Retryable);
        assert_eq!(c.classify(codes::GOT_APPLICATION_DATA), Classification::Retryable);
        assert_eq!(c.classify(codes::WARNING_ALERT_RECEIVED), Classification::WarningAlert);
        assert_eq!(c.classify(codes::FATAL_ALERT_RECEIVED), Classification::FatalAlert);
    }

    #[test]
    fn test_classify_hard() {
        let c = StandardClassifier;
        for code in [
            codes::PUSH_ERROR,
            codes::PULL_ERROR,
            codes::TIMEDOUT,
            codes::INVALID_SESSION,
            codes::PREMATURE_TERMINATION,
            -9999,
        ] {
            assert_eq!(c.classify(code), Classification::HardFailure, "code {}", code);
        }
    }

    #[test]
    fn test_retry_policies_differ() {
        assert!(Classification::WarningAlert.retry_handshake());
        assert!(!Classification::FatalAlert.retry_handshake());
        assert!(Classification::FatalAlert.retry_record());
        assert!(Classification::Retryable.retry_bye());
        assert!(!Classification::WarningAlert.retry_bye());
        assert!(!Classification::HardFailure.retry_record());
    }

    #[test]
    fn test_names_and_text() {
        let c = StandardClassifier;
        assert_eq!(c.code_name(codes::AGAIN), "AGAIN");
        assert_eq!(c.code_name(-4242), "UNKNOWN(-4242)");
        assert_eq!(c.describe(codes::TIMEDOUT), "The operation timed out.");
        assert!(c.describe(-4242).contains("-4242"));
    }

    #[test]
    fn test_alert_names() {
        assert_eq!(alert_name(0), "close_notify");
        assert_eq!(alert_name(48), "unknown_ca");
        assert_eq!(alert_name(120), "no_application_protocol");
        assert_eq!(alert_name(200), "unknown_alert");
    }
}
