//! Shared data types: negotiated protocol, certificate status, handshake
//! events, session state.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Protocol ────────────────────────────────────────────────────────

/// Negotiated record-layer protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TlsProtocol {
    Tls12,
    Tls13,
    #[default]
    Unknown,
}

impl TlsProtocol {
    /// Map a provider protocol name ("TLS1.2", "TLS1.3") onto the enum.
    pub fn from_name(name: &str) -> Self {
        match name {
            "TLS1.2" => TlsProtocol::Tls12,
            "TLS1.3" => TlsProtocol::Tls13,
            _ => TlsProtocol::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TlsProtocol::Tls12 => "TLS1.2",
            TlsProtocol::Tls13 => "TLS1.3",
            TlsProtocol::Unknown => "unknown",
        }
    }
}

/// Kind of credential the peer presented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CertificateType {
    X509,
    RawPublicKey,
    Unknown,
}

// ─── Certificate verification status ─────────────────────────────────

/// Advisory verification status bitmask reported by the provider.
///
/// Zero means the chain verified against the credential store. The bits
/// never abort the handshake on their own; they are handed to the
/// certificate validator as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateStatus(pub u32);

impl CertificateStatus {
    pub const INVALID: Self = Self(1 << 1);
    pub const REVOKED: Self = Self(1 << 5);
    pub const SIGNER_NOT_FOUND: Self = Self(1 << 6);
    pub const SIGNER_NOT_CA: Self = Self(1 << 7);
    pub const INSECURE_ALGORITHM: Self = Self(1 << 8);
    pub const NOT_ACTIVATED: Self = Self(1 << 9);
    pub const EXPIRED: Self = Self(1 << 10);
    pub const SIGNATURE_FAILURE: Self = Self(1 << 11);
    pub const REVOCATION_DATA_SUPERSEDED: Self = Self(1 << 12);
    pub const UNEXPECTED_OWNER: Self = Self(1 << 14);
    pub const REVOCATION_DATA_ISSUED_IN_FUTURE: Self = Self(1 << 15);
    pub const SIGNER_CONSTRAINTS_FAILURE: Self = Self(1 << 16);
    pub const MISMATCH: Self = Self(1 << 17);
    pub const PURPOSE_MISMATCH: Self = Self(1 << 18);
    pub const MISSING_OCSP_STATUS: Self = Self(1 << 19);
    pub const INVALID_OCSP_STATUS: Self = Self(1 << 20);
    pub const UNKNOWN_CRIT_EXTENSIONS: Self = Self(1 << 21);

    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::INVALID, "INVALID"),
        (Self::REVOKED, "REVOKED"),
        (Self::SIGNER_NOT_FOUND, "SIGNER_NOT_FOUND"),
        (Self::SIGNER_NOT_CA, "SIGNER_NOT_CA"),
        (Self::INSECURE_ALGORITHM, "INSECURE_ALGORITHM"),
        (Self::NOT_ACTIVATED, "NOT_ACTIVATED"),
        (Self::EXPIRED, "EXPIRED"),
        (Self::SIGNATURE_FAILURE, "SIGNATURE_FAILURE"),
        (Self::REVOCATION_DATA_SUPERSEDED, "REVOCATION_DATA_SUPERSEDED"),
        (Self::UNEXPECTED_OWNER, "UNEXPECTED_OWNER"),
        (
            Self::REVOCATION_DATA_ISSUED_IN_FUTURE,
            "REVOCATION_DATA_ISSUED_IN_FUTURE",
        ),
        (Self::SIGNER_CONSTRAINTS_FAILURE, "SIGNER_CONSTRAINTS_FAILURE"),
        (Self::MISMATCH, "MISMATCH"),
        (Self::PURPOSE_MISMATCH, "PURPOSE_MISMATCH"),
        (Self::MISSING_OCSP_STATUS, "MISSING_OCSP_STATUS"),
        (Self::INVALID_OCSP_STATUS, "INVALID_OCSP_STATUS"),
        (Self::UNKNOWN_CRIT_EXTENSIONS, "UNKNOWN_CRIT_EXTENSIONS"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Human-readable flag list, e.g. `"INVALID, SIGNER_NOT_FOUND"`.
    /// Empty for a clean status.
    pub fn describe(self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut parts: Vec<String> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| (*name).to_string())
            .collect();
        let known = Self::NAMES.iter().fold(0u32, |acc, (f, _)| acc | f.0);
        let unknown = self.0 & !known;
        if unknown != 0 {
            parts.push(format!("0x{:x}", unknown));
        }
        parts.join(", ")
    }
}

impl std::ops::BitOr for CertificateStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ─── Session flags ───────────────────────────────────────────────────

/// Provider-reported session property flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags(pub u32);

impl SessionFlags {
    pub const SAFE_RENEGOTIATION: Self = Self(1);
    pub const EXT_MASTER_SECRET: Self = Self(1 << 1);
    pub const ETM: Self = Self(1 << 2);
    pub const HB_LOCAL_SEND: Self = Self(1 << 3);
    pub const HB_PEER_SEND: Self = Self(1 << 4);
    pub const FALSE_START: Self = Self(1 << 5);
    pub const RFC7919: Self = Self(1 << 6);
    /// A resumption ticket has been received.
    pub const SESSION_TICKET: Self = Self(1 << 7);
    pub const POST_HANDSHAKE_AUTH: Self = Self(1 << 8);
    pub const EARLY_START: Self = Self(1 << 9);
    pub const EARLY_DATA: Self = Self(1 << 10);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

// ─── Handshake events ────────────────────────────────────────────────

/// Handshake message types observable through the handshake hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeMessage {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    EndOfEarlyData,
    EncryptedExtensions,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    CertificateStatus,
    Supplemental,
    KeyUpdate,
    CompressedCertificate,
    ChangeCipherSpec,
    ClientHelloV2,
    HelloRetryRequest,
}

impl HandshakeMessage {
    pub const ALL: [HandshakeMessage; 21] = [
        HandshakeMessage::HelloRequest,
        HandshakeMessage::ClientHello,
        HandshakeMessage::ServerHello,
        HandshakeMessage::HelloVerifyRequest,
        HandshakeMessage::NewSessionTicket,
        HandshakeMessage::EndOfEarlyData,
        HandshakeMessage::EncryptedExtensions,
        HandshakeMessage::Certificate,
        HandshakeMessage::ServerKeyExchange,
        HandshakeMessage::CertificateRequest,
        HandshakeMessage::ServerHelloDone,
        HandshakeMessage::CertificateVerify,
        HandshakeMessage::ClientKeyExchange,
        HandshakeMessage::Finished,
        HandshakeMessage::CertificateStatus,
        HandshakeMessage::Supplemental,
        HandshakeMessage::KeyUpdate,
        HandshakeMessage::CompressedCertificate,
        HandshakeMessage::ChangeCipherSpec,
        HandshakeMessage::ClientHelloV2,
        HandshakeMessage::HelloRetryRequest,
    ];

    /// Wire value of the handshake message type.
    pub fn wire_value(self) -> u16 {
        match self {
            HandshakeMessage::HelloRequest => 0,
            HandshakeMessage::ClientHello => 1,
            HandshakeMessage::ServerHello => 2,
            HandshakeMessage::HelloVerifyRequest => 3,
            HandshakeMessage::NewSessionTicket => 4,
            HandshakeMessage::EndOfEarlyData => 5,
            HandshakeMessage::EncryptedExtensions => 8,
            HandshakeMessage::Certificate => 11,
            HandshakeMessage::ServerKeyExchange => 12,
            HandshakeMessage::CertificateRequest => 13,
            HandshakeMessage::ServerHelloDone => 14,
            HandshakeMessage::CertificateVerify => 15,
            HandshakeMessage::ClientKeyExchange => 16,
            HandshakeMessage::Finished => 20,
            HandshakeMessage::CertificateStatus => 22,
            HandshakeMessage::Supplemental => 23,
            HandshakeMessage::KeyUpdate => 24,
            HandshakeMessage::CompressedCertificate => 25,
            HandshakeMessage::ChangeCipherSpec => 254,
            HandshakeMessage::ClientHelloV2 => 1024,
            HandshakeMessage::HelloRetryRequest => 1025,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.wire_value() == value)
    }
}

/// Whether the hook fired before or after the provider processed the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookPhase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One handshake-hook notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandshakeEvent {
    pub message: HandshakeMessage,
    pub phase: HookPhase,
    pub direction: Direction,
}

impl HandshakeEvent {
    pub fn new(message: HandshakeMessage, phase: HookPhase, direction: Direction) -> Self {
        Self {
            message,
            phase,
            direction,
        }
    }
}

impl fmt::Display for HandshakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Inbound => "IN",
            Direction::Outbound => "OUT",
        };
        let phase = match self.phase {
            HookPhase::Pre => "PRE",
            HookPhase::Post => "POST",
        };
        write!(f, "{} {} {:?}", dir, phase, self.message)
    }
}

// ─── Session state ───────────────────────────────────────────────────

/// Lifecycle of a single TLS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Handshaking,
    Established,
    Closed,
    /// Absorbing; only disposal is possible.
    Failed,
}

/// Snapshot of the negotiated facts of a session, handed to the validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub hostname: String,
    pub protocol: TlsProtocol,
    pub protocol_name: String,
    pub cipher_description: String,
    pub alpn: Option<String>,
    pub is_resumed: bool,
    pub max_record_size: usize,
    /// True for the control connection (no resumption parent).
    pub is_control: bool,
}
