//! # sorng-ftp-tls: FTPS TLS session transport
//!
//! Secures FTP control and data sockets with a pluggable TLS provider:
//! - **Lifecycle**: the provider is initialised with the first session and
//!   torn down with the last one
//! - **Resumption**: data connections resume the control connection's
//!   session, including tickets that arrive after the handshake
//! - **Record I/O**: bounded reads and writes with transient-error retries
//! - **Certificates**: peer certificates and a status bitmask are handed to
//!   an application validator
//!
//! ```no_run
//! use sorng_ftp_tls::{FtpTlsConfig, FtpTlsConnector, RequireVerified, RustlsProvider, TlsEngine};
//! use std::net::TcpStream;
//! use std::sync::Arc;
//!
//! let engine = TlsEngine::new(
//!     Arc::new(RustlsProvider::new()),
//!     RustlsProvider::VERSION,
//!     FtpTlsConfig::default(),
//! );
//! let connector = FtpTlsConnector::new(engine, Arc::new(RequireVerified));
//! let socket = TcpStream::connect("ftp.example.com:21")?;
//! // ... AUTH TLS exchanged in clear text ...
//! let control = connector.connect_control("ftp.example.com", &socket)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod tls;

// Re-exports for crate consumers
pub use tls::broker::{GroupId, ResumptionScope};
pub use tls::certificate::{validator_fn, CertificateValidator, RequireVerified};
pub use tls::config::FtpTlsConfig;
pub use tls::error::{FtpTlsError, TlsErrorKind, TlsResult};
pub use tls::logging::LogCategories;
pub use tls::priority::{AdvancedOption, SecurityOption, SecurityProfile, SecuritySuite};
pub use tls::provider::{ClientCertificateSource, ClientIdentity, TlsProvider};
pub use tls::rustls_provider::RustlsProvider;
pub use tls::session::{SessionConfig, TlsEngine, TlsSession};
pub use tls::stream::{FtpTlsConnector, FtpTlsStream};
pub use tls::types::*;
