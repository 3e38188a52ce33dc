//! FTP-facing entry points.
//!
//! [`FtpTlsConnector`] secures the control socket after `AUTH TLS` and each
//! data socket after `PASV`/`PORT`, resuming the data sessions from the
//! control session. [`FtpTlsStream`] is the byte stream an FTP client reads
//! and writes.

use crate::tls::certificate::CertificateValidator;
use crate::tls::error::TlsResult;
use crate::tls::provider::ClientCertificateSource;
use crate::tls::session::{SessionConfig, TlsEngine, TlsSession};
use crate::tls::types::{SessionInfo, TlsProtocol};
use std::io;
use std::net::TcpStream;
use std::sync::Arc;

pub const CONTROL_ALPN: &str = "ftp";
pub const DATA_ALPN: &str = "ftp-data";

pub struct FtpTlsConnector {
    engine: Arc<TlsEngine>,
    validator: Arc<dyn CertificateValidator>,
    client_certificates: Option<Arc<dyn ClientCertificateSource>>,
}

impl FtpTlsConnector {
    pub fn new(engine: Arc<TlsEngine>, validator: Arc<dyn CertificateValidator>) -> Self {
        Self {
            engine,
            validator,
            client_certificates: None,
        }
    }

    pub fn with_client_certificates(mut self, source: Arc<dyn ClientCertificateSource>) -> Self {
        self.client_certificates = Some(source);
        self
    }

    pub fn engine(&self) -> &Arc<TlsEngine> {
        &self.engine
    }

    fn base<'p>(&self, host: &str, socket: &'p TcpStream, alpn: &str) -> SessionConfig<'p> {
        let mut cfg = SessionConfig::new(self.engine.config(), host, socket, self.validator.clone())
            .with_alpn(alpn);
        if let Some(source) = &self.client_certificates {
            cfg = cfg.with_client_certificates(source.clone());
        }
        cfg
    }

    /// Secure the control connection.
    pub fn connect_control(&self, host: &str, socket: &TcpStream) -> TlsResult<FtpTlsStream> {
        let session = TlsSession::establish(&self.engine, self.base(host, socket, CONTROL_ALPN))?;
        log::info!(
            "FTPS control connection to {} secured ({})",
            host,
            session.cipher_description()
        );
        Ok(FtpTlsStream { session })
    }

    /// Secure a data connection, resuming from `control`.
    pub fn connect_data(
        &self,
        host: &str,
        socket: &TcpStream,
        control: &FtpTlsStream,
    ) -> TlsResult<FtpTlsStream> {
        let cfg = self
            .base(host, socket, DATA_ALPN)
            .with_parent(&control.session);
        let session = TlsSession::establish(&self.engine, cfg)?;
        log::debug!(
            "FTPS data connection to {} secured, resumed: {}",
            host,
            session.is_resumed()
        );
        Ok(FtpTlsStream { session })
    }
}

pub struct FtpTlsStream {
    session: TlsSession,
}

impl FtpTlsStream {
    pub fn protocol(&self) -> TlsProtocol {
        self.session.protocol()
    }

    /// Full cipher description as reported by the provider.
    pub fn cipher_suite(&self) -> &str {
        self.session.cipher_description()
    }

    pub fn can_read(&self) -> bool {
        self.session.is_session_ok()
    }

    pub fn can_write(&self) -> bool {
        self.session.is_session_ok()
    }

    pub fn is_resumed(&self) -> bool {
        self.session.is_resumed()
    }

    pub fn info(&self) -> &SessionInfo {
        self.session.info()
    }

    pub fn session(&self) -> &TlsSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TlsSession {
        &mut self.session
    }

    pub fn dispose(&mut self) {
        self.session.dispose();
    }
}

impl io::Read for FtpTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.session, buf)
    }
}

impl io::Write for FtpTlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.session, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.session)
    }
}
