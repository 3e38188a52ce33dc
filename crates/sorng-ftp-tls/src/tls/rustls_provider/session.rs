//! One rustls client connection driven over a blocking `TcpStream`.

use super::tickets::{ResumptionContext, TicketSink};
use super::verifier::{status_for, take_request_mark};
use super::{ConfigPlan, ResumptionMode, RustlsCredentials};
use crate::tls::broker::ResumptionBlob;
use crate::tls::classify::{alert_name, codes};
use crate::tls::credentials::CredentialStore;
use crate::tls::priority::PriorityDirectives;
use crate::tls::provider::{
    ClientCertificateSource, HandshakeHook, ProviderSession, SessionExport,
};
use crate::tls::types::{
    CertificateStatus, CertificateType, Direction, HandshakeMessage, HookPhase, SessionFlags,
};
use rustls::client::danger::ServerCertVerifier;
use rustls::client::{Resumption, Tls12Resumption};
use rustls::pki_types::{ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, HandshakeKind, ProtocolVersion};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_RECORD: usize = 16384;
const BYE_WAIT: Duration = Duration::from_millis(500);
const BYE_ROUNDS: usize = 16;

/// Failure raised while driving the connection.
enum Fault {
    Io(io::Error),
    Tls(rustls::Error),
}

impl From<io::Error> for Fault {
    fn from(e: io::Error) -> Self {
        // complete_io wraps protocol errors in InvalidData.
        let inner = e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .cloned();
        match inner {
            Some(tls) => Fault::Tls(tls),
            None => Fault::Io(e),
        }
    }
}

fn flush(conn: &mut ClientConnection, sock: &mut TcpStream) -> Result<(), Fault> {
    while conn.wants_write() {
        conn.write_tls(sock)?;
    }
    Ok(())
}

/// Bound the next socket operation by what is left until `deadline`.
fn arm(sock: &TcpStream, deadline: Option<Instant>) -> Result<(), Fault> {
    let Some(deadline) = deadline else {
        return Ok(());
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(Fault::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "handshake timeout exceeded",
        )));
    }
    sock.set_read_timeout(Some(remaining))?;
    sock.set_write_timeout(Some(remaining))?;
    Ok(())
}

/// Run the handshake one socket operation at a time, so a peer trickling
/// bytes cannot stretch it past `deadline`.
fn drive_handshake(
    conn: &mut ClientConnection,
    sock: &mut TcpStream,
    deadline: Option<Instant>,
) -> Result<(), Fault> {
    while conn.is_handshaking() {
        arm(sock, deadline)?;
        if conn.wants_write() {
            conn.write_tls(sock)?;
        } else if conn.wants_read() {
            if conn.read_tls(sock)? == 0 {
                return Err(Fault::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            if let Err(e) = conn.process_new_packets() {
                let _ = conn.write_tls(sock);
                return Err(Fault::Tls(e));
            }
        } else {
            return Err(Fault::Io(io::Error::new(
                io::ErrorKind::Other,
                "handshake stalled",
            )));
        }
    }
    while conn.wants_write() {
        arm(sock, deadline)?;
        conn.write_tls(sock)?;
    }
    Ok(())
}

fn recv(conn: &mut ClientConnection, sock: &mut TcpStream, buf: &mut [u8]) -> Result<usize, Fault> {
    loop {
        match conn.reader().read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Fault::Io(e)),
        }
        conn.read_tls(sock)?;
        if let Err(e) = conn.process_new_packets() {
            let _ = conn.write_tls(sock);
            return Err(Fault::Tls(e));
        }
    }
}

fn send(conn: &mut ClientConnection, sock: &mut TcpStream, buf: &[u8]) -> Result<usize, Fault> {
    flush(conn, sock)?;
    let n = conn.writer().write(buf)?;
    // Once plaintext is accepted it must be reported as sent; leftover
    // ciphertext goes out with the next call.
    match flush(conn, sock) {
        Err(Fault::Io(e))
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) =>
        {
            Ok(n)
        }
        other => other.map(|()| n),
    }
}

/// Read until the peer's close-notify, EOF or an error.
fn await_close_notify(conn: &mut ClientConnection, sock: &mut TcpStream) {
    let mut scratch = [0u8; 4096];
    for _ in 0..BYE_ROUNDS {
        match conn.reader().read(&mut scratch) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => return,
        }
        match conn.read_tls(sock) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if conn.process_new_packets().is_err() {
            return;
        }
    }
}

pub struct RustlsSession {
    credentials: Option<CredentialStore>,
    directives: PriorityDirectives,
    server_name: Option<ServerName<'static>>,
    alpn: Vec<Vec<u8>>,
    socket: Option<TcpStream>,
    handshake_timeout: Option<Duration>,
    hook: Option<Arc<dyn HandshakeHook>>,
    client_source: Option<Arc<dyn ClientCertificateSource>>,
    /// Group context imported from a parent session.
    imported: Option<Arc<ResumptionContext>>,
    sink: Option<Arc<TicketSink>>,
    conn: Option<ClientConnection>,
    deadline: Option<Instant>,
    certificate_requested: bool,
    established: bool,
    /// Set after a fatal alert or protocol error; every later call fails.
    invalid: bool,
    last_alert: Option<String>,
    last_error: Option<String>,
}

impl RustlsSession {
    pub fn new() -> Self {
        Self {
            credentials: None,
            directives: PriorityDirectives::default(),
            server_name: None,
            alpn: Vec::new(),
            socket: None,
            handshake_timeout: None,
            hook: None,
            client_source: None,
            imported: None,
            sink: None,
            conn: None,
            deadline: None,
            certificate_requested: false,
            established: false,
            invalid: false,
            last_alert: None,
            last_error: None,
        }
    }

    fn rustls_credentials(&self) -> Option<&RustlsCredentials> {
        self.credentials
            .as_ref()
            .and_then(|c| c.downcast_ref::<RustlsCredentials>())
    }

    fn build_connection(&mut self) -> Result<(), i32> {
        let base = self
            .rustls_credentials()
            .map(|c| c.crypto().clone())
            .ok_or(codes::INSUFFICIENT_CREDENTIALS)?;
        let server_name = self.server_name.clone().ok_or(codes::INVALID_REQUEST)?;
        let plan = ConfigPlan::from_directives(&self.directives, &base.cipher_suites)?;
        for token in &plan.not_applicable {
            log::debug!("rustls session: priority token {} not applicable", token);
        }

        let mut crypto = (*base).clone();
        crypto.cipher_suites = plan.suites.clone();
        let crypto = Arc::new(crypto);
        let context = match self.imported.take() {
            Some(context) if context.accepts(&self.client_source) => context,
            Some(_) => {
                log::debug!("rustls session: client certificate source differs from the parent's, not resuming");
                Arc::new(ResumptionContext::new(crypto.clone(), self.client_source.clone()))
            }
            None => Arc::new(ResumptionContext::new(crypto.clone(), self.client_source.clone())),
        };
        let sink = Arc::new(TicketSink::new(context.clone(), self.hook.clone()));

        let mut config = ClientConfig::builder_with_provider(crypto.clone())
            .with_protocol_versions(&plan.versions)
            .map_err(|e| {
                self.last_error = Some(e.to_string());
                codes::NO_CIPHER_SUITES
            })?
            .dangerous()
            .with_custom_certificate_verifier(context.verifier.clone())
            .with_client_cert_resolver(context.resolver.clone());
        config.alpn_protocols = self.alpn.clone();
        config.resumption = match plan.resumption {
            ResumptionMode::Tickets => Resumption::store(sink.clone()),
            ResumptionMode::SessionIdOnlyTls12 => {
                Resumption::store(sink.clone()).tls12_resumption(Tls12Resumption::SessionIdOnly)
            }
            ResumptionMode::Disabled => Resumption::disabled(),
        };

        let conn = ClientConnection::new(Arc::new(config), server_name).map_err(|e| {
            self.last_error = Some(e.to_string());
            codes::INTERNAL_ERROR
        })?;
        self.conn = Some(conn);
        self.sink = Some(sink);
        Ok(())
    }

    fn fire(&self, message: HandshakeMessage, direction: Direction) {
        if let Some(sink) = &self.sink {
            sink.fire(message, HookPhase::Pre, direction);
            sink.fire(message, HookPhase::Post, direction);
        }
    }

    fn fault_code(&mut self, fault: Fault, timed: bool) -> i32 {
        match fault {
            Fault::Tls(e) => {
                self.last_error = Some(e.to_string());
                self.invalid = true;
                match e {
                    rustls::Error::AlertReceived(desc) => {
                        self.last_alert = Some(alert_name(u8::from(desc)).to_string());
                        codes::FATAL_ALERT_RECEIVED
                    }
                    rustls::Error::InvalidCertificate(_) => codes::CERTIFICATE_ERROR,
                    rustls::Error::DecryptError => codes::DECRYPTION_FAILED,
                    rustls::Error::InvalidMessage(_) => codes::UNEXPECTED_PACKET,
                    _ => codes::INTERNAL_ERROR,
                }
            }
            Fault::Io(e) => {
                let code = match e.kind() {
                    io::ErrorKind::TimedOut => codes::TIMEDOUT,
                    io::ErrorKind::WouldBlock if timed => codes::TIMEDOUT,
                    io::ErrorKind::WouldBlock => codes::AGAIN,
                    io::ErrorKind::Interrupted => codes::INTERRUPTED,
                    io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe => codes::PREMATURE_TERMINATION,
                    _ => codes::PULL_ERROR,
                };
                self.last_error = Some(e.to_string());
                code
            }
        }
    }

    /// Whether the caller put a read (or write) deadline on the socket.
    fn socket_deadline(&self, write: bool) -> bool {
        self.socket.as_ref().map_or(false, |sock| {
            let timeout = if write {
                sock.write_timeout()
            } else {
                sock.read_timeout()
            };
            matches!(timeout, Ok(Some(_)))
        })
    }

    fn parts(&mut self) -> Option<(&mut ClientConnection, &mut TcpStream)> {
        match (self.conn.as_mut(), self.socket.as_mut()) {
            (Some(c), Some(s)) => Some((c, s)),
            _ => None,
        }
    }
}

impl Default for RustlsSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionExport for RustlsSession {
    fn export_session(&self) -> Result<ResumptionBlob, i32> {
        if !self.established {
            return Err(codes::INVALID_REQUEST);
        }
        match &self.sink {
            Some(sink) => sink.export_session(),
            None => Err(codes::REQUESTED_DATA_NOT_AVAILABLE),
        }
    }

    fn session_flags(&self) -> SessionFlags {
        self.sink
            .as_ref()
            .map(|s| s.session_flags())
            .unwrap_or_default()
    }
}

impl ProviderSession for RustlsSession {
    fn set_cache_expiration(&mut self, seconds: u32) -> i32 {
        // Ticket lifetime is server-controlled under rustls.
        log::trace!("rustls session: cache expiration {}s", seconds);
        codes::SUCCESS
    }

    fn set_default_priority(&mut self) -> i32 {
        self.directives = PriorityDirectives::default();
        codes::SUCCESS
    }

    fn set_priority_append(&mut self, delta: &str) -> i32 {
        let mut directives = PriorityDirectives::default();
        match directives.append(delta) {
            Ok(()) => {
                self.directives = directives;
                codes::SUCCESS
            }
            Err(e) => {
                self.last_error = Some(e.message);
                codes::INVALID_REQUEST
            }
        }
    }

    fn set_priority_direct(&mut self, priority: &str) -> i32 {
        match PriorityDirectives::parse(priority) {
            Ok(directives) => {
                self.directives = directives;
                codes::SUCCESS
            }
            Err(e) => {
                self.last_error = Some(e.message);
                codes::INVALID_REQUEST
            }
        }
    }

    fn set_dh_prime_bits(&mut self, bits: u32) {
        // rustls offers no finite-field DH suites.
        log::trace!("rustls session: DH prime floor {} bits ignored", bits);
    }

    fn bind_credentials(&mut self, credentials: &CredentialStore) -> i32 {
        if credentials.downcast_ref::<RustlsCredentials>().is_none() {
            return codes::INSUFFICIENT_CREDENTIALS;
        }
        self.credentials = Some(credentials.clone());
        codes::SUCCESS
    }

    fn set_server_name(&mut self, hostname: &str) -> i32 {
        match ServerName::try_from(hostname.to_string()) {
            Ok(name) => {
                self.server_name = Some(name);
                codes::SUCCESS
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                codes::INVALID_REQUEST
            }
        }
    }

    fn set_alpn_protocols(&mut self, protocols: &[&str]) -> i32 {
        self.alpn = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        codes::SUCCESS
    }

    fn bind_transport(&mut self, socket: TcpStream) {
        self.socket = Some(socket);
    }

    fn set_handshake_timeout(&mut self, timeout: Option<Duration>) {
        self.handshake_timeout = timeout;
    }

    fn set_handshake_hook(&mut self, hook: Arc<dyn HandshakeHook>) {
        self.hook = Some(hook);
    }

    fn set_client_certificate_source(
        &mut self,
        source: Option<Arc<dyn ClientCertificateSource>>,
    ) -> i32 {
        self.client_source = source;
        codes::SUCCESS
    }

    fn import_session(&mut self, blob: &ResumptionBlob) -> i32 {
        if self.conn.is_some() {
            return codes::INVALID_REQUEST;
        }
        match blob.handle::<ResumptionContext>() {
            Some(context) => {
                self.imported = Some(context);
                codes::SUCCESS
            }
            None => codes::INVALID_REQUEST,
        }
    }

    fn handshake(&mut self) -> i32 {
        if self.invalid {
            return codes::INVALID_SESSION;
        }
        if self.established {
            return codes::SUCCESS;
        }
        if self.socket.is_none() {
            return codes::INVALID_REQUEST;
        }
        if self.conn.is_none() {
            if let Err(rc) = self.build_connection() {
                return rc;
            }
            take_request_mark();
            self.deadline = self.handshake_timeout.and_then(|t| Instant::now().checked_add(t));
            self.fire(HandshakeMessage::ClientHello, Direction::Outbound);
        }

        // The deadline spans every call of the retry loop.
        let deadline = self.deadline;
        let result = match self.parts() {
            Some((conn, sock)) => {
                let saved = (
                    sock.read_timeout().ok().flatten(),
                    sock.write_timeout().ok().flatten(),
                );
                let result = drive_handshake(conn, sock, deadline);
                if deadline.is_some() {
                    let _ = sock.set_read_timeout(saved.0);
                    let _ = sock.set_write_timeout(saved.1);
                }
                result
            }
            None => return codes::INVALID_REQUEST,
        };
        self.certificate_requested |= take_request_mark();

        match result {
            Ok(()) => {
                self.established = true;
                self.fire(HandshakeMessage::Finished, Direction::Inbound);
                codes::SUCCESS
            }
            Err(fault) => self.fault_code(fault, deadline.is_some()),
        }
    }

    fn record_recv(&mut self, buf: &mut [u8]) -> isize {
        if self.invalid {
            return codes::INVALID_SESSION as isize;
        }
        let timed = self.socket_deadline(false);
        let result = match self.parts() {
            Some((conn, sock)) => recv(conn, sock, buf),
            None => return codes::INVALID_REQUEST as isize,
        };
        match result {
            Ok(n) => n as isize,
            Err(fault) => self.fault_code(fault, timed) as isize,
        }
    }

    fn record_send(&mut self, buf: &[u8]) -> isize {
        if self.invalid {
            return codes::INVALID_SESSION as isize;
        }
        let timed = self.socket_deadline(true);
        let result = match self.parts() {
            Some((conn, sock)) => send(conn, sock, buf),
            None => return codes::INVALID_REQUEST as isize,
        };
        match result {
            Ok(n) => n as isize,
            Err(Fault::Io(e)) if !matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ) =>
            {
                self.last_error = Some(e.to_string());
                codes::PUSH_ERROR as isize
            }
            Err(fault) => self.fault_code(fault, timed) as isize,
        }
    }

    fn record_check_pending(&mut self) -> usize {
        match self.conn.as_mut().map(|c| c.process_new_packets()) {
            Some(Ok(state)) => state.plaintext_bytes_to_read(),
            _ => 0,
        }
    }

    fn bye(&mut self) -> i32 {
        if self.invalid {
            return codes::INVALID_SESSION;
        }
        let Some((conn, sock)) = self.parts() else {
            return codes::SUCCESS;
        };
        conn.send_close_notify();
        if let Err(fault) = flush(conn, sock) {
            return self.fault_code(fault, false);
        }
        let saved = sock.read_timeout().ok().flatten();
        let _ = sock.set_read_timeout(Some(BYE_WAIT));
        await_close_notify(conn, sock);
        let _ = sock.set_read_timeout(saved);
        codes::SUCCESS
    }

    fn is_resumed(&self) -> bool {
        self.conn
            .as_ref()
            .and_then(|c| c.handshake_kind())
            .map_or(false, |k| k == HandshakeKind::Resumed)
    }

    fn protocol_name(&self) -> Option<String> {
        let version = self.conn.as_ref()?.protocol_version()?;
        Some(match version {
            ProtocolVersion::TLSv1_2 => "TLS1.2".to_string(),
            ProtocolVersion::TLSv1_3 => "TLS1.3".to_string(),
            other => format!("{:?}", other),
        })
    }

    fn session_description(&self) -> String {
        let Some(conn) = self.conn.as_ref() else {
            return String::new();
        };
        let mut parts = vec![self.protocol_name().unwrap_or_else(|| "UNKNOWN".to_string())];
        if let Some(group) = conn.negotiated_key_exchange_group() {
            parts.push(format!("{:?}", group.name()));
        }
        if let Some(suite) = conn.negotiated_cipher_suite() {
            parts.push(format!("{:?}", suite.suite()));
        }
        parts
            .iter()
            .map(|p| format!("({})", p))
            .collect::<Vec<_>>()
            .join("-")
    }

    fn alpn_selected(&self) -> Option<String> {
        self.conn
            .as_ref()?
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }

    fn max_record_size(&self) -> usize {
        MAX_RECORD
    }

    fn last_alert(&self) -> Option<String> {
        self.last_alert.clone()
    }

    fn last_error_detail(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn client_certificate_requested(&self) -> bool {
        self.certificate_requested
    }

    fn verify_peers(&self, hostname: &str) -> Result<CertificateStatus, i32> {
        let certs = match self.conn.as_ref().and_then(|c| c.peer_certificates()) {
            Some(certs) if !certs.is_empty() => certs,
            // A resumed peer proved the secret of an earlier, verified session.
            _ if self.is_resumed() => return Ok(CertificateStatus::empty()),
            _ => return Ok(CertificateStatus::INVALID),
        };
        let verifier = match self.rustls_credentials().and_then(|c| c.verifier()) {
            Some(v) => v,
            None => return Ok(CertificateStatus::INVALID | CertificateStatus::SIGNER_NOT_FOUND),
        };
        let name = ServerName::try_from(hostname.to_string()).map_err(|_| codes::INVALID_REQUEST)?;
        match verifier.verify_server_cert(&certs[0], &certs[1..], &name, &[], UnixTime::now()) {
            Ok(_) => Ok(CertificateStatus::empty()),
            Err(e) => {
                log::debug!("rustls session: peer verification for {}: {}", hostname, e);
                Ok(status_for(&e))
            }
        }
    }

    fn peer_certificate_type(&self) -> CertificateType {
        match self.conn.as_ref().and_then(|c| c.peer_certificates()) {
            Some(certs) if !certs.is_empty() => CertificateType::X509,
            _ => CertificateType::Unknown,
        }
    }

    fn peer_certificates(&self) -> Vec<Vec<u8>> {
        self.conn
            .as_ref()
            .and_then(|c| c.peer_certificates())
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default()
    }
}
