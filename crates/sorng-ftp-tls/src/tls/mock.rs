//! Scripted provider for unit tests.

use crate::tls::broker::ResumptionBlob;
use crate::tls::classify::{alert_name, codes, ErrorClassifier, StandardClassifier};
use crate::tls::credentials::CredentialStore;
use crate::tls::priority::PriorityDirectives;
use crate::tls::provider::{
    ClientCertificateSource, HandshakeHook, ProviderCredentials, ProviderSession, SessionExport,
    TlsProvider,
};
use crate::tls::types::{
    CertificateStatus, CertificateType, Direction, HandshakeEvent, HandshakeMessage, HookPhase,
    SessionFlags,
};
use std::any::Any;
use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour every new mock session starts with.
#[derive(Clone)]
pub struct MockScript {
    pub handshake: Vec<i32>,
    pub recv: Vec<i32>,
    pub send: Vec<i32>,
    pub bye: Vec<i32>,
    pub protocol: &'static str,
    pub max_record: usize,
    pub echo: bool,
    pub send_limit: Option<usize>,
    /// Ticket delivered (through the hook) when the handshake completes.
    pub ticket: Option<Vec<u8>>,
    /// Whether an imported blob leads to a resumed handshake.
    pub accept_resumption: bool,
    pub alpn_echo: bool,
    pub cert_type: CertificateType,
    pub status: CertificateStatus,
    pub peer_certs: Vec<Vec<u8>>,
    pub client_cert_requested: bool,
    /// Plaintext already buffered right after the handshake.
    pub pending_after_handshake: Vec<u8>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            handshake: Vec::new(),
            recv: Vec::new(),
            send: Vec::new(),
            bye: Vec::new(),
            protocol: "TLS1.3",
            max_record: 16384,
            echo: true,
            send_limit: None,
            ticket: None,
            accept_resumption: true,
            alpn_echo: true,
            cert_type: CertificateType::X509,
            status: CertificateStatus::empty(),
            peer_certs: Vec::new(),
            client_cert_requested: false,
            pending_after_handshake: Vec::new(),
        }
    }
}

struct MockCredentials;

impl ProviderCredentials for MockCredentials {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockProvider {
    version: String,
    inits: AtomicUsize,
    deinits: AtomicUsize,
    init_result: AtomicI32,
    template: Mutex<MockScript>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    pub const VERSION: &'static str = "mock-1.0";

    pub fn new() -> Self {
        Self {
            version: Self::VERSION.to_string(),
            inits: AtomicUsize::new(0),
            deinits: AtomicUsize::new(0),
            init_result: AtomicI32::new(0),
            template: Mutex::new(MockScript::default()),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn deinit_count(&self) -> usize {
        self.deinits.load(Ordering::SeqCst)
    }

    pub fn fail_global_init(&self, code: i32) {
        self.init_result.store(code, Ordering::SeqCst);
    }

    /// Adjust the script used by sessions created from now on.
    pub fn script(&self, f: impl FnOnce(&mut MockScript)) {
        f(&mut self.template.lock().unwrap());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }
}

impl TlsProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn global_init(&self) -> i32 {
        let rc = self.init_result.load(Ordering::SeqCst);
        if rc == 0 {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }
        rc
    }

    fn global_deinit(&self) {
        self.deinits.fetch_add(1, Ordering::SeqCst);
    }

    fn allocate_credentials(&self) -> Result<Arc<dyn ProviderCredentials>, i32> {
        Ok(Arc::new(MockCredentials))
    }

    fn new_session(&self) -> Result<Box<dyn ProviderSession>, i32> {
        let script = self.template.lock().unwrap().clone();
        Ok(Box::new(MockSession::new(script, self.journal.clone())))
    }

    fn classifier(&self) -> &dyn ErrorClassifier {
        &StandardClassifier
    }
}

pub struct MockSession {
    script: MockScript,
    handshake_q: VecDeque<i32>,
    recv_q: VecDeque<i32>,
    send_q: VecDeque<i32>,
    bye_q: VecDeque<i32>,
    journal: Arc<Mutex<Vec<String>>>,
    inbound: VecDeque<u8>,
    sent: Vec<u8>,
    imported: Option<Vec<u8>>,
    ticket: Option<Vec<u8>>,
    hook: Option<Arc<dyn HandshakeHook>>,
    flags: SessionFlags,
    established: bool,
    resumed: bool,
    alpn: Vec<String>,
    alert: Option<String>,
    transport: Option<TcpStream>,
    recv_calls: usize,
    send_calls: usize,
    max_send_len: usize,
}

impl MockSession {
    fn new(script: MockScript, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            handshake_q: script.handshake.iter().copied().collect(),
            recv_q: script.recv.iter().copied().collect(),
            send_q: script.send.iter().copied().collect(),
            bye_q: script.bye.iter().copied().collect(),
            script,
            journal,
            inbound: VecDeque::new(),
            sent: Vec::new(),
            imported: None,
            ticket: None,
            hook: None,
            flags: SessionFlags::default(),
            established: false,
            resumed: false,
            alpn: Vec::new(),
            alert: None,
            transport: None,
            recv_calls: 0,
            send_calls: 0,
            max_send_len: 0,
        }
    }

    /// A session outside any provider, with a non-echoing default script.
    pub fn standalone() -> Self {
        Self::new(
            MockScript {
                echo: false,
                ..MockScript::default()
            },
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    fn note(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    fn fire(&self, message: HandshakeMessage, direction: Direction) {
        if let Some(hook) = self.hook.clone() {
            for phase in [HookPhase::Pre, HookPhase::Post] {
                hook.on_message(HandshakeEvent::new(message, phase, direction), self);
            }
        }
    }

    pub fn push_inbound(&mut self, data: &[u8]) {
        self.inbound.extend(data.iter().copied());
    }

    pub fn script_recv(&mut self, codes: &[i32]) {
        self.recv_q.extend(codes.iter().copied());
    }

    pub fn script_send(&mut self, codes: &[i32]) {
        self.send_q.extend(codes.iter().copied());
    }

    pub fn set_alert(&mut self, name: &str) {
        self.alert = Some(name.to_string());
    }

    pub fn set_send_limit(&mut self, limit: Option<usize>) {
        self.script.send_limit = limit;
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.script.echo = echo;
    }

    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    pub fn imported(&self) -> Option<Vec<u8>> {
        self.imported.clone()
    }

    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls
    }

    pub fn max_send_len(&self) -> usize {
        self.max_send_len
    }
}

impl SessionExport for MockSession {
    fn export_session(&self) -> Result<ResumptionBlob, i32> {
        if !self.established {
            return Err(codes::INVALID_REQUEST);
        }
        let data = self
            .ticket
            .clone()
            .unwrap_or_else(|| b"mock-session".to_vec());
        Ok(ResumptionBlob::from_bytes(data))
    }

    fn session_flags(&self) -> SessionFlags {
        self.flags
    }
}

impl ProviderSession for MockSession {
    fn set_cache_expiration(&mut self, seconds: u32) -> i32 {
        self.note(format!("cache_expiration {}", seconds));
        0
    }

    fn set_default_priority(&mut self) -> i32 {
        self.note("priority default");
        0
    }

    fn set_priority_append(&mut self, delta: &str) -> i32 {
        self.note(format!("priority append {}", delta));
        match PriorityDirectives::default().append(delta) {
            Ok(()) => 0,
            Err(_) => codes::INVALID_REQUEST,
        }
    }

    fn set_priority_direct(&mut self, priority: &str) -> i32 {
        self.note(format!("priority direct {}", priority));
        match PriorityDirectives::parse(priority) {
            Ok(_) => 0,
            Err(_) => codes::INVALID_REQUEST,
        }
    }

    fn set_dh_prime_bits(&mut self, bits: u32) {
        self.note(format!("dh_prime_bits {}", bits));
    }

    fn bind_credentials(&mut self, credentials: &CredentialStore) -> i32 {
        if credentials.downcast_ref::<MockCredentials>().is_none() {
            return codes::INSUFFICIENT_CREDENTIALS;
        }
        self.note("credentials");
        0
    }

    fn set_server_name(&mut self, hostname: &str) -> i32 {
        self.note(format!("server_name {}", hostname));
        0
    }

    fn set_alpn_protocols(&mut self, protocols: &[&str]) -> i32 {
        self.note(format!("alpn {}", protocols.join(",")));
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        0
    }

    fn bind_transport(&mut self, socket: TcpStream) {
        self.note("transport");
        self.transport = Some(socket);
    }

    fn set_handshake_timeout(&mut self, timeout: Option<Duration>) {
        self.note(format!("handshake_timeout {:?}", timeout.map(|d| d.as_millis())));
    }

    fn set_handshake_hook(&mut self, hook: Arc<dyn HandshakeHook>) {
        self.note("hook");
        self.hook = Some(hook);
    }

    fn set_client_certificate_source(
        &mut self,
        source: Option<Arc<dyn ClientCertificateSource>>,
    ) -> i32 {
        self.note(format!("client_certificates {}", source.is_some()));
        0
    }

    fn import_session(&mut self, blob: &ResumptionBlob) -> i32 {
        if self.established {
            return codes::INVALID_REQUEST;
        }
        match blob.as_bytes() {
            Some(bytes) => {
                self.note(format!("import {}", String::from_utf8_lossy(bytes)));
                self.imported = Some(bytes.to_vec());
                0
            }
            None => codes::INVALID_REQUEST,
        }
    }

    fn handshake(&mut self) -> i32 {
        if let Some(rc) = self.handshake_q.pop_front() {
            self.note(format!("handshake {}", rc));
            if rc < 0 {
                return rc;
            }
        }
        self.note("handshake done");
        self.fire(HandshakeMessage::ClientHello, Direction::Outbound);
        self.fire(HandshakeMessage::ServerHello, Direction::Inbound);
        self.fire(HandshakeMessage::Finished, Direction::Inbound);
        self.established = true;
        self.resumed = self.imported.is_some() && self.script.accept_resumption;
        self.inbound
            .extend(self.script.pending_after_handshake.iter().copied());
        if let Some(ticket) = self.script.ticket.clone() {
            self.ticket = Some(ticket);
            self.flags.insert(SessionFlags::SESSION_TICKET);
            self.fire(HandshakeMessage::NewSessionTicket, Direction::Inbound);
        }
        0
    }

    fn record_recv(&mut self, buf: &mut [u8]) -> isize {
        self.recv_calls += 1;
        if let Some(rc) = self.recv_q.pop_front() {
            if rc < 0 {
                return rc as isize;
            }
        }
        let n = buf.len().min(self.inbound.len());
        for slot in buf.iter_mut().take(n) {
            if let Some(b) = self.inbound.pop_front() {
                *slot = b;
            }
        }
        n as isize
    }

    fn record_send(&mut self, buf: &[u8]) -> isize {
        self.send_calls += 1;
        self.max_send_len = self.max_send_len.max(buf.len());
        if let Some(rc) = self.send_q.pop_front() {
            if rc <= 0 {
                return rc as isize;
            }
        }
        let n = match self.script.send_limit {
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        self.sent.extend_from_slice(&buf[..n]);
        if self.script.echo {
            self.inbound.extend(buf[..n].iter().copied());
        }
        n as isize
    }

    fn record_check_pending(&mut self) -> usize {
        self.inbound.len()
    }

    fn bye(&mut self) -> i32 {
        let rc = self.bye_q.pop_front().unwrap_or(0);
        self.note(format!("bye {}", rc));
        rc
    }

    fn is_resumed(&self) -> bool {
        self.resumed
    }

    fn protocol_name(&self) -> Option<String> {
        Some(self.script.protocol.to_string())
    }

    fn session_description(&self) -> String {
        format!("({})-(MOCK)-(AES-256-GCM)", self.script.protocol)
    }

    fn alpn_selected(&self) -> Option<String> {
        if self.script.alpn_echo {
            self.alpn.first().cloned()
        } else {
            None
        }
    }

    fn max_record_size(&self) -> usize {
        self.script.max_record
    }

    fn last_alert(&self) -> Option<String> {
        self.alert.clone().or_else(|| Some(alert_name(0).to_string()))
    }

    fn last_error_detail(&self) -> Option<String> {
        None
    }

    fn client_certificate_requested(&self) -> bool {
        self.script.client_cert_requested
    }

    fn verify_peers(&self, _hostname: &str) -> Result<CertificateStatus, i32> {
        Ok(self.script.status)
    }

    fn peer_certificate_type(&self) -> CertificateType {
        self.script.cert_type
    }

    fn peer_certificates(&self) -> Vec<Vec<u8>> {
        self.script.peer_certs.clone()
    }
}
