//! TLS sessions and the engine that creates them.
//!
//! A [`TlsSession`] owns one provider handshake context bound to one TCP
//! socket. Construction runs the whole setup:
//!
//! 1. acquire the provider (first session: version check + global init)
//! 2. configure the context (cache, priority, DH floor, credentials, server
//!    name, ALPN, transport, timeout, hook, client certificates)
//! 3. resume from the parent, if any
//! 4. handshake with Nagle disabled, retrying transient results
//! 5. record the negotiated facts and run the certificate bridge
//!
//! Any failure leaves the session `Failed`; dropping it releases the
//! provider. `dispose` is idempotent and runs from `Drop`.

use crate::tls::broker::{GroupId, ResumeOutcome, ResumptionBroker};
use crate::tls::certificate::{CertificateBridge, CertificateValidator, PeerCredentials};
use crate::tls::channel::RecordChannel;
use crate::tls::classify::{Classification, ErrorClassifier};
use crate::tls::config::FtpTlsConfig;
use crate::tls::credentials::CredentialStore;
use crate::tls::error::{FtpTlsError, TlsErrorKind, TlsResult};
use crate::tls::hook::HookDispatcher;
use crate::tls::lifecycle::SessionLifecycleManager;
use crate::tls::logging::{LogCategories, TlsLog};
use crate::tls::provider::{ClientCertificateSource, ProviderSession, TlsProvider};
use crate::tls::types::{SessionInfo, SessionState, TlsProtocol};
use rustls::pki_types::CertificateDer;
use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

const CACHE_EXPIRATION_SECS: u32 = 100_000_000;
const DH_PRIME_BITS: u32 = 1024;
const DEFAULT_MAX_RECORD: usize = 8192;

// ─── Engine ──────────────────────────────────────────────────────────

/// Shared state behind every session of one provider: lifecycle,
/// resumption slots, log backlog, configuration.
pub struct TlsEngine {
    lifecycle: SessionLifecycleManager,
    broker: Arc<ResumptionBroker>,
    log: Arc<TlsLog>,
    config: FtpTlsConfig,
}

impl TlsEngine {
    pub fn new(
        provider: Arc<dyn TlsProvider>,
        required_version: impl Into<String>,
        config: FtpTlsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: SessionLifecycleManager::new(provider, required_version),
            broker: Arc::new(ResumptionBroker::new(config.resumption_scope)),
            log: Arc::new(TlsLog::new(config.log_messages, config.log_length)),
            config,
        })
    }

    pub fn provider(&self) -> &Arc<dyn TlsProvider> {
        self.lifecycle.provider()
    }

    pub fn config(&self) -> &FtpTlsConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &SessionLifecycleManager {
        &self.lifecycle
    }

    pub fn broker(&self) -> &Arc<ResumptionBroker> {
        &self.broker
    }

    pub fn log(&self) -> &Arc<TlsLog> {
        &self.log
    }

    pub fn active_sessions(&self) -> usize {
        self.lifecycle.active_count()
    }
}

// ─── Per-session configuration ───────────────────────────────────────

/// Inputs for one session. The socket must already be connected; the
/// session works on a duplicate of the handle and only toggles Nagle on it.
pub struct SessionConfig<'p> {
    pub hostname: String,
    pub socket: &'p TcpStream,
    pub alpn: Option<String>,
    /// Empty: provider default. Leading `+`/`-`: appended to the default.
    /// Anything else: used as is.
    pub priority: String,
    pub handshake_timeout: Option<Duration>,
    /// Session to resume from (the control connection for data connections).
    pub parent: Option<&'p TlsSession>,
    pub validator: Arc<dyn CertificateValidator>,
    pub client_certificates: Option<Arc<dyn ClientCertificateSource>>,
    pub disable_nagle: bool,
}

impl<'p> SessionConfig<'p> {
    pub fn new(
        settings: &FtpTlsConfig,
        hostname: impl Into<String>,
        socket: &'p TcpStream,
        validator: Arc<dyn CertificateValidator>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            socket,
            alpn: None,
            priority: settings.priority_string(),
            handshake_timeout: settings.handshake_timeout(),
            parent: None,
            validator,
            client_certificates: None,
            disable_nagle: settings.disable_nagle_during_handshake,
        }
    }

    pub fn with_alpn(mut self, alpn: impl Into<String>) -> Self {
        self.alpn = Some(alpn.into());
        self
    }

    pub fn with_parent(mut self, parent: &'p TlsSession) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_client_certificates(mut self, source: Arc<dyn ClientCertificateSource>) -> Self {
        self.client_certificates = Some(source);
        self
    }

    pub fn with_nagle_toggle(mut self, disable_nagle: bool) -> Self {
        self.disable_nagle = disable_nagle;
        self
    }
}

fn check(classifier: &dyn ErrorClassifier, rc: i32, step: &str) -> TlsResult<()> {
    if classifier.classify(rc) == Classification::Success {
        return Ok(());
    }
    Err(FtpTlsError::invalid_config(format!(
        "{} refused: {}",
        step,
        classifier.describe(rc)
    ))
    .with_code(rc))
}

// ─── Session ─────────────────────────────────────────────────────────

pub struct TlsSession {
    engine: Arc<TlsEngine>,
    ctx: Option<Box<dyn ProviderSession>>,
    credentials: Option<CredentialStore>,
    acquired: bool,
    state: SessionState,
    group: GroupId,
    is_control: bool,
    info: SessionInfo,
    peer: Option<PeerCredentials>,
}

impl TlsSession {
    /// Build, configure and handshake a session. Returns only an
    /// established session; every failure path releases the provider.
    pub fn establish(engine: &Arc<TlsEngine>, config: SessionConfig<'_>) -> TlsResult<TlsSession> {
        if let Some(parent) = config.parent {
            if !Arc::ptr_eq(&parent.engine, engine) {
                return Err(FtpTlsError::invalid_argument(
                    "cannot resume from a session created by another engine",
                ));
            }
            if parent.state != SessionState::Established {
                return Err(FtpTlsError::invalid_argument(format!(
                    "cannot resume from a session in state {:?}",
                    parent.state
                )));
            }
        }

        let credentials = engine.lifecycle.acquire()?;
        let is_control = config.parent.is_none();
        let mut session = TlsSession {
            engine: engine.clone(),
            ctx: None,
            credentials: Some(credentials),
            acquired: true,
            state: SessionState::Unconfigured,
            group: config.parent.map(|p| p.group).unwrap_or_default(),
            is_control,
            info: SessionInfo {
                hostname: config.hostname.clone(),
                protocol: TlsProtocol::Unknown,
                protocol_name: String::new(),
                cipher_description: String::new(),
                alpn: None,
                is_resumed: false,
                max_record_size: DEFAULT_MAX_RECORD,
                is_control,
            },
            peer: None,
        };

        let provider = engine.provider();
        match provider.new_session() {
            Ok(ctx) => session.ctx = Some(ctx),
            Err(rc) => {
                session.state = SessionState::Failed;
                return Err(FtpTlsError::provider_failure(format!(
                    "cannot allocate session: {}",
                    provider.classifier().describe(rc)
                ))
                .with_code(rc));
            }
        }

        if let Err(e) = session.configure(&config) {
            session.state = SessionState::Failed;
            return Err(e);
        }
        session.handshake(&config)?;
        Ok(session)
    }

    fn configure(&mut self, config: &SessionConfig<'_>) -> TlsResult<()> {
        let engine = self.engine.clone();
        let classifier = engine.provider().classifier();
        let ctx = self
            .ctx
            .as_deref_mut()
            .ok_or_else(|| FtpTlsError::session_closed("no handshake context"))?;
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| FtpTlsError::session_closed("no credentials"))?;

        check(classifier, ctx.set_cache_expiration(CACHE_EXPIRATION_SECS), "cache expiration")?;

        let priority = config.priority.trim();
        let rc = if priority.is_empty() {
            ctx.set_default_priority()
        } else if priority.starts_with('+') || priority.starts_with('-') {
            ctx.set_priority_append(priority)
        } else {
            ctx.set_priority_direct(priority)
        };
        check(classifier, rc, "priority")?;

        ctx.set_dh_prime_bits(DH_PRIME_BITS);
        check(classifier, ctx.bind_credentials(credentials), "credentials")?;
        check(classifier, ctx.set_server_name(&config.hostname), "server name")?;

        // ALPN has to follow the credentials.
        if let Some(alpn) = &config.alpn {
            check(classifier, ctx.set_alpn_protocols(&[alpn.as_str()]), "ALPN")?;
        }

        let transport = config.socket.try_clone().map_err(|e| {
            FtpTlsError::invalid_argument(format!("cannot duplicate socket: {}", e))
        })?;
        ctx.bind_transport(transport);
        ctx.set_handshake_timeout(config.handshake_timeout);
        ctx.set_handshake_hook(Arc::new(HookDispatcher::new(
            self.group,
            engine.broker.clone(),
            engine.log.clone(),
        )));
        check(
            classifier,
            ctx.set_client_certificate_source(config.client_certificates.clone()),
            "client certificates",
        )?;

        self.state = SessionState::Configured;
        engine.log.trace(
            LogCategories::HANDSHAKE,
            format!("session for {} configured (priority '{}')", config.hostname, priority),
        );
        Ok(())
    }

    fn handshake(&mut self, config: &SessionConfig<'_>) -> TlsResult<()> {
        let engine = self.engine.clone();
        let log = engine.log.as_ref();
        let classifier = engine.provider().classifier();
        let ctx = self
            .ctx
            .as_deref_mut()
            .ok_or_else(|| FtpTlsError::session_closed("no handshake context"))?;

        if let Some(parent) = config.parent {
            if let Some(parent_ctx) = parent.ctx.as_deref() {
                match engine.broker.resume_from(self.group, parent_ctx, ctx) {
                    ResumeOutcome::Applied { len } => log.debug(
                        LogCategories::HANDSHAKE,
                        format!("resumption data applied ({} bytes)", len),
                    ),
                    ResumeOutcome::NothingToApply => {
                        log.debug(LogCategories::HANDSHAKE, "no resumption data available")
                    }
                    ResumeOutcome::Rejected(rc) => log.warn(
                        LogCategories::HANDSHAKE,
                        format!("resumption data refused: {}", classifier.describe(rc)),
                    ),
                }
            }
        }

        self.state = SessionState::Handshaking;
        let nodelay_before = if config.disable_nagle {
            match config.socket.nodelay() {
                Ok(prev) => {
                    if !prev {
                        if let Err(e) = config.socket.set_nodelay(true) {
                            log.warn(LogCategories::HANDSHAKE, format!("cannot disable Nagle: {}", e));
                        }
                    }
                    Some(prev)
                }
                Err(_) => None,
            }
        } else {
            None
        };

        let rc = loop {
            let rc = ctx.handshake();
            let class = classifier.classify(rc);
            if class == Classification::Success || !class.retry_handshake() {
                break rc;
            }
            log.trace(
                LogCategories::HANDSHAKE,
                format!("handshake: {}, retrying", classifier.code_name(rc)),
            );
        };

        if let Some(prev) = nodelay_before {
            if let Err(e) = config.socket.set_nodelay(prev) {
                log.warn(LogCategories::HANDSHAKE, format!("cannot restore Nagle: {}", e));
            }
        }

        let class = classifier.classify(rc);
        if class != Classification::Success {
            self.state = SessionState::Failed;
            let mut msg = format!(
                "handshake with {} failed: {}",
                config.hostname,
                classifier.describe(rc)
            );
            if class == Classification::FatalAlert {
                if let Some(alert) = ctx.last_alert() {
                    msg.push_str(&format!(" [alert: {}]", alert));
                }
            }
            if let Some(detail) = ctx.last_error_detail() {
                msg.push_str(&format!(" ({})", detail));
            }
            log.flush_backlog(&msg);
            return Err(FtpTlsError::handshake_failed(msg).with_code(rc));
        }

        let protocol_name = ctx.protocol_name().unwrap_or_default();
        self.info.protocol = TlsProtocol::from_name(&protocol_name);
        self.info.protocol_name = protocol_name;
        self.info.cipher_description = ctx.session_description();
        self.info.alpn = ctx.alpn_selected();
        self.info.is_resumed = ctx.is_resumed();
        let max_record = ctx.max_record_size();
        if max_record > 0 {
            self.info.max_record_size = max_record;
        }

        log.debug(
            LogCategories::HANDSHAKE,
            format!(
                "handshake with {} complete: {}, resumed: {}, alpn: {}",
                config.hostname,
                self.info.cipher_description,
                self.info.is_resumed,
                self.info.alpn.as_deref().unwrap_or("none")
            ),
        );
        if config.parent.is_some() && !self.info.is_resumed {
            log.debug(LogCategories::HANDSHAKE, "server did not resume the session");
        }
        if ctx.client_certificate_requested() {
            log.debug(
                LogCategories::CERTIFICATE_VALIDATION,
                "server requested a client certificate",
            );
        } else {
            log.trace(
                LogCategories::CERTIFICATE_VALIDATION,
                "server did not request a client certificate",
            );
        }

        let bridge = CertificateBridge::new(log, classifier);
        let verdict = bridge
            .extract(&*ctx, &config.hostname, self.is_control)
            .and_then(|creds| {
                bridge.validate(&self.info, &creds, config.validator.as_ref())?;
                Ok(creds)
            });
        match verdict {
            Ok(creds) => self.peer = Some(creds),
            Err(e) => {
                self.state = SessionState::Failed;
                log.flush_backlog(&e.message);
                return Err(e);
            }
        }

        self.state = SessionState::Established;
        Ok(())
    }

    // ── Record I/O ───────────────────────────────────────────────────

    fn record_channel_op<T>(
        &mut self,
        op: impl FnOnce(&mut RecordChannel<'_>) -> TlsResult<T>,
    ) -> TlsResult<T> {
        if self.state != SessionState::Established {
            return Err(FtpTlsError::session_closed(format!(
                "session is {:?}",
                self.state
            )));
        }
        let engine = self.engine.clone();
        let ctx = self
            .ctx
            .as_deref_mut()
            .ok_or_else(|| FtpTlsError::session_closed("no handshake context"))?;
        let mut channel = RecordChannel::new(
            ctx,
            engine.provider().classifier(),
            &engine.log,
            self.info.max_record_size,
        );
        let result = op(&mut channel);
        if let Err(e) = &result {
            if e.kind == TlsErrorKind::RecordIoFailure {
                self.state = SessionState::Failed;
                engine.log.flush_backlog(&e.message);
            }
        }
        result
    }

    /// Receive into `buffer[offset..offset + max_count]`; returns the bytes
    /// stored, zero at end of stream.
    pub fn receive(&mut self, buffer: &mut [u8], offset: usize, max_count: usize) -> TlsResult<usize> {
        self.record_channel_op(|ch| ch.read(buffer, offset, max_count))
    }

    /// Send all of `buffer[offset..offset + count]`.
    pub fn send(&mut self, buffer: &[u8], offset: usize, count: usize) -> TlsResult<()> {
        self.record_channel_op(|ch| ch.write(buffer, offset, count))
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Drain, close-notify, free the context and release the provider.
    /// Safe to call more than once.
    pub fn dispose(&mut self) {
        if !self.acquired {
            return;
        }
        let engine = self.engine.clone();
        let classifier = engine.provider().classifier();

        if let Some(mut ctx) = self.ctx.take() {
            if self.state == SessionState::Established {
                let mut channel = RecordChannel::new(
                    ctx.as_mut(),
                    classifier,
                    &engine.log,
                    self.info.max_record_size,
                );
                if let Err(e) = channel.drain_pending() {
                    engine
                        .log
                        .warn(LogCategories::READ, format!("draining before close failed: {}", e));
                }
                loop {
                    let rc = ctx.bye();
                    let class = classifier.classify(rc);
                    if class == Classification::Success {
                        break;
                    }
                    if !class.retry_bye() {
                        engine.log.warn(
                            LogCategories::HANDSHAKE,
                            format!("close notify failed: {}", classifier.describe(rc)),
                        );
                        break;
                    }
                }
            }
            drop(ctx);
        }

        if self.is_control {
            engine.broker.forget(self.group);
        }
        self.credentials = None;
        self.peer = None;
        self.acquired = false;
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
        engine.lifecycle.release();
        log::trace!("TLS session for {} disposed", self.info.hostname);
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_session_ok(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn is_resumed(&self) -> bool {
        self.info.is_resumed
    }

    pub fn protocol(&self) -> TlsProtocol {
        self.info.protocol
    }

    pub fn protocol_name(&self) -> &str {
        &self.info.protocol_name
    }

    pub fn cipher_description(&self) -> &str {
        &self.info.cipher_description
    }

    pub fn alpn(&self) -> Option<&str> {
        self.info.alpn.as_deref()
    }

    pub fn max_record_size(&self) -> usize {
        self.info.max_record_size
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn hostname(&self) -> &str {
        &self.info.hostname
    }

    pub fn is_control(&self) -> bool {
        self.is_control
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn engine(&self) -> &Arc<TlsEngine> {
        &self.engine
    }

    /// Leaf certificate (control sessions only).
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer.as_ref().and_then(|p| p.leaf.as_ref())
    }

    pub fn peer_chain(&self) -> &[CertificateDer<'static>] {
        self.peer.as_ref().map(|p| p.chain.as_slice()).unwrap_or(&[])
    }
}

impl Drop for TlsSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl io::Read for TlsSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        if len == 0 {
            return Ok(0);
        }
        self.receive(buf, 0, len).map_err(io::Error::from)
    }
}

impl io::Write for TlsSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(buf, 0, buf.len()).map_err(io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::certificate::{validator_fn, RequireVerified};
    use crate::tls::classify::codes;
    use crate::tls::mock::MockProvider;
    use crate::tls::types::CertificateStatus;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    struct Harness {
        provider: Arc<MockProvider>,
        engine: Arc<TlsEngine>,
        _listener: TcpListener,
        sockets: Vec<TcpStream>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(FtpTlsConfig::default())
        }

        fn with_config(config: FtpTlsConfig) -> Self {
            let provider = Arc::new(MockProvider::new());
            let engine = TlsEngine::new(provider.clone(), MockProvider::VERSION, config);
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            Self {
                provider,
                engine,
                _listener: listener,
                sockets: Vec::new(),
            }
        }

        fn socket(&mut self) -> TcpStream {
            let s = TcpStream::connect(self._listener.local_addr().unwrap()).unwrap();
            // Keep the server side alive for the test's duration.
            let (server, _) = self._listener.accept().unwrap();
            self.sockets.push(server);
            s
        }
    }

    fn accept_all() -> Arc<dyn CertificateValidator> {
        validator_fn(|_, _, _, _| true)
    }

    #[test]
    fn test_establish_control_session() {
        let mut h = Harness::new();
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "ftp.local", &sock, accept_all())
            .with_alpn("ftp");
        let s = TlsSession::establish(&h.engine, cfg).unwrap();
        assert!(s.is_session_ok());
        assert!(!s.is_resumed());
        assert!(s.is_control());
        assert_eq!(s.protocol(), TlsProtocol::Tls13);
        assert_eq!(s.alpn(), Some("ftp"));
        assert_eq!(s.max_record_size(), 16384);
        assert_eq!(h.engine.active_sessions(), 1);
        assert_eq!(h.provider.init_count(), 1);
    }

    #[test]
    fn test_setup_order() {
        let mut h = Harness::new();
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "ftp.local", &sock, accept_all())
            .with_alpn("ftp")
            .with_priority("NORMAL:-VERS-TLS1.3");
        let _s = TlsSession::establish(&h.engine, cfg).unwrap();
        let journal = h.provider.journal();
        let expected = [
            "cache_expiration 100000000",
            "priority direct NORMAL:-VERS-TLS1.3",
            "dh_prime_bits 1024",
            "credentials",
            "server_name ftp.local",
            "alpn ftp",
            "transport",
            "handshake_timeout Some(5000)",
            "hook",
            "client_certificates false",
            "handshake done",
        ];
        assert_eq!(&journal[..expected.len()], &expected);
    }

    #[test]
    fn test_priority_modes() {
        let mut h = Harness::new();
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all());
        drop(TlsSession::establish(&h.engine, cfg).unwrap());
        assert!(h.provider.journal().contains(&"priority default".to_string()));

        h.provider.clear_journal();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all())
            .with_priority("-VERS-TLS1.2");
        drop(TlsSession::establish(&h.engine, cfg).unwrap());
        assert!(h
            .provider
            .journal()
            .contains(&"priority append -VERS-TLS1.2".to_string()));
    }

    #[test]
    fn test_bad_priority_is_invalid_config() {
        let mut h = Harness::new();
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all())
            .with_priority("NORMAL:+BOGUS");
        let err = TlsSession::establish(&h.engine, cfg).err().unwrap();
        assert_eq!(err.kind, TlsErrorKind::InvalidConfig);
        assert_eq!(h.engine.active_sessions(), 0);
        assert_eq!(h.provider.deinit_count(), 1);
    }

    #[test]
    fn test_handshake_retries_transient() {
        let mut h = Harness::new();
        h.provider.script(|s| {
            s.handshake = vec![codes::AGAIN, codes::WARNING_ALERT_RECEIVED, codes::INTERRUPTED]
        });
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all());
        assert!(TlsSession::establish(&h.engine, cfg).unwrap().is_session_ok());
    }

    #[test]
    fn test_handshake_fatal_alert_fails() {
        let mut h = Harness::new();
        h.provider
            .script(|s| s.handshake = vec![codes::AGAIN, codes::FATAL_ALERT_RECEIVED]);
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all());
        let err = TlsSession::establish(&h.engine, cfg).err().unwrap();
        assert_eq!(err.kind, TlsErrorKind::HandshakeFailure);
        assert_eq!(err.code, Some(codes::FATAL_ALERT_RECEIVED));
        assert_eq!(h.engine.active_sessions(), 0);
        // No close-notify on a failed session.
        assert!(!h.provider.journal().iter().any(|e| e.starts_with("bye")));
    }

    #[test]
    fn test_handshake_timeout_fails() {
        let mut h = Harness::new();
        h.provider.script(|s| s.handshake = vec![codes::TIMEDOUT]);
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all());
        let err = TlsSession::establish(&h.engine, cfg).err().unwrap();
        assert_eq!(err.kind, TlsErrorKind::HandshakeFailure);
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_nagle_restored() {
        let mut h = Harness::new();
        let sock = h.socket();
        sock.set_nodelay(false).unwrap();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all());
        let _s = TlsSession::establish(&h.engine, cfg).unwrap();
        assert!(!sock.nodelay().unwrap());

        h.provider.script(|s| s.handshake = vec![codes::PUSH_ERROR]);
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, accept_all());
        assert!(TlsSession::establish(&h.engine, cfg).is_err());
        assert!(!sock.nodelay().unwrap());
    }

    #[test]
    fn test_validator_rejection() {
        let mut h = Harness::new();
        h.provider
            .script(|s| s.status = CertificateStatus::SIGNER_NOT_FOUND);
        let sock = h.socket();
        let cfg = SessionConfig::new(h.engine.config(), "h", &sock, Arc::new(RequireVerified));
        let err = TlsSession::establish(&h.engine, cfg).err().unwrap();
        assert_eq!(err.kind, TlsErrorKind::CertificateRejected);
        assert_eq!(err.message, "SIGNER_NOT_FOUND");
        assert_eq!(h.engine.active_sessions(), 0);
    }

    #[test]
    fn test_version_mismatch() {
        let provider = Arc::new(MockProvider::new());
        let engine = TlsEngine::new(provider.clone(), "3.7.7", FtpTlsConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sock = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let cfg = SessionConfig::new(engine.config(), "h", &sock, accept_all());
        let err = TlsSession::establish(&engine, cfg).err().unwrap();
        assert_eq!(err.kind, TlsErrorKind::ProviderVersionMismatch);
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(provider.init_count(), 0);
    }

    #[test]
    fn test_data_session_resumes_from_control() {
        let mut h = Harness::new();
        h.provider.script(|s| s.ticket = Some(b"ticket-1".to_vec()));
        let (cs, ds) = (h.socket(), h.socket());
        let control = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &cs, accept_all()).with_alpn("ftp"),
        )
        .unwrap();
        assert_eq!(
            h.engine.broker().latest(control.group()).and_then(|b| b.as_bytes().map(<[u8]>::to_vec)),
            Some(b"ticket-1".to_vec())
        );

        let data = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &ds, accept_all())
                .with_alpn("ftp-data")
                .with_parent(&control),
        )
        .unwrap();
        assert!(data.is_resumed());
        assert!(!data.is_control());
        assert_eq!(data.group(), control.group());
        assert!(!data.cipher_description().is_empty());
        assert!(h.provider.journal().contains(&"import ticket-1".to_string()));
        assert_eq!(h.engine.active_sessions(), 2);
    }

    #[test]
    fn test_unresumed_data_session_is_not_an_error() {
        let mut h = Harness::new();
        h.provider.script(|s| s.accept_resumption = false);
        let (cs, ds) = (h.socket(), h.socket());
        let control = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &cs, accept_all()),
        )
        .unwrap();
        let data = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &ds, accept_all()).with_parent(&control),
        )
        .unwrap();
        assert!(data.is_session_ok());
        assert!(!data.is_resumed());
    }

    #[test]
    fn test_parent_from_other_engine_rejected() {
        let mut h1 = Harness::new();
        let mut h2 = Harness::new();
        let (s1, s2) = (h1.socket(), h2.socket());
        let control = TlsSession::establish(
            &h1.engine,
            SessionConfig::new(h1.engine.config(), "h", &s1, accept_all()),
        )
        .unwrap();
        let err = TlsSession::establish(
            &h2.engine,
            SessionConfig::new(h2.engine.config(), "h", &s2, accept_all()).with_parent(&control),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind, TlsErrorKind::InvalidArgument);
        assert_eq!(h2.engine.active_sessions(), 0);
        assert_eq!(h2.provider.init_count(), 0);
    }

    #[test]
    fn test_read_write_through_session() {
        let mut h = Harness::new();
        h.provider.script(|s| s.max_record = 64);
        let sock = h.socket();
        let mut s = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &sock, accept_all()),
        )
        .unwrap();
        let payload: Vec<u8> = (0..200u8).collect();
        s.write_all(&payload).unwrap();
        let mut back = vec![0u8; 200];
        s.read_exact(&mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_invalid_window_keeps_session() {
        let mut h = Harness::new();
        let sock = h.socket();
        let mut s = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &sock, accept_all()),
        )
        .unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            s.receive(&mut buf, 2, 4).unwrap_err().kind,
            TlsErrorKind::InvalidArgument
        );
        assert!(s.is_session_ok());
    }

    #[test]
    fn test_record_failure_fails_session() {
        let mut h = Harness::new();
        h.provider.script(|s| s.send = vec![codes::AGAIN, codes::PUSH_ERROR]);
        let sock = h.socket();
        let mut s = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &sock, accept_all()),
        )
        .unwrap();
        let err = s.send(b"abc", 0, 3).unwrap_err();
        assert_eq!(err.kind, TlsErrorKind::RecordIoFailure);
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(
            s.send(b"abc", 0, 3).unwrap_err().kind,
            TlsErrorKind::SessionClosed
        );
    }

    #[test]
    fn test_dispose_is_idempotent_and_drains() {
        let mut h = Harness::new();
        h.provider.script(|s| {
            s.pending_after_handshake = vec![1u8; 10];
            s.bye = vec![codes::AGAIN, codes::INTERRUPTED];
        });
        let sock = h.socket();
        let mut s = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &sock, accept_all()),
        )
        .unwrap();
        s.dispose();
        s.dispose();
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(h.engine.active_sessions(), 0);
        assert_eq!(h.provider.deinit_count(), 1);
        let byes: Vec<_> = h
            .provider
            .journal()
            .into_iter()
            .filter(|e| e.starts_with("bye"))
            .collect();
        assert_eq!(byes, vec!["bye -28", "bye -52", "bye 0"]);
        assert_eq!(
            s.receive(&mut [0u8; 4], 0, 4).unwrap_err().kind,
            TlsErrorKind::SessionClosed
        );
    }

    #[test]
    fn test_bye_failure_still_releases() {
        let mut h = Harness::new();
        h.provider.script(|s| s.bye = vec![codes::PUSH_ERROR]);
        let sock = h.socket();
        let s = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &sock, accept_all()),
        )
        .unwrap();
        drop(s);
        assert_eq!(h.engine.active_sessions(), 0);
        assert_eq!(h.provider.deinit_count(), 1);
    }

    #[test]
    fn test_many_sessions_across_threads() {
        let h = Harness::new();
        let addr = h._listener.local_addr().unwrap();
        let engine = h.engine.clone();
        let listener = h._listener.try_clone().unwrap();
        let acceptor = std::thread::spawn(move || {
            let mut kept = Vec::new();
            for _ in 0..16 {
                kept.push(listener.accept().unwrap().0);
            }
            kept
        });
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for _ in 0..4 {
                        let sock = TcpStream::connect(addr).unwrap();
                        let cfg = SessionConfig::new(engine.config(), "h", &sock, accept_all());
                        let s = TlsSession::establish(&engine, cfg).unwrap();
                        assert!(s.is_session_ok());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        acceptor.join().unwrap();
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(h.provider.init_count(), h.provider.deinit_count());
    }

    #[test]
    fn test_control_dispose_forgets_group() {
        let mut h = Harness::new();
        h.provider.script(|s| s.ticket = Some(b"t".to_vec()));
        let sock = h.socket();
        let control = TlsSession::establish(
            &h.engine,
            SessionConfig::new(h.engine.config(), "h", &sock, accept_all()),
        )
        .unwrap();
        let group = control.group();
        assert!(h.engine.broker().latest(group).is_some());
        drop(control);
        assert!(h.engine.broker().latest(group).is_none());
    }
}
