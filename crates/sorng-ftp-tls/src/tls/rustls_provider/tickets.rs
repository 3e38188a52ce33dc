//! Resumption state shared by a connection group.
//!
//! rustls only resumes a stored session when the new connection's config
//! carries the same verifier and client-certificate resolver instances as
//! the one that stored it. [`ResumptionContext`] keeps the session cache
//! together with those two, and is what a resumption blob hands over.
//!
//! [`TicketSink`] wraps the context's cache and reports every stored ticket
//! or TLS 1.2 session to the handshake hook as an inbound, post-processing
//! NewSessionTicket.

use super::verifier::{AdvisoryVerifier, RecordingResolver};
use crate::tls::broker::ResumptionBlob;
use crate::tls::classify::codes;
use crate::tls::provider::{ClientCertificateSource, HandshakeHook, SessionExport};
use crate::tls::types::{Direction, HandshakeEvent, HandshakeMessage, HookPhase, SessionFlags};
use rustls::client::{
    ClientSessionMemoryCache, ClientSessionStore, Tls12ClientSessionValue, Tls13ClientSessionValue,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::NamedGroup;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

const SESSION_CACHE_SIZE: usize = 32;

// ─── Group context ───────────────────────────────────────────────────

pub(crate) struct ResumptionContext {
    pub cache: Arc<ClientSessionMemoryCache>,
    pub verifier: Arc<AdvisoryVerifier>,
    pub resolver: Arc<RecordingResolver>,
}

impl ResumptionContext {
    pub fn new(
        crypto: Arc<CryptoProvider>,
        source: Option<Arc<dyn ClientCertificateSource>>,
    ) -> Self {
        Self {
            cache: Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE)),
            verifier: Arc::new(AdvisoryVerifier::new(crypto.clone())),
            resolver: Arc::new(RecordingResolver::new(source, crypto)),
        }
    }

    /// Whether a session presenting `source` can reuse this context.
    pub fn accepts(&self, source: &Option<Arc<dyn ClientCertificateSource>>) -> bool {
        match (self.resolver.source(), source) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ResumptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumptionContext")
            .field("resolver", &self.resolver)
            .finish()
    }
}

// ─── Ticket sink ─────────────────────────────────────────────────────

pub(crate) struct TicketSink {
    context: Arc<ResumptionContext>,
    hook: Option<Arc<dyn HandshakeHook>>,
    stored: AtomicUsize,
    flags: AtomicU32,
}

impl TicketSink {
    pub fn new(context: Arc<ResumptionContext>, hook: Option<Arc<dyn HandshakeHook>>) -> Self {
        Self {
            context,
            hook,
            stored: AtomicUsize::new(0),
            flags: AtomicU32::new(0),
        }
    }

    /// Notify the hook for an event on this sink.
    pub fn fire(&self, message: HandshakeMessage, phase: HookPhase, direction: Direction) {
        if let Some(hook) = &self.hook {
            hook.on_message(HandshakeEvent::new(message, phase, direction), self);
        }
    }

    fn stored_one(&self, store: impl FnOnce()) {
        self.fire(HandshakeMessage::NewSessionTicket, HookPhase::Pre, Direction::Inbound);
        store();
        self.stored.fetch_add(1, Ordering::SeqCst);
        self.flags
            .fetch_or(SessionFlags::SESSION_TICKET.0, Ordering::SeqCst);
        self.fire(HandshakeMessage::NewSessionTicket, HookPhase::Post, Direction::Inbound);
    }

    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn context(&self) -> &Arc<ResumptionContext> {
        &self.context
    }
}

impl fmt::Debug for TicketSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSink")
            .field("stored", &self.stored())
            .field("hooked", &self.hook.is_some())
            .finish()
    }
}

impl SessionExport for TicketSink {
    fn export_session(&self) -> Result<ResumptionBlob, i32> {
        match self.stored() {
            0 => Err(codes::REQUESTED_DATA_NOT_AVAILABLE),
            n => Ok(ResumptionBlob::from_handle(self.context.clone(), n)),
        }
    }

    fn session_flags(&self) -> SessionFlags {
        SessionFlags(self.flags.load(Ordering::SeqCst))
    }
}

impl ClientSessionStore for TicketSink {
    fn set_kx_hint(&self, server_name: ServerName<'static>, group: NamedGroup) {
        self.context.cache.set_kx_hint(server_name, group);
    }

    fn kx_hint(&self, server_name: &ServerName<'_>) -> Option<NamedGroup> {
        self.context.cache.kx_hint(server_name)
    }

    fn set_tls12_session(&self, server_name: ServerName<'static>, value: Tls12ClientSessionValue) {
        self.stored_one(|| self.context.cache.set_tls12_session(server_name, value));
    }

    fn tls12_session(&self, server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        self.context.cache.tls12_session(server_name)
    }

    fn remove_tls12_session(&self, server_name: &ServerName<'static>) {
        self.context.cache.remove_tls12_session(server_name);
    }

    fn insert_tls13_ticket(&self, server_name: ServerName<'static>, value: Tls13ClientSessionValue) {
        self.stored_one(|| self.context.cache.insert_tls13_ticket(server_name, value));
    }

    fn take_tls13_ticket(&self, server_name: &ServerName<'static>) -> Option<Tls13ClientSessionValue> {
        self.context.cache.take_tls13_ticket(server_name)
    }
}
