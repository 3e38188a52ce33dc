//! Resumption material shared between a control session and its data
//! sessions.
//!
//! - `capture` exports the state of an established session into its slot
//! - `apply` installs a blob into a configured, not yet handshaken session
//! - `observe` refreshes the slot when a session ticket arrives late
//!   (TLS 1.3 sends tickets after the handshake)
//!
//! Slots are keyed by connection group: a control session opens a group and
//! its data sessions join it. With [`ResumptionScope::Global`] every session
//! shares one slot.

use crate::tls::provider::{ProviderSession, SessionExport};
use crate::tls::types::{Direction, HandshakeEvent, HandshakeMessage, HookPhase, SessionFlags};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ─── Blob ────────────────────────────────────────────────────────────

/// Opaque provider session state. Cheap to clone.
///
/// Providers that can serialise their state store bytes; others store a
/// shared handle to whatever holds the state.
#[derive(Clone)]
pub struct ResumptionBlob {
    inner: Arc<dyn Any + Send + Sync>,
    len: usize,
}

impl ResumptionBlob {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            inner: Arc::new(bytes),
            len,
        }
    }

    pub fn from_handle<T: Any + Send + Sync>(handle: Arc<T>, len: usize) -> Self {
        Self { inner: handle, len }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.inner.downcast_ref::<Vec<u8>>().map(Vec::as_slice)
    }

    pub fn handle<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn same_as(&self, other: &ResumptionBlob) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ResumptionBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumptionBlob").field("len", &self.len).finish()
    }
}

// ─── Scope / groups ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ResumptionScope {
    /// One slot for the whole process.
    Global,
    /// One slot per control connection and its data connections.
    #[default]
    ConnectionGroup,
}

/// Identifies a control connection and the data connections resumed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a resume attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Applied { len: usize },
    NothingToApply,
    /// The target refused the blob; the handshake will be a full one.
    Rejected(i32),
}

// ─── Broker ──────────────────────────────────────────────────────────

pub struct ResumptionBroker {
    scope: ResumptionScope,
    slots: Mutex<HashMap<Option<GroupId>, ResumptionBlob>>,
}

impl ResumptionBroker {
    pub fn new(scope: ResumptionScope) -> Self {
        Self {
            scope,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> ResumptionScope {
        self.scope
    }

    fn key(&self, group: GroupId) -> Option<GroupId> {
        match self.scope {
            ResumptionScope::Global => None,
            ResumptionScope::ConnectionGroup => Some(group),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Option<GroupId>, ResumptionBlob>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Export `source` into the group's slot.
    pub fn capture<S: SessionExport + ?Sized>(
        &self,
        group: GroupId,
        source: &S,
    ) -> Result<ResumptionBlob, i32> {
        let blob = source.export_session()?;
        self.lock().insert(self.key(group), blob.clone());
        Ok(blob)
    }

    /// Install `blob` into a session that has not handshaken yet.
    pub fn apply(&self, target: &mut dyn ProviderSession, blob: &ResumptionBlob) -> i32 {
        target.import_session(blob)
    }

    /// Capture from `parent` and apply to `child` as one step, so a ticket
    /// arriving on another thread cannot slip in between.
    ///
    /// If the parent has nothing to export, the slot's last blob is used.
    pub fn resume_from<P: SessionExport + ?Sized>(
        &self,
        group: GroupId,
        parent: &P,
        child: &mut dyn ProviderSession,
    ) -> ResumeOutcome {
        let mut slots = self.lock();
        let key = self.key(group);
        match parent.export_session() {
            Ok(blob) => {
                slots.insert(key, blob);
            }
            Err(rc) => {
                log::debug!("resumption export from parent failed ({}), using stored slot", rc);
            }
        }
        let blob = match slots.get(&key) {
            Some(b) => b.clone(),
            None => return ResumeOutcome::NothingToApply,
        };
        match self.apply(child, &blob) {
            rc if rc < 0 => ResumeOutcome::Rejected(rc),
            _ => ResumeOutcome::Applied { len: blob.len() },
        }
    }

    /// Handshake-hook entry. Only an inbound NewSessionTicket, after the
    /// provider processed it, on a session that reports a ticket, updates
    /// the slot. Returns whether it did.
    pub fn observe(&self, group: GroupId, event: HandshakeEvent, source: &dyn SessionExport) -> bool {
        let wanted = HandshakeEvent::new(
            HandshakeMessage::NewSessionTicket,
            HookPhase::Post,
            Direction::Inbound,
        );
        if event != wanted || !source.session_flags().contains(SessionFlags::SESSION_TICKET) {
            return false;
        }
        match self.capture(group, source) {
            Ok(blob) => {
                log::trace!("session ticket captured for group {} ({} bytes)", group, blob.len());
                true
            }
            Err(rc) => {
                log::debug!("session ticket arrived but export failed ({})", rc);
                false
            }
        }
    }

    pub fn latest(&self, group: GroupId) -> Option<ResumptionBlob> {
        self.lock().get(&self.key(group)).cloned()
    }

    /// Drop a group's slot once its control connection is gone.
    pub fn forget(&self, group: GroupId) {
        if self.scope == ResumptionScope::ConnectionGroup {
            self.lock().remove(&Some(group));
        }
    }

    pub fn slot_count(&self) -> usize {
        self.lock().len()
    }
}
