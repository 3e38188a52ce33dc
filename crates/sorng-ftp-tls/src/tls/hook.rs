//! Handshake-hook dispatch.
//!
//! Providers report every handshake message, both directions, before and
//! after processing. The dispatcher looks the event up in a table; only the
//! inbound, post-processing NewSessionTicket entry carries work (refreshing
//! the resumption slot), everything else is traced.

use crate::tls::broker::{GroupId, ResumptionBroker};
use crate::tls::logging::{LogCategories, TlsLog};
use crate::tls::provider::{HandshakeHook, SessionExport};
use crate::tls::types::{Direction, HandshakeEvent, HandshakeMessage, HookPhase};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Trace,
    CaptureTicket,
}

type HookKey = (HandshakeMessage, HookPhase, Direction);

pub struct HookDispatcher {
    group: GroupId,
    broker: Arc<ResumptionBroker>,
    log: Arc<TlsLog>,
    table: HashMap<HookKey, HookAction>,
}

impl HookDispatcher {
    pub fn new(group: GroupId, broker: Arc<ResumptionBroker>, log: Arc<TlsLog>) -> Self {
        let mut table = HashMap::new();
        for message in HandshakeMessage::ALL {
            for phase in [HookPhase::Pre, HookPhase::Post] {
                for direction in [Direction::Inbound, Direction::Outbound] {
                    table.insert((message, phase, direction), HookAction::Trace);
                }
            }
        }
        table.insert(
            (HandshakeMessage::NewSessionTicket, HookPhase::Post, Direction::Inbound),
            HookAction::CaptureTicket,
        );
        Self {
            group,
            broker,
            log,
            table,
        }
    }

    pub fn action_for(&self, event: &HandshakeEvent) -> HookAction {
        self.table
            .get(&(event.message, event.phase, event.direction))
            .copied()
            .unwrap_or(HookAction::Trace)
    }
}

impl HandshakeHook for HookDispatcher {
    fn on_message(&self, event: HandshakeEvent, source: &dyn SessionExport) {
        self.log.trace(LogCategories::HANDSHAKE, format!("handshake: {}", event));
        if self.action_for(&event) == HookAction::CaptureTicket
            && self.broker.observe(self.group, event, source)
        {
            self.log.debug(
                LogCategories::HANDSHAKE,
                format!("resumption ticket stored for group {}", self.group),
            );
        }
    }
}
