//! Category-filtered TLS logging with a bounded failure backlog.
//!
//! Every message lands in the backlog; only enabled categories are
//! forwarded to the `log` facade straight away. On a fatal failure the
//! backlog is flushed at `error` level so the lead-up is visible even when
//! the filter hid it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Message categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogCategories(pub u32);

impl LogCategories {
    pub const NONE: Self = Self(0);
    pub const PROVIDER_CALL: Self = Self(1);
    pub const PROVIDER_MESSAGE: Self = Self(1 << 1);
    pub const HANDSHAKE: Self = Self(1 << 2);
    pub const ALERT: Self = Self(1 << 3);
    pub const READ: Self = Self(1 << 4);
    pub const WRITE: Self = Self(1 << 5);
    pub const CERTIFICATE_VALIDATION: Self = Self(1 << 6);
    pub const X509: Self = Self(1 << 7);
    pub const RAW_PUBLIC_KEY: Self = Self(1 << 8);
    pub const CERTIFICATE_INFO: Self = Self(1 << 9);
    pub const CERTIFICATE_PEM: Self = Self(1 << 10);
    pub const ALL: Self = Self(0xFFFF);

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl Default for LogCategories {
    fn default() -> Self {
        Self(Self::HANDSHAKE.0 | Self::ALERT.0 | Self::CERTIFICATE_VALIDATION.0)
    }
}

impl std::ops::BitOr for LogCategories {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One remembered message.
#[derive(Debug, Clone)]
pub struct BacklogEntry {
    pub at: DateTime<Utc>,
    pub level: log::Level,
    pub category: LogCategories,
    pub text: String,
}

pub struct TlsLog {
    enabled: LogCategories,
    capacity: usize,
    backlog: Mutex<VecDeque<BacklogEntry>>,
}

impl TlsLog {
    pub fn new(enabled: LogCategories, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            backlog: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn is_enabled(&self, category: LogCategories) -> bool {
        self.enabled.contains(category)
    }

    pub fn record(&self, category: LogCategories, level: log::Level, text: impl Into<String>) {
        let text = text.into();
        if self.is_enabled(category) {
            log::log!(target: "sorng_ftp_tls", level, "{}", text);
        }
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut q) = self.backlog.lock() {
            while q.len() >= self.capacity {
                q.pop_front();
            }
            q.push_back(BacklogEntry {
                at: Utc::now(),
                level,
                category,
                text,
            });
        }
    }

    pub fn trace(&self, category: LogCategories, text: impl Into<String>) {
        self.record(category, log::Level::Trace, text);
    }

    pub fn debug(&self, category: LogCategories, text: impl Into<String>) {
        self.record(category, log::Level::Debug, text);
    }

    pub fn warn(&self, category: LogCategories, text: impl Into<String>) {
        self.record(category, log::Level::Warn, text);
    }

    /// Emit the remembered messages at `error` level and clear the backlog.
    pub fn flush_backlog(&self, reason: &str) {
        let entries: Vec<BacklogEntry> = match self.backlog.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => return,
        };
        if entries.is_empty() {
            return;
        }
        log::error!(
            target: "sorng_ftp_tls",
            "{}; last {} TLS messages follow",
            reason,
            entries.len()
        );
        for e in &entries {
            log::error!(
                target: "sorng_ftp_tls",
                "  {} {:<5} {}",
                e.at.format("%H:%M:%S%.3f"),
                e.level,
                e.text
            );
        }
    }

    pub fn recent(&self) -> Vec<String> {
        self.backlog
            .lock()
            .map(|q| q.iter().map(|e| e.text.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for TlsLog {
    fn default() -> Self {
        Self::new(LogCategories::default(), 150)
    }
}
