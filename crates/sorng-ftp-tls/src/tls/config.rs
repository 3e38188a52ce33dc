//! Engine-wide TLS configuration.

use crate::tls::broker::ResumptionScope;
use crate::tls::logging::LogCategories;
use crate::tls::priority::{
    build_priority, AdvancedOption, SecurityOption, SecurityProfile, SecuritySuite,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every session an engine creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FtpTlsConfig {
    /// Starting point of the priority string.
    #[serde(default)]
    pub security_suite: SecuritySuite,
    /// Adjustments applied on top of the suite.
    #[serde(default)]
    pub security_options: Vec<SecurityOption>,
    #[serde(default)]
    pub security_profile: SecurityProfile,
    #[serde(default)]
    pub advanced_options: Vec<AdvancedOption>,
    /// Raw priority string; replaces everything built from the fields above.
    #[serde(default)]
    pub priority: Option<String>,
    /// Handshake timeout in milliseconds (0 = wait forever).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    /// Categories forwarded to the `log` facade as they happen.
    #[serde(default)]
    pub log_messages: LogCategories,
    /// How many recent messages to replay after a fatal failure.
    #[serde(default = "default_log_length")]
    pub log_length: usize,
    #[serde(default = "default_true")]
    pub disable_nagle_during_handshake: bool,
    #[serde(default)]
    pub resumption_scope: ResumptionScope,
}

fn default_handshake_timeout() -> u64 {
    5000
}
fn default_log_length() -> usize {
    150
}
fn default_true() -> bool {
    true
}

impl Default for FtpTlsConfig {
    fn default() -> Self {
        Self {
            security_suite: SecuritySuite::Normal,
            security_options: Vec::new(),
            security_profile: SecurityProfile::None,
            advanced_options: Vec::new(),
            priority: None,
            handshake_timeout_ms: default_handshake_timeout(),
            log_messages: LogCategories::default(),
            log_length: default_log_length(),
            disable_nagle_during_handshake: true,
            resumption_scope: ResumptionScope::default(),
        }
    }
}

impl FtpTlsConfig {
    /// The priority string sessions are configured with.
    pub fn priority_string(&self) -> String {
        match &self.priority {
            Some(p) => p.clone(),
            None => build_priority(
                self.security_suite,
                &self.security_options,
                &self.advanced_options,
                self.security_profile,
            ),
        }
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
