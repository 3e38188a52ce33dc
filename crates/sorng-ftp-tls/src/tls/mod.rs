//! # FTPS secure transport
//!
//! TLS sessions for an FTP client: one control session per server
//! connection, data sessions resumed from it.
//!
//! Architecture:
//! - `error`: error type and kinds
//! - `types`: protocol, certificate and handshake vocabulary
//! - `classify`: provider result codes and their classification
//! - `logging`: category-filtered log with a failure backlog
//! - `priority`: priority-string builder and parser
//! - `config`: serialisable settings
//! - `provider`: the contract a TLS library implements
//! - `credentials`: shared credential handle
//! - `lifecycle`: provider init/deinit reference counting
//! - `broker`: resumption slots per connection group
//! - `hook`: handshake-message dispatch
//! - `channel`: record-level read/write with retries
//! - `certificate`: peer certificate extraction and validation bridge
//! - `session`: the engine and one TLS session
//! - `stream`: FTP control/data connector and stream
//! - `rustls_provider`: provider on top of rustls

pub mod error;
pub mod types;
pub mod classify;
pub mod logging;
pub mod priority;
pub mod config;
pub mod provider;
pub mod credentials;
pub mod lifecycle;
pub mod broker;
pub mod hook;
pub mod channel;
pub mod certificate;
pub mod session;
pub mod stream;
pub mod rustls_provider;

#[cfg(test)]
pub mod mock;
