//! Shared certificate credentials.

use crate::tls::provider::ProviderCredentials;
use std::fmt;
use std::sync::Arc;

/// Reference-counted handle to the provider's credential object.
///
/// The lifecycle manager owns the primary handle; every live session holds
/// a clone, so the underlying object outlives all sessions that use it.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<dyn ProviderCredentials>,
}

impl CredentialStore {
    pub fn new(inner: Arc<dyn ProviderCredentials>) -> Self {
        Self { inner }
    }

    /// Provider-specific view of the credentials.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Number of live handles, including the manager's own.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn same_as(&self, other: &CredentialStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("credentials", &self.inner.describe())
            .field("handles", &self.handle_count())
            .finish()
    }
}
