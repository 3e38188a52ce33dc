//! Process-wide provider lifecycle.
//!
//! Global init happens when the first session is acquired and global
//! deinit when the last one is released. The credential store lives
//! exactly as long as at least one session does. Counter and store only
//! change together, under one mutex.

use crate::tls::classify::Classification;
use crate::tls::credentials::CredentialStore;
use crate::tls::error::{FtpTlsError, TlsResult};
use crate::tls::provider::TlsProvider;
use std::sync::{Arc, Mutex, MutexGuard};

struct LifecycleState {
    active: usize,
    credentials: Option<CredentialStore>,
}

pub struct SessionLifecycleManager {
    provider: Arc<dyn TlsProvider>,
    required_version: String,
    state: Mutex<LifecycleState>,
}

impl SessionLifecycleManager {
    pub fn new(provider: Arc<dyn TlsProvider>, required_version: impl Into<String>) -> Self {
        Self {
            provider,
            required_version: required_version.into(),
            state: Mutex::new(LifecycleState {
                active: 0,
                credentials: None,
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn TlsProvider> {
        &self.provider
    }

    pub fn required_version(&self) -> &str {
        &self.required_version
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        // A panic while holding the lock leaves the counter consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register one more session and hand out the shared credentials.
    ///
    /// On the 0→1 transition this checks the provider version, runs global
    /// init and allocates the credential store. If any of that fails the
    /// counter stays untouched.
    pub fn acquire(&self) -> TlsResult<CredentialStore> {
        let mut state = self.lock();

        if state.active == 0 {
            let found = self.provider.version();
            if found != self.required_version {
                log::error!(
                    "{}: version mismatch, required {} but loaded {}",
                    self.provider.name(),
                    self.required_version,
                    found
                );
                return Err(FtpTlsError::version_mismatch(&self.required_version, &found));
            }

            let rc = self.provider.global_init();
            let classifier = self.provider.classifier();
            if classifier.classify(rc) != Classification::Success {
                return Err(FtpTlsError::provider_failure(format!(
                    "global init failed: {}",
                    classifier.describe(rc)
                ))
                .with_code(rc));
            }

            let credentials = match self.provider.allocate_credentials() {
                Ok(c) => CredentialStore::new(c),
                Err(rc) => {
                    self.provider.global_deinit();
                    return Err(FtpTlsError::provider_failure(format!(
                        "credential allocation failed: {}",
                        classifier.describe(rc)
                    ))
                    .with_code(rc));
                }
            };
            log::debug!(
                "{} {} initialised, {:?}",
                self.provider.name(),
                found,
                credentials
            );
            state.credentials = Some(credentials);
        }

        let credentials = match &state.credentials {
            Some(c) => c.clone(),
            None => {
                return Err(FtpTlsError::provider_failure(
                    "credential store missing while sessions are active",
                ))
            }
        };
        state.active += 1;
        log::trace!("TLS session acquired, {} active", state.active);
        Ok(credentials)
    }

    /// Unregister a session. The last release frees the credentials, then
    /// runs global deinit.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.active == 0 {
            log::warn!("TLS session released with no active sessions; ignored");
            return;
        }
        state.active -= 1;
        log::trace!("TLS session released, {} active", state.active);
        if state.active == 0 {
            state.credentials = None;
            self.provider.global_deinit();
            log::debug!("{} deinitialised", self.provider.name());
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    /// Clone of the live credential store, if any session is active.
    pub fn credentials(&self) -> Option<CredentialStore> {
        self.lock().credentials.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::mock::MockProvider;
    use std::thread;

    #[test]
    fn test_init_and_deinit_once_per_transition() {
        let provider = Arc::new(MockProvider::new());
        let mgr = SessionLifecycleManager::new(provider.clone(), MockProvider::VERSION);

        let a = mgr.acquire().unwrap();
        let b = mgr.acquire().unwrap();
        assert!(a.same_as(&b));
        assert_eq!(mgr.active_count(), 2);
        assert_eq!(provider.init_count(), 1);

        mgr.release();
        assert_eq!(provider.deinit_count(), 0);
        mgr.release();
        assert_eq!(provider.deinit_count(), 1);
        assert_eq!(mgr.active_count(), 0);
        assert!(mgr.credentials().is_none());

        mgr.acquire().unwrap();
        assert_eq!(provider.init_count(), 2);
        mgr.release();
        assert_eq!(provider.deinit_count(), 2);
    }

    #[test]
    fn test_credentials_outlive_manager_handle() {
        let provider = Arc::new(MockProvider::new());
        let mgr = SessionLifecycleManager::new(provider, MockProvider::VERSION);
        let held = mgr.acquire().unwrap();
        assert_eq!(held.handle_count(), 2);
        mgr.release();
        // The manager dropped its handle; the session's clone is the last one.
        assert_eq!(held.handle_count(), 1);
    }

    #[test]
    fn test_version_mismatch_leaves_counter() {
        let provider = Arc::new(MockProvider::new());
        let mgr = SessionLifecycleManager::new(provider.clone(), "9.9.9");
        let err = mgr.acquire().unwrap_err();
        assert_eq!(err.kind, crate::tls::error::TlsErrorKind::ProviderVersionMismatch);
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(provider.init_count(), 0);
    }

    #[test]
    fn test_failed_init_leaves_counter() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_global_init(crate::tls::classify::codes::MEMORY_ERROR);
        let mgr = SessionLifecycleManager::new(provider, MockProvider::VERSION);
        let err = mgr.acquire().unwrap_err();
        assert_eq!(err.kind, crate::tls::error::TlsErrorKind::ProviderFailure);
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_extra_release_is_ignored() {
        let provider = Arc::new(MockProvider::new());
        let mgr = SessionLifecycleManager::new(provider.clone(), MockProvider::VERSION);
        mgr.release();
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(provider.deinit_count(), 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let provider = Arc::new(MockProvider::new());
        let mgr = Arc::new(SessionLifecycleManager::new(
            provider.clone(),
            MockProvider::VERSION,
        ));
        // Hold one session so the threads never cross zero.
        let _anchor = mgr.acquire().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let creds = mgr.acquire().unwrap();
                        drop(creds);
                        mgr.release();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(mgr.active_count(), 1);
        assert_eq!(provider.init_count(), 1);
        assert_eq!(provider.deinit_count(), 0);
        mgr.release();
        assert_eq!(provider.deinit_count(), 1);
    }

    #[test]
    fn test_concurrent_transitions_balance() {
        let provider = Arc::new(MockProvider::new());
        let mgr = Arc::new(SessionLifecycleManager::new(
            provider.clone(),
            MockProvider::VERSION,
        ));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let mgr = mgr.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        mgr.acquire().unwrap();
                        mgr.release();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mgr.active_count(), 0);
        assert!(provider.init_count() >= 1);
        assert_eq!(provider.init_count(), provider.deinit_count());
    }
}
