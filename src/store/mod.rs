//! Token Store
//!
//! The single owner of credential state. Every read and write goes through
//! [`TokenStore`]; the backend only persists records.
//!
//! Writes for one provider are ordered by `issued_at`: a write older than the
//! stored credential, or older than the provider's last clear, is rejected and
//! its broadcast suppressed. This keeps a late secondary context from
//! resurrecting a stale or signed-out credential.

pub mod file;
pub mod memory;

pub use file::EncryptedFileBackend;
pub use memory::MemoryBackend;

use crate::models::{Credential, Provider, StoreError};
use crate::session::notifier::{ObservedState, SessionNotifier};
use crate::settings::StorageSettings;
use crate::utils::logging::LoggingHelper;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Persistence for credential records, one per provider
pub trait CredentialBackend: Send + Sync {
    /// Load the record for `provider`
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read or decoded
    fn load(&self, provider: Provider) -> Result<Option<Credential>, StoreError>;

    /// Replace the record for `credential.provider` in one step
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted
    fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Remove the record, returning whether one existed
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be updated
    fn remove(&self, provider: Provider) -> Result<bool, StoreError>;

    /// Remove every record
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be updated
    fn remove_all(&self) -> Result<(), StoreError>;

    fn name(&self) -> &'static str;
}

/// Result of [`TokenStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Written; `revision` is the store's logical write clock after the write
    Written { revision: u64 },
    /// A newer credential (or a later clear) already exists; nothing changed
    Stale,
}

#[derive(Default)]
struct WriteClock {
    revision: u64,
    cleared_at: HashMap<Provider, DateTime<Utc>>,
}

pub struct TokenStore {
    backend: Box<dyn CredentialBackend>,
    notifier: SessionNotifier,
    clock: Mutex<WriteClock>,
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Box<dyn CredentialBackend>, notifier: SessionNotifier) -> Self {
        Self {
            backend,
            notifier,
            clock: Mutex::new(WriteClock::default()),
        }
    }

    /// In-memory store, mostly for tests and mock environments
    #[must_use]
    pub fn in_memory(notifier: SessionNotifier) -> Self {
        Self::new(Box::new(MemoryBackend::default()), notifier)
    }

    /// Open the store described by settings
    ///
    /// # Errors
    ///
    /// Returns an error if the credential file exists but cannot be decrypted
    pub fn from_settings(
        settings: &StorageSettings,
        notifier: SessionNotifier,
    ) -> Result<Self, StoreError> {
        let backend: Box<dyn CredentialBackend> = match &settings.path {
            Some(path) => {
                let backend = EncryptedFileBackend::new(
                    PathBuf::from(path),
                    settings.get_secret().as_bytes(),
                );
                backend.verify()?;
                Box::new(backend)
            }
            None => Box::new(MemoryBackend::default()),
        };
        info!("Credential store initialized ({} backend)", backend.name());
        Ok(Self::new(backend, notifier))
    }

    fn lock_clock(&self) -> MutexGuard<'_, WriteClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert the credential for its provider
    ///
    /// Concurrent writers are serialized; the credential with the later
    /// `issued_at` wins regardless of arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written
    pub fn put(&self, credential: Credential) -> Result<PutOutcome, StoreError> {
        self.write(credential, None)
    }

    /// Like [`put`](Self::put), but the broadcast names the session the
    /// credential was obtained for
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written
    pub fn put_for_session(
        &self,
        credential: Credential,
        correlation_id: &str,
    ) -> Result<PutOutcome, StoreError> {
        self.write(credential, Some(correlation_id.to_string()))
    }

    fn write(
        &self,
        credential: Credential,
        correlation_id: Option<String>,
    ) -> Result<PutOutcome, StoreError> {
        let provider = credential.provider;
        let revision = {
            let mut clock = self.lock_clock();

            if let Some(cleared_at) = clock.cleared_at.get(&provider) {
                if credential.issued_at < *cleared_at {
                    LoggingHelper::log_stale_write_rejected(
                        provider,
                        &credential.issued_at.to_rfc3339(),
                        &format!("clear at {}", cleared_at.to_rfc3339()),
                    );
                    return Ok(PutOutcome::Stale);
                }
            }

            if let Some(current) = self.backend.load(provider)? {
                if current.issued_at > credential.issued_at {
                    LoggingHelper::log_stale_write_rejected(
                        provider,
                        &credential.issued_at.to_rfc3339(),
                        &current.issued_at.to_rfc3339(),
                    );
                    return Ok(PutOutcome::Stale);
                }
            }

            self.backend.save(&credential)?;
            clock.revision += 1;
            clock.revision
        };

        debug!("Stored credential for {provider} (revision {revision})");
        self.notifier.notify(
            provider,
            ObservedState::CredentialStored {
                issued_at: credential.issued_at,
                correlation_id,
            },
        );
        Ok(PutOutcome::Written { revision })
    }

    /// Pure read; never refreshes or calls out
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read
    pub fn get(&self, provider: Provider) -> Result<Option<Credential>, StoreError> {
        self.backend.load(provider)
    }

    /// Whether a stored credential exists and has not expired at `now`
    #[must_use]
    pub fn is_valid_at(&self, provider: Provider, now: DateTime<Utc>) -> bool {
        match self.get(provider) {
            Ok(Some(credential)) => !credential.is_expired_at(now),
            Ok(None) => false,
            Err(e) => {
                warn!("Treating {provider} as unauthenticated, store read failed: {e}");
                false
            }
        }
    }

    #[must_use]
    pub fn is_valid(&self, provider: Provider) -> bool {
        self.is_valid_at(provider, Utc::now())
    }

    /// Remove the credential for `provider` and tell observers
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be updated
    pub fn clear(&self, provider: Provider) -> Result<bool, StoreError> {
        let removed = {
            let mut clock = self.lock_clock();
            let removed = self.backend.remove(provider)?;
            clock.cleared_at.insert(provider, Utc::now());
            clock.revision += 1;
            removed
        };
        info!("Cleared credential for {provider} (existed: {removed})");
        self.notifier
            .notify(provider, ObservedState::CredentialCleared);
        Ok(removed)
    }

    /// Remove every credential and tell observers
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be updated
    pub fn clear_all(&self) -> Result<(), StoreError> {
        {
            let mut clock = self.lock_clock();
            self.backend.remove_all()?;
            let now = Utc::now();
            for provider in Provider::ALL {
                clock.cleared_at.insert(provider, now);
            }
            clock.revision += 1;
        }
        info!("Cleared all stored credentials");
        for provider in Provider::ALL {
            self.notifier
                .notify(provider, ObservedState::CredentialCleared);
        }
        Ok(())
    }

    /// Current value of the logical write clock
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.lock_clock().revision
    }

    #[must_use]
    pub fn notifier(&self) -> &SessionNotifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> TokenStore {
        TokenStore::in_memory(SessionNotifier::new())
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let store = store();
        let credential = Credential::new(Provider::Ebay, "tok1", Utc::now(), 7200)
            .with_refresh_token("r1")
            .with_scope(["sell.inventory"]);

        assert!(matches!(
            store.put(credential.clone()).unwrap(),
            PutOutcome::Written { revision: 1 }
        ));
        assert_eq!(store.get(Provider::Ebay).unwrap(), Some(credential));
        assert_eq!(store.get(Provider::Google).unwrap(), None);
    }

    #[test]
    fn test_later_issued_at_wins_in_either_order() {
        let t1 = Utc::now() - Duration::seconds(10);
        let t2 = Utc::now();
        let older = Credential::new(Provider::Ebay, "old", t1, 3600);
        let newer = Credential::new(Provider::Ebay, "new", t2, 3600);

        let in_order = store();
        in_order.put(older.clone()).unwrap();
        in_order.put(newer.clone()).unwrap();
        assert_eq!(in_order.get(Provider::Ebay).unwrap().unwrap().issued_at, t2);

        let reversed = store();
        reversed.put(newer).unwrap();
        assert_eq!(reversed.put(older).unwrap(), PutOutcome::Stale);
        assert_eq!(reversed.get(Provider::Ebay).unwrap().unwrap().issued_at, t2);
    }

    #[test]
    fn test_stale_write_broadcast_suppressed() {
        let notifier = SessionNotifier::new();
        let store = TokenStore::in_memory(notifier.clone());
        let t2 = Utc::now();
        store
            .put(Credential::new(Provider::Ebay, "new", t2, 60))
            .unwrap();

        let mut events = notifier.subscribe();
        store
            .put(Credential::new(Provider::Ebay, "old", t2 - Duration::seconds(5), 60))
            .unwrap();
        assert!(events.try_recv().is_none());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_is_valid_checks_expiry_at_read_time() {
        let store = store();
        let now = Utc::now();
        store
            .put(Credential::new(Provider::Google, "tok", now, 60))
            .unwrap();

        assert!(store.is_valid_at(Provider::Google, now));
        assert!(!store.is_valid_at(Provider::Google, now + Duration::seconds(60)));
        assert!(!store.is_valid_at(Provider::Ebay, now));
    }

    #[test]
    fn test_clear_notifies_and_blocks_stale_resurrection() {
        let notifier = SessionNotifier::new();
        let store = TokenStore::in_memory(notifier.clone());
        let issued = Utc::now() - Duration::seconds(1);
        store
            .put(Credential::new(Provider::Ebay, "tok", issued, 3600))
            .unwrap();

        let mut events = notifier.subscribe();
        assert!(store.clear(Provider::Ebay).unwrap());
        assert_eq!(
            events.try_recv().map(|e| e.state),
            Some(ObservedState::CredentialCleared)
        );

        // A secondary context delivering the pre-clear credential late
        assert_eq!(
            store
                .put(Credential::new(Provider::Ebay, "tok", issued, 3600))
                .unwrap(),
            PutOutcome::Stale
        );
        assert_eq!(store.get(Provider::Ebay).unwrap(), None);

        let fresh =
            Credential::new(Provider::Ebay, "fresh", Utc::now() + Duration::seconds(1), 3600);
        assert!(matches!(
            store.put(fresh).unwrap(),
            PutOutcome::Written { .. }
        ));
    }

    #[test]
    fn test_clear_all() {
        let store = store();
        store
            .put(Credential::new(Provider::Ebay, "a", Utc::now(), 60))
            .unwrap();
        store
            .put(Credential::new(Provider::Google, "b", Utc::now(), 60))
            .unwrap();
        store.clear_all().unwrap();
        assert!(!store.is_valid(Provider::Ebay));
        assert!(!store.is_valid(Provider::Google));
    }
}
