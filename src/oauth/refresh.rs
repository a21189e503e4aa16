//! Single-flight token refresh
//!
//! Refresh tokens are often single use, so two overlapping refreshes for the
//! same provider would invalidate each other. Callers arriving while a refresh
//! is in flight await that refresh's result instead of starting their own.

use crate::models::{Credential, Provider, RefreshError};
use crate::oauth::ProviderAdapter;
use crate::store::{PutOutcome, TokenStore};
use crate::utils::logging::LoggingHelper;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

type RefreshResult = Result<Credential, RefreshError>;
type InFlight = HashMap<Provider, Arc<OnceCell<RefreshResult>>>;

#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Mutex<InFlight>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh the stored credential for the adapter's provider
    ///
    /// # Errors
    ///
    /// Returns the refresh failure; failures that make the credential unusable
    /// also remove it from the store
    pub async fn refresh(
        &self,
        adapter: &dyn ProviderAdapter,
        store: &TokenStore,
    ) -> RefreshResult {
        let provider = adapter.provider();
        let cell = Arc::clone(
            self.in_flight()
                .entry(provider)
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let result = cell
            .get_or_init(|| Self::run(adapter, store))
            .await
            .clone();

        let mut in_flight = self.in_flight();
        if in_flight
            .get(&provider)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&provider);
        }
        result
    }

    async fn run(adapter: &dyn ProviderAdapter, store: &TokenStore) -> RefreshResult {
        let provider = adapter.provider();
        let current = store
            .get(provider)?
            .ok_or(RefreshError::NoCredential(provider))?;

        debug!("Refreshing {provider} credential");
        match adapter.refresh(&current).await {
            Ok(mut refreshed) => {
                if !refreshed.has_refresh_token() {
                    refreshed.refresh_token = current.refresh_token.clone();
                }
                if refreshed.scope.is_empty() {
                    refreshed.scope = current.scope.clone();
                }
                match store.put(refreshed.clone())? {
                    PutOutcome::Written { .. } => {
                        LoggingHelper::log_refresh_result(provider, Ok(&refreshed));
                        Ok(refreshed)
                    }
                    PutOutcome::Stale => {
                        // Someone stored a newer credential meanwhile; prefer it
                        store
                            .get(provider)?
                            .ok_or(RefreshError::NoCredential(provider))
                    }
                }
            }
            Err(err) => {
                LoggingHelper::log_refresh_result(provider, Err(err.to_string().as_str()));
                if err.invalidates_credential() {
                    if let Err(clear_err) = store.clear(provider) {
                        warn!(
                            "Failed to clear {provider} credential after refresh failure: {clear_err}"
                        );
                    }
                }
                Err(err)
            }
        }
    }
}
