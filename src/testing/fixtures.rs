//! Pre-built test data and wiring

use crate::channel::{ContextLauncher, CrossContextChannel};
use crate::models::{Credential, Provider};
use crate::session::{CoordinatorConfig, SessionCoordinatorBuilder, SessionNotifier};
use crate::settings::{AdapterFlow, AuthSettings, ProviderSettings};
use crate::store::{EncryptedFileBackend, TokenStore};
use crate::testing::constants::{APP_ORIGIN, POLL_INTERVAL_MS, REDIRECT_URI, TEST_STORAGE_SECRET};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct TestFixtures;

impl TestFixtures {
    /// In-memory store with its own notifier
    #[must_use]
    pub fn store() -> Arc<TokenStore> {
        Arc::new(TokenStore::in_memory(SessionNotifier::new()))
    }

    /// Encrypted file store at `path`
    #[must_use]
    pub fn file_store(path: &Path) -> TokenStore {
        TokenStore::new(
            Box::new(EncryptedFileBackend::new(path.to_path_buf(), TEST_STORAGE_SECRET)),
            SessionNotifier::new(),
        )
    }

    /// Channel trusting [`APP_ORIGIN`] only
    ///
    /// # Panics
    ///
    /// Never; the origin constant is a valid URL
    #[must_use]
    pub fn channel() -> CrossContextChannel {
        CrossContextChannel::new(APP_ORIGIN).expect("test origin is a valid URL")
    }

    /// Timings suitable for tests: fast popup polling, default deadlines
    #[must_use]
    pub fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            popup_poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            redirect_uri: REDIRECT_URI.to_string(),
            ..CoordinatorConfig::default()
        }
    }

    /// Coordinator builder over a fresh in-memory store and channel
    #[must_use]
    pub fn coordinator(launcher: Arc<dyn ContextLauncher>) -> SessionCoordinatorBuilder {
        Self::coordinator_with_store(Self::store(), launcher)
    }

    #[must_use]
    pub fn coordinator_with_store(
        store: Arc<TokenStore>,
        launcher: Arc<dyn ContextLauncher>,
    ) -> SessionCoordinatorBuilder {
        crate::session::SessionCoordinator::builder(store, Self::channel(), launcher)
            .with_config(Self::config())
    }

    /// Credential issued at `issued_at` that lives for an hour
    #[must_use]
    pub fn credential(
        provider: Provider,
        access_token: &str,
        issued_at: DateTime<Utc>,
    ) -> Credential {
        Credential::new(provider, access_token, issued_at, 3600)
            .with_refresh_token(format!("{access_token}-refresh"))
    }

    /// Settings with a redirect provider and a popup provider fully configured
    #[must_use]
    pub fn settings() -> AuthSettings {
        let mut settings = AuthSettings::default();
        settings.application.origin = APP_ORIGIN.to_string();

        let mut google = ProviderSettings::new(Provider::Google, AdapterFlow::Redirect);
        google.authorization_endpoint =
            Some("https://accounts.google.example/o/oauth2/v2/auth".to_string());
        google.client_id = Some("google-client".to_string());
        google.scopes = vec!["openid".to_string(), "email".to_string()];

        let mut ebay = ProviderSettings::new(Provider::Ebay, AdapterFlow::Popup);
        ebay.authorization_endpoint =
            Some("https://auth.ebay.example/oauth2/authorize".to_string());
        ebay.token_endpoint = Some("https://api.ebay.example/identity/v1/oauth2/token".to_string());
        ebay.client_id = Some("ebay-client".to_string());
        ebay.client_secret = Some("ebay-secret".to_string());
        ebay.scopes = vec!["sell.inventory".to_string()];

        settings.providers = vec![google, ebay];
        settings
    }
}
