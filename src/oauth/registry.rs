use crate::models::Provider;
use crate::oauth::{
    HttpTokenEndpoint, ManualAdapter, MockAdapter, PopupAdapter, ProviderAdapter, RedirectAdapter,
};
use crate::settings::{AdapterFlow, AuthSettings, ProviderSettings};
use crate::utils::logging::LoggingHelper;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// Adapters by provider, built once at startup
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every enabled, fully configured provider
    ///
    /// Providers with missing settings are logged and skipped.
    #[must_use]
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let mut registry = Self::new();
        for provider_settings in &settings.providers {
            if !provider_settings.enabled {
                LoggingHelper::log_provider_disabled(provider_settings.name.as_str());
                continue;
            }
            match Self::build_adapter(provider_settings) {
                Ok(adapter) => registry.register(adapter),
                Err(reason) => LoggingHelper::log_provider_not_configured(
                    &provider_settings.display_name(),
                    &reason,
                ),
            }
        }
        info!(
            "Authentication providers available: {:?}",
            registry.providers()
        );
        registry
    }

    fn build_adapter(settings: &ProviderSettings) -> Result<Arc<dyn ProviderAdapter>, String> {
        let provider = settings.name;
        let adapter: Arc<dyn ProviderAdapter> = match settings.flow {
            AdapterFlow::Redirect => Arc::new(
                RedirectAdapter::new(
                    provider,
                    required(settings.authorization_endpoint.clone(), "authorization_endpoint")?,
                    required(settings.get_client_id(), "client_id")?,
                )
                .with_scopes(settings.scopes.clone())
                .with_extra_params(settings.extra_auth_params.clone()),
            ),
            AdapterFlow::Popup => {
                let client_id = required(settings.get_client_id(), "client_id")?;
                let token_endpoint = HttpTokenEndpoint::new(
                    required(settings.token_endpoint.clone(), "token_endpoint")?,
                    client_id.clone(),
                    settings.get_client_secret(),
                );
                Arc::new(
                    PopupAdapter::new(
                        provider,
                        required(
                            settings.authorization_endpoint.clone(),
                            "authorization_endpoint",
                        )?,
                        client_id,
                        Arc::new(token_endpoint),
                    )
                    .with_scopes(settings.scopes.clone())
                    .with_extra_params(settings.extra_auth_params.clone())
                    .with_pkce(settings.use_pkce),
                )
            }
            AdapterFlow::Manual => {
                Arc::new(ManualAdapter::new(provider).with_scopes(settings.scopes.clone()))
            }
            AdapterFlow::Mock => Arc::new(MockAdapter::new(provider)),
        };
        Ok(adapter)
    }

    /// Add or replace the adapter for its provider
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        LoggingHelper::log_adapter_registered(adapter.provider(), adapter.flow().as_str());
        self.adapters.insert(adapter.provider(), adapter);
    }

    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("missing {field}"))
}
