//! Synthetic provider for test and demo environments
//!
//! Completes every attempt on its own with a fabricated code, then mints a
//! credential on exchange. Delay and failure can be injected.

use crate::models::callback::STATE_PARAM;
use crate::models::{
    AuthError, CallbackEvent, CallbackKind, ContextId, Credential, Provider, RefreshError,
};
use crate::oauth::{
    parse_code_callback, AuthorizationRequest, Delivery, ParsedCallback, ProviderAdapter,
};
use crate::settings::AdapterFlow;
use crate::utils::crypto::generate_nonce;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const MOCK_CODE: &str = "mock-authorization-code";
const MOCK_LIFETIME_SECS: u64 = 3600;

pub struct MockAdapter {
    provider: Provider,
    lifetime_secs: u64,
    exchange_delay: Option<Duration>,
    failure: Option<AuthError>,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

impl MockAdapter {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            lifetime_secs: MOCK_LIFETIME_SECS,
            exchange_delay: None,
            failure: None,
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime_secs: u64) -> Self {
        self.lifetime_secs = lifetime_secs;
        self
    }

    /// Hold every exchange and refresh for `delay`
    #[must_use]
    pub fn with_exchange_delay(mut self, delay: Duration) -> Self {
        self.exchange_delay = Some(delay);
        self
    }

    /// Fail every exchange and refresh with `error`
    #[must_use]
    pub fn with_failure(mut self, error: AuthError) -> Self {
        self.failure = Some(error);
        self
    }

    #[must_use]
    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    async fn mint(&self) -> Result<Credential, AuthError> {
        if let Some(delay) = self.exchange_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(Credential::new(
            self.provider,
            format!("mock-{}-{}", self.provider, generate_nonce(12)),
            Utc::now(),
            self.lifetime_secs,
        )
        .with_refresh_token(format!("mock-refresh-{}", generate_nonce(12))))
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn flow(&self) -> AdapterFlow {
        AdapterFlow::Mock
    }

    fn build_authorization_request(
        &self,
        correlation_id: &str,
        _redirect_target: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        let mut payload = HashMap::new();
        payload.insert("code".to_string(), MOCK_CODE.to_string());
        payload.insert(STATE_PARAM.to_string(), correlation_id.to_string());
        let event = CallbackEvent::new(
            CallbackKind::CodeExchange,
            self.provider,
            payload,
            ContextId::from("mock"),
        );

        Ok(AuthorizationRequest {
            target: None,
            delivery: Delivery::Immediate(event),
            scopes: Vec::new(),
        })
    }

    fn parse_callback(
        &self,
        event: &CallbackEvent,
        expected_correlation: &str,
    ) -> Result<ParsedCallback, AuthError> {
        parse_code_callback(self.provider, event, expected_correlation)
    }

    async fn exchange(&self, parsed: ParsedCallback) -> Result<Credential, AuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        match parsed {
            ParsedCallback::Code { .. } => self.mint().await,
            ParsedCallback::Token { response, .. } => Ok(Credential::from_token_response(
                self.provider,
                response,
                Utc::now(),
            )),
        }
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, RefreshError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if !credential.has_refresh_token() {
            return Err(RefreshError::MissingRefreshToken(self.provider));
        }
        self.mint().await.map_err(RefreshError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_immediate_callback_round_trips() {
        let adapter = MockAdapter::new(Provider::Ebay).with_lifetime(120);
        let request = adapter.build_authorization_request("X", "").unwrap();
        let Delivery::Immediate(event) = request.delivery else {
            panic!("mock adapter must deliver immediately");
        };

        let credential = adapter
            .exchange(adapter.parse_callback(&event, "X").unwrap())
            .await
            .unwrap();
        assert!(credential.access_token.starts_with("mock-ebay-"));
        assert_eq!(
            credential.expires_at,
            credential.issued_at + chrono::Duration::seconds(120)
        );
        assert_eq!(adapter.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let adapter = MockAdapter::new(Provider::Google)
            .with_failure(AuthError::exchange(Some(503), "unavailable"));
        let parsed = ParsedCallback::Code {
            code: MOCK_CODE.to_string(),
            correlation_id: "X".to_string(),
        };
        assert_eq!(
            adapter.exchange(parsed).await.unwrap_err(),
            AuthError::exchange(Some(503), "unavailable")
        );
    }
}
