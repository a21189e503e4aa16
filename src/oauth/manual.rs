//! Manual token entry
//!
//! No authorization UI: the user pastes a token obtained elsewhere and the
//! session treats it like an implicit-flow callback.

use crate::models::callback::STATE_PARAM;
use crate::models::{
    AuthError, CallbackEvent, CallbackKind, ContextId, Credential, Provider, RefreshError,
};
use crate::oauth::{
    parse_token_callback, AuthorizationRequest, Delivery, ParsedCallback, ProviderAdapter,
};
use crate::settings::AdapterFlow;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;

pub struct ManualAdapter {
    provider: Provider,
    scopes: Vec<String>,
}

impl ManualAdapter {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Callback event for a token typed in by the user
    #[must_use]
    pub fn token_event(
        provider: Provider,
        access_token: &str,
        correlation_id: &str,
        source: ContextId,
    ) -> CallbackEvent {
        let mut payload = HashMap::new();
        payload.insert("access_token".to_string(), access_token.trim().to_string());
        payload.insert(STATE_PARAM.to_string(), correlation_id.to_string());
        CallbackEvent::new(CallbackKind::ImplicitToken, provider, payload, source)
    }
}

#[async_trait]
impl ProviderAdapter for ManualAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn flow(&self) -> AdapterFlow {
        AdapterFlow::Manual
    }

    fn build_authorization_request(
        &self,
        _correlation_id: &str,
        _redirect_target: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        Ok(AuthorizationRequest {
            target: None,
            delivery: Delivery::Direct,
            scopes: self.scopes.clone(),
        })
    }

    fn parse_callback(
        &self,
        event: &CallbackEvent,
        expected_correlation: &str,
    ) -> Result<ParsedCallback, AuthError> {
        parse_token_callback(self.provider, event, expected_correlation)
    }

    async fn exchange(&self, parsed: ParsedCallback) -> Result<Credential, AuthError> {
        match parsed {
            ParsedCallback::Token { response, .. } => {
                let credential =
                    Credential::from_token_response(self.provider, response, Utc::now());
                Ok(if credential.scope.is_empty() {
                    credential.with_scope(self.scopes.iter().cloned())
                } else {
                    credential
                })
            }
            ParsedCallback::Code { .. } => Err(AuthError::protocol(
                "manual entry accepts access tokens only",
            )),
        }
    }

    async fn refresh(&self, _credential: &Credential) -> Result<Credential, RefreshError> {
        Err(RefreshError::Unsupported(self.provider))
    }
}
