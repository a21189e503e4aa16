//! Redirect-based provider (implicit flow)
//!
//! The top-level context navigates to the provider and comes back with the
//! tokens in the URL fragment. There is no exchange step and no refresh.

use crate::models::callback::STATE_PARAM;
use crate::models::{AuthError, CallbackEvent, ContextId, Credential, Provider, RefreshError};
use crate::oauth::{
    authorization_url, parse_token_callback, AuthorizationRequest, Delivery, ParsedCallback,
    ProviderAdapter,
};
use crate::settings::AdapterFlow;
use crate::utils::logging::LoggingHelper;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use url::Url;

pub struct RedirectAdapter {
    provider: Provider,
    authorization_endpoint: String,
    client_id: String,
    scopes: Vec<String>,
    extra_params: HashMap<String, String>,
}

impl RedirectAdapter {
    #[must_use]
    pub fn new(
        provider: Provider,
        authorization_endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            authorization_endpoint: authorization_endpoint.into(),
            client_id: client_id.into(),
            scopes: Vec::new(),
            extra_params: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_extra_params(mut self, params: HashMap<String, String>) -> Self {
        self.extra_params = params;
        self
    }

    /// Callback event for the landing page the provider redirected to
    #[must_use]
    pub fn callback_from_url(&self, landing_url: &Url, source: ContextId) -> CallbackEvent {
        CallbackEvent::from_redirect_url(self.provider, landing_url, source)
    }
}

#[async_trait]
impl ProviderAdapter for RedirectAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn flow(&self) -> AdapterFlow {
        AdapterFlow::Redirect
    }

    fn build_authorization_request(
        &self,
        correlation_id: &str,
        redirect_target: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        let scope = self.scopes.join(" ");
        let mut params = vec![
            ("response_type", "token"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_target),
            ("scope", scope.as_str()),
            (STATE_PARAM, correlation_id),
        ];
        params.extend(
            self.extra_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let target = authorization_url(&self.authorization_endpoint, params)?;
        LoggingHelper::log_authorization_target(self.provider, &target, &self.scopes);

        Ok(AuthorizationRequest {
            target: Some(target),
            delivery: Delivery::SameContext,
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
            ParsedCallback::Token { response, .. } => Ok(Credential::from_token_response(
                self.provider,
                response,
                Utc::now(),
            )),
            ParsedCallback::Code { .. } => Err(AuthError::protocol(format!(
                "{} does not exchange authorization codes",
                self.provider
            ))),
        }
    }

    async fn refresh(&self, _credential: &Credential) -> Result<Credential, RefreshError> {
        Err(RefreshError::Unsupported(self.provider))
    }
}
