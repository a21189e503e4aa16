//! Popup/code-exchange provider
//!
//! Authorization runs in a secondary context; the callback carries a `code`
//! that is exchanged at the token endpoint. Each attempt keeps its redirect
//! URI and PKCE verifier until the code is exchanged or the attempt is
//! discarded.

use crate::models::callback::STATE_PARAM;
use crate::models::{AuthError, CallbackEvent, Credential, Provider, RefreshError};
use crate::oauth::pkce::{PkcePair, CHALLENGE_METHOD};
use crate::oauth::{
    authorization_url, parse_code_callback, AuthorizationRequest, Delivery, ParsedCallback,
    ProviderAdapter, TokenEndpoint, TokenGrant,
};
use crate::settings::AdapterFlow;
use crate::utils::logging::LoggingHelper;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct PendingAuthorization {
    redirect_uri: String,
    code_verifier: Option<String>,
}

pub struct PopupAdapter {
    provider: Provider,
    authorization_endpoint: String,
    client_id: String,
    scopes: Vec<String>,
    extra_params: HashMap<String, String>,
    use_pkce: bool,
    token_endpoint: Arc<dyn TokenEndpoint>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl PopupAdapter {
    #[must_use]
    pub fn new(
        provider: Provider,
        authorization_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        token_endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            provider,
            authorization_endpoint: authorization_endpoint.into(),
            client_id: client_id.into(),
            scopes: Vec::new(),
            extra_params: HashMap::new(),
            use_pkce: true,
            token_endpoint,
            pending: Mutex::new(HashMap::new()),
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

    #[must_use]
    pub fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingAuthorization>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of attempts still holding a verifier
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[async_trait]
impl ProviderAdapter for PopupAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn flow(&self) -> AdapterFlow {
        AdapterFlow::Popup
    }

    fn build_authorization_request(
        &self,
        correlation_id: &str,
        redirect_target: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        let scope = self.scopes.join(" ");
        let pkce = self.use_pkce.then(PkcePair::generate);

        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_target),
            ("scope", scope.as_str()),
            (STATE_PARAM, correlation_id),
        ];
        if let Some(pair) = &pkce {
            params.push(("code_challenge", pair.challenge()));
            params.push(("code_challenge_method", CHALLENGE_METHOD));
        }
        params.extend(
            self.extra_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let target = authorization_url(&self.authorization_endpoint, params)?;
        LoggingHelper::log_authorization_target(self.provider, &target, &self.scopes);

        self.pending().insert(
            correlation_id.to_string(),
            PendingAuthorization {
                redirect_uri: redirect_target.to_string(),
                code_verifier: pkce.map(PkcePair::into_verifier),
            },
        );

        Ok(AuthorizationRequest {
            target: Some(target),
            delivery: Delivery::SecondaryContext,
            scopes: self.scopes.clone(),
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
        let (code, correlation_id) = match parsed {
            ParsedCallback::Code {
                code,
                correlation_id,
            } => (code, correlation_id),
            ParsedCallback::Token { response, .. } => {
                return Ok(Credential::from_token_response(
                    self.provider,
                    response,
                    Utc::now(),
                ))
            }
        };

        // Verifiers are single use; a replayed code finds nothing here
        let pending = self.pending().remove(&correlation_id).ok_or_else(|| {
            AuthError::protocol("no pending authorization for this state")
        })?;

        LoggingHelper::log_token_exchange_start(self.provider);
        let response = self
            .token_endpoint
            .request_token(TokenGrant::AuthorizationCode {
                code,
                redirect_uri: pending.redirect_uri,
                code_verifier: pending.code_verifier,
            })
            .await?;

        let credential = Credential::from_token_response(self.provider, response, Utc::now());
        LoggingHelper::log_token_exchange_summary(&credential);
        Ok(credential)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, RefreshError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(RefreshError::MissingRefreshToken(self.provider))?;

        let response = self
            .token_endpoint
            .request_token(TokenGrant::RefreshToken {
                refresh_token,
                scope: credential.scope.iter().cloned().collect(),
            })
            .await
            .map_err(RefreshError::Rejected)?;

        Ok(Credential::from_token_response(
            self.provider,
            response,
            Utc::now(),
        ))
    }

    fn discard(&self, correlation_id: &str) {
        self.pending().remove(correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallbackKind, ContextId, TokenResponse};
    use crate::testing::StubTokenEndpoint;

    const REDIRECT: &str = "https://app.example.com/auth/callback";

    fn adapter(endpoint: Arc<StubTokenEndpoint>) -> PopupAdapter {
        PopupAdapter::new(
            Provider::Ebay,
            "https://auth.ebay.example/oauth2/authorize",
            "client-123",
            endpoint,
        )
        .with_scopes(vec!["sell.inventory".to_string(), "sell.account".to_string()])
    }

    fn code_event(code: &str, state: &str) -> CallbackEvent {
        let mut payload = HashMap::new();
        payload.insert("code".to_string(), code.to_string());
        payload.insert("state".to_string(), state.to_string());
        CallbackEvent::new(
            CallbackKind::CodeExchange,
            Provider::Ebay,
            payload,
            ContextId::from("popup"),
        )
    }

    #[test]
    fn test_authorization_request_carries_state_scope_and_challenge() {
        let adapter = adapter(Arc::new(StubTokenEndpoint::default()));
        let request = adapter.build_authorization_request("X", REDIRECT).unwrap();
        assert_eq!(request.delivery, Delivery::SecondaryContext);

        let target = request.target.unwrap();
        let query: HashMap<String, String> = target.query_pairs().into_owned().collect();
        assert_eq!(query["state"], "X");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "sell.inventory sell.account");
        assert_eq!(query["redirect_uri"], REDIRECT);
        assert_eq!(query["code_challenge_method"], "S256");
        assert!(!query["code_challenge"].is_empty());
    }

    #[tokio::test]
    async fn test_exchange_sends_verifier_once() {
        let endpoint = Arc::new(StubTokenEndpoint::with_response(TokenResponse {
            access_token: "tok1".to_string(),
            expires_in: Some(7200),
            ..TokenResponse::default()
        }));
        let adapter = adapter(endpoint.clone());
        adapter.build_authorization_request("X", REDIRECT).unwrap();

        let parsed = adapter.parse_callback(&code_event("abc", "X"), "X").unwrap();
        let credential = adapter.exchange(parsed.clone()).await.unwrap();
        assert_eq!(credential.access_token, "tok1");
        assert_eq!(
            credential.expires_at,
            credential.issued_at + chrono::Duration::seconds(7200)
        );

        let grants = endpoint.grants();
        assert!(matches!(
            &grants[0],
            TokenGrant::AuthorizationCode { code, code_verifier: Some(_), redirect_uri }
                if code == "abc" && redirect_uri == REDIRECT
        ));

        // Replay of the same callback
        assert!(matches!(adapter.exchange(parsed).await, Err(AuthError::Protocol(_))));
        assert_eq!(endpoint.grants().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let adapter = adapter(Arc::new(StubTokenEndpoint::default()));
        let credential = Credential::new(Provider::Ebay, "tok", Utc::now(), 60);
        assert_eq!(
            adapter.refresh(&credential).await.unwrap_err(),
            RefreshError::MissingRefreshToken(Provider::Ebay)
        );
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_wrapped() {
        let endpoint = Arc::new(StubTokenEndpoint::failing(AuthError::exchange(
            Some(400),
            "invalid_grant",
        )));
        let adapter = adapter(endpoint);
        let credential =
            Credential::new(Provider::Ebay, "tok", Utc::now(), 60).with_refresh_token("r1");
        assert!(matches!(
            adapter.refresh(&credential).await,
            Err(RefreshError::Rejected(AuthError::Exchange { status: Some(400), .. }))
        ));
    }

    #[test]
    fn test_discard_drops_pending_verifier() {
        let adapter = adapter(Arc::new(StubTokenEndpoint::default()));
        adapter.build_authorization_request("X", REDIRECT).unwrap();
        assert_eq!(adapter.pending_count(), 1);
        adapter.discard("X");
        assert_eq!(adapter.pending_count(), 0);
    }
}
