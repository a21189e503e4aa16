//! Provider adapters
//!
//! One [`ProviderAdapter`] per configured provider. An adapter builds the
//! authorization request, validates callbacks and turns them into a
//! [`Credential`]. How the result travels back (same-context redirect,
//! secondary context, direct entry) is described by [`Delivery`] so the
//! coordinator never branches on the provider itself.

pub mod manual;
pub mod mock;
pub mod pkce;
pub mod popup;
pub mod redirect;
pub mod refresh;
pub mod registry;
pub mod token_endpoint;

pub use manual::ManualAdapter;
pub use mock::MockAdapter;
pub use popup::PopupAdapter;
pub use redirect::RedirectAdapter;
pub use refresh::RefreshCoordinator;
pub use registry::AdapterRegistry;
pub use token_endpoint::{HttpTokenEndpoint, TokenEndpoint, TokenGrant};

use crate::models::{
    AuthError, CallbackEvent, CallbackKind, Credential, Provider, RefreshError, TokenResponse,
};
use crate::settings::AdapterFlow;
use async_trait::async_trait;
use url::Url;

/// How the provider's result reaches the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The top-level context navigates away; tokens land in the Token Store
    /// (or arrive through `handle_callback` from the landing page)
    SameContext,
    /// A secondary context is opened; the result arrives on the channel
    SecondaryContext,
    /// No authorization UI; the caller submits the result directly
    Direct,
    /// The adapter already has the result
    Immediate(CallbackEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Where to send the user; `None` when there is nothing to open
    pub target: Option<Url>,
    pub delivery: Delivery,
    pub scopes: Vec<String>,
}

/// A validated callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCallback {
    /// Authorization code still to be exchanged
    Code { code: String, correlation_id: String },
    /// Tokens delivered directly (implicit or manual)
    Token {
        response: TokenResponse,
        correlation_id: String,
    },
}

impl ParsedCallback {
    #[must_use]
    pub fn requires_exchange(&self) -> bool {
        matches!(self, ParsedCallback::Code { .. })
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        match self {
            ParsedCallback::Code { correlation_id, .. }
            | ParsedCallback::Token { correlation_id, .. } => correlation_id,
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn flow(&self) -> AdapterFlow;

    /// Build the authorization target for one attempt
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if the adapter is misconfigured
    fn build_authorization_request(
        &self,
        correlation_id: &str,
        redirect_target: &str,
    ) -> Result<AuthorizationRequest, AuthError>;

    /// Validate required parameters and the correlation id
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Provider`] for provider-reported errors and
    /// [`AuthError::Protocol`] for missing parameters or a mismatched state
    fn parse_callback(
        &self,
        event: &CallbackEvent,
        expected_correlation: &str,
    ) -> Result<ParsedCallback, AuthError>;

    /// Turn a parsed callback into a credential
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Exchange`] if the token endpoint fails
    async fn exchange(&self, parsed: ParsedCallback) -> Result<Credential, AuthError>;

    /// Trade the refresh token for a new credential
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Unsupported`] for providers without refresh
    async fn refresh(&self, credential: &Credential) -> Result<Credential, RefreshError>;

    /// Forget per-attempt state for a session that ended without exchange
    fn discard(&self, _correlation_id: &str) {}
}

/// Reject callbacks that do not belong to the expected attempt
///
/// # Errors
///
/// Returns [`AuthError::Protocol`] on a provider or state mismatch
pub fn verify_correlation<'a>(
    provider: Provider,
    event: &'a CallbackEvent,
    expected_correlation: &str,
) -> Result<&'a str, AuthError> {
    if event.provider != provider {
        return Err(AuthError::protocol(format!(
            "callback for {} delivered to {provider} adapter",
            event.provider
        )));
    }
    match event.correlation_id() {
        Some(state) if state == expected_correlation => Ok(state),
        Some(_) => Err(AuthError::protocol("state parameter does not match")),
        None => Err(AuthError::protocol("missing state parameter")),
    }
}

/// Provider-reported error carried by an `error` callback
#[must_use]
pub fn provider_error(provider: Provider, event: &CallbackEvent) -> AuthError {
    let code = event.param("error").unwrap_or("unknown_error").to_string();
    let message = event
        .param("error_description")
        .map_or_else(|| code.clone(), ToString::to_string);
    AuthError::Provider {
        provider,
        code,
        message,
    }
}

/// Parse callbacks for flows that deliver tokens directly
///
/// # Errors
///
/// Returns an error for provider errors, mismatched state, code callbacks and
/// a missing or blank `access_token`
pub fn parse_token_callback(
    provider: Provider,
    event: &CallbackEvent,
    expected_correlation: &str,
) -> Result<ParsedCallback, AuthError> {
    let correlation_id = verify_correlation(provider, event, expected_correlation)?.to_string();
    if event.kind == CallbackKind::Error {
        return Err(provider_error(provider, event));
    }

    let access_token = event.param("access_token").ok_or_else(|| {
        if event.param("code").is_some() {
            AuthError::protocol("expected access_token, received authorization code")
        } else {
            AuthError::protocol("missing access_token")
        }
    })?;
    let expires_in = match event.param("expires_in") {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| AuthError::protocol(format!("invalid expires_in: {raw}")))?,
        ),
        None => None,
    };

    Ok(ParsedCallback::Token {
        response: TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: event.param("refresh_token").map(ToString::to_string),
            expires_in,
            token_type: event.param("token_type").map(ToString::to_string),
            scope: event.param("scope").map(ToString::to_string),
        },
        correlation_id,
    })
}

/// Parse callbacks for code-exchange flows
///
/// # Errors
///
/// Returns an error for provider errors, mismatched state and a missing code
pub fn parse_code_callback(
    provider: Provider,
    event: &CallbackEvent,
    expected_correlation: &str,
) -> Result<ParsedCallback, AuthError> {
    let correlation_id = verify_correlation(provider, event, expected_correlation)?.to_string();
    if event.kind == CallbackKind::Error {
        return Err(provider_error(provider, event));
    }
    let code = event
        .param("code")
        .ok_or_else(|| AuthError::protocol("missing authorization code"))?;
    Ok(ParsedCallback::Code {
        code: code.to_string(),
        correlation_id,
    })
}

/// Append `params` to an authorization endpoint URL
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if `endpoint` is not a valid URL
pub fn authorization_url<'a, I>(endpoint: &str, params: I) -> Result<Url, AuthError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut url = Url::parse(endpoint).map_err(|e| {
        AuthError::Internal(format!("Invalid authorization endpoint {endpoint}: {e}"))
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}
