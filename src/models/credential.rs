use crate::models::Provider;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifetime assumed when a provider omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Longest lifetime honoured from `expires_in`; larger values are clamped
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Token type assumed when a provider omits `token_type`
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Grant issued by a provider for one authenticated identity
///
/// Expiry is always evaluated against a caller-supplied clock; a credential
/// never caches whether it is still valid.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential whose expiry is `issued_at + expires_in`
    #[must_use]
    pub fn new(
        provider: Provider,
        access_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_in_secs: u64,
    ) -> Self {
        Self {
            provider,
            access_token: access_token.into(),
            refresh_token: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            scope: BTreeSet::new(),
            issued_at,
            expires_at: expiry_after(issued_at, expires_in_secs),
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Build a credential from a token endpoint (or implicit fragment) response
    #[must_use]
    pub fn from_token_response(
        provider: Provider,
        response: TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            provider,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response
                .token_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            scope: response
                .scope
                .as_deref()
                .map(parse_scope)
                .unwrap_or_default(),
            issued_at,
            expires_at: expiry_after(issued_at, expires_in),
        }
    }

    /// A credential is expired once `now >= expires_at`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check if the credential expires within `margin` of `now`
    #[must_use]
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin: std::time::Duration) -> bool {
        let margin = Duration::from_std(margin).unwrap_or_else(|_| Duration::zero());
        now.checked_add_signed(margin)
            .map_or(true, |threshold| self.expires_at <= threshold)
    }

    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

// Token material stays out of debug output and logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("access_token", &format!("<{} chars>", self.access_token.len()))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<present>"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn parse_scope(raw: &str) -> BTreeSet<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// `issued_at + expires_in`, with the provider-supplied lifetime clamped
fn expiry_after(issued_at: DateTime<Utc>, expires_in_secs: u64) -> DateTime<Utc> {
    let lifetime = i64::try_from(expires_in_secs.min(MAX_TOKEN_LIFETIME_SECS)).unwrap_or(0);
    issued_at
        .checked_add_signed(Duration::seconds(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
