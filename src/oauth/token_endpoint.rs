//! Token endpoint collaborator
//!
//! The code-exchange provider trades an authorization code (or a refresh
//! token) for a [`TokenResponse`]. The transport is hidden behind
//! [`TokenEndpoint`] so sessions can run against a stub.

use crate::models::{AuthError, TokenResponse};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;

/// What is being traded at the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        scope: Vec<String>,
    },
}

impl TokenGrant {
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::AuthorizationCode { .. } => "authorization_code",
            TokenGrant::RefreshToken { .. } => "refresh_token",
        }
    }
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Perform one token request
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Exchange`] on transport failures, non-success
    /// statuses and unparseable bodies
    async fn request_token(&self, grant: TokenGrant) -> Result<TokenResponse, AuthError>;
}

/// OAuth error body (RFC 6749 §5.2)
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Form-encoded POST to a provider's token URL
pub struct HttpTokenEndpoint {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpTokenEndpoint {
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.filter(|s| !s.is_empty()),
        }
    }

    fn form_params(&self, grant: &TokenGrant) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("grant_type", grant.grant_type().to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.clone()));
        }

        match grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                params.push(("code", code.clone()));
                params.push(("redirect_uri", redirect_uri.clone()));
                if let Some(verifier) = code_verifier {
                    params.push(("code_verifier", verifier.clone()));
                }
            }
            TokenGrant::RefreshToken {
                refresh_token,
                scope,
            } => {
                params.push(("refresh_token", refresh_token.clone()));
                if !scope.is_empty() {
                    params.push(("scope", scope.join(" ")));
                }
            }
        }
        params
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(&self, grant: TokenGrant) -> Result<TokenResponse, AuthError> {
        debug!("POST {} ({})", self.token_url, grant.grant_type());
        let response = self
            .http_client
            .post(&self.token_url)
            .form(&self.form_params(&grant))
            .send()
            .await
            .map_err(|e| AuthError::exchange(None, format!("Token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                AuthError::exchange(Some(status.as_u16()), format!("Failed to read response: {e}"))
            })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {description}", err.error),
                    None => err.error,
                },
                Err(_) if body.trim().is_empty() => status.to_string(),
                Err(_) => body,
            };
            warn!("Token endpoint returned {status}: {message}");
            return Err(AuthError::exchange(Some(status.as_u16()), message));
        }

        serde_json::from_str(&body).map_err(|e| {
            AuthError::exchange(
                Some(status.as_u16()),
                format!("Failed to parse token response: {e}"),
            )
        })
    }
}
