//! Error taxonomy for authentication sessions
//!
//! Every failure of a session is resolved on its handle as an [`AuthError`].
//! The store and refresh paths have their own error types which convert into
//! [`AuthError::Internal`] when they surface inside a running session.

use crate::models::Provider;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a session ended as `cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller asked for the session to stop
    Requested,
    /// A newer session for the same provider replaced this one
    Superseded,
    /// The secondary context was closed before a callback arrived
    ContextClosed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "cancelled by caller"),
            CancelReason::Superseded => write!(f, "superseded by a newer session"),
            CancelReason::ContextClosed => write!(f, "secondary context was closed"),
        }
    }
}

/// Authentication failure delivered on a session handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The provider reported an error (consent denied, outage)
    #[error("{provider} reported an error ({code}): {message}")]
    Provider {
        provider: Provider,
        code: String,
        message: String,
    },
    /// Malformed or missing callback parameters, correlation mismatch
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The code-for-token exchange collaborator failed
    #[error("Token exchange failed: {message}")]
    Exchange {
        status: Option<u16>,
        message: String,
    },
    /// The total-flow deadline elapsed
    #[error("Authentication timed out after {0:?}")]
    Timeout(Duration),
    /// The user or caller aborted
    #[error("Authentication cancelled: {0}")]
    Cancelled(CancelReason),
    /// Store or configuration fault while a session was running
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification used by consumers to pick UI and retry guidance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Provider,
    Protocol,
    Exchange,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether a caller-driven retry makes sense
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Exchange | ErrorKind::Timeout)
    }

    /// Whether the failure should be shown to the user as an error banner
    #[must_use]
    pub fn is_user_facing(self) -> bool {
        !matches!(self, ErrorKind::Cancelled | ErrorKind::Protocol)
    }
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Provider { .. } => ErrorKind::Provider,
            AuthError::Protocol(_) => ErrorKind::Protocol,
            AuthError::Exchange { .. } => ErrorKind::Exchange,
            AuthError::Timeout(_) => ErrorKind::Timeout,
            AuthError::Cancelled(_) => ErrorKind::Cancelled,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        AuthError::Protocol(message.into())
    }

    pub fn exchange(status: Option<u16>, message: impl Into<String>) -> Self {
        AuthError::Exchange {
            status,
            message: message.into(),
        }
    }
}

/// Credential persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Credential store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Credential store cryptography failed: {0}")]
    Crypto(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// Token refresh errors
///
/// Cloneable so one in-flight refresh can resolve every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("No credential stored for {0}")]
    NoCredential(Provider),
    #[error("Credential for {0} has no refresh token")]
    MissingRefreshToken(Provider),
    #[error("Provider {0} does not support token refresh")]
    Unsupported(Provider),
    #[error("Refresh rejected: {0}")]
    Rejected(AuthError),
    #[error("Credential store failed during refresh: {0}")]
    Store(String),
}

impl From<StoreError> for RefreshError {
    fn from(err: StoreError) -> Self {
        RefreshError::Store(err.to_string())
    }
}

impl RefreshError {
    /// Whether the stored credential should be dropped after this failure
    #[must_use]
    pub fn invalidates_credential(&self) -> bool {
        matches!(
            self,
            RefreshError::Rejected(_) | RefreshError::MissingRefreshToken(_)
        )
    }
}
