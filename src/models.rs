use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod auth;
pub mod callback;
pub mod credential;
pub mod session;

pub use auth::{AuthError, CancelReason, ErrorKind, RefreshError, StoreError};
pub use callback::{CallbackEvent, CallbackKind, ChannelMessage, ContextId, MessageType};
pub use credential::{Credential, TokenResponse, MAX_TOKEN_LIFETIME_SECS};
pub use session::{Session, SessionState};

/// Identity systems the product can authenticate against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Redirect-based single sign-on
    Google,
    /// Popup/code-exchange marketplace account
    Ebay,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Google, Provider::Ebay];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Ebay => "ebay",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "ebay" => Ok(Provider::Ebay),
            other => Err(format!("Unsupported provider: {other}")),
        }
    }
}
