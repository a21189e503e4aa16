//! Callback events and the cross-context message schema
//!
//! Provider results reach the coordinator either as redirect parameters
//! (same context) or as a [`ChannelMessage`] posted by a secondary context.
//! Both are normalised into a [`CallbackEvent`].

use crate::models::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Parameter carrying the correlation id through the provider
pub const STATE_PARAM: &str = "state";

/// Identifies one execution context (main application, popup, sibling tab)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    CodeExchange,
    ImplicitToken,
    Error,
}

/// Data arriving from a provider, consumed at most once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    pub kind: CallbackKind,
    pub provider: Provider,
    pub payload: HashMap<String, String>,
    pub source_context: ContextId,
}

impl CallbackEvent {
    #[must_use]
    pub fn new(
        kind: CallbackKind,
        provider: Provider,
        payload: HashMap<String, String>,
        source_context: ContextId,
    ) -> Self {
        Self {
            kind,
            provider,
            payload,
            source_context,
        }
    }

    /// Build an event from a provider's final redirect URL
    ///
    /// Query and fragment parameters are merged; fragment values win, as
    /// implicit flows deliver tokens there.
    #[must_use]
    pub fn from_redirect_url(provider: Provider, url: &Url, source_context: ContextId) -> Self {
        let mut payload: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            payload.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        let kind = infer_kind(&payload);
        Self::new(kind, provider, payload, source_context)
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.payload
            .get(STATE_PARAM)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.payload
            .get(name)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Classify raw callback parameters
#[must_use]
pub fn infer_kind(payload: &HashMap<String, String>) -> CallbackKind {
    if payload.contains_key("error") {
        CallbackKind::Error
    } else if payload.contains_key("access_token") && !payload.contains_key("code") {
        CallbackKind::ImplicitToken
    } else {
        CallbackKind::CodeExchange
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "AUTH_SUCCESS")]
    AuthSuccess,
    #[serde(rename = "AUTH_ERROR")]
    AuthError,
}

/// Wire schema for messages between contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub provider: Provider,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    #[serde(default)]
    pub payload: HashMap<String, String>,
}

impl ChannelMessage {
    #[must_use]
    pub fn success(
        provider: Provider,
        correlation_id: impl Into<String>,
        payload: HashMap<String, String>,
    ) -> Self {
        Self {
            kind: MessageType::AuthSuccess,
            provider,
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    #[must_use]
    pub fn error(
        provider: Provider,
        correlation_id: impl Into<String>,
        error: &str,
        description: &str,
    ) -> Self {
        let mut payload = HashMap::new();
        payload.insert("error".to_string(), error.to_string());
        if !description.is_empty() {
            payload.insert("error_description".to_string(), description.to_string());
        }
        Self {
            kind: MessageType::AuthError,
            provider,
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    /// Convert into a callback event attributed to `source`
    ///
    /// The envelope correlation id fills the `state` parameter when the
    /// payload does not carry one.
    #[must_use]
    pub fn into_callback_event(self, source: ContextId) -> CallbackEvent {
        let mut payload = self.payload;
        payload
            .entry(STATE_PARAM.to_string())
            .or_insert(self.correlation_id);
        let kind = match self.kind {
            MessageType::AuthError => {
                payload
                    .entry("error".to_string())
                    .or_insert_with(|| "unknown_error".to_string());
                CallbackKind::Error
            }
            MessageType::AuthSuccess => infer_kind(&payload),
        };
        CallbackEvent::new(kind, self.provider, payload, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_message_wire_format() {
        let raw = r#"{"type":"AUTH_SUCCESS","provider":"ebay","correlationId":"X","payload":{"code":"abc"}}"#;
        let message: ChannelMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.kind, MessageType::AuthSuccess);
        assert_eq!(message.provider, Provider::Ebay);
        assert_eq!(message.correlation_id, "X");

        let serialized = serde_json::to_value(&message).unwrap();
        assert_eq!(serialized["type"], "AUTH_SUCCESS");
        assert_eq!(serialized["correlationId"], "X");
    }

    #[test]
    fn test_success_message_becomes_code_exchange_event() {
        let mut payload = HashMap::new();
        payload.insert("code".to_string(), "abc".to_string());
        let event = ChannelMessage::success(Provider::Ebay, "X", payload)
            .into_callback_event(ContextId::from("popup-1"));
        assert_eq!(event.kind, CallbackKind::CodeExchange);
        assert_eq!(event.correlation_id(), Some("X"));
        assert_eq!(event.source_context.as_str(), "popup-1");
    }

    #[test]
    fn test_error_message_becomes_error_event() {
        let event = ChannelMessage::error(Provider::Ebay, "X", "access_denied", "")
            .into_callback_event(ContextId::generate());
        assert_eq!(event.kind, CallbackKind::Error);
        assert_eq!(event.param("error"), Some("access_denied"));
        assert_eq!(event.param("error_description"), None);
    }

    #[test]
    fn test_event_from_implicit_redirect_fragment() {
        let url = Url::parse(
            "https://app.example.com/auth/callback#access_token=tok&token_type=Bearer&expires_in=3600&state=abc",
        )
        .unwrap();
        let event = CallbackEvent::from_redirect_url(Provider::Google, &url, ContextId::generate());
        assert_eq!(event.kind, CallbackKind::ImplicitToken);
        assert_eq!(event.param("access_token"), Some("tok"));
        assert_eq!(event.correlation_id(), Some("abc"));
    }

    #[test]
    fn test_event_from_code_redirect_query() {
        let url = Url::parse("https://app.example.com/auth/callback?code=c1&state=s1").unwrap();
        let event = CallbackEvent::from_redirect_url(Provider::Ebay, &url, ContextId::generate());
        assert_eq!(event.kind, CallbackKind::CodeExchange);
        assert_eq!(event.param("code"), Some("c1"));
    }

    #[test]
    fn test_error_redirect_is_classified_as_error() {
        let url = Url::parse("https://app.example.com/cb?error=access_denied&state=s1").unwrap();
        let event = CallbackEvent::from_redirect_url(Provider::Ebay, &url, ContextId::generate());
        assert_eq!(event.kind, CallbackKind::Error);
    }

    #[test]
    fn test_blank_state_is_not_a_correlation_id() {
        let mut payload = HashMap::new();
        payload.insert("state".to_string(), "  ".to_string());
        let event = CallbackEvent::new(
            CallbackKind::CodeExchange,
            Provider::Ebay,
            payload,
            ContextId::generate(),
        );
        assert_eq!(event.correlation_id(), None);
    }
}
