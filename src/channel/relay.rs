//! Secondary-context side of a popup flow
//!
//! The popup lands on the application's callback page once the provider is
//! done. The relay reads the final URL, reports the result to the opener as an
//! `AUTH_SUCCESS` or `AUTH_ERROR` message and closes the popup.

use crate::channel::{ChannelPort, SecondaryContext};
use crate::models::{CallbackEvent, CallbackKind, ChannelMessage, MessageType, Provider};
use log::{info, warn};
use url::Url;

pub struct PopupRelay {
    provider: Provider,
    port: ChannelPort,
}

impl PopupRelay {
    #[must_use]
    pub fn new(provider: Provider, port: ChannelPort) -> Self {
        Self { provider, port }
    }

    /// Translate the provider's final redirect into a message for the opener
    #[must_use]
    pub fn message_for(&self, final_url: &Url) -> ChannelMessage {
        let event =
            CallbackEvent::from_redirect_url(self.provider, final_url, self.port.source().clone());
        let correlation_id = event.correlation_id().unwrap_or_default().to_string();

        if event.kind == CallbackKind::Error {
            return ChannelMessage::error(
                self.provider,
                correlation_id,
                event.param("error").unwrap_or("unknown_error"),
                event.param("error_description").unwrap_or_default(),
            );
        }
        if correlation_id.is_empty() {
            warn!("{} redirect carried no state parameter", self.provider);
        }
        ChannelMessage::success(self.provider, correlation_id, event.payload)
    }

    /// Post the result and close the hosting context
    pub fn relay(&self, final_url: &Url, context: &dyn SecondaryContext) -> MessageType {
        let message = self.message_for(final_url);
        let kind = message.kind;
        info!("Relaying {kind:?} for {} to opener", self.provider);
        self.port.post(message);
        context.close();
        kind
    }
}
