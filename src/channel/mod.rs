//! Cross-Context Channel
//!
//! Message passing between the context that starts a flow and the secondary
//! contexts (popups) it spawns. Messages posted by a secondary context travel
//! as an [`Envelope`] tagged with the sender's origin; subscriptions drop any
//! envelope whose origin differs from the application's before a filter or
//! consumer sees it.

pub mod relay;
pub mod watch;

pub use relay::PopupRelay;
pub use watch::{watch_secondary_context, WatchGuard, MIN_POLL_INTERVAL};

use crate::models::{AuthError, ChannelMessage, ContextId};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use url::{Origin, Url};

/// Envelopes buffered per subscriber
const CHANNEL_CAPACITY: usize = 32;

/// An independently executing context hosting a provider's UI
pub trait SecondaryContext: Send + Sync {
    fn id(&self) -> &ContextId;

    fn is_closed(&self) -> bool;

    /// Close the context; closing twice is harmless
    fn close(&self);

    /// Hand a message to the context, returning `false` if it is gone
    fn deliver(&self, message: &ChannelMessage) -> bool;
}

/// Opens authorization targets on behalf of the coordinator
pub trait ContextLauncher: Send + Sync {
    /// Navigate the current top-level context
    ///
    /// # Errors
    ///
    /// Returns an error if navigation cannot be started
    fn navigate(&self, target: &Url) -> Result<(), AuthError>;

    /// Spawn a secondary context showing `target`
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be opened (e.g. blocked popup)
    fn open_secondary(&self, target: &Url) -> Result<Arc<dyn SecondaryContext>, AuthError>;
}

/// A message together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Serialized origin of the sending context, e.g. `https://app.example.com`
    pub origin: String,
    pub source: ContextId,
    pub message: ChannelMessage,
}

type ContextRegistry = HashMap<ContextId, Arc<dyn SecondaryContext>>;

struct ChannelInner {
    expected_origin: Origin,
    sender: broadcast::Sender<Envelope>,
    contexts: Mutex<ContextRegistry>,
}

#[derive(Clone)]
pub struct CrossContextChannel {
    inner: Arc<ChannelInner>,
}

impl CrossContextChannel {
    /// Create a channel accepting messages from `expected_origin` only
    ///
    /// # Errors
    ///
    /// Returns an error if `expected_origin` is not an absolute URL
    pub fn new(expected_origin: &str) -> Result<Self, url::ParseError> {
        let expected_origin = Url::parse(expected_origin)?.origin();
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(ChannelInner {
                expected_origin,
                sender,
                contexts: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn contexts(&self) -> MutexGuard<'_, ContextRegistry> {
        self.inner
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn expected_origin(&self) -> String {
        self.inner.expected_origin.ascii_serialization()
    }

    /// Make a secondary context addressable by [`send`](Self::send)
    pub fn attach(&self, context: Arc<dyn SecondaryContext>) {
        debug!("Attached secondary context {}", context.id());
        self.contexts().insert(context.id().clone(), context);
    }

    pub fn detach(&self, id: &ContextId) -> Option<Arc<dyn SecondaryContext>> {
        self.contexts().remove(id)
    }

    /// Deliver `message` to a specific secondary context
    ///
    /// A missing or closed target is logged and reported as `false`.
    pub fn send(&self, target: &ContextId, message: ChannelMessage) -> bool {
        let Some(context) = self.contexts().get(target).cloned() else {
            warn!("Dropping {:?} message: context {target} is unknown", message.kind);
            return false;
        };
        if context.is_closed() || !context.deliver(&message) {
            warn!("Dropping {:?} message: context {target} is closed", message.kind);
            self.detach(target);
            return false;
        }
        true
    }

    /// Close and forget a secondary context
    pub fn close_context(&self, id: &ContextId) {
        if let Some(context) = self.detach(id) {
            if !context.is_closed() {
                debug!("Closing secondary context {id}");
                context.close();
            }
        }
    }

    /// Post from a context to every subscriber
    pub fn post(&self, origin: &str, source: ContextId, message: ChannelMessage) {
        let envelope = Envelope {
            origin: origin.to_string(),
            source,
            message,
        };
        // No subscribers means nobody is waiting for this flow any more
        if self.inner.sender.send(envelope).is_err() {
            debug!("Channel message posted with no subscribers");
        }
    }

    /// The posting side handed to a secondary context
    #[must_use]
    pub fn port(&self, source: ContextId, origin: impl Into<String>) -> ChannelPort {
        ChannelPort {
            channel: self.clone(),
            source,
            origin: origin.into(),
        }
    }

    /// Messages from the expected origin that also satisfy `predicate`
    ///
    /// Each subscription starts from the next posted message; earlier ones
    /// are not replayed.
    pub fn subscribe<P>(&self, predicate: P) -> ChannelSubscription
    where
        P: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        ChannelSubscription {
            receiver: self.inner.sender.subscribe(),
            expected_origin: self.inner.expected_origin.clone(),
            predicate: Box::new(predicate),
        }
    }
}

/// Sending half bound to one context and origin
#[derive(Clone)]
pub struct ChannelPort {
    channel: CrossContextChannel,
    source: ContextId,
    origin: String,
}

impl ChannelPort {
    #[must_use]
    pub fn source(&self) -> &ContextId {
        &self.source
    }

    pub fn post(&self, message: ChannelMessage) {
        self.channel
            .post(&self.origin, self.source.clone(), message);
    }

    /// Post a message received in its JSON wire form
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` does not match the message schema
    pub fn post_json(&self, raw: &str) -> Result<(), serde_json::Error> {
        let message: ChannelMessage = serde_json::from_str(raw)?;
        self.post(message);
        Ok(())
    }
}

pub struct ChannelSubscription {
    receiver: broadcast::Receiver<Envelope>,
    expected_origin: Origin,
    predicate: Box<dyn Fn(&Envelope) -> bool + Send + Sync>,
}

impl ChannelSubscription {
    /// Next accepted envelope, or `None` once the channel is gone
    pub async fn next(&mut self) -> Option<Envelope> {
        loop {
            let envelope = match self.receiver.recv().await {
                Ok(envelope) => envelope,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Channel subscriber lagged, skipped {skipped} messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            if !self.is_trusted(&envelope.origin) {
                warn!(
                    "Rejected {:?} message from untrusted origin {}",
                    envelope.message.kind, envelope.origin
                );
                continue;
            }
            if (self.predicate)(&envelope) {
                return Some(envelope);
            }
        }
    }

    fn is_trusted(&self, origin: &str) -> bool {
        Url::parse(origin).is_ok_and(|url| url.origin() == self.expected_origin)
    }
}
