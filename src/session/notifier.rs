//! Authentication state broadcasts
//!
//! Delivery is best-effort: publishing never waits on subscribers, and a
//! subscriber that falls too far behind skips the oldest events.

use crate::models::{Provider, SessionState};
use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped
pub const NOTIFIER_CAPACITY: usize = 64;

/// What changed for a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedState {
    /// A session moved to a new state
    Session(SessionState),
    /// A credential was written to the token store, tagged with the
    /// correlation id of the session that obtained it, if any
    CredentialStored {
        issued_at: DateTime<Utc>,
        correlation_id: Option<String>,
    },
    /// The stored credential was removed; cached "is authenticated" assumptions are void
    CredentialCleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub provider: Provider,
    pub state: ObservedState,
}

#[derive(Debug, Clone)]
pub struct SessionNotifier {
    sender: broadcast::Sender<AuthEvent>,
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionNotifier {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFIER_CAPACITY);
        Self { sender }
    }

    pub fn notify(&self, provider: Provider, state: ObservedState) {
        // No subscribers is not an error
        let _ = self.sender.send(AuthEvent { provider, state });
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Stream of `(provider, state)` events; dropping it unsubscribes
pub struct SessionSubscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl SessionSubscription {
    /// Next event, or `None` once the notifier is gone
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Auth event subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event without waiting
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_subscribers_receive_events() {
        let notifier = SessionNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify(Provider::Ebay, ObservedState::Session(SessionState::Requesting));

        let expected = AuthEvent {
            provider: Provider::Ebay,
            state: ObservedState::Session(SessionState::Requesting),
        };
        assert_eq!(first.recv().await, Some(expected.clone()));
        assert_eq!(second.recv().await, Some(expected));
    }

    #[test]
    fn test_notify_without_subscribers_does_not_block() {
        let notifier = SessionNotifier::new();
        for _ in 0..(NOTIFIER_CAPACITY * 2) {
            notifier.notify(Provider::Google, ObservedState::CredentialCleared);
        }
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_skips_oldest_events() {
        let notifier = SessionNotifier::new();
        let mut slow = notifier.subscribe();
        for _ in 0..(NOTIFIER_CAPACITY + 10) {
            notifier.notify(Provider::Google, ObservedState::CredentialCleared);
        }
        notifier.notify(Provider::Ebay, ObservedState::Session(SessionState::Succeeded));

        let mut last = None;
        while let Some(event) = slow.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last.map(|e| e.provider),
            Some(Provider::Ebay)
        );
    }

    #[test]
    fn test_subscription_only_sees_later_events() {
        let notifier = SessionNotifier::new();
        notifier.notify(Provider::Google, ObservedState::CredentialCleared);
        let mut late = notifier.subscribe();
        assert!(late.try_recv().is_none());
    }
}
