use crate::models::{AuthError, Credential, Provider, Session, SessionState};
use crate::session::coordinator::SessionCoordinator;
use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

/// Latest view of a session, published on every transition
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub session: Session,
    /// Set exactly once, when the session reaches a terminal state
    pub outcome: Option<Result<Credential, AuthError>>,
}

impl SessionUpdate {
    pub(crate) fn pending(session: Session) -> Self {
        Self {
            session,
            outcome: None,
        }
    }
}

/// Caller's handle on one authentication attempt
///
/// Dropping the handle does not cancel the session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    provider: Provider,
    correlation_id: String,
    authorization_url: Option<Url>,
    updates: watch::Receiver<SessionUpdate>,
    coordinator: SessionCoordinator,
}

impl SessionHandle {
    pub(crate) fn new(
        session: &Session,
        authorization_url: Option<Url>,
        updates: watch::Receiver<SessionUpdate>,
        coordinator: SessionCoordinator,
    ) -> Self {
        Self {
            session_id: session.session_id,
            provider: session.provider,
            correlation_id: session.correlation_id.clone(),
            authorization_url,
            updates,
            coordinator,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Value sent to the provider as `state`
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub fn authorization_url(&self) -> Option<&Url> {
        self.authorization_url.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.updates.borrow().session.clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.updates.borrow().session.state
    }

    /// The result, if the session has finished
    #[must_use]
    pub fn outcome(&self) -> Option<Result<Credential, AuthError>> {
        self.updates.borrow().outcome.clone()
    }

    /// Receiver that yields every published update
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<SessionUpdate> {
        self.updates.clone()
    }

    /// Wait for the session to finish
    ///
    /// # Errors
    ///
    /// Returns the session's failure: provider, protocol, exchange, timeout
    /// or cancellation
    pub async fn wait(&self) -> Result<Credential, AuthError> {
        let mut updates = self.updates.clone();
        loop {
            let outcome = updates.borrow_and_update().outcome.clone();
            if let Some(outcome) = outcome {
                return outcome;
            }
            if updates.changed().await.is_err() {
                let outcome = updates.borrow().outcome.clone();
                return outcome.unwrap_or_else(|| {
                    Err(AuthError::Internal(
                        "session ended without a result".to_string(),
                    ))
                });
            }
        }
    }

    /// Ask the coordinator to cancel; `false` if already finished
    pub fn cancel(&self) -> bool {
        self.coordinator.cancel_session(self.session_id)
    }
}
