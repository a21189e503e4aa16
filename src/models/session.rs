use crate::models::{AuthError, ContextId, Provider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one authentication attempt
///
/// ```text
/// idle -> requesting -> awaiting_callback -> exchanging -> enriching_profile -> succeeded
///                                   \_____________________/
///                                 (implicit-token providers)
/// ```
/// `error`, `cancelled` and `timeout` are reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    AwaitingCallback,
    Exchanging,
    EnrichingProfile,
    Succeeded,
    Error,
    Cancelled,
    Timeout,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded
                | SessionState::Error
                | SessionState::Cancelled
                | SessionState::Timeout
        )
    }

    /// Whether `self -> next` is an edge of the state machine
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{
            AwaitingCallback, Cancelled, EnrichingProfile, Error, Exchanging, Idle, Requesting,
            Succeeded, Timeout,
        };

        if self.is_terminal() {
            return false;
        }
        match next {
            Error | Cancelled | Timeout => true,
            Requesting => self == Idle,
            AwaitingCallback => self == Requesting,
            Exchanging => self == AwaitingCallback,
            EnrichingProfile => matches!(self, AwaitingCallback | Exchanging),
            Succeeded => self == EnrichingProfile,
            Idle => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::AwaitingCallback => "awaiting_callback",
            SessionState::Exchanging => "exchanging",
            SessionState::EnrichingProfile => "enriching_profile",
            SessionState::Succeeded => "succeeded",
            SessionState::Error => "error",
            SessionState::Cancelled => "cancelled",
            SessionState::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight or completed authentication attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: Uuid,
    pub provider: Provider,
    /// Round-tripped through the provider in the `state` parameter
    pub correlation_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub secondary_context: Option<ContextId>,
    pub last_error: Option<AuthError>,
}

impl Session {
    #[must_use]
    pub fn new(
        provider: Provider,
        correlation_id: String,
        flow_timeout: std::time::Duration,
    ) -> Self {
        let started_at = Utc::now();
        let timeout =
            chrono::Duration::from_std(flow_timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            session_id: Uuid::new_v4(),
            provider,
            correlation_id,
            state: SessionState::Idle,
            started_at,
            deadline: started_at + timeout,
            secondary_context: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            SessionState::Idle,
            SessionState::Requesting,
            SessionState::AwaitingCallback,
            SessionState::Exchanging,
            SessionState::EnrichingProfile,
            SessionState::Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_implicit_flow_skips_exchange() {
        assert!(SessionState::AwaitingCallback.can_transition_to(SessionState::EnrichingProfile));
    }

    #[test]
    fn test_no_skipping_required_predecessors() {
        assert!(!SessionState::Requesting.can_transition_to(SessionState::Exchanging));
        assert!(!SessionState::AwaitingCallback.can_transition_to(SessionState::Succeeded));
        assert!(!SessionState::Idle.can_transition_to(SessionState::AwaitingCallback));
        assert!(!SessionState::Exchanging.can_transition_to(SessionState::AwaitingCallback));
    }

    #[test]
    fn test_failure_states_reachable_from_non_terminal() {
        for state in [
            SessionState::Idle,
            SessionState::Requesting,
            SessionState::AwaitingCallback,
            SessionState::Exchanging,
            SessionState::EnrichingProfile,
        ] {
            for failure in [SessionState::Error, SessionState::Cancelled, SessionState::Timeout] {
                assert!(state.can_transition_to(failure));
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            SessionState::Succeeded,
            SessionState::Error,
            SessionState::Cancelled,
            SessionState::Timeout,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(SessionState::Error));
            assert!(!terminal.can_transition_to(SessionState::Succeeded));
        }
    }

    #[test]
    fn test_session_deadline() {
        let session = Session::new(Provider::Google, "abc".to_string(), Duration::from_secs(120));
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(
            session.deadline - session.started_at,
            chrono::Duration::seconds(120)
        );
        assert!(session.is_active());
    }
}
