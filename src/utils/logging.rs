// Centralized logging utilities to keep multi-field log lines consistent
use crate::models::{AuthError, Credential, Provider, SessionState};
use log::{debug, info, warn};
use uuid::Uuid;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log adapter registration at startup
    pub fn log_adapter_registered(provider: Provider, flow: &str) {
        info!("✅ {provider} adapter registered ({flow} flow)");
    }

    /// Log that a provider is configured but disabled
    pub fn log_provider_disabled(provider: &str) {
        info!("⏭️  Provider {provider} is disabled, skipping");
    }

    /// Log that a provider is missing required settings
    pub fn log_provider_not_configured(provider: &str, reason: &str) {
        warn!("❌ Provider {provider} not configured: {reason}");
    }

    /// Log the start of an authentication flow
    pub fn log_flow_started(provider: Provider, session_id: Uuid, timeout_secs: u64) {
        info!("🔐 Starting {provider} authentication (session {session_id}, deadline {timeout_secs}s)");
    }

    /// Log the authorization target without its query string
    pub fn log_authorization_target(provider: Provider, url: &url::Url, scopes: &[String]) {
        debug!(
            "Built {provider} authorization request to {}://{}{} with scopes: {}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.path(),
            scopes.join(" ")
        );
    }

    /// Log a state transition
    pub fn log_transition(
        provider: Provider,
        session_id: Uuid,
        from: SessionState,
        to: SessionState,
    ) {
        debug!("Session {session_id} ({provider}): {from} -> {to}");
    }

    /// Log a callback that could not be matched to an active session
    pub fn log_callback_ignored(provider: Provider, reason: &str) {
        warn!("Ignoring {provider} callback: {reason}");
    }

    /// Log token exchange start
    pub fn log_token_exchange_start(provider: Provider) {
        info!("🔄 Exchanging authorization code for tokens with {provider}");
    }

    /// Log a token exchange summary without token material
    pub fn log_token_exchange_summary(credential: &Credential) {
        info!(
            "Token exchange summary for {}: access_token={} chars, refresh_token={}, token_type={}, scope={:?}, expires_at={}",
            credential.provider,
            credential.access_token.len(),
            if credential.has_refresh_token() { "present" } else { "missing" },
            credential.token_type,
            credential.scope,
            credential.expires_at
        );
    }

    /// Log a store write that lost the ordering race
    pub fn log_stale_write_rejected(provider: Provider, incoming: &str, current: &str) {
        warn!(
            "Rejected stale credential write for {provider}: issued_at {incoming} is older than {current}"
        );
    }

    /// Log a session reaching a terminal state
    pub fn log_session_finished(
        provider: Provider,
        session_id: Uuid,
        state: SessionState,
        error: Option<&AuthError>,
    ) {
        match error {
            Some(err) => info!("Session {session_id} ({provider}) finished as {state}: {err}"),
            None => info!("✅ Session {session_id} ({provider}) finished as {state}"),
        }
    }

    /// Log refresh outcome
    pub fn log_refresh_result(provider: Provider, result: Result<&Credential, &str>) {
        match result {
            Ok(credential) => info!(
                "🔄 Refreshed {provider} credential, new expiry {}",
                credential.expires_at
            ),
            Err(reason) => warn!("Refresh for {provider} failed: {reason}"),
        }
    }
}
