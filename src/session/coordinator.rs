//! Session Coordinator
//!
//! Runs authentication attempts end to end: asks the provider adapter for an
//! authorization target, opens it, waits for the callback, exchanges it,
//! writes the credential and resolves the caller's [`SessionHandle`].
//!
//! There is at most one active session per provider. Starting a new one
//! cancels the previous session (`CancelReason::Superseded`). Every terminal
//! transition removes the session from the active map under the lock, so each
//! session finishes exactly once no matter which timer, callback or caller
//! gets there first.

use crate::channel::{
    watch_secondary_context, ContextLauncher, CrossContextChannel, Envelope, WatchGuard,
};
use crate::models::{
    AuthError, CallbackEvent, CancelReason, ChannelMessage, ContextId, Credential, Provider,
    RefreshError, Session, SessionState, StoreError,
};
use crate::oauth::{
    AdapterRegistry, AuthorizationRequest, Delivery, ManualAdapter, ProviderAdapter,
    RefreshCoordinator,
};
use crate::session::handle::{SessionHandle, SessionUpdate};
use crate::session::notifier::{ObservedState, SessionNotifier, SessionSubscription};
use crate::session::supervisor::{TimeoutSupervisor, TimerKind};
use crate::settings::AuthSettings;
use crate::store::{PutOutcome, TokenStore};
use crate::utils::crypto::generate_correlation_id;
use crate::utils::logging::LoggingHelper;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

/// Wait after a secondary context closes before treating the flow as
/// abandoned, so a result it posted just before closing is handled first
pub const CLOSED_CONTEXT_SETTLE: Duration = Duration::from_millis(100);

/// Session timing and redirect defaults
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub flow_timeout: Duration,
    pub enrichment_grace: Duration,
    pub popup_poll_interval: Duration,
    pub wait_for_profile: bool,
    pub refresh_margin: Duration,
    pub redirect_uri: String,
}

impl CoordinatorConfig {
    #[must_use]
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self {
            flow_timeout: settings.session.flow_timeout(),
            enrichment_grace: settings.session.enrichment_grace(),
            popup_poll_interval: settings.session.popup_poll_interval(),
            wait_for_profile: settings.session.wait_for_profile,
            refresh_margin: settings.session.refresh_margin(),
            redirect_uri: settings.application.redirect_uri(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_settings(&AuthSettings::default())
    }
}

/// Per-attempt overrides of [`CoordinatorConfig`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub flow_timeout: Option<Duration>,
    pub enrichment_grace: Option<Duration>,
    pub wait_for_profile: Option<bool>,
    pub redirect_target: Option<String>,
}

impl StartOptions {
    #[must_use]
    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_enrichment_grace(mut self, grace: Duration) -> Self {
        self.enrichment_grace = Some(grace);
        self
    }

    #[must_use]
    pub fn without_profile_wait(mut self) -> Self {
        self.wait_for_profile = Some(false);
        self
    }

    #[must_use]
    pub fn with_redirect_target(mut self, target: impl Into<String>) -> Self {
        self.redirect_target = Some(target.into());
        self
    }
}

/// What [`SessionCoordinator::handle_callback`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// Matched the active session and moved it forward
    Accepted,
    /// No matching active session, or a duplicate; nothing changed
    Ignored,
    /// Matched the active session, which failed on it
    Rejected,
}

struct ActiveSession {
    session: Session,
    adapter: Arc<dyn ProviderAdapter>,
    updates: watch::Sender<SessionUpdate>,
    flow_timeout: Duration,
    enrichment_grace: Duration,
    wait_for_profile: bool,
    callback_consumed: bool,
    credential: Option<Credential>,
    listener: Option<JoinHandle<()>>,
    watcher: Option<WatchGuard>,
}

impl ActiveSession {
    fn publish(&self) {
        self.updates
            .send_replace(SessionUpdate::pending(self.session.clone()));
    }

    fn advance(&mut self, next: SessionState, notifier: &SessionNotifier) -> bool {
        let current = self.session.state;
        if !current.can_transition_to(next) {
            warn!(
                "Session {} ({}): refusing transition {current} -> {next}",
                self.session.session_id, self.session.provider
            );
            return false;
        }
        self.session.state = next;
        LoggingHelper::log_transition(
            self.session.provider,
            self.session.session_id,
            current,
            next,
        );
        self.publish();
        notifier.notify(self.session.provider, ObservedState::Session(next));
        true
    }
}

type ActiveSessions = HashMap<Provider, ActiveSession>;

struct CoordinatorInner {
    adapters: AdapterRegistry,
    store: Arc<TokenStore>,
    notifier: SessionNotifier,
    channel: CrossContextChannel,
    launcher: Arc<dyn ContextLauncher>,
    supervisor: TimeoutSupervisor,
    refresher: RefreshCoordinator,
    config: CoordinatorConfig,
    context_id: ContextId,
    sessions: Mutex<ActiveSessions>,
}

pub struct SessionCoordinatorBuilder {
    adapters: AdapterRegistry,
    store: Arc<TokenStore>,
    channel: CrossContextChannel,
    launcher: Arc<dyn ContextLauncher>,
    config: CoordinatorConfig,
}

impl SessionCoordinatorBuilder {
    #[must_use]
    pub fn with_registry(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionCoordinator {
        let notifier = self.store.notifier().clone();
        SessionCoordinator {
            inner: Arc::new(CoordinatorInner {
                adapters: self.adapters,
                store: self.store,
                notifier,
                channel: self.channel,
                launcher: self.launcher,
                supervisor: TimeoutSupervisor::new(),
                refresher: RefreshCoordinator::new(),
                config: self.config,
                context_id: ContextId::generate(),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Orchestrates authentication sessions for every registered provider
///
/// Cheap to clone; clones share all state. Must be used from within a Tokio
/// runtime.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn builder(
        store: Arc<TokenStore>,
        channel: CrossContextChannel,
        launcher: Arc<dyn ContextLauncher>,
    ) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            adapters: AdapterRegistry::new(),
            store,
            channel,
            launcher,
            config: CoordinatorConfig::default(),
        }
    }

    /// Coordinator with adapters and timing taken from settings
    ///
    /// # Errors
    ///
    /// Returns an error if the configured application origin is not a URL
    pub fn from_settings(
        settings: &AuthSettings,
        store: Arc<TokenStore>,
        launcher: Arc<dyn ContextLauncher>,
    ) -> Result<Self, url::ParseError> {
        let channel = CrossContextChannel::new(&settings.application.origin)?;
        Ok(Self::builder(store, channel, launcher)
            .with_registry(AdapterRegistry::from_settings(settings))
            .with_config(CoordinatorConfig::from_settings(settings))
            .build())
    }

    fn from_inner(inner: Arc<CoordinatorInner>) -> Self {
        Self { inner }
    }

    fn weak(&self) -> Weak<CoordinatorInner> {
        Arc::downgrade(&self.inner)
    }

    fn sessions(&self) -> MutexGuard<'_, ActiveSessions> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the active session for `provider`, optionally requiring a
    /// specific session id
    fn with_active<R>(
        &self,
        provider: Provider,
        session_id: Option<Uuid>,
        f: impl FnOnce(&mut ActiveSession) -> R,
    ) -> Option<R> {
        self.sessions()
            .get_mut(&provider)
            .filter(|active| session_id.map_or(true, |id| active.session.session_id == id))
            .map(f)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn channel(&self) -> &CrossContextChannel {
        &self.inner.channel
    }

    /// Identifies the context this coordinator runs in
    #[must_use]
    pub fn context_id(&self) -> &ContextId {
        &self.inner.context_id
    }

    /// Begin an authentication attempt
    ///
    /// Returns immediately; every failure, including an unconfigured
    /// provider, is delivered through the handle.
    pub fn start_session(&self, provider: Provider, options: StartOptions) -> SessionHandle {
        let config = &self.inner.config;
        let flow_timeout = options.flow_timeout.unwrap_or(config.flow_timeout);
        let session = Session::new(provider, generate_correlation_id(), flow_timeout);
        let (updates, receiver) = watch::channel(SessionUpdate::pending(session.clone()));

        let Some(adapter) = self.inner.adapters.get(provider) else {
            LoggingHelper::log_provider_not_configured(provider.as_str(), "no adapter registered");
            let error = AuthError::Internal(format!("{provider} is not configured"));
            let mut failed = session.clone();
            failed.state = SessionState::Error;
            failed.last_error = Some(error.clone());
            updates.send_replace(SessionUpdate {
                session: failed,
                outcome: Some(Err(error)),
            });
            self.inner
                .notifier
                .notify(provider, ObservedState::Session(SessionState::Error));
            return SessionHandle::new(&session, None, receiver, self.clone());
        };

        let session_id = session.session_id;
        let correlation_id = session.correlation_id.clone();
        let started_at = session.started_at;
        LoggingHelper::log_flow_started(provider, session_id, flow_timeout.as_secs());

        let mut active = ActiveSession {
            session: session.clone(),
            adapter: Arc::clone(&adapter),
            updates,
            flow_timeout,
            enrichment_grace: options.enrichment_grace.unwrap_or(config.enrichment_grace),
            wait_for_profile: options.wait_for_profile.unwrap_or(config.wait_for_profile),
            callback_consumed: false,
            credential: None,
            listener: None,
            watcher: None,
        };

        // The previous session's terminal event goes out before this one's first
        let previous = self.sessions().remove(&provider);
        self.supersede(previous, session_id);
        active.advance(SessionState::Requesting, &self.inner.notifier);
        let raced = self.sessions().insert(provider, active);
        self.supersede(raced, session_id);

        let redirect_target = options
            .redirect_target
            .unwrap_or_else(|| config.redirect_uri.clone());
        let request = match adapter.build_authorization_request(&correlation_id, &redirect_target) {
            Ok(request) => request,
            Err(err) => {
                self.finish(provider, session_id, SessionState::Error, Err(err));
                return SessionHandle::new(&session, None, receiver, self.clone());
            }
        };
        let authorization_url = request.target.clone();

        self.arm_flow_timer(provider, session_id, flow_timeout);
        let advanced = self
            .with_active(provider, Some(session_id), |active| {
                active.advance(SessionState::AwaitingCallback, &self.inner.notifier)
            })
            .unwrap_or(false);

        if advanced {
            if let Err(err) =
                self.dispatch(provider, session_id, &correlation_id, started_at, request)
            {
                self.finish(provider, session_id, SessionState::Error, Err(err));
            }
        }

        SessionHandle::new(&session, authorization_url, receiver, self.clone())
    }

    fn supersede(&self, previous: Option<ActiveSession>, replacement: Uuid) {
        let Some(previous) = previous else {
            return;
        };
        info!(
            "Session {} ({}) superseded by {replacement}",
            previous.session.session_id, previous.session.provider
        );
        self.conclude(
            previous,
            SessionState::Cancelled,
            Err(AuthError::Cancelled(CancelReason::Superseded)),
        );
    }

    /// Open the authorization target and start listening for its result
    fn dispatch(
        &self,
        provider: Provider,
        session_id: Uuid,
        correlation_id: &str,
        started_at: DateTime<Utc>,
        request: AuthorizationRequest,
    ) -> Result<(), AuthError> {
        match request.delivery {
            Delivery::SameContext => {
                let target = request.target.ok_or_else(|| {
                    AuthError::Internal("redirect flow without a target".to_string())
                })?;
                let listener =
                    self.spawn_store_listener(provider, session_id, correlation_id, started_at);
                self.attach_listener(provider, session_id, listener, None);
                self.inner.launcher.navigate(&target)?;
            }
            Delivery::SecondaryContext => {
                let target = request.target.ok_or_else(|| {
                    AuthError::Internal("popup flow without a target".to_string())
                })?;
                let expected = correlation_id.to_string();
                let subscription = self.inner.channel.subscribe(move |envelope: &Envelope| {
                    envelope.message.provider == provider
                        && envelope.message.correlation_id == expected
                });

                let context = self.inner.launcher.open_secondary(&target)?;
                self.inner.channel.attach(Arc::clone(&context));

                let weak = self.weak();
                let watcher = watch_secondary_context(
                    Arc::clone(&context),
                    self.inner.config.popup_poll_interval,
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            Self::from_inner(inner).on_context_closed(provider, session_id);
                        }
                    },
                );
                let listener = self.spawn_channel_listener(subscription);
                let context_id = context.id().clone();
                let attached = self.attach_listener(
                    provider,
                    session_id,
                    listener,
                    Some((context_id.clone(), watcher)),
                );
                if !attached {
                    self.inner.channel.close_context(&context_id);
                }
            }
            Delivery::Direct => {
                debug!("Session {session_id} ({provider}) waiting for a submitted token");
            }
            Delivery::Immediate(event) => {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    coordinator.handle_callback(event).await;
                });
            }
        }
        Ok(())
    }

    /// Hand listener resources to the session; returns `false` (and stops
    /// them) if the session already finished
    fn attach_listener(
        &self,
        provider: Provider,
        session_id: Uuid,
        listener: JoinHandle<()>,
        secondary: Option<(ContextId, WatchGuard)>,
    ) -> bool {
        let mut slot = Some((listener, secondary));
        let attached = self
            .with_active(provider, Some(session_id), |active| {
                if let Some((listener, secondary)) = slot.take() {
                    active.listener = Some(listener);
                    if let Some((context_id, watcher)) = secondary {
                        active.session.secondary_context = Some(context_id);
                        active.watcher = Some(watcher);
                        active.publish();
                    }
                }
            })
            .is_some();

        if let Some((listener, _)) = slot {
            listener.abort();
        }
        attached
    }

    /// Watch the token store for a credential the redirect landing wrote for
    /// this session
    fn spawn_store_listener(
        &self,
        provider: Provider,
        session_id: Uuid,
        correlation_id: &str,
        started_at: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let mut events: SessionSubscription = self.inner.notifier.subscribe();
        let weak = self.weak();
        let expected = correlation_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let ObservedState::CredentialStored {
                    issued_at,
                    correlation_id,
                } = event.state
                else {
                    continue;
                };
                if event.provider != provider
                    || issued_at < started_at
                    || correlation_id.as_deref() != Some(expected.as_str())
                {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if Self::from_inner(inner).on_credential_observed(provider, session_id) {
                    return;
                }
            }
        })
    }

    /// Feed channel messages for this session into `handle_callback`
    fn spawn_channel_listener(
        &self,
        mut subscription: crate::channel::ChannelSubscription,
    ) -> JoinHandle<()> {
        let weak = self.weak();
        tokio::spawn(async move {
            while let Some(envelope) = subscription.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let event = envelope.message.into_callback_event(envelope.source);
                // Own task: stopping this listener must not abort an exchange
                let coordinator = Self::from_inner(inner);
                tokio::spawn(async move {
                    coordinator.handle_callback(event).await;
                });
            }
        })
    }

    fn arm_flow_timer(&self, provider: Provider, session_id: Uuid, flow_timeout: Duration) {
        let weak = self.weak();
        self.inner
            .supervisor
            .arm(session_id, TimerKind::Flow, flow_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    Self::from_inner(inner).finish(
                        provider,
                        session_id,
                        SessionState::Timeout,
                        Err(AuthError::Timeout(flow_timeout)),
                    );
                }
            });
    }

    fn arm_enrichment_timer(&self, provider: Provider, session_id: Uuid, grace: Duration) {
        let weak = self.weak();
        self.inner
            .supervisor
            .arm(session_id, TimerKind::Enrichment, grace, move || {
                if let Some(inner) = weak.upgrade() {
                    debug!("Profile enrichment grace elapsed for session {session_id}");
                    Self::from_inner(inner).complete(provider, session_id);
                }
            });
    }

    fn on_context_closed(&self, provider: Provider, session_id: Uuid) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CLOSED_CONTEXT_SETTLE).await;
            let abandoned = coordinator
                .with_active(provider, Some(session_id), |active| {
                    active.session.state == SessionState::AwaitingCallback
                        && !active.callback_consumed
                })
                .unwrap_or(false);
            if abandoned {
                coordinator.finish(
                    provider,
                    session_id,
                    SessionState::Cancelled,
                    Err(AuthError::Cancelled(CancelReason::ContextClosed)),
                );
            }
        });
    }

    /// Validate a callback against the active session and drive it forward
    ///
    /// Events whose correlation id does not match the provider's active
    /// session are logged and ignored without any state change.
    pub async fn handle_callback(&self, event: CallbackEvent) -> CallbackDisposition {
        let provider = event.provider;
        let Some(received) = event.correlation_id().map(ToString::to_string) else {
            LoggingHelper::log_callback_ignored(provider, "missing state parameter");
            return CallbackDisposition::Ignored;
        };

        let claimed = self.with_active(provider, None, |active| {
            if active.session.correlation_id != received {
                return Err("state does not match the active session");
            }
            if active.callback_consumed || active.session.state != SessionState::AwaitingCallback {
                return Err("callback already consumed");
            }
            active.callback_consumed = true;
            Ok((active.session.session_id, Arc::clone(&active.adapter)))
        });
        let (session_id, adapter) = match claimed {
            Some(Ok(claimed)) => claimed,
            Some(Err(reason)) => {
                LoggingHelper::log_callback_ignored(provider, reason);
                return CallbackDisposition::Ignored;
            }
            None => {
                LoggingHelper::log_callback_ignored(provider, "no active session");
                return CallbackDisposition::Ignored;
            }
        };

        let parsed = match adapter.parse_callback(&event, &received) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.finish(provider, session_id, SessionState::Error, Err(err));
                return CallbackDisposition::Rejected;
            }
        };

        if parsed.requires_exchange() {
            let advanced = self
                .with_active(provider, Some(session_id), |active| {
                    active.advance(SessionState::Exchanging, &self.inner.notifier)
                })
                .unwrap_or(false);
            if !advanced {
                return CallbackDisposition::Ignored;
            }
        }

        match adapter.exchange(parsed).await {
            Ok(credential) => {
                self.accept_credential(provider, session_id, credential, true);
                CallbackDisposition::Accepted
            }
            Err(err) => {
                self.finish(provider, session_id, SessionState::Error, Err(err));
                CallbackDisposition::Rejected
            }
        }
    }

    /// A credential for `provider` appeared in the store while a same-context
    /// session was waiting
    fn on_credential_observed(&self, provider: Provider, session_id: Uuid) -> bool {
        let claimed = self
            .with_active(provider, Some(session_id), |active| {
                if active.callback_consumed
                    || active.session.state != SessionState::AwaitingCallback
                {
                    return false;
                }
                active.callback_consumed = true;
                true
            })
            .unwrap_or(false);
        if !claimed {
            return false;
        }

        match self.inner.store.get(provider) {
            Ok(Some(credential)) => self.accept_credential(provider, session_id, credential, false),
            Ok(None) => {
                warn!("{provider} credential vanished before session {session_id} could use it");
                self.finish(
                    provider,
                    session_id,
                    SessionState::Error,
                    Err(AuthError::Internal("stored credential disappeared".to_string())),
                )
            }
            Err(err) => self.finish(provider, session_id, SessionState::Error, Err(err.into())),
        }
    }

    /// Store the credential and enter profile enrichment
    ///
    /// The result is discarded if the session finished while the exchange
    /// was in flight.
    fn accept_credential(
        &self,
        provider: Provider,
        session_id: Uuid,
        credential: Credential,
        persist: bool,
    ) -> bool {
        enum Next {
            Fail(AuthError),
            Succeed,
            Wait,
        }

        let next = {
            let mut sessions = self.sessions();
            let Some(active) = sessions
                .get_mut(&provider)
                .filter(|active| {
                    active.session.session_id == session_id && active.session.is_active()
                })
            else {
                info!("Discarding {provider} credential for finished session {session_id}");
                return false;
            };

            let written = if persist {
                self.inner
                    .store
                    .put_for_session(credential.clone(), &active.session.correlation_id)
                    .map(|_| ())
            } else {
                Ok(())
            };
            match written {
                Err(err) => Next::Fail(err.into()),
                Ok(()) => {
                    // Authenticated now; enrichment can no longer time the session out
                    self.inner.supervisor.disarm(session_id, TimerKind::Flow);
                    active.credential = Some(credential);
                    active.advance(SessionState::EnrichingProfile, &self.inner.notifier);
                    if active.wait_for_profile && !active.enrichment_grace.is_zero() {
                        self.arm_enrichment_timer(provider, session_id, active.enrichment_grace);
                        Next::Wait
                    } else {
                        Next::Succeed
                    }
                }
            }
        };

        match next {
            Next::Fail(err) => {
                self.finish(provider, session_id, SessionState::Error, Err(err));
                false
            }
            Next::Succeed => self.complete(provider, session_id),
            Next::Wait => true,
        }
    }

    /// Finish a session that is enriching its profile as `succeeded`
    fn complete(&self, provider: Provider, session_id: Uuid) -> bool {
        let finished = {
            let mut sessions = self.sessions();
            let enriching = sessions.get(&provider).is_some_and(|active| {
                active.session.session_id == session_id
                    && active.session.state == SessionState::EnrichingProfile
            });
            if enriching {
                sessions.remove(&provider)
            } else {
                None
            }
        };

        let Some(mut active) = finished else {
            return false;
        };
        match active.credential.take() {
            Some(credential) => self.conclude(active, SessionState::Succeeded, Ok(credential)),
            None => self.conclude(
                active,
                SessionState::Error,
                Err(AuthError::Internal("no credential recorded".to_string())),
            ),
        }
        true
    }

    /// Move an active session to a terminal state
    fn finish(
        &self,
        provider: Provider,
        session_id: Uuid,
        state: SessionState,
        outcome: Result<Credential, AuthError>,
    ) -> bool {
        let finished = {
            let mut sessions = self.sessions();
            let matches = sessions
                .get(&provider)
                .is_some_and(|active| active.session.session_id == session_id);
            if matches {
                sessions.remove(&provider)
            } else {
                None
            }
        };
        match finished {
            Some(active) => {
                self.conclude(active, state, outcome);
                true
            }
            None => false,
        }
    }

    /// Release everything a finished session holds and publish its outcome
    fn conclude(
        &self,
        mut active: ActiveSession,
        state: SessionState,
        outcome: Result<Credential, AuthError>,
    ) {
        let provider = active.session.provider;
        let session_id = active.session.session_id;

        self.inner.supervisor.disarm_all(session_id);
        if let Some(listener) = active.listener.take() {
            listener.abort();
        }
        drop(active.watcher.take());

        if let Some(context_id) = active.session.secondary_context.clone() {
            if let Err(err) = &outcome {
                self.inner.channel.send(
                    &context_id,
                    ChannelMessage::error(
                        provider,
                        active.session.correlation_id.clone(),
                        state.as_str(),
                        &err.to_string(),
                    ),
                );
            }
            self.inner.channel.close_context(&context_id);
        }
        if state != SessionState::Succeeded {
            active.adapter.discard(&active.session.correlation_id);
        }

        LoggingHelper::log_transition(provider, session_id, active.session.state, state);
        active.session.state = state;
        active.session.last_error = outcome.as_ref().err().cloned();
        LoggingHelper::log_session_finished(
            provider,
            session_id,
            state,
            active.session.last_error.as_ref(),
        );

        active.updates.send_replace(SessionUpdate {
            session: active.session.clone(),
            outcome: Some(outcome),
        });
        self.inner
            .notifier
            .notify(provider, ObservedState::Session(state));
    }

    /// Finish a redirect on the landing page the provider sent the browser to
    ///
    /// The landing URL is checked against `expected_correlation` (the id the
    /// opener persisted before navigating away), exchanged, and written to
    /// the shared store tagged with that id. The opener's session completes
    /// from the store broadcast; writes for any other correlation id never
    /// complete it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Protocol`] for a landing URL that does not belong
    /// to `expected_correlation`, [`AuthError::Provider`] for a provider error,
    /// and exchange or store failures otherwise
    pub async fn complete_redirect_landing(
        &self,
        provider: Provider,
        landing_url: &Url,
        expected_correlation: &str,
    ) -> Result<Credential, AuthError> {
        let adapter = self
            .inner
            .adapters
            .get(provider)
            .ok_or_else(|| AuthError::Internal(format!("{provider} is not configured")))?;
        let event =
            CallbackEvent::from_redirect_url(provider, landing_url, self.inner.context_id.clone());
        let parsed = adapter.parse_callback(&event, expected_correlation)?;
        let credential = adapter.exchange(parsed).await?;

        match self
            .inner
            .store
            .put_for_session(credential.clone(), expected_correlation)?
        {
            PutOutcome::Written { .. } => {
                info!("Stored {provider} credential from redirect landing");
            }
            PutOutcome::Stale => {
                warn!("{provider} credential from redirect landing is older than the stored one");
            }
        }
        Ok(credential)
    }

    /// Cancel an active session; `false` if it already finished
    pub fn cancel_session(&self, session_id: Uuid) -> bool {
        let provider = self
            .sessions()
            .iter()
            .find(|(_, active)| active.session.session_id == session_id)
            .map(|(provider, _)| *provider);

        match provider {
            Some(provider) => self.finish(
                provider,
                session_id,
                SessionState::Cancelled,
                Err(AuthError::Cancelled(CancelReason::Requested)),
            ),
            None => false,
        }
    }

    /// Report that the downstream profile is complete
    ///
    /// Ends profile enrichment early; returns `false` if no session for
    /// `provider` is enriching.
    pub fn signal_profile_ready(&self, provider: Provider) -> bool {
        let session_id = self
            .with_active(provider, None, |active| {
                (active.session.state == SessionState::EnrichingProfile)
                    .then_some(active.session.session_id)
            })
            .flatten();
        session_id.is_some_and(|id| self.complete(provider, id))
    }

    /// Submit a token typed in by the user to the active manual session
    pub async fn submit_manual_token(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> CallbackDisposition {
        let Some(correlation_id) =
            self.with_active(provider, None, |active| active.session.correlation_id.clone())
        else {
            LoggingHelper::log_callback_ignored(provider, "no active session for manual token");
            return CallbackDisposition::Ignored;
        };
        let event = ManualAdapter::token_event(
            provider,
            access_token,
            &correlation_id,
            self.inner.context_id.clone(),
        );
        self.handle_callback(event).await
    }

    /// Whether a non-expired credential is stored for `provider`
    #[must_use]
    pub fn is_authenticated(&self, provider: Provider) -> bool {
        self.inner.store.is_valid(provider)
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionSubscription {
        self.inner.notifier.subscribe()
    }

    #[must_use]
    pub fn active_session(&self, provider: Provider) -> Option<Session> {
        self.with_active(provider, None, |active| active.session.clone())
    }

    /// Refresh the stored credential; concurrent calls share one request
    ///
    /// # Errors
    ///
    /// Returns the refresh failure
    pub async fn refresh(&self, provider: Provider) -> Result<Credential, RefreshError> {
        let adapter = self
            .inner
            .adapters
            .get(provider)
            .ok_or(RefreshError::Unsupported(provider))?;
        self.inner
            .refresher
            .refresh(adapter.as_ref(), &self.inner.store)
            .await
    }

    /// A usable access token, refreshed first when close to expiry
    ///
    /// # Errors
    ///
    /// Returns an error when nothing is stored, or when the credential needs
    /// a refresh that fails
    pub async fn access_token(&self, provider: Provider) -> Result<String, RefreshError> {
        let current = self
            .inner
            .store
            .get(provider)?
            .ok_or(RefreshError::NoCredential(provider))?;
        let now = Utc::now();
        if !current.needs_refresh_at(now, self.inner.config.refresh_margin) {
            return Ok(current.access_token);
        }

        match self.refresh(provider).await {
            Ok(refreshed) => Ok(refreshed.access_token),
            Err(RefreshError::Unsupported(_)) if !current.is_expired_at(now) => {
                Ok(current.access_token)
            }
            Err(err) => Err(err),
        }
    }

    /// Cancel any active session for `provider` and remove its credential
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated
    pub fn sign_out(&self, provider: Provider) -> Result<bool, StoreError> {
        if let Some(session) = self.active_session(provider) {
            self.cancel_session(session.session_id);
        }
        self.inner.store.clear(provider)
    }

    /// Cancel every active session and remove all credentials
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated
    pub fn sign_out_all(&self) -> Result<(), StoreError> {
        let active: Vec<Uuid> = self
            .sessions()
            .values()
            .map(|active| active.session.session_id)
            .collect();
        for session_id in active {
            self.cancel_session(session_id);
        }
        self.inner.store.clear_all()
    }
}
