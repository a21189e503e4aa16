//! Fake implementations of external collaborators
//!
//! Each fake records what was asked of it so tests can assert on the
//! interaction afterwards.

use crate::channel::{ContextLauncher, SecondaryContext};
use crate::models::{AuthError, ChannelMessage, ContextId, TokenResponse};
use crate::oauth::{TokenEndpoint, TokenGrant};
use crate::testing::constants::STUB_ACCESS_TOKEN;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use url::Url;

/// In-process stand-in for a popup window or tab
pub struct FakeSecondaryContext {
    id: ContextId,
    closed: AtomicBool,
    delivered: Mutex<Vec<ChannelMessage>>,
}

impl FakeSecondaryContext {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: ContextId::from(id),
            closed: AtomicBool::new(false),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Messages handed to this context, oldest first
    #[must_use]
    pub fn delivered(&self) -> Vec<ChannelMessage> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SecondaryContext for FakeSecondaryContext {
    fn id(&self) -> &ContextId {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn deliver(&self, message: &ChannelMessage) -> bool {
        if self.is_closed() {
            return false;
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        true
    }
}

/// Launcher that records navigations and hands out fake contexts
#[derive(Default)]
pub struct FakeLauncher {
    navigations: Mutex<Vec<Url>>,
    opened: Mutex<Vec<(Url, Arc<FakeSecondaryContext>)>>,
    block_popups: AtomicBool,
}

impl FakeLauncher {
    /// Launcher whose secondary contexts fail to open, like a popup blocker
    #[must_use]
    pub fn blocking_popups() -> Self {
        let launcher = Self::default();
        launcher.block_popups.store(true, Ordering::SeqCst);
        launcher
    }

    #[must_use]
    pub fn navigations(&self) -> Vec<Url> {
        self.navigations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Contexts opened so far, oldest first
    #[must_use]
    pub fn opened(&self) -> Vec<Arc<FakeSecondaryContext>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, context)| Arc::clone(context))
            .collect()
    }

    /// Target URLs of the opened contexts
    #[must_use]
    pub fn opened_targets(&self) -> Vec<Url> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Most recently opened context
    #[must_use]
    pub fn last_opened(&self) -> Option<Arc<FakeSecondaryContext>> {
        self.opened().pop()
    }
}

impl ContextLauncher for FakeLauncher {
    fn navigate(&self, target: &Url) -> Result<(), AuthError> {
        self.navigations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.clone());
        Ok(())
    }

    fn open_secondary(&self, target: &Url) -> Result<Arc<dyn SecondaryContext>, AuthError> {
        if self.block_popups.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("popup blocked".to_string()));
        }
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        let context = Arc::new(FakeSecondaryContext::new(&format!(
            "popup-{}",
            opened.len() + 1
        )));
        opened.push((target.clone(), Arc::clone(&context)));
        Ok(context)
    }
}

/// Token endpoint answering every grant with a canned result
pub struct StubTokenEndpoint {
    result: Result<TokenResponse, AuthError>,
    delay: Option<Duration>,
    grants: Mutex<Vec<TokenGrant>>,
}

impl Default for StubTokenEndpoint {
    fn default() -> Self {
        Self::with_response(TokenResponse {
            access_token: STUB_ACCESS_TOKEN.to_string(),
            refresh_token: Some("stub-refresh-token".to_string()),
            expires_in: Some(3600),
            ..TokenResponse::default()
        })
    }
}

impl StubTokenEndpoint {
    #[must_use]
    pub fn with_response(response: TokenResponse) -> Self {
        Self {
            result: Ok(response),
            delay: None,
            grants: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(error: AuthError) -> Self {
        Self {
            result: Err(error),
            delay: None,
            grants: Mutex::new(Vec::new()),
        }
    }

    /// Hold every response for `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Grants received so far, oldest first
    #[must_use]
    pub fn grants(&self) -> Vec<TokenGrant> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TokenEndpoint for StubTokenEndpoint {
    async fn request_token(&self, grant: TokenGrant) -> Result<TokenResponse, AuthError> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(grant);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}
