use relist_auth::channel::{PopupRelay, SecondaryContext};
use relist_auth::models::{
    AuthError, CancelReason, ChannelMessage, ErrorKind, MessageType, Provider, SessionState,
    TokenResponse,
};
use relist_auth::oauth::{PopupAdapter, RedirectAdapter};
use relist_auth::session::{SessionCoordinator, SessionHandle, StartOptions, CLOSED_CONTEXT_SETTLE};
use relist_auth::testing::constants::{APP_ORIGIN, REDIRECT_URI};
use relist_auth::testing::{FakeLauncher, StubTokenEndpoint, TestFixtures};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn popup_coordinator(endpoint: Arc<StubTokenEndpoint>) -> (SessionCoordinator, Arc<FakeLauncher>) {
    let launcher = Arc::new(FakeLauncher::default());
    let adapter = PopupAdapter::new(
        Provider::Ebay,
        "https://auth.ebay.example/oauth2/authorize",
        "ebay-client",
        endpoint,
    );
    let coordinator = TestFixtures::coordinator(launcher.clone())
        .with_adapter(Arc::new(adapter))
        .build();
    (coordinator, launcher)
}

fn callback_url(query: &str) -> Url {
    Url::parse(&format!("{REDIRECT_URI}?{query}")).unwrap()
}

async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    let mut updates = handle.updates();
    tokio::time::timeout(
        Duration::from_secs(2),
        updates.wait_for(|update| update.session.state == state),
    )
    .await
    .expect("state reached in time")
    .unwrap();
}

#[tokio::test]
async fn test_popup_relay_completes_session() {
    let endpoint = Arc::new(StubTokenEndpoint::with_response(TokenResponse {
        access_token: "tok1".to_string(),
        expires_in: Some(7200),
        ..TokenResponse::default()
    }));
    let (coordinator, launcher) = popup_coordinator(endpoint);
    let handle =
        coordinator.start_session(Provider::Ebay, StartOptions::default().without_profile_wait());

    let popup = launcher.last_opened().unwrap();
    assert_eq!(handle.snapshot().secondary_context.as_ref(), Some(popup.id()));

    // Inside the popup: the provider sent it back to the callback page
    let relay = PopupRelay::new(
        Provider::Ebay,
        coordinator.channel().port(popup.id().clone(), APP_ORIGIN),
    );
    let url = callback_url(&format!("code=abc&state={}", handle.correlation_id()));
    assert_eq!(relay.relay(&url, popup.as_ref()), MessageType::AuthSuccess);
    assert!(popup.is_closed());

    // The popup closing right after posting does not cancel the session
    let credential = handle.wait().await.unwrap();
    assert_eq!(credential.access_token, "tok1");
    assert_eq!(handle.state(), SessionState::Succeeded);
    assert!(coordinator.is_authenticated(Provider::Ebay));
}

#[tokio::test]
async fn test_provider_error_relayed_from_popup() {
    let (coordinator, launcher) = popup_coordinator(Arc::new(StubTokenEndpoint::default()));
    let handle = coordinator.start_session(Provider::Ebay, StartOptions::default());
    let popup = launcher.last_opened().unwrap();

    let relay = PopupRelay::new(
        Provider::Ebay,
        coordinator.channel().port(popup.id().clone(), APP_ORIGIN),
    );
    let url = callback_url(&format!(
        "error=access_denied&error_description=User+declined&state={}",
        handle.correlation_id()
    ));
    assert_eq!(relay.relay(&url, popup.as_ref()), MessageType::AuthError);

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("User declined"));
    assert_eq!(handle.state(), SessionState::Error);
}

#[tokio::test]
async fn test_foreign_origin_message_never_reaches_session() {
    let endpoint = Arc::new(StubTokenEndpoint::default());
    let (coordinator, launcher) = popup_coordinator(endpoint.clone());
    let handle = coordinator.start_session(Provider::Ebay, StartOptions::default());
    let popup = launcher.last_opened().unwrap();

    let mut payload = HashMap::new();
    payload.insert("code".to_string(), "stolen".to_string());
    let forged = ChannelMessage::success(Provider::Ebay, handle.correlation_id(), payload);
    coordinator
        .channel()
        .port(popup.id().clone(), "https://evil.example")
        .post(forged);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), SessionState::AwaitingCallback);
    assert!(endpoint.grants().is_empty());
    assert!(handle.cancel());
    assert!(popup.is_closed());
}

#[tokio::test]
async fn test_message_for_other_correlation_is_filtered() {
    let endpoint = Arc::new(StubTokenEndpoint::default());
    let (coordinator, launcher) = popup_coordinator(endpoint.clone());
    let handle = coordinator.start_session(Provider::Ebay, StartOptions::default());
    let popup = launcher.last_opened().unwrap();

    let relay = PopupRelay::new(
        Provider::Ebay,
        coordinator.channel().port(popup.id().clone(), APP_ORIGIN),
    );
    let message = relay.message_for(&callback_url("code=abc&state=someone-else"));
    coordinator
        .channel()
        .port(popup.id().clone(), APP_ORIGIN)
        .post(message);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), SessionState::AwaitingCallback);
    assert!(endpoint.grants().is_empty());
    assert!(handle.cancel());
}

#[tokio::test]
async fn test_closing_popup_cancels_session() {
    let (coordinator, launcher) = popup_coordinator(Arc::new(StubTokenEndpoint::default()));
    let handle = coordinator.start_session(Provider::Ebay, StartOptions::default());
    wait_for_state(&handle, SessionState::AwaitingCallback).await;

    let started = tokio::time::Instant::now();
    launcher.last_opened().unwrap().close();

    assert_eq!(
        handle.wait().await.unwrap_err(),
        AuthError::Cancelled(CancelReason::ContextClosed)
    );
    assert!(started.elapsed() >= CLOSED_CONTEXT_SETTLE);
    assert!(coordinator.active_session(Provider::Ebay).is_none());
}

#[tokio::test]
async fn test_blocked_popup_fails_session() {
    let launcher = Arc::new(FakeLauncher::blocking_popups());
    let coordinator = TestFixtures::coordinator(launcher)
        .with_adapter(Arc::new(PopupAdapter::new(
            Provider::Ebay,
            "https://auth.ebay.example/oauth2/authorize",
            "ebay-client",
            Arc::new(StubTokenEndpoint::default()),
        )))
        .build();

    let handle = coordinator.start_session(Provider::Ebay, StartOptions::default());
    assert_eq!(handle.state(), SessionState::Error);
    assert!(matches!(handle.wait().await, Err(AuthError::Internal(_))));
}

fn google_adapter() -> Arc<RedirectAdapter> {
    Arc::new(RedirectAdapter::new(
        Provider::Google,
        "https://accounts.google.example/o/oauth2/v2/auth",
        "google-client",
    ))
}

fn landing_url(correlation_id: &str) -> Url {
    Url::parse(&format!(
        "{REDIRECT_URI}#access_token=gtok&expires_in=3599&token_type=Bearer&state={correlation_id}"
    ))
    .unwrap()
}

#[tokio::test]
async fn test_redirect_landing_writes_store_and_completes_opener() {
    let launcher = Arc::new(FakeLauncher::default());
    let store = TestFixtures::store();
    let opener = TestFixtures::coordinator_with_store(store.clone(), launcher.clone())
        .with_adapter(google_adapter())
        .build();
    let handle =
        opener.start_session(Provider::Google, StartOptions::default().without_profile_wait());
    assert_eq!(launcher.navigations().len(), 1);

    // Landing context: same store, its own coordinator
    let landing = TestFixtures::coordinator_with_store(store.clone(), launcher)
        .with_adapter(google_adapter())
        .build();
    let credential = landing
        .complete_redirect_landing(
            Provider::Google,
            &landing_url(handle.correlation_id()),
            handle.correlation_id(),
        )
        .await
        .unwrap();
    assert_eq!(credential.access_token, "gtok");

    assert_eq!(handle.wait().await.unwrap(), credential);
    assert!(opener.is_authenticated(Provider::Google));
}

#[tokio::test]
async fn test_landing_from_superseded_attempt_does_not_complete_opener() {
    let launcher = Arc::new(FakeLauncher::default());
    let store = TestFixtures::store();
    let opener = TestFixtures::coordinator_with_store(store.clone(), launcher.clone())
        .with_adapter(google_adapter())
        .build();
    let first = opener.start_session(Provider::Google, StartOptions::default());
    let stale_correlation = first.correlation_id().to_string();
    let second = opener.start_session(Provider::Google, StartOptions::default());

    let landing = TestFixtures::coordinator_with_store(store.clone(), launcher)
        .with_adapter(google_adapter())
        .build();

    // A landing URL is only accepted for the correlation id it carries
    let err = landing
        .complete_redirect_landing(
            Provider::Google,
            &landing_url(&stale_correlation),
            second.correlation_id(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(store.get(Provider::Google).unwrap(), None);

    // The superseded attempt's own landing writes the store, but not for the new session
    landing
        .complete_redirect_landing(
            Provider::Google,
            &landing_url(&stale_correlation),
            &stale_correlation,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.state(), SessionState::AwaitingCallback);
    assert!(second.cancel());
}
