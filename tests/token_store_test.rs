use chrono::{Duration, Utc};
use relist_auth::models::{Credential, Provider, StoreError};
use relist_auth::session::{ObservedState, SessionNotifier};
use relist_auth::settings::StorageSettings;
use relist_auth::store::{PutOutcome, TokenStore};
use relist_auth::testing::TestFixtures;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_expired_credential_is_never_valid() {
    let store = TestFixtures::store();
    let issued = Utc::now() - Duration::seconds(120);
    store
        .put(Credential::new(Provider::Ebay, "still-has-a-token", issued, 60))
        .unwrap();

    let credential = store.get(Provider::Ebay).unwrap().unwrap();
    assert!(!credential.access_token.is_empty());
    assert!(!store.is_valid(Provider::Ebay));
    assert!(!store.is_valid_at(Provider::Ebay, credential.expires_at));
    assert!(store.is_valid_at(Provider::Ebay, credential.expires_at - Duration::seconds(1)));
}

#[test]
fn test_round_trip_preserves_every_field() {
    let store = TestFixtures::store();
    let credential = TestFixtures::credential(Provider::Google, "gtok", Utc::now())
        .with_scope(["openid", "email"]);

    store.put(credential.clone()).unwrap();
    assert_eq!(store.get(Provider::Google).unwrap(), Some(credential));
}

#[tokio::test]
async fn test_concurrent_writers_keep_latest_issued_at() {
    let store = TestFixtures::store();
    let base = Utc::now();

    let mut writers = Vec::new();
    for offset in [3_i64, 0, 4, 1, 2] {
        let store = Arc::clone(&store);
        writers.push(tokio::spawn(async move {
            let issued = base + Duration::seconds(offset);
            store
                .put(Credential::new(Provider::Ebay, format!("tok{offset}"), issued, 3600))
                .unwrap()
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let stored = store.get(Provider::Ebay).unwrap().unwrap();
    assert_eq!(stored.access_token, "tok4");
    assert_eq!(stored.issued_at, base + Duration::seconds(4));
}

#[test]
fn test_only_winning_writes_are_broadcast() {
    let notifier = SessionNotifier::new();
    let store = TokenStore::in_memory(notifier.clone());
    let mut events = notifier.subscribe();
    let t1 = Utc::now() - Duration::seconds(30);
    let t2 = Utc::now();

    store.put(Credential::new(Provider::Ebay, "new", t2, 3600)).unwrap();
    assert_eq!(
        store.put(Credential::new(Provider::Ebay, "old", t1, 3600)).unwrap(),
        PutOutcome::Stale
    );

    let event = events.try_recv().unwrap();
    assert_eq!(event.provider, Provider::Ebay);
    assert_eq!(
        event.state,
        ObservedState::CredentialStored {
            issued_at: t2,
            correlation_id: None
        }
    );
    assert!(events.try_recv().is_none());
}

#[test]
fn test_session_write_is_tagged_with_correlation_id() {
    let notifier = SessionNotifier::new();
    let store = TokenStore::in_memory(notifier.clone());
    let mut events = notifier.subscribe();
    let issued_at = Utc::now();

    store
        .put_for_session(Credential::new(Provider::Google, "gtok", issued_at, 3600), "abc")
        .unwrap();

    assert_eq!(
        events.try_recv().unwrap().state,
        ObservedState::CredentialStored {
            issued_at,
            correlation_id: Some("abc".to_string())
        }
    );
}

#[test]
fn test_clear_all_notifies_every_provider() {
    let notifier = SessionNotifier::new();
    let store = TokenStore::in_memory(notifier.clone());
    for provider in Provider::ALL {
        store
            .put(TestFixtures::credential(provider, "tok", Utc::now() - Duration::seconds(1)))
            .unwrap();
    }

    let mut events = notifier.subscribe();
    store.clear_all().unwrap();

    let mut cleared = Vec::new();
    while let Some(event) = events.try_recv() {
        assert_eq!(event.state, ObservedState::CredentialCleared);
        cleared.push(event.provider);
    }
    assert_eq!(cleared, Provider::ALL.to_vec());
    assert!(Provider::ALL.iter().all(|p| !store.is_valid(*p)));
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credentials").join("store.enc");
    let credential = TestFixtures::credential(Provider::Ebay, "persisted", Utc::now());

    {
        let store = TestFixtures::file_store(&path);
        store.put(credential.clone()).unwrap();
    }

    // Nothing readable in plain text
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("persisted"));

    let reopened = TestFixtures::file_store(&path);
    assert_eq!(reopened.get(Provider::Ebay).unwrap(), Some(credential));
    assert!(reopened.clear(Provider::Ebay).unwrap());
    assert_eq!(TestFixtures::file_store(&path).get(Provider::Ebay).unwrap(), None);
}

#[test]
fn test_store_from_settings_rejects_wrong_secret() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.enc");

    let mut settings = StorageSettings {
        path: Some(path.to_string_lossy().into_owned()),
        secret: "first-secret".to_string(),
        secret_env: None,
    };
    let store = TokenStore::from_settings(&settings, SessionNotifier::new()).unwrap();
    store
        .put(TestFixtures::credential(Provider::Google, "gtok", Utc::now()))
        .unwrap();

    settings.secret = "second-secret".to_string();
    assert!(matches!(
        TokenStore::from_settings(&settings, SessionNotifier::new()),
        Err(StoreError::Crypto(_))
    ));
}

#[test]
fn test_store_without_path_is_in_memory() {
    let store =
        TokenStore::from_settings(&StorageSettings::default(), SessionNotifier::new()).unwrap();
    assert_eq!(store.get(Provider::Google).unwrap(), None);
}
