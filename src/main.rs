#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{bail, Context, Result};
use chrono::Utc;
use relist_auth::{
    models::Provider, oauth::AdapterRegistry, session::SessionNotifier, settings::AuthSettings,
    store::TokenStore,
};

const USAGE: &str = "Usage: relist-auth <status | sign-out <provider|all>>";

fn main() -> Result<()> {
    // Loads .env, Settings.toml and environment overrides, and initializes the logger
    let settings = AuthSettings::load().context("Failed to load settings")?;
    let store = TokenStore::from_settings(&settings.storage, SessionNotifier::new())
        .context("Failed to open credential store")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["status"] => print_status(&settings, &store),
        ["sign-out", "all"] => {
            store.clear_all().context("Failed to clear credentials")?;
            println!("✓ Signed out of all providers");
            Ok(())
        }
        ["sign-out", provider] => {
            let provider: Provider = provider.parse().map_err(anyhow::Error::msg)?;
            if store
                .clear(provider)
                .with_context(|| format!("Failed to clear {provider} credential"))?
            {
                println!("✓ Signed out of {provider}");
            } else {
                println!("ℹ No {provider} credential stored");
            }
            Ok(())
        }
        _ => bail!(USAGE),
    }
}

fn print_status(settings: &AuthSettings, store: &TokenStore) -> Result<()> {
    let registry = AdapterRegistry::from_settings(settings);
    let now = Utc::now();

    println!("🔐 relist-auth v{}", relist_auth::VERSION);
    println!("   Origin: {}", settings.application.origin);
    println!("   Redirect URI: {}", settings.application.redirect_uri());
    println!(
        "   Flow timeout: {}s, enrichment grace: {}s",
        settings.session.flow_timeout_secs, settings.session.enrichment_grace_secs
    );

    for provider in Provider::ALL {
        let flow = registry
            .get(provider)
            .map_or("not configured", |adapter| adapter.flow().as_str());
        let credential = store
            .get(provider)
            .with_context(|| format!("Failed to read {provider} credential"))?;
        let status = match credential {
            Some(credential) if credential.is_expired_at(now) => {
                format!("expired at {}", credential.expires_at)
            }
            Some(credential) => format!(
                "signed in until {}{}",
                credential.expires_at,
                if credential.has_refresh_token() { " (refreshable)" } else { "" }
            ),
            None => "signed out".to_string(),
        };
        println!("   {:<8} [{flow}] {status}", provider.as_str());
    }
    Ok(())
}
