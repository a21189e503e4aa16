use crate::models::Provider;
use crate::utils::crypto::generate_secret;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Total-flow deadline for one authentication attempt
pub const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 120;
/// Advisory wait for profile enrichment after credentials are stored
pub const DEFAULT_ENRICHMENT_GRACE_SECS: u64 = 5;
/// Poll interval for detecting a closed secondary context
pub const DEFAULT_POPUP_POLL_INTERVAL_MS: u64 = 1000;
/// Credentials expiring within this margin are refreshed before use
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;
pub const DEFAULT_APP_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";
const SETTINGS_FILE: &str = "Settings.toml";
const SECRETS_DIR_ENV: &str = "RELIST_SECRETS_DIR";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] basic_toml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthSettings {
    pub application: ApplicationSettings,
    pub session: SessionSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Origin every cross-context message must come from
    pub origin: String,
    pub redirect_base_url: String,
    pub callback_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub flow_timeout_secs: u64,
    pub enrichment_grace_secs: u64,
    pub popup_poll_interval_ms: u64,
    /// Wait (up to the grace period) for a profile-ready signal before succeeding
    pub wait_for_profile: bool,
    pub refresh_margin_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// Encrypted credential file; `None` keeps credentials in memory
    pub path: Option<String>,
    pub secret: String,
    pub secret_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

/// How a provider delivers its authorization result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterFlow {
    /// Same-context navigation, tokens in the redirect fragment
    Redirect,
    /// Secondary context plus code-for-token exchange
    Popup,
    /// User pastes a token; no authorization request
    Manual,
    /// Synthetic credentials for test environments
    Mock,
}

impl AdapterFlow {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AdapterFlow::Redirect => "redirect",
            AdapterFlow::Popup => "popup",
            AdapterFlow::Manual => "manual",
            AdapterFlow::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: Provider,
    pub flow: AdapterFlow,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,

    // Direct values (can be overridden by environment variables)
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    #[serde(default)]
    pub client_id_env: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,

    #[serde(default)]
    pub extra_auth_params: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub use_pkce: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            origin: DEFAULT_APP_ORIGIN.to_string(),
            redirect_base_url: DEFAULT_APP_ORIGIN.to_string(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            flow_timeout_secs: DEFAULT_FLOW_TIMEOUT_SECS,
            enrichment_grace_secs: DEFAULT_ENRICHMENT_GRACE_SECS,
            popup_poll_interval_ms: DEFAULT_POPUP_POLL_INTERVAL_MS,
            wait_for_profile: true,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ApplicationSettings {
    /// Absolute redirect target handed to providers
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.redirect_base_url.trim_end_matches('/'),
            self.callback_path
        )
    }
}

impl SessionSettings {
    #[must_use]
    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    #[must_use]
    pub fn enrichment_grace(&self) -> Duration {
        Duration::from_secs(self.enrichment_grace_secs)
    }

    #[must_use]
    pub fn popup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.popup_poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

impl StorageSettings {
    /// Resolve the store secret, environment variable first
    #[must_use]
    pub fn get_secret(&self) -> String {
        resolve_env_override(self.secret_env.as_deref(), Some(&self.secret)).unwrap_or_default()
    }
}

impl ProviderSettings {
    #[must_use]
    pub fn new(name: Provider, flow: AdapterFlow) -> Self {
        Self {
            name,
            flow,
            display_name: None,
            authorization_endpoint: None,
            token_endpoint: None,
            scopes: Vec::new(),
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            extra_auth_params: HashMap::new(),
            use_pkce: true,
            enabled: true,
        }
    }

    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        resolve_env_override(self.client_id_env.as_deref(), self.client_id.as_ref())
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        resolve_env_override(self.client_secret_env.as_deref(), self.client_secret.as_ref())
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.name.to_string())
    }
}

fn resolve_env_override(env_var: Option<&str>, direct: Option<&String>) -> Option<String> {
    if let Some(env_var) = env_var {
        if let Ok(value) = std::env::var(env_var) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    direct.filter(|v| !v.is_empty()).cloned()
}

impl AuthSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// Priority, highest first: environment variables, `Settings.toml` in
    /// `RELIST_SECRETS_DIR`, `Settings.toml` in the working directory, defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        Self::init_logging(&settings.logging);
        Self::ensure_storage_secret(&mut settings.storage);

        Ok(settings)
    }

    /// Parse settings from a TOML document without touching the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid settings TOML
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(basic_toml::from_str(content)?)
    }

    fn load_base_settings() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        let local_path = PathBuf::from(SETTINGS_FILE);
        if local_path.exists() {
            settings = Self::from_file(&local_path)?;
            info!("✓ Loaded base settings from {}", local_path.display());
        }

        if let Ok(secrets_dir) = std::env::var(SECRETS_DIR_ENV) {
            let secrets_path = Path::new(&secrets_dir).join(SETTINGS_FILE);
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                info!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                info!(
                    "ℹ {SECRETS_DIR_ENV} set but no {SETTINGS_FILE} found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        if let Ok(origin) = std::env::var("APP_ORIGIN") {
            settings.application.origin = origin;
        }
        if let Ok(redirect_base_url) = std::env::var("REDIRECT_BASE_URL") {
            settings.application.redirect_base_url = redirect_base_url;
        }

        Self::apply_numeric_env_override(
            "AUTH_FLOW_TIMEOUT_SECS",
            &mut settings.session.flow_timeout_secs,
        );
        Self::apply_numeric_env_override(
            "AUTH_ENRICHMENT_GRACE_SECS",
            &mut settings.session.enrichment_grace_secs,
        );
        Self::apply_numeric_env_override(
            "AUTH_POPUP_POLL_MS",
            &mut settings.session.popup_poll_interval_ms,
        );

        if let Ok(path) = std::env::var("AUTH_STORE_PATH") {
            settings.storage.path = Some(path).filter(|p| !p.is_empty());
        }
        if let Ok(secret) = std::env::var("AUTH_STORE_SECRET") {
            if !secret.is_empty() {
                settings.storage.secret = secret;
            }
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            settings.logging.level = level;
        }
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            match value_str.parse::<u64>() {
                Ok(value) => *target = value,
                Err(_) => warn!("Ignoring {env_var}={value_str}: not a number"),
            }
        }
    }

    /// A persistent store without a configured secret gets a generated one
    fn ensure_storage_secret(storage: &mut StorageSettings) {
        if storage.path.is_some() && storage.get_secret().is_empty() {
            storage.secret = generate_secret();
            warn!("⚠️  Using auto-generated credential store secret");
            warn!("   Stored credentials will be unreadable after restart unless AUTH_STORE_SECRET is set");
        }
    }

    fn init_logging(logging: &LoggingSettings) {
        let env = env_logger::Env::default().default_filter_or(logging.level.clone());
        // A logger may already be installed by the host application or a test
        let _ = env_logger::Builder::from_env(env).try_init();
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get enabled providers
    #[must_use]
    pub fn get_enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }

    /// Get provider by name
    #[must_use]
    pub fn get_provider(&self, name: Provider) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env_vars() {
        for var in [
            "APP_ORIGIN",
            "REDIRECT_BASE_URL",
            "AUTH_FLOW_TIMEOUT_SECS",
            "AUTH_ENRICHMENT_GRACE_SECS",
            "AUTH_POPUP_POLL_MS",
            "AUTH_STORE_PATH",
            "AUTH_STORE_SECRET",
            "TEST_EBAY_CLIENT_ID",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_session_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.flow_timeout(), Duration::from_secs(120));
        assert_eq!(settings.enrichment_grace(), Duration::from_secs(5));
        assert_eq!(settings.popup_poll_interval(), Duration::from_secs(1));
        assert!(settings.wait_for_profile);
    }

    #[test]
    fn test_parse_provider_settings() {
        let toml = r#"
            [application]
            origin = "https://app.example.com"
            redirect_base_url = "https://app.example.com/"

            [session]
            flow_timeout_secs = 60

            [[providers]]
            name = "ebay"
            flow = "popup"
            authorization_endpoint = "https://auth.ebay.com/oauth2/authorize"
            token_endpoint = "https://api.ebay.com/identity/v1/oauth2/token"
            client_id = "ebay-client"
            scopes = ["https://api.ebay.com/oauth/api_scope"]

            [[providers]]
            name = "google"
            flow = "redirect"
            enabled = false
        "#;
        let settings = AuthSettings::from_toml(toml).unwrap();
        assert_eq!(settings.session.flow_timeout_secs, 60);
        assert_eq!(settings.session.enrichment_grace_secs, 5);
        assert_eq!(
            settings.application.redirect_uri(),
            "https://app.example.com/auth/callback"
        );

        let ebay = settings.get_provider(Provider::Ebay).unwrap();
        assert_eq!(ebay.flow, AdapterFlow::Popup);
        assert!(ebay.use_pkce);
        assert_eq!(settings.get_enabled_providers().len(), 1);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = r#"
            [[providers]]
            name = "github"
            flow = "popup"
        "#;
        assert!(AuthSettings::from_toml(toml).is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clean_env_vars();
        std::env::set_var("AUTH_FLOW_TIMEOUT_SECS", "45");
        std::env::set_var("AUTH_POPUP_POLL_MS", "not-a-number");
        std::env::set_var("APP_ORIGIN", "https://relist.example.com");
        std::env::set_var("AUTH_STORE_PATH", "/tmp/creds.enc");

        let mut settings = AuthSettings::default();
        AuthSettings::apply_env_overrides(&mut settings);

        assert_eq!(settings.session.flow_timeout_secs, 45);
        assert_eq!(
            settings.session.popup_poll_interval_ms,
            DEFAULT_POPUP_POLL_INTERVAL_MS
        );
        assert_eq!(settings.application.origin, "https://relist.example.com");
        assert_eq!(settings.storage.path.as_deref(), Some("/tmp/creds.enc"));

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_client_id_env_takes_precedence() {
        clean_env_vars();
        let mut provider = ProviderSettings::new(Provider::Ebay, AdapterFlow::Popup);
        provider.client_id = Some("direct".to_string());
        provider.client_id_env = Some("TEST_EBAY_CLIENT_ID".to_string());
        assert_eq!(provider.get_client_id().as_deref(), Some("direct"));

        std::env::set_var("TEST_EBAY_CLIENT_ID", "from-env");
        assert_eq!(provider.get_client_id().as_deref(), Some("from-env"));

        clean_env_vars();
    }

    #[test]
    fn test_generated_secret_only_for_persistent_store() {
        let mut memory = StorageSettings::default();
        AuthSettings::ensure_storage_secret(&mut memory);
        assert!(memory.secret.is_empty());

        let mut persistent = StorageSettings {
            path: Some("/tmp/creds.enc".to_string()),
            ..Default::default()
        };
        AuthSettings::ensure_storage_secret(&mut persistent);
        assert!(persistent.secret.len() > 40);
    }
}
