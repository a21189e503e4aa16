#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the relist-auth library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod channel;
pub mod models;
pub mod oauth;
pub mod session;
pub mod settings;
pub mod store;
pub mod utils;

// Test utilities, available for unit tests and integration tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use channel::{ContextLauncher, CrossContextChannel, PopupRelay, SecondaryContext};
pub use models::{AuthError, Credential, Provider, RefreshError, SessionState};
pub use oauth::{AdapterRegistry, ProviderAdapter};
pub use session::{SessionCoordinator, SessionHandle, StartOptions};
pub use settings::AuthSettings;
pub use store::TokenStore;
