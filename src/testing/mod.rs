//! Unified testing utilities
//!
//! Fakes for the collaborators the coordinator talks to, and fixtures that
//! wire them together. Available to unit tests and, behind the `testing`
//! feature, to integration tests.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built coordinators, stores, credentials and settings
//! - [`mock`] - Fake contexts, launcher and token endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relist_auth::testing::{FakeLauncher, TestFixtures};
//!
//! let launcher = Arc::new(FakeLauncher::default());
//! let coordinator = TestFixtures::coordinator(launcher.clone())
//!     .with_adapter(Arc::new(MockAdapter::new(Provider::Ebay)))
//!     .build();
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::TestFixtures;
pub use mock::{FakeLauncher, FakeSecondaryContext, StubTokenEndpoint};

/// Common test constants
pub mod constants {
    /// Origin the test application runs on
    pub const APP_ORIGIN: &str = "https://app.example.com";

    /// Redirect target registered with test providers
    pub const REDIRECT_URI: &str = "https://app.example.com/auth/callback";

    /// Popup-closed poll interval used by fixtures, in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 10;

    /// Access token returned by a default [`super::StubTokenEndpoint`]
    pub const STUB_ACCESS_TOKEN: &str = "stub-access-token";

    /// Secret for encrypted file stores in tests
    pub const TEST_STORAGE_SECRET: &[u8] = b"test_key_32_bytes_long_for_test_";
}
