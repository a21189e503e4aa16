//! Session Coordination Module
//!
//! Drives authentication attempts from start to a terminal state and tells
//! the rest of the application what changed.
//!
//! # Modules
//!
//! - [`coordinator`] - Session lifecycle, callback handling and sign-out
//! - [`handle`] - Caller-side view of one attempt
//! - [`notifier`] - Broadcast of session and credential changes
//! - [`supervisor`] - Per-session deadline timers

pub mod coordinator;
pub mod handle;
pub mod notifier;
pub mod supervisor;

pub use coordinator::{
    CallbackDisposition, CoordinatorConfig, SessionCoordinator, SessionCoordinatorBuilder,
    StartOptions, CLOSED_CONTEXT_SETTLE,
};
pub use handle::{SessionHandle, SessionUpdate};
pub use notifier::{AuthEvent, ObservedState, SessionNotifier, SessionSubscription};
pub use supervisor::{TimeoutSupervisor, TimerKind};
