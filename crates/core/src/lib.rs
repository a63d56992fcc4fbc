//! Instrumented Tests Core - Orchestrator and shared types
//!
//! This crate drives the lifecycle of a throwaway emulator: it creates the
//! AVD, boots it, runs the instrumented tests against it and always tears it
//! down again.

pub mod orchestrator;
pub mod config;
pub mod events;
pub mod error;

pub use orchestrator::{LifecycleResult, LifecycleState, Orchestrator, Toolchain};
pub use config::RunConfig;
pub use events::{Event, EventBus, EventSubscription};
pub use error::{LifecycleError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "instrumented-tests";
