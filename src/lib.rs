//! instrumented-tests - Android instrumented tests on a throwaway emulator
//!
//! Every run gets a brand new AVD that is deleted again afterwards, so runs
//! never share device state.
//!
//! ## Architecture
//!
//! - `instrumented-tests-core`: lifecycle orchestration, configuration and errors
//! - `instrumented-tests-emulator-bridge`: avdmanager, emulator and adb wrappers
//! - `instrumented-tests-build-engine`: Gradle test task runner

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commands;

// Re-export main components for library usage
pub use instrumented_tests_core as core;
pub use instrumented_tests_emulator_bridge as emulator;
pub use instrumented_tests_build_engine as build;

pub use instrumented_tests_core::{APP_NAME, VERSION};

/// Prelude module for convenient imports
pub mod prelude {
    pub use instrumented_tests_core::{LifecycleError, LifecycleResult, Orchestrator, RunConfig, Toolchain};
    pub use instrumented_tests_emulator_bridge::{AdbClient, AvdManager, EmulatorLauncher};
    pub use instrumented_tests_build_engine::{GradleBuild, TestReport, TestTask};
}
