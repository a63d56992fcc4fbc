//! Android Build Engine
//!
//! Runs the Gradle task that executes instrumented tests against one device.

pub mod config;
pub mod gradle_build;

pub use config::{parse_flags, TestTask, TestReport, DEFAULT_TEST_TASK};
pub use gradle_build::{GradleBuild, TestTaskRunner};

/// Build errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Toolchain not found: {0}")]
    ToolchainNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
