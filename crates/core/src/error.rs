//! Error types for instrumented test runs
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use instrumented_tests_build_engine::BuildError;
use instrumented_tests_emulator_bridge::{AdbError, AvdError, EmulatorError, PortError, ProcessStatus};

/// Why a lifecycle run failed
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Failed to create AVD '{name}': {reason}")]
    ImageCreateFailed { name: String, reason: String },

    #[error("Failed to delete AVD: {0}")]
    ImageDeleteFailed(String),

    #[error("Failed to start emulator: {0}")]
    StartFailed(String),

    #[error("Emulator crashed while booting ({0})")]
    EmulatorCrashed(ProcessStatus),

    #[error("Emulator did not finish booting within {}s", .0.as_secs())]
    BootTimeout(Duration),

    #[error("Test task '{task}' failed (exit code {exit_code:?})")]
    TestTaskFailed { task: String, exit_code: Option<i32> },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    /// Whether the failure came from the device itself rather than tooling
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            LifecycleError::EmulatorCrashed(_) | LifecycleError::BootTimeout(_)
        )
    }

    /// Process exit code a CLI should report for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::TestTaskFailed { .. } => 1,
            LifecycleError::InvalidConfig(_) => 2,
            LifecycleError::ToolUnavailable(_) => 3,
            LifecycleError::EmulatorCrashed(_) | LifecycleError::BootTimeout(_) => 4,
            LifecycleError::Cancelled => 130,
            _ => 5,
        }
    }

    /// Listing AVDs failed: the registry tool itself is unusable
    pub fn from_list(e: AvdError) -> Self {
        LifecycleError::ToolUnavailable(e.to_string())
    }

    /// Creating AVD `name` failed; anything but a missing avdmanager is a create failure
    pub fn from_create(name: &str, e: AvdError) -> Self {
        match e {
            AvdError::ManagerNotFound(_) => LifecycleError::ToolUnavailable(e.to_string()),
            AvdError::CreateFailed(reason) => LifecycleError::ImageCreateFailed {
                name: name.to_string(),
                reason,
            },
            other => LifecycleError::ImageCreateFailed {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Deleting an AVD failed
    pub fn from_delete(e: AvdError) -> Self {
        match e {
            AvdError::ManagerNotFound(_) => LifecycleError::ToolUnavailable(e.to_string()),
            other => LifecycleError::ImageDeleteFailed(other.to_string()),
        }
    }
}

impl From<PortError> for LifecycleError {
    fn from(e: PortError) -> Self {
        LifecycleError::InvalidConfig(e.to_string())
    }
}

impl From<EmulatorError> for LifecycleError {
    fn from(e: EmulatorError) -> Self {
        match e {
            EmulatorError::NotFound(_) => LifecycleError::ToolUnavailable(e.to_string()),
            EmulatorError::StartFailed(msg) => LifecycleError::StartFailed(msg),
            EmulatorError::Io(io) => LifecycleError::StartFailed(io.to_string()),
        }
    }
}

impl From<AdbError> for LifecycleError {
    fn from(e: AdbError) -> Self {
        match e {
            AdbError::NotFound(_) => LifecycleError::ToolUnavailable(e.to_string()),
            AdbError::CommandFailed(_) => LifecycleError::ToolUnavailable(e.to_string()),
            AdbError::Io(io) => LifecycleError::Io(io),
        }
    }
}

impl From<BuildError> for LifecycleError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::ToolchainNotFound(_) => LifecycleError::ToolUnavailable(e.to_string()),
            BuildError::ConfigError(msg) => LifecycleError::InvalidConfig(msg),
            BuildError::Io(io) => LifecycleError::Io(io),
        }
    }
}
