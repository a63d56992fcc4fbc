//! ADB (Android Debug Bridge) Client
//!
//! Sends control commands to emulators and queries their properties.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::device::DeviceSerial;

/// Property that flips to [`BOOT_COMPLETED_SENTINEL`] once Android has booted
pub const BOOT_COMPLETED_PROPERTY: &str = "sys.boot_completed";

/// Value of [`BOOT_COMPLETED_PROPERTY`] on a booted device
pub const BOOT_COMPLETED_SENTINEL: &str = "1";

/// Console command that shuts an emulator down
pub const EMU_KILL: &str = "emu kill";

/// ADB errors
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("ADB not found at {0}")]
    NotFound(PathBuf),
    #[error("ADB command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends control commands to one addressed device
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Send `command` (e.g. `emu kill`) to the device at `serial`
    async fn trigger(&self, serial: &DeviceSerial, command: &str) -> Result<(), AdbError>;
}

/// Reads the boot-completion property of a device
#[async_trait]
pub trait BootProbe: Send + Sync {
    /// Raw value of [`BOOT_COMPLETED_PROPERTY`]; may be empty while booting
    async fn boot_property(&self, serial: &DeviceSerial) -> Result<String, AdbError>;
}

/// ADB Client
pub struct AdbClient {
    sdk_path: PathBuf,
}

impl AdbClient {
    /// Create a new ADB client
    pub fn new(sdk_path: PathBuf) -> Self {
        Self { sdk_path }
    }

    /// Get the ADB executable path
    fn adb_path(&self) -> PathBuf {
        let platform_tools = self.sdk_path.join("platform-tools");
        if cfg!(windows) {
            platform_tools.join("adb.exe")
        } else {
            platform_tools.join("adb")
        }
    }

    /// Check if ADB is available
    pub fn is_available(&self) -> bool {
        self.adb_path().exists()
    }

    /// Build an ADB command, failing if the binary is missing
    fn command(&self) -> Result<Command, AdbError> {
        let adb = self.adb_path();

        if !adb.exists() {
            return Err(AdbError::NotFound(adb));
        }

        let mut cmd = Command::new(adb);
        cmd.kill_on_drop(true);
        Ok(cmd)
    }

    /// Run a prepared ADB command and return its stdout
    async fn run(&self, mut cmd: Command) -> Result<String, AdbError> {
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdbError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run an ADB command for a specific device
    async fn run_for_device(&self, serial: &DeviceSerial, args: &[&str]) -> Result<String, AdbError> {
        debug!("adb -s {} {:?}", serial, args);

        let mut cmd = self.command()?;
        cmd.arg("-s").arg(serial.as_str()).args(args);
        self.run(cmd).await
    }

    /// Get device property.
    ///
    /// The device is selected through `ANDROID_SERIAL` rather than `-s`, so
    /// the query behaves the same whether or not ADB already lists the device.
    pub async fn get_prop(&self, serial: &DeviceSerial, prop: &str) -> Result<String, AdbError> {
        debug!("ANDROID_SERIAL={} adb shell getprop {}", serial, prop);

        let mut cmd = self.command()?;
        cmd.env("ANDROID_SERIAL", serial.as_str())
            .args(["shell", "getprop", prop]);

        let output = self.run(cmd).await?;
        Ok(output.trim().to_string())
    }

    /// Send a device command such as `emu kill`
    pub async fn send(&self, serial: &DeviceSerial, command: &str) -> Result<(), AdbError> {
        let args: Vec<&str> = command.split_whitespace().collect();
        self.run_for_device(serial, &args).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for AdbClient {
    async fn trigger(&self, serial: &DeviceSerial, command: &str) -> Result<(), AdbError> {
        self.send(serial, command).await
    }
}

#[async_trait]
impl BootProbe for AdbClient {
    async fn boot_property(&self, serial: &DeviceSerial) -> Result<String, AdbError> {
        self.get_prop(serial, BOOT_COMPLETED_PROPERTY).await
    }
}
