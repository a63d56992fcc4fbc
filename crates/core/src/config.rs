//! Run Configuration
//!
//! Settings for one instrumented test run:
//! - the AVD to create
//! - how the emulator is launched and how long it may take to boot
//! - where the Android SDK lives
//! - which Gradle task runs the tests

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use instrumented_tests_build_engine::{parse_flags, TestTask, DEFAULT_TEST_TASK};
use instrumented_tests_emulator_bridge::{validate_port, BootPoller, DeviceSpec, ImageSelector};

use crate::error::{LifecycleError, Result};

/// AVD configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvdConfig {
    /// Name of the AVD to create
    pub name: String,
    /// System image package (`avdmanager -k`)
    pub package: String,
    /// ABI of the system image
    pub abi: Option<String>,
    /// System image tag
    pub tag: Option<String>,
    /// Other `avdmanager create avd` options, e.g. `-d pixel_6 --sdcard 512M`
    pub options: Option<String>,
}

/// Emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Console port; a random even port in 5554-5584 when unset
    pub port: Option<u16>,
    /// Seconds to wait for boot completion
    pub boot_timeout_secs: u64,
    /// Extra emulator command line options
    pub options: Option<String>,
    /// Show the emulator window
    pub visible: bool,
    /// GPU mode override
    pub gpu: Option<String>,
    /// Milliseconds between boot polls
    pub poll_interval_ms: u64,
    /// Seconds a single boot query may take
    pub query_timeout_secs: u64,
    /// Seconds to wait for the emulator to exit after `emu kill`
    pub shutdown_grace_secs: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            port: None,
            boot_timeout_secs: 500,
            options: None,
            visible: false,
            gpu: None,
            poll_interval_ms: 2000,
            query_timeout_secs: 10,
            shutdown_grace_secs: 30,
        }
    }
}

impl EmulatorConfig {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn boot_poller(&self) -> BootPoller {
        BootPoller::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.query_timeout_secs),
        )
    }
}

/// Android SDK configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Path to Android SDK
    pub sdk_path: Option<PathBuf>,
    /// Path to JDK handed to Gradle
    pub java_home: Option<PathBuf>,
}

impl AndroidConfig {
    /// Get Android SDK path, with auto-detection
    pub fn resolve_sdk_path(&self) -> Option<PathBuf> {
        self.sdk_path
            .clone()
            .or_else(|| {
                ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
                    .iter()
                    .filter_map(|var| std::env::var_os(var))
                    .map(PathBuf::from)
                    .find(|p| !p.as_os_str().is_empty())
            })
            .or_else(|| {
                // Auto-detect common paths
                let candidates = if cfg!(windows) {
                    vec![
                        dirs::data_local_dir().map(|d| d.join("Android").join("Sdk")),
                        Some(PathBuf::from("C:\\Android\\sdk")),
                    ]
                } else {
                    vec![
                        dirs::home_dir().map(|h| h.join("Android").join("Sdk")),
                        dirs::home_dir().map(|h| h.join("Library").join("Android").join("sdk")),
                        Some(PathBuf::from("/usr/local/android-sdk")),
                    ]
                };

                candidates.into_iter().flatten().find(|p| p.exists())
            })
    }
}

/// Gradle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradleConfig {
    /// Gradle task to run
    pub task: String,
    /// Flags passed to Gradle, e.g. `--stacktrace`
    pub flags: Option<String>,
    /// Root directory of the Gradle project
    pub project_dir: PathBuf,
}

impl Default for GradleConfig {
    fn default() -> Self {
        Self {
            task: DEFAULT_TEST_TASK.to_string(),
            flags: None,
            project_dir: PathBuf::from("."),
        }
    }
}

/// Complete configuration of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub avd: AvdConfig,
    pub emulator: EmulatorConfig,
    pub android: AndroidConfig,
    pub gradle: GradleConfig,
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| LifecycleError::InvalidConfig(e.to_string()))
    }

    /// Fill in a random console port when none is configured
    pub fn assign_port(&mut self) -> u16 {
        *self
            .emulator
            .port
            .get_or_insert_with(instrumented_tests_emulator_bridge::random_emulator_port)
    }

    /// Check every value that must hold before anything is spawned
    pub fn validate(&self) -> Result<()> {
        if self.avd.name.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig("AVD name is required".into()));
        }
        if self.avd.name.chars().any(|c| !(c.is_ascii_alphanumeric() || "._-".contains(c))) {
            return Err(LifecycleError::InvalidConfig(format!(
                "AVD name '{}' may only contain letters, digits, '.', '_' and '-'",
                self.avd.name
            )));
        }
        if self.avd.package.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig("system image package is required".into()));
        }

        let port = self
            .emulator
            .port
            .ok_or_else(|| LifecycleError::InvalidConfig("no console port assigned".into()))?;
        validate_port(port)?;

        if self.emulator.boot_timeout_secs == 0 {
            return Err(LifecycleError::InvalidConfig("boot timeout must be positive".into()));
        }
        if self.emulator.poll_interval_ms == 0 || self.emulator.query_timeout_secs == 0 {
            return Err(LifecycleError::InvalidConfig(
                "poll interval and query timeout must be positive".into(),
            ));
        }
        if self.gradle.task.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig("Gradle task is required".into()));
        }

        split_option("AVD options", self.avd.options.as_deref())?;
        split_option("emulator options", self.emulator.options.as_deref())?;
        split_option("Gradle flags", self.gradle.flags.as_deref())?;

        Ok(())
    }

    /// Device to create and launch; call after [`RunConfig::validate`]
    pub fn device_spec(&self) -> Result<DeviceSpec> {
        let port = self
            .emulator
            .port
            .ok_or_else(|| LifecycleError::InvalidConfig("no console port assigned".into()))?;

        let spec = DeviceSpec {
            name: self.avd.name.trim().to_string(),
            image: ImageSelector {
                package: self.avd.package.trim().to_string(),
                abi: self.avd.abi.clone().filter(|s| !s.is_empty()),
                tag: self.avd.tag.clone().filter(|s| !s.is_empty()),
                options: split_option("AVD options", self.avd.options.as_deref())?,
            },
            port,
            visible: self.emulator.visible,
            gpu: self.emulator.gpu.clone(),
            emulator_args: split_option("emulator options", self.emulator.options.as_deref())?,
        };

        spec.validate()?;
        Ok(spec)
    }

    /// Gradle task that runs the tests
    pub fn test_task(&self) -> Result<TestTask> {
        let mut task = TestTask::new(self.gradle.task.trim(), self.gradle.project_dir.clone());
        task.flags = split_option("Gradle flags", self.gradle.flags.as_deref())?;
        Ok(task)
    }
}

/// Split an optional free-form option string into arguments
fn split_option(what: &str, value: Option<&str>) -> Result<Vec<String>> {
    match value {
        Some(value) => parse_flags(value)
            .map_err(|_| LifecycleError::InvalidConfig(format!("cannot split {}: {}", what, value))),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> RunConfig {
        let mut config = RunConfig::default();
        config.avd.name = "ci_device".into();
        config.avd.package = "system-images;android-34;google_apis;x86_64".into();
        config.emulator.port = Some(5554);
        config
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.emulator.boot_timeout_secs, 500);
        assert!(!config.emulator.visible);
        assert_eq!(config.gradle.task, "connectedCheck");
        assert_eq!(config.gradle.project_dir, PathBuf::from("."));
    }

    #[test]
    fn test_port_validation() {
        for bad in [5553u16, 5555, 5552, 5586, 5037] {
            let mut config = config();
            config.emulator.port = Some(bad);
            assert!(
                matches!(config.validate(), Err(LifecycleError::InvalidConfig(_))),
                "port {} should be rejected",
                bad
            );
        }

        for good in [5554u16, 5570, 5584] {
            let mut config = config();
            config.emulator.port = Some(good);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_required_fields() {
        let mut config = config();
        config.avd.name = "  ".into();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.avd.name = "bad name".into();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.avd.package.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_assign_port_keeps_explicit_port() {
        let mut config = config();
        assert_eq!(config.assign_port(), 5554);

        config.emulator.port = None;
        let port = config.assign_port();
        assert!(validate_port(port).is_ok());
        assert_eq!(config.emulator.port, Some(port));
    }

    #[test]
    fn test_device_spec() {
        let mut config = config();
        config.avd.options = Some("-d pixel_6".into());
        config.avd.abi = Some(String::new());
        config.emulator.options = Some("-no-snapshot -memory 2048".into());

        let spec = config.device_spec().unwrap();
        assert_eq!(spec.serial().as_str(), "emulator-5554");
        assert_eq!(spec.image.abi, None);
        assert_eq!(spec.image.options, vec!["-d", "pixel_6"]);
        assert_eq!(spec.emulator_args, vec!["-no-snapshot", "-memory", "2048"]);
    }

    #[test]
    fn test_test_task() {
        let mut config = config();
        config.gradle.flags = Some("--stacktrace".into());
        let task = config.test_task().unwrap();
        assert_eq!(task.name, "connectedCheck");
        assert_eq!(task.flags, vec!["--stacktrace"]);
    }

    #[test]
    fn test_escaped_option_stays_one_argument() {
        let mut config = config();
        config.gradle.flags = Some(r"-Pmsg=a\ b --info".into());
        assert_eq!(config.test_task().unwrap().flags, vec!["-Pmsg=a b", "--info"]);
    }

    #[test]
    fn test_unbalanced_quotes_fail_validation() {
        let mut config = config();
        config.emulator.options = Some("-prop \"persist.sys.language=en".into());
        assert!(matches!(config.validate(), Err(LifecycleError::InvalidConfig(_))));
        assert!(matches!(config.device_spec(), Err(LifecycleError::InvalidConfig(_))));

        let mut config = self::config();
        config.gradle.flags = Some("'--info".into());
        assert!(matches!(config.validate(), Err(LifecycleError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[avd]
name = "ci_device"
package = "system-images;android-34;google_apis;x86_64"

[emulator]
port = 5556
boot_timeout_secs = 600

[gradle]
task = ":app:connectedDebugAndroidTest"
"#
        )
        .unwrap();

        let config = RunConfig::load(file.path()).await.unwrap();
        assert_eq!(config.avd.name, "ci_device");
        assert_eq!(config.emulator.port, Some(5556));
        assert_eq!(config.emulator.boot_timeout_secs, 600);
        assert_eq!(config.emulator.poll_interval_ms, 2000);
        assert_eq!(config.gradle.task, ":app:connectedDebugAndroidTest");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_toml_is_invalid_config() {
        let result = RunConfig::from_toml("[emulator]\nport = \"five\"\n");
        assert!(matches!(result, Err(LifecycleError::InvalidConfig(_))));
    }

    #[test]
    fn test_explicit_sdk_path_wins() {
        let android = AndroidConfig {
            sdk_path: Some(PathBuf::from("/opt/android-sdk")),
            java_home: None,
        };
        assert_eq!(android.resolve_sdk_path(), Some(PathBuf::from("/opt/android-sdk")));
    }
}
