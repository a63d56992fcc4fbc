//! CLI commands
//!
//! Command-line surface for running instrumented tests on a throwaway emulator.
//! Every option can also come from the environment, which is how CI usually
//! drives it.

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use instrumented_tests_build_engine::TestReport;
use instrumented_tests_core::{LifecycleError, Orchestrator, RunConfig, Toolchain};

/// Run command options
#[derive(Debug, Clone, Default, Args)]
pub struct RunCommand {
    /// TOML file with base settings; flags and environment override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name of the AVD to create
    #[arg(long, env = "AVD_NAME")]
    pub avd_name: Option<String>,

    /// System image package, e.g. "system-images;android-34;google_apis;x86_64"
    #[arg(long, env = "TARGET_ID")]
    pub target_id: Option<String>,

    /// Other options for `avdmanager create avd`
    #[arg(long, env = "AVD_OPTIONS", allow_hyphen_values = true)]
    pub avd_options: Option<String>,

    /// ABI of the system image
    #[arg(long, env = "AVD_ABI")]
    pub abi: Option<String>,

    /// Tag of the system image
    #[arg(long, env = "AVD_TAG")]
    pub tag: Option<String>,

    /// Android SDK root
    #[arg(long, env = "ANDROID_HOME")]
    pub android_home: Option<PathBuf>,

    /// JDK handed to Gradle
    #[arg(long, env = "JAVA_HOME")]
    pub java_home: Option<PathBuf>,

    /// Extra flags for Gradle
    #[arg(long, env = "FL_GRADLE_FLAGS", allow_hyphen_values = true)]
    pub gradle_flags: Option<String>,

    /// Gradle task that runs the tests
    #[arg(long, env = "FL_GRADLE_TASK")]
    pub gradle_task: Option<String>,

    /// Root of the Gradle project
    #[arg(long, env = "FL_GRADLE_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Console port, even and within 5554-5584; random when unset
    #[arg(long, env = "AVD_PORT")]
    pub port: Option<u16>,

    /// Seconds to wait for the emulator to boot
    #[arg(long, env = "BOOT_TIMEOUT", value_name = "SECS")]
    pub boot_timeout: Option<u64>,

    /// Extra emulator command line options
    #[arg(long, env = "EMULATOR_OPTIONS", allow_hyphen_values = true)]
    pub emulator_options: Option<String>,

    /// Show the emulator window
    #[arg(
        long,
        env = "EMULATOR_VISIBLE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub visible: Option<bool>,
}

impl RunCommand {
    /// Build the run configuration: file first, then flags and environment
    pub async fn resolve_config(&self) -> Result<RunConfig, LifecycleError> {
        let mut config = match self.config {
            Some(ref path) => RunConfig::load(path).await?,
            None => RunConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut RunConfig) {
        if let Some(ref name) = self.avd_name {
            config.avd.name = name.clone();
        }
        if let Some(ref package) = self.target_id {
            config.avd.package = package.clone();
        }
        if self.avd_options.is_some() {
            config.avd.options = self.avd_options.clone();
        }
        if self.abi.is_some() {
            config.avd.abi = self.abi.clone();
        }
        if self.tag.is_some() {
            config.avd.tag = self.tag.clone();
        }

        if self.port.is_some() {
            config.emulator.port = self.port;
        }
        if let Some(secs) = self.boot_timeout {
            config.emulator.boot_timeout_secs = secs;
        }
        if self.emulator_options.is_some() {
            config.emulator.options = self.emulator_options.clone();
        }
        if let Some(visible) = self.visible {
            config.emulator.visible = visible;
        }

        if self.android_home.is_some() {
            config.android.sdk_path = self.android_home.clone();
        }
        if self.java_home.is_some() {
            config.android.java_home = self.java_home.clone();
        }

        if let Some(ref task) = self.gradle_task {
            config.gradle.task = task.clone();
        }
        if self.gradle_flags.is_some() {
            config.gradle.flags = self.gradle_flags.clone();
        }
        if let Some(ref dir) = self.project_dir {
            config.gradle.project_dir = dir.clone();
        }
    }

    /// Execute the run command, returning the test task's report
    pub async fn execute(&self, cancel: CancellationToken) -> Result<TestReport, LifecycleError> {
        let mut config = self.resolve_config().await?;
        config.assign_port();
        config.validate()?;

        let sdk_path = config.android.resolve_sdk_path().ok_or_else(|| {
            LifecycleError::ToolUnavailable("Android SDK not found; set ANDROID_HOME".into())
        })?;
        info!("Using Android SDK at {:?}", sdk_path);

        let tools = Toolchain::android(sdk_path, config.android.java_home.clone());
        let orchestrator = Orchestrator::new(config, tools).with_cancellation(cancel);

        orchestrator.run().await.into_result()
    }
}
