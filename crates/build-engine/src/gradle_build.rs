//! Gradle Test Runner
//!
//! Wraps Gradle to run instrumented tests against a single emulator.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use instrumented_tests_emulator_bridge::DeviceSerial;

use crate::{BuildError, TestReport, TestTask};

/// Runs a test task against one device
#[async_trait]
pub trait TestTaskRunner: Send + Sync {
    /// Run `task` scoped to `serial`.
    ///
    /// A failing task is an `Ok` report with `success == false`; `Err` means
    /// the task could not be run at all.
    async fn execute(&self, task: &TestTask, serial: &DeviceSerial) -> Result<TestReport, BuildError>;
}

/// Gradle runner for Android projects
pub struct GradleBuild {
    java_home: Option<PathBuf>,
    android_home: Option<PathBuf>,
}

impl GradleBuild {
    /// Create a new Gradle runner
    pub fn new() -> Self {
        Self {
            java_home: None,
            android_home: None,
        }
    }

    /// Set JAVA_HOME
    pub fn with_java_home(mut self, path: PathBuf) -> Self {
        self.java_home = Some(path);
        self
    }

    /// Set ANDROID_HOME
    pub fn with_android_home(mut self, path: PathBuf) -> Self {
        self.android_home = Some(path);
        self
    }

    /// Get gradlew path inside the project
    fn gradlew_path(task: &TestTask) -> PathBuf {
        let wrapper_name = if cfg!(windows) {
            "gradlew.bat"
        } else {
            "gradlew"
        };
        task.project_dir.join(wrapper_name)
    }

    /// Resolve the Gradle executable: the project wrapper, else `gradle` on PATH
    pub fn gradle_executable(task: &TestTask) -> Result<PathBuf, BuildError> {
        let wrapper = Self::gradlew_path(task);
        if wrapper.exists() {
            return Ok(wrapper);
        }

        debug!("No Gradle wrapper at {:?}, looking for gradle on PATH", wrapper);
        which::which("gradle").map_err(|_| {
            BuildError::ToolchainNotFound(format!(
                "no Gradle wrapper in {:?} and no gradle on PATH",
                task.project_dir
            ))
        })
    }

    /// Build the Gradle command for `task` against `serial`
    fn command(&self, task: &TestTask, serial: &DeviceSerial) -> Result<Command, BuildError> {
        if !task.project_dir.is_dir() {
            return Err(BuildError::ConfigError(format!(
                "project directory {:?} does not exist",
                task.project_dir
            )));
        }

        let gradle = Self::gradle_executable(task)?;

        let mut cmd = Command::new(gradle);
        cmd.current_dir(&task.project_dir);
        cmd.args(task.gradle_args());
        cmd.env("ANDROID_SERIAL", serial.as_str());

        if let Some(ref java_home) = self.java_home {
            cmd.env("JAVA_HOME", java_home);
        }
        if let Some(ref android_home) = self.android_home {
            cmd.env("ANDROID_HOME", android_home);
            cmd.env("ANDROID_SDK_ROOT", android_home);
        }

        Ok(cmd)
    }
}

impl Default for GradleBuild {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestTaskRunner for GradleBuild {
    async fn execute(&self, task: &TestTask, serial: &DeviceSerial) -> Result<TestReport, BuildError> {
        info!("Running {} against {}...", task.name, serial);
        debug!("Running: gradle {:?}", task.gradle_args());

        let cmd = self.command(task, serial)?;
        let report = run_captured(cmd).await?;

        if report.success {
            info!("{} passed on {}", task.name, serial);
        } else {
            warn!("{} failed on {} (exit code {:?})", task.name, serial, report.exit_code);
        }

        Ok(report)
    }
}

/// Run `cmd`, streaming its combined output to the log and capturing it
pub async fn run_captured(mut cmd: Command) -> Result<TestReport, BuildError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Stream stdout
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }

    // Stream stderr
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut output = Vec::new();
    while let Some(line) = rx.recv().await {
        info!("{}", line);
        output.push(line);
    }

    let status = child.wait().await?;

    Ok(TestReport {
        success: status.success(),
        exit_code: status.code(),
        output,
    })
}

async fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_project_dir() {
        let task = TestTask::new("connectedCheck", PathBuf::from("/nonexistent/project"));
        let result = GradleBuild::new().command(&task, &DeviceSerial::from_port(5554));
        assert!(matches!(result, Err(BuildError::ConfigError(_))));
    }

    #[test]
    fn test_wrapper_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = dir.path().join(if cfg!(windows) { "gradlew.bat" } else { "gradlew" });
        std::fs::write(&wrapper, "#!/bin/sh\n").unwrap();

        let task = TestTask::new("connectedCheck", dir.path().to_path_buf());
        assert_eq!(GradleBuild::gradle_executable(&task).unwrap(), wrapper);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_passing_run() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'BUILD SUCCESSFUL'; echo 'warning: slow' >&2");

        let report = run_captured(cmd).await.unwrap();
        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.output.len(), 2);
        assert!(report.output.contains(&"BUILD SUCCESSFUL".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_run_is_a_report() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'FAILURE: Build failed with an exception.'; exit 1");

        let report = run_captured(cmd).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(1));
        assert_eq!(report.output_text(), "FAILURE: Build failed with an exception.");
    }

    #[test]
    fn test_command_targets_serial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(if cfg!(windows) { "gradlew.bat" } else { "gradlew" }), "").unwrap();
        let task = TestTask::new("connectedCheck", dir.path().to_path_buf())
            .with_flags("--stacktrace")
            .unwrap();

        let cmd = GradleBuild::new()
            .with_android_home(PathBuf::from("/opt/android-sdk"))
            .command(&task, &DeviceSerial::from_port(5558))
            .unwrap();
        let std_cmd = cmd.as_std();

        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["connectedCheck", "--console=plain", "--stacktrace"]);

        let env = |key: &str| {
            std_cmd
                .get_envs()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| v)
                .map(|v| v.to_string_lossy().to_string())
        };
        assert_eq!(env("ANDROID_SERIAL").as_deref(), Some("emulator-5558"));
        assert_eq!(env("ANDROID_SDK_ROOT").as_deref(), Some("/opt/android-sdk"));
    }
}
