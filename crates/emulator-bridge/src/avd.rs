//! AVD (Android Virtual Device) Manager
//!
//! Lists, creates and deletes Android Virtual Devices through `avdmanager`.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::device::DeviceSpec;

/// AVD Manager errors
#[derive(Debug, thiserror::Error)]
pub enum AvdError {
    #[error("AVD Manager not found. Is Android SDK installed? (looked in {0})")]
    ManagerNotFound(PathBuf),
    #[error("Failed to list AVDs: {0}")]
    ListFailed(String),
    #[error("Failed to create AVD: {0}")]
    CreateFailed(String),
    #[error("Failed to delete AVD {name}: {reason}")]
    DeleteFailed { name: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named, persisted device definitions
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Names of every existing device image
    async fn list(&self) -> Result<BTreeSet<String>, AvdError>;

    /// Create the image described by `spec`
    async fn create(&self, spec: &DeviceSpec) -> Result<(), AvdError>;

    /// Delete the named image
    async fn delete(&self, name: &str) -> Result<(), AvdError>;
}

/// AVD Manager
pub struct AvdManager {
    sdk_path: PathBuf,
}

impl AvdManager {
    /// Create a new AVD manager
    pub fn new(sdk_path: PathBuf) -> Self {
        Self { sdk_path }
    }

    /// Get avdmanager path, preferring cmdline-tools over the legacy tools dir
    fn avdmanager_path(&self) -> Result<PathBuf, AvdError> {
        let name = if cfg!(windows) { "avdmanager.bat" } else { "avdmanager" };
        let candidates = [
            self.sdk_path.join("cmdline-tools").join("latest").join("bin").join(name),
            self.sdk_path.join("tools").join("bin").join(name),
        ];

        candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .ok_or_else(|| AvdError::ManagerNotFound(candidates[0].clone()))
    }

    /// List all existing AVD names
    pub async fn list_avds(&self) -> Result<BTreeSet<String>, AvdError> {
        let avdmanager = self.avdmanager_path()?;

        let output = Command::new(&avdmanager)
            .arg("list")
            .arg("avd")
            .arg("-c")
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AvdError::ListFailed(stderr.trim().to_string()));
        }

        let names = parse_avd_list(&String::from_utf8_lossy(&output.stdout));
        debug!("Existing AVDs: {:?}", names);
        Ok(names)
    }

    /// Create a new AVD
    pub async fn create_avd(&self, spec: &DeviceSpec) -> Result<(), AvdError> {
        let avdmanager = self.avdmanager_path()?;

        info!("Creating AVD: {} ({})", spec.name, spec.image.package);

        let args = create_args(spec);
        debug!("avdmanager {:?}", args);

        let mut child = Command::new(&avdmanager)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Answer "no" to the custom hardware profile question
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(b"no\n").await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(AvdError::CreateFailed(format!("{}\n{}", stdout.trim(), stderr.trim())));
        }

        info!("AVD created successfully: {}", spec.name);
        Ok(())
    }

    /// Delete an AVD
    pub async fn delete_avd(&self, name: &str) -> Result<(), AvdError> {
        let avdmanager = self.avdmanager_path()?;

        info!("Deleting AVD: {}", name);

        let output = Command::new(&avdmanager)
            .arg("delete")
            .arg("avd")
            .arg("-n").arg(name)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AvdError::DeleteFailed {
                name: name.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        info!("AVD deleted: {}", name);
        Ok(())
    }
}

#[async_trait]
impl ImageRegistry for AvdManager {
    async fn list(&self) -> Result<BTreeSet<String>, AvdError> {
        self.list_avds().await
    }

    async fn create(&self, spec: &DeviceSpec) -> Result<(), AvdError> {
        self.create_avd(spec).await
    }

    async fn delete(&self, name: &str) -> Result<(), AvdError> {
        self.delete_avd(name).await
    }
}

/// Build the `avdmanager create avd` argument list
pub fn create_args(spec: &DeviceSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "avd".to_string(),
        "-n".to_string(),
        spec.name.clone(),
        "-k".to_string(),
        spec.image.package.clone(),
    ];

    if let Some(ref abi) = spec.image.abi {
        args.push("--abi".to_string());
        args.push(abi.clone());
    }

    if let Some(ref tag) = spec.image.tag {
        args.push("--tag".to_string());
        args.push(tag.clone());
    }

    args.extend(spec.image.options.iter().cloned());
    args
}

/// Parse `avdmanager list avd` output into AVD names.
///
/// Handles both the compact (`-c`, one name per line) and the verbose
/// (`Name: <avd>`) formats.
pub fn parse_avd_list(output: &str) -> BTreeSet<String> {
    let verbose = output.lines().any(|l| l.trim_start().starts_with("Name:"));

    output
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            if verbose {
                line.strip_prefix("Name:").map(|n| n.trim().to_string())
            } else if line.is_empty() || line.contains(' ') {
                None
            } else {
                Some(line.to_string())
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ImageSelector;

    fn spec() -> DeviceSpec {
        DeviceSpec {
            name: "ci_device".into(),
            image: ImageSelector {
                package: "system-images;android-34;google_apis;x86_64".into(),
                abi: Some("x86_64".into()),
                tag: None,
                options: vec!["-d".into(), "pixel_6".into()],
            },
            port: 5554,
            visible: false,
            gpu: None,
            emulator_args: Vec::new(),
        }
    }

    #[test]
    fn test_parse_compact_list() {
        let names = parse_avd_list("Pixel_6_API_34\nci_device\n\n");
        assert_eq!(names.len(), 2);
        assert!(names.contains("ci_device"));
    }

    #[test]
    fn test_parse_verbose_list() {
        let out = "Available Android Virtual Devices:\n    Name: ci_device\n    Path: /home/ci/.android/avd/ci_device.avd\n  Target: Google APIs\n---------\n    Name: other\n";
        let names = parse_avd_list(out);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["ci_device", "other"]);
    }

    #[test]
    fn test_name_match_is_exact() {
        let names = parse_avd_list("ci_device_old\n");
        assert!(!names.contains("ci_device"));
    }

    #[test]
    fn test_create_args() {
        let args = create_args(&spec());
        assert_eq!(
            args,
            vec![
                "create", "avd", "-n", "ci_device",
                "-k", "system-images;android-34;google_apis;x86_64",
                "--abi", "x86_64", "-d", "pixel_6",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_manager_is_reported() {
        let manager = AvdManager::new(PathBuf::from("/nonexistent/sdk"));
        assert!(matches!(manager.list().await, Err(AvdError::ManagerNotFound(_))));
    }
}
