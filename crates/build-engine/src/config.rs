//! Test Task Configuration
//!
//! Describes which Gradle task runs the instrumented tests and how.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::BuildError;

/// Gradle task that runs instrumented tests on every connected device
pub const DEFAULT_TEST_TASK: &str = "connectedCheck";

/// A Gradle invocation that runs the tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTask {
    /// Gradle task name, e.g. `connectedCheck` or `:app:connectedDebugAndroidTest`
    pub name: String,

    /// Extra Gradle flags, e.g. `--stacktrace -Pfoo=bar`
    pub flags: Vec<String>,

    /// Root directory of the Gradle project
    pub project_dir: PathBuf,
}

impl Default for TestTask {
    fn default() -> Self {
        Self {
            name: DEFAULT_TEST_TASK.to_string(),
            flags: Vec::new(),
            project_dir: PathBuf::from("."),
        }
    }
}

impl TestTask {
    /// Create a task with default flags in `project_dir`
    pub fn new(name: &str, project_dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            project_dir,
            ..Default::default()
        }
    }

    /// Set flags from a free-form flag string
    pub fn with_flags(mut self, flags: &str) -> Result<Self, BuildError> {
        self.flags = parse_flags(flags)?;
        Ok(self)
    }

    /// Full Gradle argument list
    pub fn gradle_args(&self) -> Vec<String> {
        let mut args = vec![self.name.clone(), "--console=plain".to_string()];
        args.extend(self.flags.iter().cloned());
        args
    }
}

/// Outcome of one test task run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Gradle exited with status 0
    pub success: bool,
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr lines
    pub output: Vec<String>,
}

impl TestReport {
    /// Captured output as one string
    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }
}

/// Split a free-form flag string the way a POSIX shell would
pub fn parse_flags(flags: &str) -> Result<Vec<String>, BuildError> {
    shlex::split(flags).ok_or_else(|| {
        BuildError::ConfigError(format!("unbalanced quotes or trailing escape in '{}'", flags))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_task() {
        let task = TestTask::default();
        assert_eq!(task.name, "connectedCheck");
        assert_eq!(task.gradle_args(), vec!["connectedCheck", "--console=plain"]);
    }

    #[test]
    fn test_parse_flags() {
        assert!(parse_flags("   ").unwrap().is_empty());
        assert_eq!(parse_flags("--stacktrace  -Pa=b").unwrap(), vec!["--stacktrace", "-Pa=b"]);
        assert_eq!(
            parse_flags("-Pandroid.testInstrumentationRunnerArguments.class=\"com.example.A B\" --info").unwrap(),
            vec!["-Pandroid.testInstrumentationRunnerArguments.class=com.example.A B", "--info"]
        );
        assert_eq!(parse_flags("-Px=''").unwrap(), vec!["-Px="]);
    }

    #[test]
    fn test_parse_flags_honours_backslash_escapes() {
        assert_eq!(parse_flags(r"-Pmsg=a\ b --info").unwrap(), vec!["-Pmsg=a b", "--info"]);
    }

    #[test]
    fn test_unterminated_quote_is_rejected() {
        assert!(matches!(parse_flags("\"--info"), Err(BuildError::ConfigError(_))));
        assert!(matches!(
            TestTask::default().with_flags("--info 'oops"),
            Err(BuildError::ConfigError(_))
        ));
    }

    #[test]
    fn test_flags_follow_task() {
        let task = TestTask::new(":app:connectedDebugAndroidTest", PathBuf::from("/work"))
            .with_flags("--stacktrace")
            .unwrap();
        assert_eq!(
            task.gradle_args(),
            vec![":app:connectedDebugAndroidTest", "--console=plain", "--stacktrace"]
        );
    }
}
