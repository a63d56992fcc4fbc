//! Emulator Launcher
//!
//! Launches emulator processes and supervises them: liveness probing,
//! forced termination and capture of their combined output.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::device::DeviceSpec;

/// How long a drain waits for reader tasks to flush after the process exited
const READER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Output lines kept per emulator process
pub const OUTPUT_TAIL_LINES: usize = 500;

/// Emulator errors
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("Emulator not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to start emulator: {0}")]
    StartFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-blocking view of a device process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not yet exited
    Running,
    /// Exited with a status code
    Exited(i32),
    /// Gone without a status code (killed by a signal, or unreapable)
    Terminated,
}

impl ProcessStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => f.write_str("running"),
            ProcessStatus::Exited(code) => write!(f, "exited with code {}", code),
            ProcessStatus::Terminated => f.write_str("terminated by signal"),
        }
    }
}

/// A launched device process and its captured output
#[async_trait]
pub trait DeviceProcess: Send {
    /// Probe liveness without waiting on the process
    fn status(&mut self) -> ProcessStatus;

    /// Forcefully terminate the process
    async fn kill(&mut self) -> Result<(), EmulatorError>;

    /// Take the most recent captured output lines. Safe after the process exited.
    async fn drain_output(&mut self) -> Vec<String>;

    /// Console port the emulator reported on startup, if seen
    fn reported_port(&self) -> Option<u16> {
        None
    }

    /// Release the output stream
    fn close(&mut self);
}

/// Something that can launch device processes
#[async_trait]
pub trait DeviceSupervisor: Send + Sync {
    /// Spawn the device described by `spec` without waiting for it
    async fn start(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceProcess>, EmulatorError>;
}

/// Emulator launch options
#[derive(Debug, Clone, Default)]
pub struct EmulatorOptions {
    /// GPU mode (auto, host, swiftshader_indirect, etc.)
    pub gpu: Option<String>,
    /// Enable/disable audio
    pub no_audio: bool,
    /// Enable/disable window
    pub no_window: bool,
    /// Enable/disable boot animation
    pub no_boot_anim: bool,
    /// Port for console
    pub port: Option<u16>,
    /// Additional arguments
    pub extra_args: Vec<String>,
}

impl EmulatorOptions {
    /// Options with a window, for watching a run locally
    pub fn visible() -> Self {
        Self {
            gpu: Some("auto".to_string()),
            no_boot_anim: true,
            ..Default::default()
        }
    }

    /// Options for headless/CI environments
    pub fn headless() -> Self {
        Self {
            gpu: Some("swiftshader_indirect".to_string()),
            no_audio: true,
            no_window: true,
            no_boot_anim: true,
            ..Default::default()
        }
    }

    /// Options for launching `spec`
    pub fn for_spec(spec: &DeviceSpec) -> Self {
        let mut options = if spec.visible {
            Self::visible()
        } else {
            Self::headless()
        };

        if spec.gpu.is_some() {
            options.gpu = spec.gpu.clone();
        }
        options.port = Some(spec.port);
        options.extra_args = spec.emulator_args.clone();
        options
    }

    /// Convert to command line arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(port) = self.port {
            args.push("-port".to_string());
            args.push(port.to_string());
        }

        if let Some(ref gpu) = self.gpu {
            args.push("-gpu".to_string());
            args.push(gpu.clone());
        }

        if self.no_audio {
            args.push("-no-audio".to_string());
        }

        if self.no_window {
            args.push("-no-window".to_string());
        }

        if self.no_boot_anim {
            args.push("-no-boot-anim".to_string());
        }

        args.extend(self.extra_args.clone());

        args
    }
}

/// Most recent output lines of a process; older lines are dropped
#[derive(Clone)]
struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn take(&self) -> Vec<String> {
        self.lines.lock().drain(..).collect()
    }
}

/// Running emulator process.
///
/// stdout and stderr are forwarded line by line into one bounded tail, so the
/// combined stream keeps the order each pipe produced and memory stays flat
/// however long the run takes.
pub struct EmulatorProcess {
    pub avd_name: String,
    child: Child,
    tail: OutputTail,
    readers: Vec<JoinHandle<()>>,
    console_port: Arc<OnceLock<u16>>,
    closed: bool,
}

impl EmulatorProcess {
    /// Spawn `cmd` keeping the last [`OUTPUT_TAIL_LINES`] output lines
    pub fn spawn(cmd: Command, avd_name: &str) -> Result<Self, EmulatorError> {
        Self::spawn_with_tail(cmd, avd_name, OUTPUT_TAIL_LINES)
    }

    /// Spawn `cmd` keeping the last `tail_lines` output lines
    pub fn spawn_with_tail(mut cmd: Command, avd_name: &str, tail_lines: usize) -> Result<Self, EmulatorError> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let tail = OutputTail::new(tail_lines);
        let console_port = Arc::new(OnceLock::new());
        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tail.clone(), Arc::clone(&console_port))));
        }

        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tail.clone(), Arc::clone(&console_port))));
        }

        Ok(Self {
            avd_name: avd_name.to_string(),
            child,
            tail,
            readers,
            console_port,
            closed: false,
        })
    }
}

#[async_trait]
impl DeviceProcess for EmulatorProcess {
    fn status(&mut self) -> ProcessStatus {
        match self.child.try_wait() {
            Ok(None) => ProcessStatus::Running,
            Ok(Some(status)) => match status.code() {
                Some(code) => ProcessStatus::Exited(code),
                None => ProcessStatus::Terminated,
            },
            Err(e) => {
                warn!("Could not probe emulator {}: {}", self.avd_name, e);
                ProcessStatus::Terminated
            }
        }
    }

    async fn kill(&mut self) -> Result<(), EmulatorError> {
        if !self.status().is_alive() {
            debug!("Emulator {} already exited, nothing to kill", self.avd_name);
            return Ok(());
        }

        self.child.kill().await?;
        info!("Killed emulator: {}", self.avd_name);
        Ok(())
    }

    async fn drain_output(&mut self) -> Vec<String> {
        // Once the process is gone the pipes hit EOF; let the readers flush
        // what is left before taking the lines.
        if !self.status().is_alive() {
            for reader in self.readers.iter_mut() {
                if tokio::time::timeout(READER_FLUSH_TIMEOUT, reader).await.is_err() {
                    debug!("Output reader still busy, draining what is buffered");
                    break;
                }
            }
            self.readers.retain(|r| !r.is_finished());
        }

        if self.closed {
            return Vec::new();
        }
        self.tail.take()
    }

    fn reported_port(&self) -> Option<u16> {
        self.console_port.get().copied()
    }

    fn close(&mut self) {
        if self.closed {
            warn!("Output stream of {} was already closed", self.avd_name);
            return;
        }
        self.closed = true;

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.tail.take();
        debug!("Closed output stream of {}", self.avd_name);
    }
}

/// Forward lines from one pipe into the combined tail
async fn forward_lines<R>(pipe: R, tail: OutputTail, console_port: Arc<OnceLock<u16>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        trace!("emulator: {}", line);
        if let Some(port) = parse_console_port(&line) {
            let _ = console_port.set(port);
        }
        tail.push(line);
    }
}

/// Extract the port from the emulator's `console on port NNNN,` banner
pub fn parse_console_port(line: &str) -> Option<u16> {
    let rest = &line[line.find("console on port ")? + "console on port ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Emulator launcher
pub struct EmulatorLauncher {
    sdk_path: PathBuf,
}

impl EmulatorLauncher {
    /// Create a new emulator launcher
    pub fn new(sdk_path: PathBuf) -> Self {
        Self { sdk_path }
    }

    /// Get the emulator executable path
    fn emulator_path(&self) -> PathBuf {
        let emulator_dir = self.sdk_path.join("emulator");
        if cfg!(windows) {
            emulator_dir.join("emulator.exe")
        } else {
            emulator_dir.join("emulator")
        }
    }

    /// Check if emulator is available
    pub fn is_available(&self) -> bool {
        self.emulator_path().exists()
    }

    /// Launch an emulator for `spec`
    pub fn launch(&self, spec: &DeviceSpec) -> Result<EmulatorProcess, EmulatorError> {
        let emulator = self.emulator_path();

        if !emulator.exists() {
            return Err(EmulatorError::NotFound(emulator));
        }

        info!("Launching emulator {} on port {}", spec.name, spec.port);

        let mut args = vec!["-avd".to_string(), spec.name.clone()];
        args.extend(EmulatorOptions::for_spec(spec).to_args());

        debug!("Emulator args: {:?}", args);

        let mut cmd = Command::new(&emulator);
        cmd.args(&args);

        EmulatorProcess::spawn(cmd, &spec.name)
    }
}

#[async_trait]
impl DeviceSupervisor for EmulatorLauncher {
    async fn start(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceProcess>, EmulatorError> {
        let process = self.launch(spec)?;
        Ok(Box::new(process))
    }
}
