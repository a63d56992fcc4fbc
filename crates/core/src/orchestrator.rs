//! Lifecycle Orchestrator
//!
//! Drives one instrumented test run end to end:
//! - validate the configuration
//! - remove an AVD left behind by an earlier run, then create a fresh one
//! - launch the emulator and wait for it to boot
//! - run the test task against it
//! - shut the emulator down and delete the AVD, whatever happened before

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use instrumented_tests_build_engine::{GradleBuild, TestReport, TestTask, TestTaskRunner};
use instrumented_tests_emulator_bridge::adb::EMU_KILL;
use instrumented_tests_emulator_bridge::{
    AdbClient, AvdManager, BootDeadline, BootProbe, BootState, DeviceControl,
    DeviceProcess, DeviceSerial, DeviceSpec, DeviceSupervisor, EmulatorLauncher, ImageRegistry,
};

use crate::{
    config::RunConfig,
    error::{LifecycleError, Result},
    events::{Event, EventBus},
};

/// Lines of emulator output echoed to the log when boot fails
const DIAGNOSTIC_TAIL: usize = 50;

/// How often teardown checks whether the emulator has exited
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Validating,
    CleaningStale,
    Creating,
    Starting,
    WaitingBoot,
    Testing,
    Stopping,
    Done { success: bool },
}

/// The external tools a run talks to
pub struct Toolchain {
    pub registry: Box<dyn ImageRegistry>,
    pub supervisor: Box<dyn DeviceSupervisor>,
    pub control: Box<dyn DeviceControl>,
    pub probe: Box<dyn BootProbe>,
    pub runner: Box<dyn TestTaskRunner>,
}

impl Toolchain {
    /// Real Android SDK tools rooted at `sdk_path`
    pub fn android(sdk_path: PathBuf, java_home: Option<PathBuf>) -> Self {
        let mut gradle = GradleBuild::new().with_android_home(sdk_path.clone());
        if let Some(java_home) = java_home {
            gradle = gradle.with_java_home(java_home);
        }

        Self {
            registry: Box::new(AvdManager::new(sdk_path.clone())),
            supervisor: Box::new(EmulatorLauncher::new(sdk_path.clone())),
            control: Box::new(AdbClient::new(sdk_path.clone())),
            probe: Box::new(AdbClient::new(sdk_path)),
            runner: Box::new(gradle),
        }
    }
}

/// Outcome of a run
#[derive(Debug)]
pub struct LifecycleResult {
    pub success: bool,
    /// First fatal failure, if any
    pub failure: Option<LifecycleError>,
    /// Emulator output, captured when the device failed to boot
    pub device_output: Option<Vec<String>>,
    /// Test task report, when the task ran
    pub report: Option<TestReport>,
}

impl LifecycleResult {
    fn passed(report: TestReport) -> Self {
        Self {
            success: true,
            failure: None,
            device_output: None,
            report: Some(report),
        }
    }

    fn failed(failure: LifecycleError) -> Self {
        Self {
            success: false,
            failure: Some(failure),
            device_output: None,
            report: None,
        }
    }

    fn with_device_output(mut self, output: Option<Vec<String>>) -> Self {
        self.device_output = output;
        self
    }

    fn with_report(mut self, report: TestReport) -> Self {
        self.report = Some(report);
        self
    }

    /// Record a failure; an earlier failure always wins
    fn fail(&mut self, failure: LifecycleError) {
        match self.failure {
            Some(ref first) => warn!("Ignoring '{}' after earlier failure '{}'", failure, first),
            None => {
                self.success = false;
                self.failure = Some(failure);
            }
        }
    }

    /// The test report on success, the first failure otherwise
    pub fn into_result(self) -> Result<TestReport> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.report.unwrap_or_default()),
        }
    }
}

/// Orchestrates one emulator lifecycle
pub struct Orchestrator {
    config: RunConfig,
    tools: Toolchain,
    state: RwLock<LifecycleState>,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator; a random console port is assigned if none is set
    pub fn new(mut config: RunConfig, tools: Toolchain) -> Self {
        config.assign_port();

        Self {
            config,
            tools,
            state: RwLock::new(LifecycleState::Init),
            event_bus: Arc::new(EventBus::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    fn set_state(&self, state: LifecycleState) {
        let mut current = self.state.write();
        debug!("State transition: {:?} -> {:?}", *current, state);
        *current = state;

        self.event_bus.emit(Event::StateChanged(state));
    }

    /// Get the event bus for subscribing to events
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Token that aborts the boot wait or test task; teardown still runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the whole lifecycle. Teardown has completed by the time this returns.
    pub async fn run(&self) -> LifecycleResult {
        let result = self.run_stages().await;
        self.set_state(LifecycleState::Done { success: result.success });

        match result.failure {
            Some(ref failure) => error!("Instrumented test run failed: {}", failure),
            None => info!("Instrumented test run succeeded"),
        }
        result
    }

    async fn run_stages(&self) -> LifecycleResult {
        self.set_state(LifecycleState::Validating);
        let (spec, task) = match self.validate() {
            Ok(validated) => validated,
            Err(e) => return LifecycleResult::failed(e),
        };

        self.set_state(LifecycleState::CleaningStale);
        match self.remove_image(&spec.name).await {
            Ok(true) => {
                info!("Deleted leftover AVD {}", spec.name);
                self.event_bus.emit(Event::StaleImageDeleted { name: spec.name.clone() });
            }
            Ok(false) => {}
            Err(e) => {
                self.set_state(LifecycleState::Stopping);
                return LifecycleResult::failed(e);
            }
        }

        self.set_state(LifecycleState::Creating);
        info!("Creating AVD...");
        if let Err(e) = self.tools.registry.create(&spec).await {
            let failure = LifecycleError::from_create(&spec.name, e);
            self.set_state(LifecycleState::Stopping);
            self.discard_image(&spec.name).await;
            return LifecycleResult::failed(failure);
        }
        self.event_bus.emit(Event::ImageCreated { name: spec.name.clone() });

        self.set_state(LifecycleState::Starting);
        info!("Starting AVD...");
        let mut process = match self.tools.supervisor.start(&spec).await {
            Ok(process) => process,
            Err(e) => {
                self.set_state(LifecycleState::Stopping);
                self.discard_image(&spec.name).await;
                return LifecycleResult::failed(e.into());
            }
        };
        self.event_bus.emit(Event::EmulatorStarted { serial: spec.serial().to_string() });

        let mut result = self.supervise(&spec, &task, process.as_mut()).await;

        // Teardown runs on every path that got a process
        self.set_state(LifecycleState::Stopping);
        self.stop_device(&spec.serial(), process.as_mut()).await;
        match self.remove_image(&spec.name).await {
            Ok(true) => {
                info!("Deleted AVD {}", spec.name);
                self.event_bus.emit(Event::ImageDeleted { name: spec.name.clone() });
            }
            Ok(false) => warn!("AVD {} was already gone at teardown", spec.name),
            Err(e) => result.fail(e),
        }
        process.close();

        result
    }

    fn validate(&self) -> Result<(DeviceSpec, TestTask)> {
        self.config.validate()?;
        Ok((self.config.device_spec()?, self.config.test_task()?))
    }

    /// Boot wait and test task; everything that needs a running device
    async fn supervise(
        &self,
        spec: &DeviceSpec,
        task: &TestTask,
        process: &mut dyn DeviceProcess,
    ) -> LifecycleResult {
        let serial = spec.serial();
        let timeout = self.config.emulator.boot_timeout();

        self.set_state(LifecycleState::WaitingBoot);
        let deadline = BootDeadline::after(timeout);
        let boot = self
            .config
            .emulator
            .boot_poller()
            .wait(self.tools.probe.as_ref(), &serial, process, deadline, &self.cancel)
            .await;

        let failure = match boot {
            Ok(BootState::Booted) => None,
            Ok(BootState::ProcessDied(status)) => Some(LifecycleError::EmulatorCrashed(status)),
            Ok(BootState::TimedOut) => Some(LifecycleError::BootTimeout(timeout)),
            // the poller only returns terminal states
            Ok(BootState::Cancelled) | Ok(BootState::Waiting) => Some(LifecycleError::Cancelled),
            Err(e) => Some(e.into()),
        };

        if let Some(failure) = failure {
            let output = if failure.is_device_failure() {
                Some(self.capture_output(process).await)
            } else {
                None
            };
            return LifecycleResult::failed(failure).with_device_output(output);
        }

        info!("Emulator Booted!");
        self.event_bus.emit(Event::EmulatorBooted { serial: serial.to_string() });

        if let Some(reported) = process.reported_port() {
            if reported != spec.port {
                warn!(
                    "Emulator reported console port {} but {} was requested; still addressing {}",
                    reported, spec.port, serial
                );
            }
        }

        self.set_state(LifecycleState::Testing);
        let outcome = tokio::select! {
            outcome = self.tools.runner.execute(task, &serial) => outcome,
            _ = self.cancel.cancelled() => {
                warn!("Cancelled while running {}", task.name);
                return LifecycleResult::failed(LifecycleError::Cancelled);
            }
        };

        match outcome {
            Ok(report) => {
                self.event_bus.emit(Event::TestTaskFinished { success: report.success });
                if report.success {
                    LifecycleResult::passed(report)
                } else {
                    let failure = LifecycleError::TestTaskFailed {
                        task: task.name.clone(),
                        exit_code: report.exit_code,
                    };
                    LifecycleResult::failed(failure).with_report(report)
                }
            }
            Err(e) => LifecycleResult::failed(e.into()),
        }
    }

    /// Drain emulator output for diagnostics, echoing the tail to the log
    async fn capture_output(&self, process: &mut dyn DeviceProcess) -> Vec<String> {
        let lines = process.drain_output().await;

        if !lines.is_empty() {
            error!("Last emulator output:");
            for line in &lines[lines.len().saturating_sub(DIAGNOSTIC_TAIL)..] {
                error!("  {}", line);
            }
        }
        lines
    }

    /// Graceful `emu kill`, falling back to killing the process
    async fn stop_device(&self, serial: &DeviceSerial, process: &mut dyn DeviceProcess) {
        info!("Shutting down emulator {}...", serial);

        let stopped = match self.tools.control.trigger(serial, EMU_KILL).await {
            Ok(()) => self.wait_for_exit(serial, process).await,
            Err(e) => {
                warn!("Graceful shutdown of {} failed: {}", serial, e);
                false
            }
        };

        if stopped {
            self.event_bus.emit(Event::EmulatorStopped { serial: serial.to_string() });
            return;
        }

        match process.kill().await {
            Ok(()) => {
                warn!("Killed emulator {}", serial);
                self.event_bus.emit(Event::EmulatorKilled { serial: serial.to_string() });
            }
            Err(e) => error!("Failed to kill emulator {}: {}", serial, e),
        }
    }

    async fn wait_for_exit(&self, serial: &DeviceSerial, process: &mut dyn DeviceProcess) -> bool {
        let grace = self.config.emulator.shutdown_grace();
        let deadline = Instant::now() + grace;

        loop {
            if !process.status().is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Emulator {} still running {}s after emu kill", serial, grace.as_secs());
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Delete the AVD if it exists. `Ok(true)` when one was deleted.
    async fn remove_image(&self, name: &str) -> Result<bool> {
        let existing = self.tools.registry.list().await.map_err(LifecycleError::from_list)?;

        if !existing.contains(name) {
            debug!("No AVD named {}", name);
            return Ok(false);
        }

        self.tools.registry.delete(name).await.map_err(LifecycleError::from_delete)?;
        Ok(true)
    }

    /// Best-effort removal of a possibly partial AVD after a failed start
    async fn discard_image(&self, name: &str) {
        if let Err(e) = self.remove_image(name).await {
            warn!("Could not remove AVD {}: {}", name, e);
        }
    }
}
