//! Boot Readiness
//!
//! Polls a freshly launched emulator until Android reports boot completion,
//! the emulator process dies, or the boot deadline passes.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adb::{AdbError, BootProbe, BOOT_COMPLETED_SENTINEL};
use crate::device::DeviceSerial;
use crate::emulator::{DeviceProcess, ProcessStatus};

/// Fixed instant after which the boot wait gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootDeadline {
    at: Instant,
}

impl BootDeadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self { at: Instant::now() + timeout }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Boot wait state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Waiting,
    Booted,
    /// The emulator process exited before booting
    ProcessDied(ProcessStatus),
    TimedOut,
    Cancelled,
}

impl BootState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BootState::Waiting)
    }
}

/// Boot readiness poller
#[derive(Debug, Clone)]
pub struct BootPoller {
    /// Sleep between polls; bounds how late a dead process is noticed
    interval: Duration,
    /// Upper bound on a single property query
    query_timeout: Duration,
}

impl Default for BootPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            query_timeout: Duration::from_secs(10),
        }
    }
}

impl BootPoller {
    pub fn new(interval: Duration, query_timeout: Duration) -> Self {
        Self { interval, query_timeout }
    }

    /// Poll until a terminal [`BootState`] is reached.
    ///
    /// Each iteration queries the boot property first, then checks process
    /// liveness, cancellation and the deadline, and only then looks at the
    /// query result. A stale answer from a dead or late device never counts
    /// as booted.
    ///
    /// Only a missing `adb` binary is returned as an error; failed or slow
    /// queries just mean the device is not ready yet.
    pub async fn wait(
        &self,
        probe: &dyn BootProbe,
        serial: &DeviceSerial,
        process: &mut dyn DeviceProcess,
        deadline: BootDeadline,
        cancel: &CancellationToken,
    ) -> Result<BootState, AdbError> {
        info!("Waiting for {} to finish booting... May take a few minutes...", serial);

        let mut polls = 0u32;
        loop {
            polls += 1;

            let reply = match tokio::time::timeout(self.query_timeout, probe.boot_property(serial)).await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(AdbError::NotFound(path))) => return Err(AdbError::NotFound(path)),
                Ok(Err(e)) => {
                    debug!("Boot query {} failed: {}", polls, e);
                    None
                }
                Err(_) => {
                    warn!("Boot query {} timed out after {:?}", polls, self.query_timeout);
                    None
                }
            };

            let state = self.evaluate(reply.as_deref(), process.status(), deadline, cancel);
            if state.is_terminal() {
                match state {
                    BootState::Booted => info!("{} booted after {} polls", serial, polls),
                    other => warn!("Boot wait for {} ended: {:?}", serial, other),
                }
                return Ok(state);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    /// Decide one iteration; liveness and deadline win over the query result
    fn evaluate(
        &self,
        reply: Option<&str>,
        status: ProcessStatus,
        deadline: BootDeadline,
        cancel: &CancellationToken,
    ) -> BootState {
        if !status.is_alive() {
            return BootState::ProcessDied(status);
        }
        if cancel.is_cancelled() {
            return BootState::Cancelled;
        }
        if deadline.is_expired() {
            return BootState::TimedOut;
        }
        match reply {
            Some(value) if value.trim() == BOOT_COMPLETED_SENTINEL => BootState::Booted,
            _ => BootState::Waiting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::EmulatorError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted replies, then repeats the last one
    struct ScriptedProbe {
        replies: Mutex<VecDeque<Result<String, AdbError>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl BootProbe for ScriptedProbe {
        async fn boot_property(&self, _serial: &DeviceSerial) -> Result<String, AdbError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                match replies.front() {
                    Some(Ok(v)) => Ok(v.clone()),
                    _ => Ok(String::new()),
                }
            }
        }
    }

    /// Process that exits after a number of status probes
    struct FakeProcess {
        probes_left: Option<usize>,
    }

    #[async_trait]
    impl DeviceProcess for FakeProcess {
        fn status(&mut self) -> ProcessStatus {
            match self.probes_left.as_mut() {
                Some(0) => ProcessStatus::Exited(1),
                Some(n) => {
                    *n -= 1;
                    ProcessStatus::Running
                }
                None => ProcessStatus::Running,
            }
        }

        async fn kill(&mut self) -> Result<(), EmulatorError> {
            Ok(())
        }

        async fn drain_output(&mut self) -> Vec<String> {
            Vec::new()
        }

        fn close(&mut self) {}
    }

    fn serial() -> DeviceSerial {
        DeviceSerial::from_port(5554)
    }

    fn poller() -> BootPoller {
        BootPoller::new(Duration::from_secs(2), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_boots_on_first_poll() {
        let probe = ScriptedProbe::new(vec!["1\n"]);
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(500));

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, BootState::Booted);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boots_after_waiting() {
        let probe = ScriptedProbe::new(vec!["", "0", "0", "1"]);
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(500));

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, BootState::Booted);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_process_beats_sentinel() {
        // the query claims boot, but the process is already gone
        let probe = ScriptedProbe::new(vec!["1"]);
        let mut process = FakeProcess { probes_left: Some(0) };
        let deadline = BootDeadline::after(Duration::from_secs(500));

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, BootState::ProcessDied(ProcessStatus::Exited(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_process_beats_deadline() {
        let probe = ScriptedProbe::new(vec!["0"]);
        let mut process = FakeProcess { probes_left: Some(0) };
        let deadline = BootDeadline::after(Duration::ZERO);

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(state, BootState::ProcessDied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_sentinel() {
        let probe = ScriptedProbe::new(vec!["0"]);
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(30));

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, BootState::TimedOut);
        assert!(deadline.is_expired());
        // 2s interval over a 30s window
        assert_eq!(probe.calls.load(Ordering::SeqCst), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_is_bounded() {
        let mut probe = ScriptedProbe::new(vec!["1"]);
        probe.delay = Some(Duration::from_secs(3600));
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(30));

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, BootState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_keep_waiting() {
        let probe = ScriptedProbe {
            replies: Mutex::new(VecDeque::from(vec![
                Err(AdbError::CommandFailed("error: device offline".into())),
                Ok("1".to_string()),
            ])),
            calls: AtomicUsize::new(0),
            delay: None,
        };
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(500));

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, BootState::Booted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_adb_fails_fast() {
        let probe = ScriptedProbe {
            replies: Mutex::new(VecDeque::from(vec![
                Err(AdbError::NotFound(PathBuf::from("/sdk/platform-tools/adb"))),
                Ok("1".to_string()),
            ])),
            calls: AtomicUsize::new(0),
            delay: None,
        };
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(500));

        let result = poller()
            .wait(&probe, &serial(), &mut process, deadline, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AdbError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let probe = ScriptedProbe::new(vec!["0"]);
        let mut process = FakeProcess { probes_left: None };
        let deadline = BootDeadline::after(Duration::from_secs(500));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = poller()
            .wait(&probe, &serial(), &mut process, deadline, &cancel)
            .await
            .unwrap();

        assert_eq!(state, BootState::Cancelled);
    }
}
