//! The supervision loop: launch, discover, retry, timeout.
//!
//! One [`EmulatorManager::start`] call drives any number of launch attempts.
//! Each attempt owns its process handle, detector pipeline and discovery
//! poller, all scoped to a per-attempt cancellation token so a retried
//! attempt can never observe signals from a stale one.

use crate::detector::{FaultDetector, LineClass};
use crate::error::{Error, Result};
use crate::launcher::Launcher;
use crate::muxer::{multiplex, OutputLine, StreamSource};
use crate::poller::{DiscoveryPoller, DEFAULT_POLL_INTERVAL};
use crate::registry::RegistryClient;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Supervisor state, published on a watch channel for observability.
///
/// ```text
/// Starting ──► WaitingForDevice ──► Ready
///    ▲                │
///    │                ├──► Retrying ──┐
///    │                └──► TimedOut   │
///    └────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Checking the registry, snapshotting devices, launching the process.
    Starting,
    /// Racing process exit, faults, discovery reports and the deadline.
    WaitingForDevice,
    /// A new device reached the ready state. Terminal success.
    Ready,
    /// The attempt failed recoverably; a new one is about to begin.
    Retrying,
    /// The deadline elapsed. Terminal failure.
    TimedOut,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Starting => write!(f, "starting"),
            Phase::WaitingForDevice => write!(f, "waiting-for-device"),
            Phase::Ready => write!(f, "ready"),
            Phase::Retrying => write!(f, "retrying"),
            Phase::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// What ended one attempt's wait loop.
enum WaitEvent {
    Ready(String),
    Fault(String),
    Exited(Option<i32>),
    Deadline,
}

enum AttemptOutcome {
    Ready(String),
    Retry,
}

/// Orchestrates registry, launcher, detector and poller into the overall
/// start/detect/retry/timeout loop.
pub struct EmulatorManager {
    registry: Arc<dyn RegistryClient>,
    launcher: Arc<dyn Launcher>,
    detector: FaultDetector,
    poll_interval: Duration,
    phase_tx: watch::Sender<Phase>,
}

impl EmulatorManager {
    pub fn new(registry: Arc<dyn RegistryClient>, launcher: Arc<dyn Launcher>) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Starting);
        Self {
            registry,
            launcher,
            detector: FaultDetector::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            phase_tx,
        }
    }

    /// Override the discovery poll interval. Tests run with milliseconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the fault signature table.
    pub fn with_detector(mut self, detector: FaultDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Observe phase transitions.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: Phase) {
        tracing::debug!("supervisor phase: {}", phase);
        let _ = self.phase_tx.send(phase);
    }

    /// Boot the named AVD and return the serial of the ready device.
    ///
    /// Retries recoverable faults indefinitely; only the deadline, a
    /// registry that stays unreachable, or a launch precondition failure
    /// stop the loop.
    pub async fn start(
        &self,
        name: &str,
        extra_args: &[String],
        timeout: Duration,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                tracing::warn!("restarting emulator (attempt {})...", attempt);
            }
            match self.run_attempt(name, extra_args, deadline).await? {
                AttemptOutcome::Ready(serial) => {
                    self.set_phase(Phase::Ready);
                    tracing::info!("device {} is ready after {} attempt(s)", serial, attempt);
                    return Ok(serial);
                }
                AttemptOutcome::Retry => {
                    self.set_phase(Phase::Retrying);
                }
            }
        }
    }

    /// One launch attempt: snapshot, launch, then race the four wait events.
    async fn run_attempt(
        &self,
        name: &str,
        extra_args: &[String],
        deadline: Instant,
    ) -> Result<AttemptOutcome> {
        self.set_phase(Phase::Starting);

        // An unreachable registry is an environment problem the retry loop
        // cannot fix; ensure_available already burned its one reset.
        self.registry.ensure_available().await?;

        let snapshot = self.registry.list_devices().await?;

        let mut handle = self.launcher.launch(name, extra_args).await?;
        let cancel = CancellationToken::new();

        let (stdout, stderr) = handle.take_output();
        let merged = multiplex(stdout, stderr);
        let mut faults = spawn_detector_pipeline(merged, self.detector.clone(), cancel.child_token());
        let mut reports = DiscoveryPoller::new(self.registry.clone(), snapshot)
            .with_interval(self.poll_interval)
            .spawn(cancel.child_token());

        self.set_phase(Phase::WaitingForDevice);

        let mut observed_serial: Option<String> = None;
        let event = loop {
            tokio::select! {
                // Deadline first: it must win even over a discovery result
                // that became ready in the same instant.
                biased;
                _ = tokio::time::sleep_until(deadline) => break WaitEvent::Deadline,
                exit = &mut handle.exited => {
                    break WaitEvent::Exited(exit.ok().flatten());
                }
                Some(fault) = faults.recv() => break WaitEvent::Fault(fault),
                Some(found) = reports.recv() => {
                    observed_serial = Some(found.serial.clone());
                    if found.state.is_ready() {
                        break WaitEvent::Ready(found.serial);
                    }
                    // Known but still booting: same attempt keeps waiting.
                }
            }
        };

        // Tear down the attempt scope before deciding what to do next, so no
        // stale poller or pump can race the next attempt.
        cancel.cancel();

        match event {
            WaitEvent::Ready(serial) => Ok(AttemptOutcome::Ready(serial)),
            WaitEvent::Deadline => {
                tracing::warn!("deadline elapsed before the device became ready");
                handle.stop().await;
                self.set_phase(Phase::TimedOut);
                Err(Error::Timeout)
            }
            WaitEvent::Exited(code) => {
                tracing::warn!("emulator exited unexpectedly (code: {:?})", code);
                // stop() tolerates an already-dead process.
                handle.stop().await;
                Ok(AttemptOutcome::Retry)
            }
            WaitEvent::Fault(line) => {
                tracing::warn!("error occurred: emulator start failed: {}", line);
                handle.stop().await;
                if let Some(serial) = &observed_serial {
                    self.registry.terminate(serial).await;
                }
                Ok(AttemptOutcome::Retry)
            }
        }
    }
}

/// Consume merged output lines: echo each one for operator visibility,
/// classify it, and forward fault lines to the supervisor.
fn spawn_detector_pipeline(
    mut lines: mpsc::Receiver<OutputLine>,
    detector: FaultDetector,
    cancel: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            match line.source {
                StreamSource::Stdout => println!("{}", line.text),
                StreamSource::Stderr => eprintln!("{}", line.text),
            }

            match detector.classify(&line.text) {
                LineClass::Fault => {
                    tracing::warn!("emulator log contains fault: {}", line.text);
                    if tx.send(line.text).await.is_err() {
                        break;
                    }
                }
                LineClass::BootCompleted => {
                    tracing::info!("emulator log contains boot completed");
                }
                LineClass::None => {}
            }
        }
    });

    rx
}
