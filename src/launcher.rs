//! Emulator process launching and teardown.
//!
//! The launcher starts the emulator binary non-blocking, pumps its stdout and
//! stderr into line channels, signals unexpected exit, and can stop the
//! process group at any point — including after the process already died.

use crate::error::{Error, Result};
use crate::sdk::SdkLocator;
use async_trait::async_trait;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Capacity of each per-stream line channel.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Default grace period between SIGTERM and SIGKILL on stop.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Fixed baseline flags prepended to every launch.
///
/// Snapshots are disabled and user data wiped so supervision always gets a
/// clean, reproducible boot instead of a potentially inconsistent prior
/// state. Audio/window/boot-animation are off because nothing watches them in
/// a pipeline, and the software GPU backend avoids host-driver surprises.
/// `-verbose -show-kernel` feed the fault detector.
pub fn baseline_args(name: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![format!("@{}", name)];
    args.extend(
        [
            "-verbose",
            "-show-kernel",
            "-no-audio",
            "-no-window",
            "-no-boot-anim",
            "-netdelay",
            "none",
            "-no-snapshot",
            "-wipe-data",
            "-gpu",
            "swiftshader_indirect",
        ]
        .map(String::from),
    );
    args
}

/// Stop handle for a launched process. Implementations must be safe to call
/// when the process has already exited.
#[async_trait]
pub trait ProcessControl: Send {
    async fn stop(&mut self);
}

/// A running (or already finished) emulator process.
///
/// `stdout`/`stderr` carry its output line by line; `exited` fires if the
/// process exits on its own, which the supervisor always treats as
/// unexpected. Dropping the handle does not kill the process — call
/// [`LaunchedEmulator::stop`].
pub struct LaunchedEmulator {
    pub stdout: mpsc::Receiver<String>,
    pub stderr: mpsc::Receiver<String>,
    pub exited: oneshot::Receiver<Option<i32>>,
    control: Box<dyn ProcessControl>,
}

impl std::fmt::Debug for LaunchedEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedEmulator")
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("exited", &self.exited)
            .finish_non_exhaustive()
    }
}

impl LaunchedEmulator {
    pub fn new(
        stdout: mpsc::Receiver<String>,
        stderr: mpsc::Receiver<String>,
        exited: oneshot::Receiver<Option<i32>>,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            exited,
            control,
        }
    }

    /// Take the output streams, leaving the handle usable for exit/stop.
    pub fn take_output(&mut self) -> (mpsc::Receiver<String>, mpsc::Receiver<String>) {
        let stdout = std::mem::replace(&mut self.stdout, mpsc::channel(1).1);
        let stderr = std::mem::replace(&mut self.stderr, mpsc::channel(1).1);
        (stdout, stderr)
    }

    pub async fn stop(&mut self) {
        self.control.stop().await;
    }
}

/// Seam between the supervisor and the real emulator binary. Tests provide
/// scripted implementations.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, name: &str, extra_args: &[String]) -> Result<LaunchedEmulator>;
}

/// Launches the SDK's emulator binary.
pub struct EmulatorLauncher {
    emulator_path: PathBuf,
    grace_period: Duration,
}

impl EmulatorLauncher {
    pub fn new(sdk: &SdkLocator) -> Result<Self> {
        Ok(Self {
            emulator_path: sdk.emulator()?,
            grace_period: DEFAULT_GRACE_PERIOD,
        })
    }

    /// Use an explicit binary instead of resolving through the SDK.
    pub fn with_binary(emulator_path: PathBuf) -> Self {
        Self {
            emulator_path,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[async_trait]
impl Launcher for EmulatorLauncher {
    async fn launch(&self, name: &str, extra_args: &[String]) -> Result<LaunchedEmulator> {
        let mut args = baseline_args(name);
        args.extend(extra_args.iter().cloned());

        tracing::info!("$ {} {}", self.emulator_path.display(), args.join(" "));

        let mut child = Command::new(&self.emulator_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| Error::LaunchFailed(format!("{}: {}", self.emulator_path.display(), e)))?;

        let pid = child.id();

        let (stdout_tx, stdout_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (stderr_tx, stderr_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, stdout_tx));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, stderr_tx));
        }

        // The wait task owns the child: it reaps the process whether it dies
        // on its own or because stop() signalled it.
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!("error waiting for emulator process: {}", e);
                    None
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(LaunchedEmulator::new(
            stdout_rx,
            stderr_rx,
            exit_rx,
            Box::new(SignalControl {
                pid,
                grace_period: self.grace_period,
            }),
        ))
    }
}

async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("output pump read error: {}", e);
                break;
            }
        }
    }
}

/// Signal-based stop: SIGTERM to the process group, bounded wait, then
/// SIGKILL. All failures are ignored — the process may already be gone, and
/// that is exactly the state stop() wants.
struct SignalControl {
    pid: Option<u32>,
    grace_period: Duration,
}

#[async_trait]
impl ProcessControl for SignalControl {
    async fn stop(&mut self) {
        let Some(raw_pid) = self.pid.take() else {
            return;
        };
        if raw_pid == 0 || raw_pid > i32::MAX as u32 {
            return;
        }
        let pid = Pid::from_raw(raw_pid as i32);

        // The emulator was spawned as its own process group leader, so the
        // group id equals the pid. Fall back to the single process if the
        // group signal fails.
        if killpg(pid, Signal::SIGTERM)
            .or_else(|_| signal::kill(pid, Signal::SIGTERM))
            .is_err()
        {
            // Already gone.
            return;
        }

        let poll_interval = Duration::from_millis(100);
        let polls = (self.grace_period.as_millis() / poll_interval.as_millis()).max(1) as u64;
        for _ in 0..polls {
            tokio::time::sleep(poll_interval).await;
            if signal::kill(pid, None).is_err() {
                return;
            }
        }

        tracing::warn!(
            "emulator did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
            self.grace_period
        );
        let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
    }
}
