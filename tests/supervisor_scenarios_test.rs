//! End-to-end supervision scenarios over a mock registry and a scripted
//! launcher: clean boot, fault-triggered retry, query-error recovery,
//! timeout, and the wait-loop ordering properties.

use async_trait::async_trait;
use avd_supervisor::launcher::{LaunchedEmulator, Launcher, ProcessControl};
use avd_supervisor::registry::{DeviceSnapshot, DeviceState, DiscoveredDevice, RegistryClient};
use avd_supervisor::{EmulatorManager, Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const POLL: Duration = Duration::from_millis(5);

// ============================================================================
// Mock registry
// ============================================================================

type QueryFn = Box<dyn Fn() -> Result<Option<DiscoveredDevice>> + Send + Sync>;

struct MockRegistry {
    query: QueryFn,
    ensure_fails: bool,
    resets: Arc<AtomicUsize>,
    terminated: Arc<Mutex<Vec<String>>>,
}

impl MockRegistry {
    fn new(query: QueryFn) -> Self {
        Self {
            query,
            ensure_fails: false,
            resets: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn unavailable() -> Self {
        let mut registry = Self::new(Box::new(|| Ok(None)));
        registry.ensure_fails = true;
        registry
    }

    /// Replays `script`, then keeps returning the script's last entry.
    fn scripted(script: Vec<Result<Option<DiscoveredDevice>>>) -> Self {
        let script = Mutex::new(VecDeque::from(script));
        let last: Mutex<Option<DiscoveredDevice>> = Mutex::new(None);
        Self::new(Box::new(move || {
            let mut script = script.lock().unwrap();
            if script.is_empty() {
                return Ok(last.lock().unwrap().clone());
            }
            let next = script.pop_front().unwrap();
            if let Ok(found) = &next {
                *last.lock().unwrap() = found.clone();
            }
            next
        }))
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn ensure_available(&self) -> Result<()> {
        if self.ensure_fails {
            Err(Error::RegistryUnavailable("adb server did not start".into()))
        } else {
            Ok(())
        }
    }

    async fn list_devices(&self) -> Result<DeviceSnapshot> {
        Ok(DeviceSnapshot::new())
    }

    async fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_new_device(&self, _snapshot: &DeviceSnapshot) -> Result<Option<DiscoveredDevice>> {
        (self.query)()
    }

    async fn terminate(&self, serial: &str) {
        self.terminated.lock().unwrap().push(serial.to_string());
    }
}

fn found(serial: &str, state: DeviceState) -> Result<Option<DiscoveredDevice>> {
    Ok(Some(DiscoveredDevice {
        serial: serial.to_string(),
        state,
    }))
}

// ============================================================================
// Scripted launcher
// ============================================================================

/// Behavior of one launch: lines to emit on stderr, then optionally exit.
#[derive(Default, Clone)]
struct LaunchScript {
    stderr_lines: Vec<String>,
    /// Delay before emitting the scripted lines / exiting.
    delay: Option<Duration>,
    exit_after_lines: bool,
}

impl LaunchScript {
    fn quiet() -> Self {
        Self::default()
    }

    fn emits(lines: &[&str]) -> Self {
        Self {
            stderr_lines: lines.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn exits() -> Self {
        Self {
            exit_after_lines: true,
            ..Self::default()
        }
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct NoopControl {
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessControl for NoopControl {
    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeLauncher {
    script: Mutex<VecDeque<LaunchScript>>,
    launches: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl FakeLauncher {
    fn new(script: Vec<LaunchScript>) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(script)),
            launches: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _name: &str, _extra_args: &[String]) -> Result<LaunchedEmulator> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let (_out_tx, out_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(16);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Some(delay) = script.delay {
                tokio::time::sleep(delay).await;
            }
            for line in script.stderr_lines {
                if err_tx.send(line).await.is_err() {
                    return;
                }
            }
            if script.exit_after_lines {
                let _ = exit_tx.send(Some(1));
                return;
            }
            // Keep the process "running": channels stay open until the test
            // ends. Dropping exit_tx would read as an unexpected exit.
            std::future::pending::<()>().await;
            drop((err_tx, exit_tx, _out_tx));
        });

        Ok(LaunchedEmulator::new(
            out_rx,
            err_rx,
            exit_rx,
            Box::new(NoopControl {
                stops: self.stops.clone(),
            }),
        ))
    }
}

fn manager(registry: &Arc<MockRegistry>, launcher: &Arc<FakeLauncher>) -> EmulatorManager {
    EmulatorManager::new(
        registry.clone() as Arc<dyn RegistryClient>,
        launcher.clone() as Arc<dyn Launcher>,
    )
    .with_poll_interval(POLL)
}

// ============================================================================
// Scenarios
// ============================================================================

/// Scenario A: healthy registry, clean launch, device found on the third
/// polling cycle. No retries.
#[tokio::test]
async fn clean_boot_returns_serial_without_retries() {
    let registry = Arc::new(MockRegistry::scripted(vec![
        Ok(None),
        Ok(None),
        found("emu-5554", DeviceState::Device),
    ]));
    let launcher = Arc::new(FakeLauncher::new(vec![LaunchScript::quiet()]));

    let serial = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect("supervision should succeed");

    assert_eq!(serial, "emu-5554");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    assert!(registry.terminated.lock().unwrap().is_empty());
}

/// Scenario B: the first attempt's log contains a kernel panic before any
/// discovery result; the supervisor stops the process, retries, and the
/// second attempt boots normally.
#[tokio::test]
async fn kernel_panic_triggers_retry_and_second_attempt_succeeds() {
    let launcher = Arc::new(FakeLauncher::new(vec![
        LaunchScript::emits(&["Kernel panic - not syncing: Attempted to kill init!"]),
        LaunchScript::quiet(),
    ]));

    // No device until the second launch is underway.
    let launches = launcher.launches.clone();
    let registry = Arc::new(MockRegistry::new(Box::new(move || {
        if launches.load(Ordering::SeqCst) >= 2 {
            found("emu-5554", DeviceState::Device)
        } else {
            Ok(None)
        }
    })));

    let serial = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect("second attempt should succeed");

    assert_eq!(serial, "emu-5554");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    assert!(launcher.stops.load(Ordering::SeqCst) >= 1);
    // No serial had been observed when the fault hit, so nothing to kill.
    assert!(registry.terminated.lock().unwrap().is_empty());
}

/// Scenario C: the registry query fails twice in a row, the third cycle
/// succeeds and finds a ready device. Overall success with two resets.
#[tokio::test]
async fn query_errors_are_recovered_with_resets() {
    let registry = Arc::new(MockRegistry::scripted(vec![
        Err(Error::Query("transport broke".into())),
        Err(Error::Query("transport still broken".into())),
        found("emu-5554", DeviceState::Device),
    ]));
    let launcher = Arc::new(FakeLauncher::new(vec![LaunchScript::quiet()]));

    let serial = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect("third cycle should succeed");

    assert_eq!(serial, "emu-5554");
    assert_eq!(registry.resets.load(Ordering::SeqCst), 2);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

/// Scenario D: no device ever appears; the deadline fires and there are no
/// further retries.
#[tokio::test]
async fn deadline_fires_with_no_device_and_no_retries() {
    let registry = Arc::new(MockRegistry::new(Box::new(|| Ok(None))));
    let launcher = Arc::new(FakeLauncher::new(vec![LaunchScript::quiet()]));

    let err = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_millis(200))
        .await
        .expect_err("must time out");

    assert!(matches!(err, Error::Timeout));
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    // The emulator is stopped defensively on timeout.
    assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Wait-loop properties
// ============================================================================

/// A process-exit event with no discovery result triggers exactly one new
/// launch attempt.
#[tokio::test]
async fn unexpected_exit_triggers_exactly_one_new_attempt() {
    let launcher = Arc::new(FakeLauncher::new(vec![
        LaunchScript::exits(),
        LaunchScript::quiet(),
    ]));

    let launches = launcher.launches.clone();
    let registry = Arc::new(MockRegistry::new(Box::new(move || {
        if launches.load(Ordering::SeqCst) >= 2 {
            found("emu-5556", DeviceState::Device)
        } else {
            Ok(None)
        }
    })));

    let serial = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect("retry after exit should succeed");

    assert_eq!(serial, "emu-5556");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
}

/// A discovery result in a non-ready state must not terminate the wait loop;
/// the same attempt keeps waiting until the state flips to ready.
#[tokio::test]
async fn non_ready_report_keeps_waiting_in_same_attempt() {
    let registry = Arc::new(MockRegistry::scripted(vec![
        found("emu-5554", DeviceState::Offline),
        found("emu-5554", DeviceState::Offline),
        found("emu-5554", DeviceState::Device),
    ]));
    let launcher = Arc::new(FakeLauncher::new(vec![LaunchScript::quiet()]));

    let serial = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect("should succeed once state flips to device");

    assert_eq!(serial, "emu-5554");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

/// The deadline wins over a discovery result that is ready at the same
/// moment.
#[tokio::test]
async fn deadline_wins_over_in_flight_discovery_result() {
    let registry = Arc::new(MockRegistry::new(Box::new(|| {
        found("emu-5554", DeviceState::Device)
    })));
    let launcher = Arc::new(FakeLauncher::new(vec![LaunchScript::quiet()]));

    let err = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::ZERO)
        .await
        .expect_err("an elapsed deadline beats a ready report");

    assert!(matches!(err, Error::Timeout));
}

/// A fault after a serial was already observed also kills that device,
/// best-effort, before retrying.
#[tokio::test]
async fn fault_after_observed_serial_terminates_the_device() {
    let launcher = Arc::new(FakeLauncher::new(vec![
        LaunchScript::emits(&["Kernel panic - not syncing: Fatal exception"])
            .after(Duration::from_millis(100)),
        LaunchScript::quiet(),
    ]));

    // Booting (offline) until the broken device was killed, ready afterwards.
    let terminated = Arc::new(Mutex::new(Vec::new()));
    let seen_kill = terminated.clone();
    let registry = Arc::new(MockRegistry {
        query: Box::new(move || {
            if seen_kill.lock().unwrap().is_empty() {
                found("emu-5554", DeviceState::Offline)
            } else {
                found("emu-5556", DeviceState::Device)
            }
        }),
        ensure_fails: false,
        resets: Arc::new(AtomicUsize::new(0)),
        terminated,
    });

    let serial = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect("second attempt should succeed");

    assert_eq!(serial, "emu-5556");
    assert_eq!(
        registry.terminated.lock().unwrap().as_slice(),
        &["emu-5554".to_string()]
    );
}

// ============================================================================
// Fatal preconditions
// ============================================================================

/// An unreachable registry fails fast: no launch, no retries.
#[tokio::test]
async fn unavailable_registry_fails_without_launching() {
    let registry = Arc::new(MockRegistry::unavailable());
    let launcher = Arc::new(FakeLauncher::new(vec![]));

    let err = manager(&registry, &launcher)
        .start("pixel_6_api_34", &[], Duration::from_secs(10))
        .await
        .expect_err("registry is down");

    assert!(matches!(err, Error::RegistryUnavailable(_)));
    assert!(err.is_fatal());
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
}
