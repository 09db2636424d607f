//! # AVD Supervisor
//!
//! Supervises the boot of an Android emulator for automated test pipelines:
//! launches the emulator process, watches the adb registry for the new device
//! to appear and become ready, recovers from boot faults by restarting the
//! process, and enforces an overall deadline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use avd_supervisor::{AdbRegistry, EmulatorLauncher, EmulatorManager, SdkLocator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), avd_supervisor::Error> {
//! let sdk = SdkLocator::from_env()?;
//! let registry = Arc::new(AdbRegistry::new(sdk.adb()?));
//! let launcher = Arc::new(EmulatorLauncher::new(&sdk)?);
//!
//! let manager = EmulatorManager::new(registry, launcher);
//! let serial = manager.start("pixel_6_api_34", &[], Duration::from_secs(600)).await?;
//! println!("{}", serial);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Each launch attempt runs its own output pumps, multiplexer, detector
//! pipeline and discovery poller as tokio tasks, all communicating over
//! channels and all scoped to a per-attempt cancellation token. The
//! supervisor blocks on a single `select!` racing process exit, fault lines,
//! discovery reports and the deadline.

pub mod detector;
pub mod error;
pub mod launcher;
pub mod muxer;
pub mod poller;
pub mod registry;
pub mod sdk;
pub mod supervisor;

// Re-export commonly used types
pub use detector::{FaultDetector, LineClass};
pub use error::{Error, Result};
pub use launcher::{EmulatorLauncher, LaunchedEmulator, Launcher, ProcessControl};
pub use registry::{AdbRegistry, DeviceSnapshot, DeviceState, DiscoveredDevice, RegistryClient};
pub use sdk::SdkLocator;
pub use supervisor::{EmulatorManager, Phase};
