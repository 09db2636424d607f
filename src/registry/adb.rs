//! adb-backed implementation of the device registry.
//!
//! All interaction with the registry backend goes through the adb binary:
//! `start-server`, `kill-server`, `devices`, and `emu kill`. Each call shells
//! out and collects the full output; none of these commands stream.

use super::types::{diff_new_device, parse_device_listing, DeviceSnapshot, DiscoveredDevice};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Narrow contract the supervisor and poller depend on. Implemented by
/// [`AdbRegistry`] in production and by mocks in tests.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Verify the registry backend is reachable; attempts one reset before
    /// giving up with [`Error::RegistryUnavailable`].
    async fn ensure_available(&self) -> Result<()>;

    /// Current serial → state mapping.
    async fn list_devices(&self) -> Result<DeviceSnapshot>;

    /// Restart the registry backend connection. Used both as explicit
    /// recovery and as the poller's periodic unstick. Devices may be
    /// transiently invisible during the reset window.
    async fn reset(&self) -> Result<()>;

    /// A device present in the live listing but absent from `snapshot`, or
    /// `None` when no such device exists yet.
    async fn find_new_device(&self, snapshot: &DeviceSnapshot) -> Result<Option<DiscoveredDevice>>;

    /// Best-effort kill of one device. Failures are logged, never escalated:
    /// termination during recovery is advisory cleanup.
    async fn terminate(&self, serial: &str);
}

/// Registry client that drives the adb binary.
pub struct AdbRegistry {
    adb_path: PathBuf,
}

impl AdbRegistry {
    pub fn new(adb_path: PathBuf) -> Self {
        Self { adb_path }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.adb_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Query(format!("adb {}: {}", args.join(" "), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Query(format!(
                "adb {} exited with {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RegistryClient for AdbRegistry {
    async fn ensure_available(&self) -> Result<()> {
        if let Err(e) = self.run(&["start-server"]).await {
            tracing::warn!("failed to start adb server: {}", e);
            tracing::warn!("restarting adb server...");
            self.reset()
                .await
                .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn list_devices(&self) -> Result<DeviceSnapshot> {
        let output = self.run(&["devices"]).await?;
        Ok(parse_device_listing(&output))
    }

    async fn reset(&self) -> Result<()> {
        // kill-server exits non-zero when no server is running; that is the
        // state we want anyway.
        if let Err(e) = self.run(&["kill-server"]).await {
            tracing::debug!("adb kill-server: {}", e);
        }
        self.run(&["start-server"]).await?;
        Ok(())
    }

    async fn find_new_device(&self, snapshot: &DeviceSnapshot) -> Result<Option<DiscoveredDevice>> {
        let live = self.list_devices().await?;
        Ok(diff_new_device(snapshot, &live))
    }

    async fn terminate(&self, serial: &str) {
        match self.run(&["-s", serial, "emu", "kill"]).await {
            Ok(_) => tracing::debug!("sent kill to {}", serial),
            Err(e) => tracing::warn!("failed to kill {}: {}", serial, e),
        }
    }
}
