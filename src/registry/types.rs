use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Connection state of a device as reported by the registry.
///
/// Only [`DeviceState::Device`] means the device finished booting. Everything
/// else is transient: a freshly launched emulator typically shows up as
/// `offline` first and flips to `device` once the guest is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Fully booted and accepting commands.
    Device,
    /// Visible but not yet (or no longer) responding.
    Offline,
    /// Visible but the host is not authorized for it.
    Unauthorized,
    /// Booted into recovery.
    Recovery,
    /// Booted into sideload mode.
    Sideload,
    /// Any other state string the registry emits.
    Unknown(String),
}

impl DeviceState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "device" => DeviceState::Device,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "recovery" => DeviceState::Recovery,
            "sideload" => DeviceState::Sideload,
            other => DeviceState::Unknown(other.to_string()),
        }
    }

    /// Whether this state terminates the supervisor's wait loop.
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceState::Device)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Device => write!(f, "device"),
            DeviceState::Offline => write!(f, "offline"),
            DeviceState::Unauthorized => write!(f, "unauthorized"),
            DeviceState::Recovery => write!(f, "recovery"),
            DeviceState::Sideload => write!(f, "sideload"),
            DeviceState::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// Serial → state mapping captured at one point in time.
///
/// A snapshot taken immediately before a launch attempt is the baseline used
/// to tell pre-existing devices apart from the one the attempt booted. It is
/// never updated after capture.
pub type DeviceSnapshot = HashMap<String, DeviceState>;

/// A device reported by the discovery poller: serial plus the state it was
/// seen in. Consumed once by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub serial: String,
    pub state: DeviceState,
}

/// Parse the output of `adb devices` into a snapshot.
///
/// The listing starts with a banner line (`List of devices attached`)
/// followed by `<serial>\t<state>` rows. Blank lines and daemon-start chatter
/// are skipped.
pub fn parse_device_listing(output: &str) -> DeviceSnapshot {
    let mut devices = DeviceSnapshot::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("List of devices")
            || line.starts_with('*')
        {
            continue;
        }
        let mut cols = line.split_whitespace();
        let (Some(serial), Some(state)) = (cols.next(), cols.next()) else {
            continue;
        };
        devices.insert(serial.to_string(), DeviceState::parse(state));
    }
    devices
}

/// Return a device present in `live` but absent from `snapshot`, if any.
///
/// Never returns a serial that was in the snapshot, even if its state has
/// changed since — state changes on pre-existing devices are not ours.
pub fn diff_new_device(snapshot: &DeviceSnapshot, live: &DeviceSnapshot) -> Option<DiscoveredDevice> {
    live.iter()
        .find(|(serial, _)| !snapshot.contains_key(*serial))
        .map(|(serial, state)| DiscoveredDevice {
            serial: serial.clone(),
            state: state.clone(),
        })
}
