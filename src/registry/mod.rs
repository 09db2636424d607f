//! Device registry client: querying known devices and their states, and
//! forcibly terminating one by serial.

mod adb;
mod types;

pub use adb::{AdbRegistry, RegistryClient};
pub use types::{
    diff_new_device, parse_device_listing, DeviceSnapshot, DeviceState, DiscoveredDevice,
};
