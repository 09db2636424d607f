use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("device registry unavailable: {0}")]
    #[diagnostic(
        code(avdsup::registry::unavailable),
        help("Check that adb is installed and that the adb server can start: `adb start-server`")
    )]
    RegistryUnavailable(String),

    #[error("device registry query failed: {0}")]
    #[diagnostic(code(avdsup::registry::query))]
    Query(String),

    #[error("emulator fault: {0}")]
    #[diagnostic(code(avdsup::emulator::fault))]
    ProcessFault(String),

    #[error("timed out waiting for emulator to boot")]
    #[diagnostic(
        code(avdsup::emulator::timeout),
        help("Emulator boot can be slow on unaccelerated hosts. Increase --timeout or check the emulator log above for stalls")
    )]
    Timeout,

    #[error("SDK component not found: {0}")]
    #[diagnostic(
        code(avdsup::sdk::not_found),
        help("Set ANDROID_HOME (or ANDROID_SDK_ROOT) to a SDK installation that contains the component")
    )]
    SdkComponentNotFound(String),

    #[error("failed to launch emulator: {0}")]
    #[diagnostic(code(avdsup::emulator::launch_failed))]
    LaunchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::RegistryUnavailable(_) => Some(
                "Verify the adb binary works at all: `adb start-server && adb devices`. \
                 A stale server can be cleared with `adb kill-server`."
                    .to_string(),
            ),
            Error::Timeout => Some(
                "Re-run with a larger --timeout, or pass `-- -no-accel` to rule out \
                 hypervisor problems (slower but deterministic)."
                    .to_string(),
            ),
            Error::SdkComponentNotFound(name) => Some(format!(
                "Install the missing component with sdkmanager, e.g. `sdkmanager \"{}\"`.",
                name
            )),
            Error::LaunchFailed(_) => Some(
                "Check that the AVD exists (`avdmanager list avd`) and that the emulator \
                 binary is executable."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }

    /// True for errors the supervision loop must not retry: the environment is
    /// broken in a way another launch attempt cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RegistryUnavailable(_) | Error::Timeout | Error::SdkComponentNotFound(_)
        )
    }
}
