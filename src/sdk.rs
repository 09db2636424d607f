//! Android SDK path resolution.
//!
//! The supervisor only needs two binaries out of the SDK: the emulator
//! launcher and adb. Everything else (system images, AVD creation) happens
//! before this tool runs.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolves SDK component paths from the conventional environment variables.
#[derive(Debug, Clone)]
pub struct SdkLocator {
    root: PathBuf,
}

impl SdkLocator {
    /// Locate the SDK root via `ANDROID_HOME`, falling back to
    /// `ANDROID_SDK_ROOT`. Fails when neither points at a directory.
    pub fn from_env() -> Result<Self> {
        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
            if let Some(root) = std::env::var_os(var).map(PathBuf::from) {
                if root.is_dir() {
                    return Ok(Self { root });
                }
                tracing::warn!("{} points at {:?}, which is not a directory", var, root);
            }
        }
        Err(Error::SdkComponentNotFound(
            "SDK root (ANDROID_HOME / ANDROID_SDK_ROOT unset)".to_string(),
        ))
    }

    /// Build a locator for a known SDK root. Used by tests and by callers
    /// that already validated the path.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the emulator launcher binary. Its absence is a precondition
    /// failure for the whole supervisor.
    pub fn emulator(&self) -> Result<PathBuf> {
        let path = self.root.join("emulator").join("emulator");
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::SdkComponentNotFound("emulator".to_string()))
        }
    }

    /// Path to adb. Prefers the SDK's platform-tools copy, then falls back to
    /// whatever is on PATH so developer machines with a system adb still work.
    pub fn adb(&self) -> Result<PathBuf> {
        let path = self.root.join("platform-tools").join("adb");
        if path.is_file() {
            return Ok(path);
        }
        find_on_path("adb").ok_or_else(|| Error::SdkComponentNotFound("platform-tools".to_string()))
    }
}

fn find_on_path(cmd: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(cmd);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
