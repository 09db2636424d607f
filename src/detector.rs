//! Log-based fault detection.
//!
//! The emulator's kernel log is the only early signal that a boot is doomed:
//! the device may never appear in the registry at all. Detection is plain
//! case-sensitive substring matching against a fixed table — fault lines are
//! verbatim kernel markers, not free-form text worth a regex.

/// Fault markers observed in emulator kernel output. The leading/trailing
/// spaces in the BUG marker are significant: `DEBUG:` lines must not match.
pub const DEFAULT_FAULT_SIGNATURES: &[&str] = &[" BUG: ", "Kernel panic"];

/// Line the emulator prints once the guest has finished booting.
pub const BOOT_COMPLETED_MARKER: &str = "INFO    | boot completed";

/// Classification of a single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// The line matched a fault signature; the current attempt is doomed.
    Fault,
    /// The guest reported boot completion. Informational: readiness is
    /// decided by the registry state, not by this marker.
    BootCompleted,
    /// Anything else. Echoed for operator visibility, otherwise ignored.
    None,
}

/// Scans output lines for fault signatures and the boot-completion marker.
///
/// The signature table is fixed at construction; there is no way to extend
/// it at runtime.
#[derive(Debug, Clone)]
pub struct FaultDetector {
    signatures: Vec<String>,
}

impl FaultDetector {
    pub fn new<S: AsRef<str>>(signatures: &[S]) -> Self {
        Self {
            signatures: signatures.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    /// Classify one line. Fault signatures are checked before the boot
    /// marker; first match wins.
    pub fn classify(&self, line: &str) -> LineClass {
        if self.signatures.iter().any(|sig| line.contains(sig.as_str())) {
            return LineClass::Fault;
        }
        if line.contains(BOOT_COMPLETED_MARKER) {
            return LineClass::BootCompleted;
        }
        LineClass::None
    }
}

impl Default for FaultDetector {
    fn default() -> Self {
        Self::new(DEFAULT_FAULT_SIGNATURES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_signature_classifies_as_fault() {
        let detector = FaultDetector::default();
        for sig in DEFAULT_FAULT_SIGNATURES {
            let line = format!("some prefix{}some suffix", sig);
            assert_eq!(detector.classify(&line), LineClass::Fault, "sig: {:?}", sig);
        }
    }

    #[test]
    fn kernel_panic_line_is_a_fault() {
        let detector = FaultDetector::default();
        let line = "Kernel panic - not syncing: VFS: Unable to mount root fs";
        assert_eq!(detector.classify(line), LineClass::Fault);
    }

    #[test]
    fn bug_marker_requires_surrounding_spaces() {
        let detector = FaultDetector::default();
        assert_eq!(detector.classify("kernel: BUG: soft lockup"), LineClass::Fault);
        // No surrounding spaces: not the kernel marker.
        assert_eq!(detector.classify("DEBUG:ON"), LineClass::None);
    }

    #[test]
    fn boot_marker_without_fault_is_boot_completed() {
        let detector = FaultDetector::default();
        let line = "emulator: INFO    | boot completed";
        assert_eq!(detector.classify(line), LineClass::BootCompleted);
    }

    #[test]
    fn fault_wins_over_boot_marker() {
        let detector = FaultDetector::default();
        let line = "INFO    | boot completed right before Kernel panic";
        assert_eq!(detector.classify(line), LineClass::Fault);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let detector = FaultDetector::default();
        assert_eq!(detector.classify("kernel PANIC everywhere"), LineClass::None);
    }

    #[test]
    fn custom_signature_table() {
        let detector = FaultDetector::new(&["FATAL ERROR"]);
        assert_eq!(detector.classify("FATAL ERROR: oh no"), LineClass::Fault);
        // Default signatures do not apply to a custom table.
        assert_eq!(detector.classify("Kernel panic"), LineClass::None);
    }
}
