//! Load statistics: how much of the program the scripts contribute.
//!
//! One [`ScriptInfo`] instance exists per load/unload/reload run (transient)
//! and one process-wide instance lives inside the loader (persistent,
//! lock-guarded). Per-run totals are merged into the persistent instance
//! only after a run fully completes.

use std::fmt;

/// Counters for the general content of one or more scripts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScriptInfo {
    /// Number of script files.
    pub files: u32,
    /// Number of triggers (event triggers and command triggers).
    pub triggers: u32,
    /// Number of functions.
    pub functions: u32,
}

impl ScriptInfo {
    /// A zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add another counter set into this one.
    pub fn add(&mut self, other: &ScriptInfo) {
        self.files += other.files;
        self.triggers += other.triggers;
        self.functions += other.functions;
    }

    /// Subtract another counter set from this one, saturating at zero.
    ///
    /// Unload always subtracts exactly what was recorded at registration
    /// time, so saturation only matters if callers mix mismatched infos.
    pub fn subtract(&mut self, other: &ScriptInfo) {
        self.files = self.files.saturating_sub(other.files);
        self.triggers = self.triggers.saturating_sub(other.triggers);
        self.functions = self.functions.saturating_sub(other.functions);
    }

    /// True if every counter is zero.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for ScriptInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s), {} trigger(s), {} function(s)",
            self.files, self.triggers, self.functions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_subtract_round_trip() {
        let mut total = ScriptInfo {
            files: 2,
            triggers: 5,
            functions: 1,
        };
        let delta = ScriptInfo {
            files: 1,
            triggers: 3,
            functions: 1,
        };
        let before = total;
        total.add(&delta);
        total.subtract(&delta);
        assert_eq!(total, before);
    }

    #[test]
    fn test_subtract_saturates() {
        let mut info = ScriptInfo::new();
        info.subtract(&ScriptInfo {
            files: 1,
            triggers: 1,
            functions: 1,
        });
        assert!(info.is_empty());
    }
}
