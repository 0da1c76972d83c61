/// Coarse system memory pressure, derived from the used fraction of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Used-fraction cut-offs for each [`MemoryPressure`] level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryPressureThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for MemoryPressureThresholds {
    fn default() -> Self {
        Self {
            medium: 0.70,
            high: 0.85,
            critical: 0.95,
        }
    }
}

impl MemoryPressureThresholds {
    pub fn level_for(self, used_bytes: u64, total_bytes: u64) -> MemoryPressure {
        if total_bytes == 0 {
            // Unknown totals (unsupported platform) never escalate.
            return MemoryPressure::Low;
        }
        let ratio = used_bytes as f64 / total_bytes as f64;
        if ratio >= self.critical {
            MemoryPressure::Critical
        } else if ratio >= self.high {
            MemoryPressure::High
        } else if ratio >= self.medium {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }
}
