use crate::pressure::{MemoryPressure, MemoryPressureThresholds};
use crate::process;
use crate::size::format_bytes;
use std::fmt;
use std::sync::Mutex;
use sysinfo::System;

/// Point-in-time memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub rss_bytes: Option<u64>,
}

impl MemorySnapshot {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn pressure(&self, thresholds: MemoryPressureThresholds) -> MemoryPressure {
        thresholds.level_for(self.used_bytes(), self.total_bytes)
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "available: {}, total: {}",
            format_bytes(self.available_bytes),
            format_bytes(self.total_bytes)
        )?;
        if let Some(rss) = self.rss_bytes {
            write!(f, ", rss: {}", format_bytes(rss))?;
        }
        Ok(())
    }
}

/// Source of memory samples.
///
/// The scheduler only depends on this trait so tests (and embedders with their own accounting)
/// can simulate memory pressure.
pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;

    /// Whether at least `min_free_bytes` are still available.
    fn is_free_memory_available(&self, min_free_bytes: u64) -> bool {
        self.snapshot().available_bytes >= min_free_bytes
    }
}

/// [`MemoryProbe`] backed by the operating system (`sysinfo`) and `/proc/self/status`.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemMemoryProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemMemoryProbe").finish_non_exhaustive()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> MemorySnapshot {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();
        let total_bytes = system.total_memory();
        let available_bytes = system.available_memory();
        drop(system);

        if total_bytes == 0 {
            static REPORTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
            if REPORTED.set(()).is_ok() {
                tracing::debug!(
                    target: "unravel.memory",
                    "system memory totals unavailable; memory checks always pass"
                );
            }
            return MemorySnapshot {
                total_bytes: 0,
                available_bytes: u64::MAX,
                rss_bytes: process::current_rss_bytes(),
            };
        }

        MemorySnapshot {
            total_bytes,
            available_bytes,
            rss_bytes: process::current_rss_bytes(),
        }
    }
}
