//! Memory probing for Unravel's background work.
//!
//! This crate is intentionally lightweight and "best-effort": it samples system and process
//! memory so the scheduler can throttle or cancel memory-hungry tasks, and it parses the
//! human-friendly byte sizes used in configuration.

mod pressure;
mod probe;
mod process;
mod size;

pub use pressure::{MemoryPressure, MemoryPressureThresholds};
pub use probe::{MemoryProbe, MemorySnapshot, SystemMemoryProbe};
pub use process::current_rss_bytes;
pub use size::{format_bytes, parse_byte_size, GB, KB, MB};
