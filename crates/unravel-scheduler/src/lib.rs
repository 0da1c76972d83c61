//! Background task execution for Unravel.
//!
//! A [`BackgroundExecutor`] runs named [`BackgroundTask`]s strictly one at a time. Each task
//! expands into independent [`Job`]s that run on a bounded worker pool while a supervising loop
//! enforces cancellation, deadlines and memory limits and publishes progress.
//!
//! Cancellation is cooperative: jobs receive a [`CancellationToken`] and are expected to poll it.

mod executor;
mod gate;
mod handle;
mod pool;
mod progress;
mod task;

pub use executor::{BackgroundExecutor, ExecutorConfig, MemoryCheckConfig};
pub use handle::TaskHandle;
pub use progress::{ProgressEvent, ProgressId, ProgressReceiver};
pub use task::{
    calc_progress, job, BackgroundTask, Job, JobError, SimpleTask, TaskReport, TaskStatus,
};
pub use tokio_util::sync::CancellationToken;
