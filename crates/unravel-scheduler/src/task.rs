use std::fmt;
use std::time::Duration;

use crate::CancellationToken;

/// Lifecycle of a task: `Wait` → `Started` → one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Wait,
    Started,
    Complete,
    CancelByUser,
    CancelByTimeout,
    CancelByMemory,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Wait | TaskStatus::Started)
    }

    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            TaskStatus::CancelByUser | TaskStatus::CancelByTimeout | TaskStatus::CancelByMemory
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Wait => "wait",
            TaskStatus::Started => "started",
            TaskStatus::Complete => "complete",
            TaskStatus::CancelByUser => "cancelled by user",
            TaskStatus::CancelByTimeout => "cancelled by timeout",
            TaskStatus::CancelByMemory => "cancelled by memory",
            TaskStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub status: TaskStatus,
    pub jobs_count: usize,
    pub jobs_complete: usize,
    /// Jobs that failed, panicked, were cancelled or never ran.
    pub jobs_skipped: usize,
    pub time: Duration,
}

impl TaskReport {
    pub(crate) fn new(
        status: TaskStatus,
        jobs_count: usize,
        jobs_complete: usize,
        time: Duration,
    ) -> Self {
        Self {
            status,
            jobs_count,
            jobs_complete,
            jobs_skipped: jobs_count.saturating_sub(jobs_complete),
            time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,
    #[error("job failed: {0}")]
    Failed(String),
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Failed(format!("{err:#}"))
    }
}

/// One independently schedulable unit of a task.
pub type Job = Box<dyn FnOnce(&CancellationToken) -> Result<(), JobError> + Send>;

/// Boxes a closure as a [`Job`].
pub fn job<F>(f: F) -> Job
where
    F: FnOnce(&CancellationToken) -> Result<(), JobError> + Send + 'static,
{
    Box::new(f)
}

/// Percentage of `done` out of `total`, in `0..=100`. An empty task is fully done.
pub fn calc_progress(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total) as u64;
    (done * 100 / total as u64) as u32
}

/// A user-level operation run by [`crate::BackgroundExecutor`].
///
/// Callbacks run on the executor's task thread.
pub trait BackgroundTask: Send + 'static {
    fn title(&self) -> String;

    /// Expands the task into jobs. Called once, when the task leaves the queue.
    fn schedule_jobs(&mut self) -> Vec<Job>;

    /// Called after all jobs ended (or were abandoned), before the status is published.
    fn on_done(&mut self, _report: &TaskReport) {}

    /// Called after the terminal status is published.
    fn on_finish(&mut self, _report: &TaskReport) {}

    /// Wall-clock limit; `None` or zero means unlimited.
    fn time_limit(&self) -> Option<Duration> {
        None
    }

    fn check_memory_usage(&self) -> bool {
        false
    }

    /// Custom progress in percent, used instead of the completed-jobs ratio.
    fn task_progress(&self) -> Option<u32> {
        None
    }

    fn on_progress(&mut self, _percentage: u32) {}
}

type FinishCallback = Box<dyn FnOnce(&TaskReport) + Send>;

/// [`BackgroundTask`] over a prepared list of jobs.
pub struct SimpleTask {
    title: String,
    jobs: Vec<Job>,
    time_limit: Option<Duration>,
    check_memory: bool,
    on_finish: Option<FinishCallback>,
}

impl SimpleTask {
    pub fn new(title: impl Into<String>, jobs: Vec<Job>) -> Self {
        Self {
            title: title.into(),
            jobs,
            time_limit: None,
            check_memory: false,
            on_finish: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_memory_check(mut self, enabled: bool) -> Self {
        self.check_memory = enabled;
        self
    }

    pub fn on_finish(mut self, callback: impl FnOnce(&TaskReport) + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for SimpleTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleTask")
            .field("title", &self.title)
            .field("jobs", &self.jobs.len())
            .field("time_limit", &self.time_limit)
            .field("check_memory", &self.check_memory)
            .finish_non_exhaustive()
    }
}

impl BackgroundTask for SimpleTask {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn schedule_jobs(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.jobs)
    }

    fn on_finish(&mut self, report: &TaskReport) {
        if let Some(callback) = self.on_finish.take() {
            callback(report);
        }
    }

    fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    fn check_memory_usage(&self) -> bool {
        self.check_memory
    }
}
