use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

use crate::{TaskReport, TaskStatus};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between a [`TaskHandle`], the task runner and the task's jobs.
pub(crate) struct TaskShared {
    id: u64,
    title: String,
    state: Mutex<TaskState>,
    // Signalled on status changes, job completions and cancel requests.
    changed: Condvar,
    user_cancel: AtomicBool,
    jobs_finished: AtomicUsize,
    jobs_complete: AtomicUsize,
    report_tx: watch::Sender<Option<TaskReport>>,
}

struct TaskState {
    status: TaskStatus,
    report: Option<TaskReport>,
}

impl TaskShared {
    pub(crate) fn new(title: String) -> Arc<Self> {
        let (report_tx, _) = watch::channel(None);
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            title,
            state: Mutex::new(TaskState {
                status: TaskStatus::Wait,
                report: None,
            }),
            changed: Condvar::new(),
            user_cancel: AtomicBool::new(false),
            jobs_finished: AtomicUsize::new(0),
            jobs_complete: AtomicUsize::new(0),
            report_tx,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Moves to a non-terminal `status`. Ignored once the task reached a terminal status.
    pub(crate) fn set_status(&self, status: TaskStatus) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            tracing::debug!(
                target: "unravel.scheduler",
                task = self.id,
                current = %state.status,
                requested = %status,
                "ignoring status change after terminal status"
            );
            return;
        }
        state.status = status;
        drop(state);
        self.changed.notify_all();
    }

    /// Publishes the terminal report. Only the first call wins.
    pub(crate) fn finish(&self, report: TaskReport) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            tracing::debug!(
                target: "unravel.scheduler",
                task = self.id,
                current = %state.status,
                requested = %report.status,
                "ignoring second terminal status"
            );
            return;
        }
        state.status = report.status;
        state.report = Some(report.clone());
        drop(state);
        self.changed.notify_all();
        self.report_tx.send_replace(Some(report));
    }

    pub(crate) fn request_cancel(&self) {
        self.user_cancel.store(true, Ordering::SeqCst);
        self.notify();
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.user_cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn record_job(&self, complete: bool) {
        if complete {
            self.jobs_complete.fetch_add(1, Ordering::SeqCst);
        }
        self.jobs_finished.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    pub(crate) fn jobs_finished(&self) -> usize {
        self.jobs_finished.load(Ordering::SeqCst)
    }

    pub(crate) fn jobs_complete(&self) -> usize {
        self.jobs_complete.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for `jobs` jobs to finish or a cancel request. Returns whether all
    /// jobs finished.
    pub(crate) fn wait_for_jobs(&self, jobs: usize, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed.wait_while_for(
            &mut state,
            |_| self.jobs_finished() < jobs && !self.is_cancel_requested(),
            timeout,
        );
        self.jobs_finished() >= jobs
    }

    /// Waits up to `timeout` for `jobs` jobs to finish, ignoring cancel requests.
    pub(crate) fn drain_jobs(&self, jobs: usize, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed
            .wait_while_for(&mut state, |_| self.jobs_finished() < jobs, timeout);
        self.jobs_finished() >= jobs
    }

    fn notify(&self) {
        // Taking the lock orders this wake-up after any waiter's predicate check.
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}

/// Handle to a submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    pub fn title(&self) -> &str {
        self.shared.title()
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    /// Requests cancellation. A queued task ends without running; a running task is cancelled by
    /// the supervising loop on its next check.
    pub fn cancel(&self) {
        self.shared.request_cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Number of jobs that finished successfully so far.
    pub fn jobs_complete(&self) -> usize {
        self.shared.jobs_complete()
    }

    /// Blocks until the task reaches a terminal status.
    ///
    /// Must not be called from a job or task callback of the same executor.
    pub fn wait(&self) -> TaskReport {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(report) = &state.report {
                return report.clone();
            }
            self.shared.changed.wait(&mut state);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskReport> {
        let mut state = self.shared.state.lock();
        self.shared
            .changed
            .wait_while_for(&mut state, |state| state.report.is_none(), timeout);
        state.report.clone()
    }

    /// Resolves to the task's report once it reaches a terminal status.
    pub async fn join(&self) -> TaskReport {
        let mut rx = self.shared.report_tx.subscribe();
        loop {
            if let Some(report) = rx.borrow_and_update().clone() {
                return report;
            }
            if rx.changed().await.is_err() {
                // The sender lives in `shared`, which we keep alive.
                return self.wait();
            }
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("title", &self.title())
            .field("status", &self.status())
            .finish()
    }
}
