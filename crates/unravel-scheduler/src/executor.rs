use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use unravel_core::panic_payload_to_str;
use unravel_memory::{MemoryPressureThresholds, MemoryProbe, SystemMemoryProbe, MB};

use crate::gate::ConcurrencyGate;
use crate::handle::{TaskHandle, TaskShared};
use crate::pool::{build_rayon_pool, BlockingPool};
use crate::progress::{ProgressReceiver, ProgressSender};
use crate::task::{calc_progress, BackgroundTask, Job, JobError, SimpleTask, TaskReport, TaskStatus};
use crate::CancellationToken;

const FAST_POLL: Duration = Duration::from_millis(100);
const SLOW_POLL: Duration = Duration::from_secs(1);
// Number of fast polls (two seconds) before switching to the slow interval.
const FAST_POLL_ROUNDS: u32 = 20;

#[derive(Debug, Clone)]
pub struct MemoryCheckConfig {
    /// Tasks with memory checking enabled are throttled, then cancelled, below this much free
    /// memory.
    pub min_free_bytes: u64,
    /// Pause between throttling and re-measuring.
    pub settle_delay: Duration,
}

impl Default for MemoryCheckConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: 256 * MB,
            settle_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Workers per running task.
    pub threads: usize,
    pub memory_check: MemoryCheckConfig,
    /// How long a cancelled task waits for its jobs to stop.
    pub cancel_grace: Duration,
    pub progress_channel_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            threads: available.clamp(1, 8),
            memory_check: MemoryCheckConfig::default(),
            cancel_grace: Duration::from_secs(5),
            progress_channel_capacity: 1024,
        }
    }
}

type LowMemoryHook = Arc<dyn Fn() + Send + Sync>;

/// Runs [`BackgroundTask`]s one at a time, each on its own bounded worker pool.
#[derive(Clone)]
pub struct BackgroundExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    queue: BlockingPool,
    // Replaced by `cancel_all`; tasks capture the token current at submission.
    generation: Mutex<CancellationToken>,
    pending: Mutex<Vec<TaskHandle>>,
    runner: Arc<Runner>,
}

/// Everything a queued task needs; does not keep the executor itself alive.
struct Runner {
    config: ExecutorConfig,
    probe: Arc<dyn MemoryProbe>,
    progress: ProgressSender,
    low_memory_hooks: RwLock<Vec<LowMemoryHook>>,
    active_jobs: Arc<AtomicUsize>,
    job_pool: fn(usize) -> BlockingPool,
}

fn job_pool(threads: usize) -> BlockingPool {
    build_rayon_pool("unravel-jobs", threads)
}

impl BackgroundExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemMemoryProbe::new()))
    }

    /// Executor that measures free memory through `probe`.
    pub fn with_probe(config: ExecutorConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let progress = ProgressSender::new(config.progress_channel_capacity);
        Self {
            inner: Arc::new(ExecutorInner {
                queue: build_rayon_pool("unravel-tasks", 1),
                generation: Mutex::new(CancellationToken::new()),
                pending: Mutex::new(Vec::new()),
                runner: Arc::new(Runner {
                    config,
                    probe,
                    progress,
                    low_memory_hooks: RwLock::new(Vec::new()),
                    active_jobs: Arc::new(AtomicUsize::new(0)),
                    job_pool,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.runner.config
    }

    /// Queues `task` behind any previously submitted ones.
    pub fn execute(&self, task: impl BackgroundTask) -> TaskHandle {
        let shared = TaskShared::new(task.title());
        let handle = TaskHandle::new(shared.clone());
        let generation = self.inner.generation.lock().clone();
        {
            let mut pending = self.inner.pending.lock();
            pending.retain(|handle| !handle.is_finished());
            pending.push(handle.clone());
        }

        tracing::debug!(
            target: "unravel.scheduler",
            task = shared.id(),
            title = %shared.title(),
            "task queued"
        );
        let runner = self.inner.runner.clone();
        self.inner
            .queue
            .spawn(move || runner.run(Box::new(task), shared, generation));
        handle
    }

    pub fn execute_jobs(&self, title: impl Into<String>, jobs: Vec<Job>) -> TaskHandle {
        self.execute(SimpleTask::new(title, jobs))
    }

    /// Submits `task` and blocks until it finishes.
    pub fn execute_and_wait(&self, task: impl BackgroundTask) -> TaskReport {
        self.execute(task).wait()
    }

    /// Cancels every queued and running task and waits up to the grace period for them to end.
    ///
    /// Tasks submitted afterwards run normally.
    pub fn cancel_all(&self) {
        let previous = {
            let mut generation = self.inner.generation.lock();
            std::mem::replace(&mut *generation, CancellationToken::new())
        };
        previous.cancel();

        let pending = std::mem::take(&mut *self.inner.pending.lock());
        let deadline = Instant::now() + self.inner.runner.config.cancel_grace;
        let mut unfinished = 0;
        for handle in &pending {
            handle.cancel();
        }
        for handle in &pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if handle.wait_timeout(remaining).is_none() {
                unfinished += 1;
            }
        }
        tracing::info!(
            target: "unravel.scheduler",
            cancelled = pending.len(),
            unfinished,
            "cancelled all tasks"
        );
    }

    /// Registers a callback run when a memory-checked task hits the free-memory threshold,
    /// before memory is measured again.
    pub fn on_low_memory(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.runner.low_memory_hooks.write().push(Arc::new(hook));
    }

    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.inner.runner.progress.subscribe()
    }

    /// Number of job bodies currently executing, across all tasks.
    pub fn active_jobs(&self) -> usize {
        self.inner.runner.active_jobs.load(Ordering::SeqCst)
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl std::fmt::Debug for BackgroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("config", &self.inner.runner.config)
            .field("active_jobs", &self.active_jobs())
            .finish_non_exhaustive()
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        // Queued tasks end as cancelled; running ones stop at their next check.
        self.generation.lock().cancel();
    }
}

struct ActiveJob<'a>(&'a AtomicUsize);

impl<'a> ActiveJob<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Runner {
    fn run(
        &self,
        mut task: Box<dyn BackgroundTask>,
        shared: Arc<TaskShared>,
        generation: CancellationToken,
    ) {
        let start = Instant::now();
        let task_id = shared.id();

        if shared.is_cancel_requested() || generation.is_cancelled() {
            tracing::debug!(
                target: "unravel.scheduler",
                task = task_id,
                "task cancelled before start"
            );
            let report = TaskReport::new(TaskStatus::CancelByUser, 0, 0, start.elapsed());
            self.complete(&mut *task, &shared, report);
            return;
        }

        let jobs = match catch_unwind(AssertUnwindSafe(|| task.schedule_jobs())) {
            Ok(jobs) => jobs,
            Err(panic) => {
                tracing::error!(
                    target: "unravel.scheduler",
                    task = task_id,
                    panic = %panic_payload_to_str(&*panic),
                    "scheduling jobs panicked"
                );
                let report = TaskReport::new(TaskStatus::Error, 0, 0, start.elapsed());
                self.complete(&mut *task, &shared, report);
                return;
            }
        };

        let jobs_count = jobs.len();
        // Inline jobs would run to completion before any cancel or memory check.
        let pool = match (self.job_pool)(self.config.threads) {
            BlockingPool::Rayon(pool) => pool,
            BlockingPool::Inline => {
                tracing::error!(
                    target: "unravel.scheduler",
                    task = task_id,
                    jobs = jobs_count,
                    "no worker threads for task jobs; failing task"
                );
                let report = TaskReport::new(TaskStatus::Error, jobs_count, 0, start.elapsed());
                self.complete(&mut *task, &shared, report);
                return;
            }
        };

        shared.set_status(TaskStatus::Started);
        tracing::info!(
            target: "unravel.scheduler",
            task = task_id,
            title = %shared.title(),
            jobs = jobs_count,
            "task started"
        );

        let mut progress = self.progress.start(shared.title(), jobs_count);
        let run_token = CancellationToken::new();
        let gate = Arc::new(ConcurrencyGate::new(self.config.threads));
        for job in jobs {
            let shared = shared.clone();
            let gate = gate.clone();
            let token = run_token.clone();
            let active = self.active_jobs.clone();
            pool.spawn(move || {
                let complete = run_job(job, &gate, &token, &active, task_id);
                shared.record_job(complete);
            });
        }

        let time_limit = task.time_limit().filter(|limit| !limit.is_zero());
        let mut round = 0_u32;
        let status = loop {
            let interval = if round < FAST_POLL_ROUNDS { FAST_POLL } else { SLOW_POLL };
            round = round.saturating_add(1);

            if shared.wait_for_jobs(jobs_count, interval) {
                break TaskStatus::Complete;
            }
            if let Some(status) =
                self.check_cancel(&*task, &shared, &generation, &gate, start, time_limit)
            {
                break status;
            }

            let percentage = task
                .task_progress()
                .unwrap_or_else(|| calc_progress(shared.jobs_finished(), jobs_count));
            if progress.report(percentage) {
                task.on_progress(percentage);
            }
        };

        if status != TaskStatus::Complete {
            run_token.cancel();
            gate.wake_all();
            let drained = shared.drain_jobs(jobs_count, self.config.cancel_grace);
            if drained {
                tracing::debug!(
                    target: "unravel.scheduler",
                    task = task_id,
                    %status,
                    "jobs drained after cancel"
                );
            } else {
                tracing::warn!(
                    target: "unravel.scheduler",
                    task = task_id,
                    %status,
                    unfinished = jobs_count.saturating_sub(shared.jobs_finished()),
                    grace_ms = self.config.cancel_grace.as_millis() as u64,
                    "jobs ignored cancellation; leaving them detached"
                );
            }
        }
        drop(pool);

        let percentage = task
            .task_progress()
            .unwrap_or_else(|| calc_progress(shared.jobs_finished(), jobs_count));
        if progress.report(percentage) {
            task.on_progress(percentage);
        }

        let report = TaskReport::new(status, jobs_count, shared.jobs_complete(), start.elapsed());
        tracing::info!(
            target: "unravel.scheduler",
            task = task_id,
            status = %report.status,
            complete = report.jobs_complete,
            skipped = report.jobs_skipped,
            elapsed_ms = report.time.as_millis() as u64,
            "task finished"
        );
        progress.finish(report.status);
        self.complete(&mut *task, &shared, report);
    }

    fn check_cancel(
        &self,
        task: &dyn BackgroundTask,
        shared: &TaskShared,
        generation: &CancellationToken,
        gate: &ConcurrencyGate,
        start: Instant,
        time_limit: Option<Duration>,
    ) -> Option<TaskStatus> {
        if shared.is_cancel_requested() {
            return Some(TaskStatus::CancelByUser);
        }
        if let Some(limit) = time_limit {
            if start.elapsed() > limit {
                return Some(TaskStatus::CancelByTimeout);
            }
        }
        if generation.is_cancelled() {
            return Some(TaskStatus::CancelByUser);
        }
        if task.check_memory_usage() && !self.has_free_memory() {
            if gate.limit() == 1 {
                return Some(TaskStatus::CancelByMemory);
            }
            let snapshot = self.probe.snapshot();
            tracing::warn!(
                target: "unravel.scheduler",
                task = shared.id(),
                memory = %snapshot,
                pressure = ?snapshot.pressure(MemoryPressureThresholds::default()),
                "low memory; reducing workers to one"
            );
            gate.set_limit(1);
            self.run_low_memory_hooks();
            std::thread::sleep(self.config.memory_check.settle_delay);
            if !self.has_free_memory() {
                tracing::error!(
                    target: "unravel.scheduler",
                    task = shared.id(),
                    memory = %self.probe.snapshot(),
                    "not enough memory to continue"
                );
                return Some(TaskStatus::CancelByMemory);
            }
        }
        None
    }

    fn has_free_memory(&self) -> bool {
        self.probe
            .is_free_memory_available(self.config.memory_check.min_free_bytes)
    }

    fn run_low_memory_hooks(&self) {
        let hooks = self.low_memory_hooks.read().clone();
        for hook in hooks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook())) {
                tracing::error!(
                    target: "unravel.scheduler",
                    panic = %panic_payload_to_str(&*panic),
                    "low memory hook panicked"
                );
            }
        }
    }

    fn complete(&self, task: &mut dyn BackgroundTask, shared: &TaskShared, report: TaskReport) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task.on_done(&report))) {
            tracing::error!(
                target: "unravel.scheduler",
                task = shared.id(),
                panic = %panic_payload_to_str(&*panic),
                "on_done panicked"
            );
        }
        shared.finish(report.clone());
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task.on_finish(&report))) {
            tracing::error!(
                target: "unravel.scheduler",
                task = shared.id(),
                panic = %panic_payload_to_str(&*panic),
                "on_finish panicked"
            );
        }
    }
}

/// Runs one job under the gate. Returns whether it completed successfully.
fn run_job(
    job: Job,
    gate: &ConcurrencyGate,
    token: &CancellationToken,
    active: &AtomicUsize,
    task_id: u64,
) -> bool {
    let Some(_permit) = gate.acquire(token) else {
        return false;
    };
    let _active = ActiveJob::enter(active);
    match catch_unwind(AssertUnwindSafe(|| job(token))) {
        Ok(Ok(())) => true,
        Ok(Err(JobError::Cancelled)) => false,
        Ok(Err(err)) => {
            tracing::debug!(
                target: "unravel.scheduler",
                task = task_id,
                error = %err,
                "job failed"
            );
            false
        }
        Err(panic) => {
            tracing::error!(
                target: "unravel.scheduler",
                task = task_id,
                panic = %panic_payload_to_str(&*panic),
                "job panicked"
            );
            false
        }
    }
}
