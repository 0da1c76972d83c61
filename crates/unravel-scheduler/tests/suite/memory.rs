use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use unravel_memory::{MemoryProbe, MemorySnapshot, GB, MB};
use unravel_scheduler::{
    job, BackgroundExecutor, ExecutorConfig, Job, JobError, MemoryCheckConfig, SimpleTask,
    TaskStatus,
};

/// Probe whose free memory is toggled by the test.
#[derive(Default)]
struct FakeProbe {
    low: AtomicBool,
}

impl MemoryProbe for FakeProbe {
    fn snapshot(&self) -> MemorySnapshot {
        let available_bytes = if self.low.load(Ordering::SeqCst) {
            10 * MB
        } else {
            GB
        };
        MemorySnapshot {
            total_bytes: 2 * GB,
            available_bytes,
            rss_bytes: None,
        }
    }
}

fn executor(probe: Arc<FakeProbe>) -> BackgroundExecutor {
    BackgroundExecutor::with_probe(
        ExecutorConfig {
            threads: 3,
            memory_check: MemoryCheckConfig {
                min_free_bytes: 100 * MB,
                settle_delay: Duration::from_millis(10),
            },
            ..ExecutorConfig::default()
        },
        probe,
    )
}

fn tracked(running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>, steps: usize) -> Job {
    job(move |token| {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        let mut result = Ok(());
        for _ in 0..steps {
            if token.is_cancelled() {
                result = Err(JobError::Cancelled);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        running.fetch_sub(1, Ordering::SeqCst);
        result
    })
}

#[test]
fn persistent_low_memory_cancels_after_reclaim() {
    let probe = Arc::new(FakeProbe::default());
    probe.low.store(true, Ordering::SeqCst);
    let executor = executor(probe);
    let reclaims = Arc::new(AtomicUsize::new(0));
    {
        let reclaims = reclaims.clone();
        executor.on_low_memory(move || {
            reclaims.fetch_add(1, Ordering::SeqCst);
        });
    }

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let report = executor.execute_and_wait(
        SimpleTask::new(
            "hungry",
            (0..3)
                .map(|_| tracked(running.clone(), peak.clone(), 1_000))
                .collect(),
        )
        .with_memory_check(true),
    );

    assert_eq!(report.status, TaskStatus::CancelByMemory);
    assert_eq!(reclaims.load(Ordering::SeqCst), 1);
    assert_eq!(report.jobs_skipped, 3);
    assert_eq!(executor.active_jobs(), 0);
}

#[test]
fn recovered_memory_continues_with_one_worker() {
    let probe = Arc::new(FakeProbe::default());
    probe.low.store(true, Ordering::SeqCst);
    let executor = executor(probe.clone());
    executor.on_low_memory(move || probe.low.store(false, Ordering::SeqCst));

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let report = executor.execute_and_wait(
        SimpleTask::new(
            "recovering",
            (0..6)
                .map(|_| tracked(running.clone(), peak.clone(), 15))
                .collect(),
        )
        .with_memory_check(true),
    );

    assert_eq!(report.status, TaskStatus::Complete);
    assert_eq!(report.jobs_complete, 6);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[test]
fn memory_is_ignored_unless_requested() {
    let probe = Arc::new(FakeProbe::default());
    probe.low.store(true, Ordering::SeqCst);
    let executor = executor(probe);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let report = executor.execute_and_wait(SimpleTask::new(
        "unchecked",
        (0..3)
            .map(|_| tracked(running.clone(), peak.clone(), 15))
            .collect(),
    ));
    assert_eq!(report.status, TaskStatus::Complete);
}
