use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use unravel_scheduler::{
    job, BackgroundExecutor, BackgroundTask, CancellationToken, ExecutorConfig, Job, JobError,
    ProgressEvent, SimpleTask, TaskReport, TaskStatus,
};

fn executor(threads: usize) -> BackgroundExecutor {
    BackgroundExecutor::new(ExecutorConfig {
        threads,
        ..ExecutorConfig::default()
    })
}

fn sleepy(duration: Duration) -> Job {
    job(move |_token| {
        thread::sleep(duration);
        Ok(())
    })
}

/// Sleeps in small steps until `duration` passed or the token is cancelled.
fn cooperative(duration: Duration) -> Job {
    job(move |token: &CancellationToken| {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    })
}

#[test]
fn jobs_share_a_bounded_pool() {
    let executor = executor(2);
    let start = Instant::now();
    let report = executor.execute_and_wait(SimpleTask::new(
        "five sleepers",
        (0..5).map(|_| sleepy(Duration::from_millis(50))).collect(),
    ));
    let elapsed = start.elapsed();

    assert_eq!(report.status, TaskStatus::Complete);
    assert_eq!(report.jobs_count, 5);
    assert_eq!(report.jobs_complete, 5);
    assert_eq!(report.jobs_skipped, 0);
    assert!(elapsed >= Duration::from_millis(125), "finished too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "finished too slow: {elapsed:?}");
}

#[test]
fn time_limit_cancels_running_jobs() {
    let executor = executor(2);
    let start = Instant::now();
    let report = executor.execute_and_wait(
        SimpleTask::new("stuck", vec![cooperative(Duration::from_secs(10))])
            .with_time_limit(Duration::from_millis(10)),
    );

    assert_eq!(report.status, TaskStatus::CancelByTimeout);
    assert_eq!(report.jobs_skipped, 1);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(executor.active_jobs(), 0);
}

#[test]
fn zero_time_limit_means_unlimited() {
    let executor = executor(1);
    let report = executor.execute_and_wait(
        SimpleTask::new("quick", vec![sleepy(Duration::from_millis(20))])
            .with_time_limit(Duration::ZERO),
    );
    assert_eq!(report.status, TaskStatus::Complete);
}

#[test]
fn user_cancel_stops_a_running_task() {
    let executor = executor(2);
    let handle = executor.execute_jobs(
        "long",
        (0..4).map(|_| cooperative(Duration::from_secs(10))).collect(),
    );
    while handle.status() != TaskStatus::Started {
        thread::sleep(Duration::from_millis(5));
    }
    handle.cancel();

    let report = handle.wait_timeout(Duration::from_secs(2)).expect("task should end");
    assert_eq!(report.status, TaskStatus::CancelByUser);
    assert_eq!(report.jobs_complete, 0);
    assert_eq!(report.jobs_skipped, 4);
    assert!(handle.is_finished());
    assert_eq!(executor.active_jobs(), 0);
}

#[test]
fn tasks_run_one_at_a_time_in_order() {
    let executor = executor(2);
    let log = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let log = log.clone();
            executor.execute_jobs(
                format!("task {i}"),
                vec![job(move |_token| {
                    log.lock().unwrap().push(format!("start {i}"));
                    thread::sleep(Duration::from_millis(20));
                    log.lock().unwrap().push(format!("end {i}"));
                    Ok(())
                })],
            )
        })
        .collect();
    for handle in &handles {
        assert_eq!(handle.wait().status, TaskStatus::Complete);
    }
    assert_eq!(
        *log.lock().unwrap(),
        ["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
    );
}

#[test]
fn cancelled_before_start_runs_no_jobs() {
    let executor = executor(1);
    let blocker = executor.execute_jobs("blocker", vec![sleepy(Duration::from_millis(100))]);
    let ran = Arc::new(AtomicUsize::new(0));
    let queued = {
        let ran = ran.clone();
        executor.execute_jobs(
            "queued",
            vec![job(move |_token| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })],
        )
    };
    queued.cancel();

    assert_eq!(blocker.wait().status, TaskStatus::Complete);
    let report = queued.wait();
    assert_eq!(report.status, TaskStatus::CancelByUser);
    assert_eq!(report.jobs_count, 0);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn failures_and_panics_are_skipped_not_fatal() {
    let executor = executor(2);
    let report = executor.execute_and_wait(SimpleTask::new(
        "mixed",
        vec![
            job(|_token| Ok(())),
            job(|_token| Err(JobError::Failed("unsupported opcode".into()))),
            job(|_token| panic!("decompiler bug")),
            job(|_token| Err(anyhow::anyhow!("io").into())),
            job(|_token| Ok(())),
        ],
    ));
    assert_eq!(report.status, TaskStatus::Complete);
    assert_eq!(report.jobs_complete, 2);
    assert_eq!(report.jobs_skipped, 3);
}

#[test]
fn empty_task_completes() {
    let report = executor(1).execute_and_wait(SimpleTask::new("nothing", Vec::new()));
    assert_eq!(report.status, TaskStatus::Complete);
    assert_eq!(report.jobs_count, 0);
}

#[test]
fn cancel_all_ends_queued_and_running_tasks() {
    let executor = executor(2);
    let running = executor.execute_jobs("running", vec![cooperative(Duration::from_secs(10))]);
    let queued = executor.execute_jobs("queued", vec![cooperative(Duration::from_secs(10))]);
    while running.status() != TaskStatus::Started {
        thread::sleep(Duration::from_millis(5));
    }

    executor.cancel_all();
    assert_eq!(running.wait().status, TaskStatus::CancelByUser);
    assert_eq!(queued.wait().status, TaskStatus::CancelByUser);

    let after = executor.execute_and_wait(SimpleTask::new("after", vec![job(|_token| Ok(()))]));
    assert_eq!(after.status, TaskStatus::Complete);
}

struct CountingTask {
    done: Arc<AtomicUsize>,
    total: usize,
    reported: Arc<Mutex<Vec<u32>>>,
    finished: Arc<Mutex<Option<TaskReport>>>,
}

impl BackgroundTask for CountingTask {
    fn title(&self) -> String {
        "counting".into()
    }

    fn schedule_jobs(&mut self) -> Vec<Job> {
        (0..self.total)
            .map(|_| {
                let done = self.done.clone();
                job(move |_token| {
                    thread::sleep(Duration::from_millis(30));
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect()
    }

    fn task_progress(&self) -> Option<u32> {
        // Deliberately not a percentage of jobs, to show it is used verbatim.
        Some(self.done.load(Ordering::SeqCst) as u32 * 7)
    }

    fn on_progress(&mut self, percentage: u32) {
        self.reported.lock().unwrap().push(percentage);
    }

    fn on_finish(&mut self, report: &TaskReport) {
        *self.finished.lock().unwrap() = Some(report.clone());
    }
}

#[test]
fn custom_progress_is_used_verbatim() {
    let executor = executor(1);
    let mut events = executor.subscribe_progress();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(Mutex::new(None));
    let report = executor.execute_and_wait(CountingTask {
        done: Arc::new(AtomicUsize::new(0)),
        total: 3,
        reported: reported.clone(),
        finished: finished.clone(),
    });
    assert_eq!(report.status, TaskStatus::Complete);
    assert_eq!(reported.lock().unwrap().last(), Some(&21));
    assert_eq!(finished.lock().unwrap().as_ref(), Some(&report));

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::Begin { title, jobs: 3, .. }) if title == "counting"
    ));
    assert!(events
        .iter()
        .any(|event| matches!(event, ProgressEvent::Report { percentage: 21, .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::End {
            status: TaskStatus::Complete,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_resolves_to_the_report() {
    let executor = executor(2);
    let handle = executor.execute_jobs(
        "async",
        (0..3).map(|_| sleepy(Duration::from_millis(10))).collect(),
    );
    let report = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("join timed out");
    assert_eq!(report.status, TaskStatus::Complete);
    assert_eq!(report.jobs_complete, 3);
    assert_eq!(handle.join().await, report);
}
