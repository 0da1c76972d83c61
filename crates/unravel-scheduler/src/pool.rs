use rayon::ThreadPool;

/// Rayon pool, or inline execution when no worker thread can be spawned.
pub(crate) enum BlockingPool {
    Rayon(ThreadPool),
    Inline,
}

impl BlockingPool {
    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            BlockingPool::Rayon(pool) => pool.spawn(job),
            BlockingPool::Inline => job(),
        }
    }
}

/// Builds a pool of up to `threads` workers named `{prefix}-{idx}`.
///
/// Thread creation can fail under tight process limits; the pool then shrinks, and as a last
/// resort [`BlockingPool::Inline`] is returned. Task job pools refuse to run inline since nothing
/// could interrupt the jobs.
pub(crate) fn build_rayon_pool(prefix: &'static str, threads: usize) -> BlockingPool {
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return BlockingPool::Rayon(pool),
            Err(err) if threads > 1 => {
                tracing::debug!(
                    target: "unravel.scheduler",
                    prefix,
                    threads,
                    error = %err,
                    "failed to build worker pool; retrying with fewer threads"
                );
                threads = (threads / 2).max(1);
            }
            Err(err) => {
                tracing::warn!(
                    target: "unravel.scheduler",
                    prefix,
                    error = %err,
                    "failed to build worker pool; running work inline"
                );
                return BlockingPool::Inline;
            }
        }
    }
}
