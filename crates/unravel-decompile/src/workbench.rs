use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use unravel_cache::{CodeCache, CodeEntry, UnitKey};
use unravel_config::UnravelConfig;
use unravel_metadata::{CodeMetadata, CommentTarget};
use unravel_navigation::JumpManager;
use unravel_scheduler::{
    calc_progress, job, BackgroundExecutor, BackgroundTask, CancellationToken, Job, JobError,
    SimpleTask, TaskHandle,
};

use crate::search::{CodeMatcher, SearchHit, SearchQuery};
use crate::{DecompileError, Decompiler, WorkbenchError};

/// Fraction of cached bytes kept when the executor reports low memory.
const LOW_MEMORY_KEEP_FRACTION: f64 = 0.5;

/// Cache-backed access to a decompiler plus the batch operations built on it.
pub struct Workbench {
    loader: Arc<Loader>,
    executor: BackgroundExecutor,
    check_memory: bool,
    history: Mutex<JumpManager>,
}

struct Loader {
    decompiler: Arc<dyn Decompiler>,
    cache: Arc<CodeCache>,
}

impl Loader {
    fn load(
        &self,
        key: &UnitKey,
        token: &CancellationToken,
    ) -> Result<Arc<CodeEntry>, DecompileError> {
        self.cache.get_or_insert_with(key, || {
            if token.is_cancelled() {
                return Err(DecompileError::Cancelled);
            }
            let resolved = self.decompiler.decompile(key, token)?.resolve()?;
            tracing::debug!(
                target: "unravel.decompile",
                unit = %key,
                bytes = resolved.0.len(),
                annotations = resolved.1.len(),
                "decompiled unit"
            );
            Ok(resolved)
        })
    }

    fn load_for_job(
        &self,
        key: &UnitKey,
        token: &CancellationToken,
    ) -> Result<Arc<CodeEntry>, JobError> {
        self.load(key, token).map_err(|err| match err {
            DecompileError::Cancelled => JobError::Cancelled,
            err => {
                tracing::warn!(
                    target: "unravel.decompile",
                    unit = %key,
                    error = %err,
                    "skipping unit"
                );
                JobError::Failed(err.to_string())
            }
        })
    }
}

impl Workbench {
    pub fn new(
        decompiler: Arc<dyn Decompiler>,
        cache: CodeCache,
        executor: BackgroundExecutor,
    ) -> Self {
        let cache = Arc::new(cache);
        let hook_cache = Arc::clone(&cache);
        executor.on_low_memory(move || {
            hook_cache.shrink_memory(LOW_MEMORY_KEEP_FRACTION);
        });

        Self {
            loader: Arc::new(Loader { decompiler, cache }),
            executor,
            check_memory: true,
            history: Mutex::new(JumpManager::new()),
        }
    }

    pub fn from_config(
        config: &UnravelConfig,
        decompiler: Arc<dyn Decompiler>,
    ) -> Result<Self, WorkbenchError> {
        config.validate()?;
        let cache = CodeCache::new(config.code_cache_config()?)?;
        let executor = BackgroundExecutor::new(config.executor_config());
        let mut workbench = Self::new(decompiler, cache, executor);
        workbench.check_memory = config.scheduler.check_memory;
        workbench.history = Mutex::new(JumpManager::with_limit(config.navigation.history_limit));
        Ok(workbench)
    }

    /// Whether [`Workbench::decompile_all`] watches free memory.
    pub fn with_memory_check(mut self, enabled: bool) -> Self {
        self.check_memory = enabled;
        self
    }

    pub fn cache(&self) -> &CodeCache {
        &self.loader.cache
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    pub fn history(&self) -> MutexGuard<'_, JumpManager> {
        self.history.lock()
    }

    /// Code of `key`, decompiling it on a cache miss.
    pub fn code(&self, key: &UnitKey) -> Result<Arc<CodeEntry>, WorkbenchError> {
        self.code_with_token(key, &CancellationToken::new())
    }

    pub fn code_with_token(
        &self,
        key: &UnitKey,
        token: &CancellationToken,
    ) -> Result<Arc<CodeEntry>, WorkbenchError> {
        Ok(self.loader.load(key, token)?)
    }

    pub fn metadata(&self, key: &UnitKey) -> Result<Arc<CodeMetadata>, WorkbenchError> {
        Ok(Arc::clone(&self.code(key)?.metadata))
    }

    /// Where a comment typed at byte offset `pos` of the unit's code would attach.
    pub fn comment_target(
        &self,
        key: &UnitKey,
        pos: u32,
    ) -> Result<Option<CommentTarget>, WorkbenchError> {
        let entry = self.code(key)?;
        Ok(unravel_metadata::comment_target_at(
            &entry.metadata,
            &entry.text,
            pos,
        ))
    }

    /// Decompiles every unit into the cache, one job per unit. Failing units are skipped.
    pub fn decompile_all(&self, units: Vec<UnitKey>) -> TaskHandle {
        let jobs: Vec<Job> = units
            .into_iter()
            .map(|key| {
                let loader = Arc::clone(&self.loader);
                job(move |token| {
                    if token.is_cancelled() {
                        return Err(JobError::Cancelled);
                    }
                    loader.load_for_job(&key, token).map(drop)
                })
            })
            .collect();

        self.executor.execute(
            SimpleTask::new("Decompiling", jobs).with_memory_check(self.check_memory),
        )
    }

    /// Searches `units` in the background. Hits accumulate in the returned handle.
    pub fn search_task(
        &self,
        units: Vec<UnitKey>,
        query: &SearchQuery,
    ) -> Result<SearchHandle, WorkbenchError> {
        let matcher = Arc::new(query.compile()?);
        let hits = Arc::new(Mutex::new(Vec::new()));
        let task = SearchTask {
            title: format!("Searching for '{}'", query.pattern),
            total: units.len(),
            units,
            matcher,
            loader: Arc::clone(&self.loader),
            hits: Arc::clone(&hits),
            processed: Arc::new(AtomicUsize::new(0)),
        };
        Ok(SearchHandle {
            task: self.executor.execute(task),
            hits,
        })
    }
}

/// A running or finished search.
pub struct SearchHandle {
    task: TaskHandle,
    hits: Arc<Mutex<Vec<SearchHit>>>,
}

impl SearchHandle {
    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Hits found so far, ordered by unit name, then offset.
    pub fn hits(&self) -> Vec<SearchHit> {
        let mut hits = self.hits.lock().clone();
        hits.sort_by(|a, b| a.unit.cmp(&b.unit).then(a.offset.cmp(&b.offset)));
        hits
    }
}

struct SearchTask {
    title: String,
    total: usize,
    units: Vec<UnitKey>,
    matcher: Arc<CodeMatcher>,
    loader: Arc<Loader>,
    hits: Arc<Mutex<Vec<SearchHit>>>,
    processed: Arc<AtomicUsize>,
}

impl BackgroundTask for SearchTask {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn schedule_jobs(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.units)
            .into_iter()
            .map(|key| {
                let matcher = Arc::clone(&self.matcher);
                let loader = Arc::clone(&self.loader);
                let hits = Arc::clone(&self.hits);
                let processed = Arc::clone(&self.processed);
                job(move |token| {
                    if token.is_cancelled() {
                        return Err(JobError::Cancelled);
                    }
                    let searched = loader.load_for_job(&key, token).map(|entry| {
                        let found = matcher.search_unit(&key.name, &entry.text, &entry.metadata);
                        if !found.is_empty() {
                            hits.lock().extend(found);
                        }
                    });
                    // Counted once the unit's hits are visible, whether or not it loaded.
                    processed.fetch_add(1, Ordering::Release);
                    searched
                })
            })
            .collect()
    }

    fn task_progress(&self) -> Option<u32> {
        Some(calc_progress(
            self.processed.load(Ordering::Acquire),
            self.total,
        ))
    }
}
