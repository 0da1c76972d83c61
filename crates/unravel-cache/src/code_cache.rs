use crate::codec::CodecRegistry;
use crate::disk::DiskTier;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::memory::MemoryTier;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use unravel_core::UNRAVEL_VERSION;
use unravel_metadata::CodeMetadata;

/// Per-annotation overhead added to the text length when sizing memory entries.
const ANNOTATION_OVERHEAD_BYTES: u64 = 32;

/// Identity of a decompilable unit: its name plus a fingerprint of its input bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub name: String,
    pub content: Fingerprint,
}

impl UnitKey {
    pub fn new(name: impl Into<String>, content: Fingerprint) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    /// Key for `name` whose input is `bytes`.
    pub fn for_bytes(name: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        Self::new(name, Fingerprint::from_bytes(bytes))
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.content.as_str().get(..12).unwrap_or(self.content.as_str());
        write!(f, "{}@{short}", self.name)
    }
}

/// Generated text and metadata of one unit, published together.
#[derive(Debug)]
pub struct CodeEntry {
    pub key: UnitKey,
    /// Hash of the unit key and the settings version the text was generated with.
    pub stamp: Fingerprint,
    pub text: Arc<str>,
    pub metadata: Arc<CodeMetadata>,
}

impl CodeEntry {
    pub fn new(key: UnitKey, stamp: Fingerprint, text: String, metadata: CodeMetadata) -> Self {
        Self {
            key,
            stamp,
            text: Arc::from(text),
            metadata: Arc::new(metadata),
        }
    }

    /// Approximate heap footprint used for the memory budget.
    pub fn approx_bytes(&self) -> u64 {
        (self.text.len() as u64)
            .saturating_add(ANNOTATION_OVERHEAD_BYTES.saturating_mul(self.metadata.len() as u64))
    }
}

#[derive(Debug, Clone)]
pub struct CodeCacheConfig {
    /// Directory of the disk tier; `None` keeps everything in memory.
    pub disk_dir: Option<PathBuf>,
    pub max_entries: usize,
    pub max_bytes: u64,
    /// Bumped whenever decompiler settings change so previously generated code is not reused.
    pub settings_version: u32,
}

impl Default for CodeCacheConfig {
    fn default() -> Self {
        Self {
            disk_dir: None,
            max_entries: 1024,
            max_bytes: 256 * 1024 * 1024,
            settings_version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeCacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

enum Lookup {
    Memory(Arc<CodeEntry>),
    Disk(Arc<CodeEntry>),
    Miss,
}

/// Thread-safe two-tier cache of decompiled units.
///
/// Every write publishes one [`CodeEntry`], so [`CodeCache::get_entry`] always returns text and
/// metadata produced by the same decompilation. Misses can be filled through
/// [`CodeCache::get_or_insert_with`], which runs at most one producer per unit at a time.
#[derive(Debug)]
pub struct CodeCache {
    settings_version: u32,
    memory: Mutex<MemoryTier>,
    disk: Option<DiskTier>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // Bumped by `clear` under the memory lock; disk promotions started before it are dropped.
    clear_epoch: AtomicU64,
    counters: Counters,
}

impl CodeCache {
    pub fn new(config: CodeCacheConfig) -> Result<Self> {
        Self::with_registry(config, CodecRegistry::with_default_codecs())
    }

    /// Cache whose disk tier encodes annotations with `registry`.
    pub fn with_registry(config: CodeCacheConfig, registry: CodecRegistry) -> Result<Self> {
        let disk = match config.disk_dir {
            Some(dir) => Some(DiskTier::new(dir, registry)?),
            None => None,
        };
        Ok(Self {
            settings_version: config.settings_version,
            memory: Mutex::new(MemoryTier::new(config.max_entries, config.max_bytes)),
            disk,
            in_flight: Mutex::new(HashMap::new()),
            clear_epoch: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    pub fn settings_version(&self) -> u32 {
        self.settings_version
    }

    pub fn disk_dir(&self) -> Option<&Path> {
        self.disk.as_ref().map(DiskTier::root)
    }

    /// Version stamp of `key` under the current settings and crate version. Also names the disk
    /// file.
    pub fn stamp_for(&self, key: &UnitKey) -> Fingerprint {
        Fingerprint::from_parts([
            key.name.as_bytes(),
            key.content.as_str().as_bytes(),
            &self.settings_version.to_be_bytes(),
            UNRAVEL_VERSION.as_bytes(),
        ])
    }

    pub fn get(&self, key: &UnitKey) -> Option<Arc<str>> {
        self.get_entry(key).map(|entry| entry.text.clone())
    }

    pub fn get_metadata(&self, key: &UnitKey) -> Option<Arc<CodeMetadata>> {
        self.get_entry(key).map(|entry| entry.metadata.clone())
    }

    /// Text and metadata of `key` as one consistent pair.
    pub fn get_entry(&self, key: &UnitKey) -> Option<Arc<CodeEntry>> {
        match self.lookup(key) {
            Lookup::Memory(entry) | Lookup::Disk(entry) => Some(entry),
            Lookup::Miss => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns the cached entry for `key`, or publishes the result of `produce`.
    ///
    /// Concurrent callers for the same unit wait for the first producer instead of running their
    /// own. Producer errors are returned as-is and nothing is cached. Disk write failures are
    /// logged; the entry is still served from memory.
    pub fn get_or_insert_with<E>(
        &self,
        key: &UnitKey,
        produce: impl FnOnce() -> std::result::Result<(String, CodeMetadata), E>,
    ) -> std::result::Result<Arc<CodeEntry>, E> {
        if let Some(entry) = self.get_entry(key) {
            return Ok(entry);
        }

        self.with_key_lock(&key.name, || {
            // Another caller may have filled the entry while we waited for the lock.
            let stamp = self.stamp_for(key);
            if let Lookup::Memory(entry) | Lookup::Disk(entry) = self.lookup_locked(key, &stamp) {
                return Ok(entry);
            }

            let (text, metadata) = produce()?;
            let (entry, disk_result) = self.publish(key, text, metadata);
            if let Err(err) = disk_result {
                tracing::warn!(
                    target: "unravel.cache",
                    unit = %key,
                    error = %err,
                    "failed to persist decompiled code"
                );
            }
            Ok(entry)
        })
    }

    /// Publishes `text` and `metadata` for `key`, replacing any previous entry.
    ///
    /// The memory tier is always updated. A disk tier failure (including an annotation without a
    /// registered codec) is returned after that.
    pub fn put(&self, key: &UnitKey, text: String, metadata: CodeMetadata) -> Result<()> {
        self.with_key_lock(&key.name, || self.publish(key, text, metadata).1)
    }

    /// Drops `key` from both tiers.
    ///
    /// Runs under the unit's lock, so a concurrent disk read cannot put the entry back once this
    /// returns.
    pub fn invalidate(&self, key: &UnitKey) {
        self.with_key_lock(&key.name, || {
            self.memory.lock().remove(&key.name);
            if let Some(disk) = &self.disk {
                disk.remove(&self.stamp_for(key));
            }
        })
    }

    /// Drops the memory tier and deletes every persisted entry.
    ///
    /// Entries read from disk before the call are not promoted into memory afterwards. Writes
    /// still in flight are not cancelled and may land after `clear` returns.
    pub fn clear(&self) -> Result<()> {
        {
            let mut memory = self.memory.lock();
            self.clear_epoch.fetch_add(1, Ordering::SeqCst);
            memory.clear();
        }
        if let Some(disk) = &self.disk {
            let removed = disk.clear()?;
            tracing::debug!(target: "unravel.cache", removed, "cleared disk cache");
        }
        Ok(())
    }

    /// Evicts least-recently-used memory entries until `fraction` of the current bytes remain.
    ///
    /// Returns the number of evicted entries. Disk entries are kept.
    pub fn shrink_memory(&self, fraction: f64) -> usize {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let mut memory = self.memory.lock();
        let before = memory.total_bytes();
        let target = (before as f64 * fraction) as u64;
        let evicted = memory.shrink_to(target);
        tracing::debug!(
            target: "unravel.cache",
            evicted,
            before_bytes = before,
            after_bytes = memory.total_bytes(),
            "shrunk memory cache"
        );
        evicted
    }

    pub fn stats(&self) -> CodeCacheStats {
        let memory = self.memory.lock();
        CodeCacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: memory.evictions(),
            entries: memory.len(),
            bytes: memory.total_bytes(),
        }
    }

    fn lookup(&self, key: &UnitKey) -> Lookup {
        let stamp = self.stamp_for(key);
        if let Some(entry) = self.memory_hit(key, &stamp) {
            return Lookup::Memory(entry);
        }
        if self.disk.is_none() {
            return Lookup::Miss;
        }
        // Promote under the unit's lock so an older disk entry never replaces a newer write.
        self.with_key_lock(&key.name, || self.lookup_locked(key, &stamp))
    }

    // Caller holds the key lock of `key`.
    fn lookup_locked(&self, key: &UnitKey, stamp: &Fingerprint) -> Lookup {
        if let Some(entry) = self.memory_hit(key, stamp) {
            return Lookup::Memory(entry);
        }
        let Some(disk) = &self.disk else {
            return Lookup::Miss;
        };
        let epoch = self.clear_epoch.load(Ordering::SeqCst);
        let Some((text, metadata)) = disk.load(stamp) else {
            return Lookup::Miss;
        };
        let entry = Arc::new(CodeEntry::new(key.clone(), stamp.clone(), text, metadata));
        {
            let mut memory = self.memory.lock();
            if self.clear_epoch.load(Ordering::SeqCst) != epoch {
                // The file was read before a concurrent `clear` deleted it.
                return Lookup::Miss;
            }
            memory.insert(entry.clone());
        }
        self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
        Lookup::Disk(entry)
    }

    fn memory_hit(&self, key: &UnitKey, stamp: &Fingerprint) -> Option<Arc<CodeEntry>> {
        let mut memory = self.memory.lock();
        match memory.get(&key.name) {
            Some(entry) if entry.stamp == *stamp => {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                tracing::trace!(target: "unravel.cache", unit = %key, "dropping stale entry");
                memory.remove(&key.name);
                None
            }
            None => None,
        }
    }

    fn publish(
        &self,
        key: &UnitKey,
        text: String,
        metadata: CodeMetadata,
    ) -> (Arc<CodeEntry>, Result<()>) {
        let entry = Arc::new(CodeEntry::new(key.clone(), self.stamp_for(key), text, metadata));
        self.memory.lock().insert(entry.clone());
        let persisted = match &self.disk {
            Some(disk) => disk.store(&entry.stamp, &entry.text, &entry.metadata),
            None => Ok(()),
        };
        (entry, persisted)
    }

    // Serializes writers of one unit so memory and disk see the same publication order.
    fn with_key_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .in_flight
            .lock()
            .entry(name.to_owned())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };

        let mut in_flight = self.in_flight.lock();
        // One reference in the map plus ours: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(name);
        }
        result
    }
}
