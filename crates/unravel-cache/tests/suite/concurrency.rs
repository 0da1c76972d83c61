use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use unravel_cache::{CodeCache, CodeCacheConfig, UnitKey};
use unravel_core::NodeRef;
use unravel_metadata::{Annotation, CodeMetadata};

fn generation(unit: usize, generation: u32) -> (String, CodeMetadata) {
    let text = format!("// generation {generation}\nclass U{unit} {{}}\n");
    let class_at = text.find("class").unwrap() as u32;
    let metadata = CodeMetadata::from_annotations([
        (0, Annotation::InsnOffset(generation)),
        (class_at, Annotation::Declaration(NodeRef::class(format!("U{unit}")))),
    ])
    .unwrap();
    (text, metadata)
}

fn generation_of_text(text: &str) -> u32 {
    text.lines()
        .next()
        .and_then(|line| line.strip_prefix("// generation "))
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| panic!("unexpected text {text:?}"))
}

#[test]
fn concurrent_producers_run_once() {
    let cache = Arc::new(CodeCache::new(CodeCacheConfig::default()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let key = UnitKey::for_bytes("a/Shared", "shared");

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_insert_with(&key, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok::<_, std::convert::Infallible>(generation(0, 1))
                    })
                    .unwrap()
            })
        })
        .collect();

    let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for entry in &entries[1..] {
        assert!(Arc::ptr_eq(entry, &entries[0]));
    }
}

#[test]
fn readers_never_observe_mixed_generations() {
    let tmp = tempfile::tempdir().unwrap();
    // Small memory tier so readers also go through the disk tier.
    let cache = Arc::new(
        CodeCache::new(CodeCacheConfig {
            disk_dir: Some(tmp.path().to_path_buf()),
            max_entries: 2,
            ..CodeCacheConfig::default()
        })
        .unwrap(),
    );

    let writers = 4;
    let readers = 4;
    let generations = 100;
    let keys: Arc<Vec<UnitKey>> = Arc::new(
        (0..writers)
            .map(|i| UnitKey::for_bytes(format!("p/U{i}"), format!("input {i}")))
            .collect(),
    );
    let barrier = Arc::new(Barrier::new(writers + readers));

    let mut handles = Vec::new();
    for unit in 0..writers {
        let cache = cache.clone();
        let keys = keys.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for g in 1..=generations {
                let (text, metadata) = generation(unit, g);
                cache.put(&keys[unit], text, metadata).unwrap();
            }
        }));
    }

    let observed = Arc::new(AtomicUsize::new(0));
    for reader in 0..readers {
        let cache = cache.clone();
        let keys = keys.clone();
        let barrier = barrier.clone();
        let observed = observed.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for round in 0..2_000 {
                let key = &keys[(reader + round) % keys.len()];
                let Some(entry) = cache.get_entry(key) else {
                    continue;
                };
                let expected = generation_of_text(&entry.text);
                assert_eq!(
                    entry.metadata.annotation_at(0),
                    Some(&Annotation::InsnOffset(expected)),
                    "text and metadata of {key} come from different writes"
                );
                assert_eq!(
                    entry.metadata.node_at(u32::MAX),
                    Some(&NodeRef::class(key.name.trim_start_matches("p/")))
                );
                observed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(observed.load(Ordering::Relaxed) > 0);

    for (unit, key) in keys.iter().enumerate() {
        let entry = cache.get_entry(key).unwrap();
        assert_eq!(generation_of_text(&entry.text), generations, "unit {unit}");
    }
}

fn disk_cache(dir: &std::path::Path) -> Arc<CodeCache> {
    Arc::new(
        CodeCache::new(CodeCacheConfig {
            disk_dir: Some(dir.to_path_buf()),
            ..CodeCacheConfig::default()
        })
        .unwrap(),
    )
}

// Races a read of `key`, present only on disk, against `remover` on the current thread.
fn race_disk_read(cache: &Arc<CodeCache>, key: &UnitKey, remover: impl FnOnce()) {
    let (text, metadata) = generation(0, 1);
    cache.put(key, text, metadata).unwrap();
    cache.shrink_memory(0.0);

    let barrier = Arc::new(Barrier::new(2));
    let reader = {
        let cache = cache.clone();
        let key = key.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            cache.get_entry(&key)
        })
    };
    barrier.wait();
    remover();
    reader.join().unwrap();
}

#[test]
fn invalidate_wins_over_a_concurrent_disk_read() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = disk_cache(tmp.path());
    let key = UnitKey::for_bytes("a/Raced", "raced");

    for round in 0..1_000 {
        let remover = {
            let cache = cache.clone();
            let key = key.clone();
            move || cache.invalidate(&key)
        };
        race_disk_read(&cache, &key, remover);
        assert!(cache.get_entry(&key).is_none(), "entry back after invalidate in round {round}");
    }
}

#[test]
fn clear_wins_over_a_concurrent_disk_read() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = disk_cache(tmp.path());
    let key = UnitKey::for_bytes("a/Raced", "raced");

    for round in 0..1_000 {
        let remover = {
            let cache = cache.clone();
            move || cache.clear().unwrap()
        };
        race_disk_read(&cache, &key, remover);
        assert!(cache.get_entry(&key).is_none(), "entry back after clear in round {round}");
    }
}
