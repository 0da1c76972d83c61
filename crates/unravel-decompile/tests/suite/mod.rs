mod code;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use unravel_cache::{CodeCache, CodeCacheConfig};
use unravel_core::NodeRef;
use unravel_decompile::{
    AnnotationDraft, CancellationToken, DecompileError, DecompiledUnit, Decompiler, NodeHandle,
    UnitKey, Workbench,
};
use unravel_scheduler::{BackgroundExecutor, ExecutorConfig};

/// Emits a one-method class per unit. Units named `*Broken` fail, `*Dangling` reference a
/// missing node.
#[derive(Default)]
pub struct FakeDecompiler {
    calls: AtomicUsize,
    per_unit: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl FakeDecompiler {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.per_unit.lock().get(name).copied().unwrap_or(0)
    }
}

pub fn class_text(name: &str) -> String {
    format!("class {name} {{\n    void run() {{\n        target();\n    }}\n}}\n")
}

impl Decompiler for FakeDecompiler {
    fn decompile(
        &self,
        unit: &UnitKey,
        token: &CancellationToken,
    ) -> Result<DecompiledUnit, DecompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_unit.lock().entry(unit.name.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            let deadline = Instant::now() + delay;
            while Instant::now() < deadline {
                if token.is_cancelled() {
                    return Err(DecompileError::Cancelled);
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        if unit.name.ends_with("Broken") {
            return Err(DecompileError::Failed {
                unit: unit.name.clone(),
                message: "unsupported bytecode".to_owned(),
            });
        }

        let text = class_text(&unit.name);
        let at = |needle: &str| text.find(needle).map(|idx| idx as u32).unwrap_or(0);
        let method_handle = if unit.name.ends_with("Dangling") { 9 } else { 1 };
        let annotations = vec![
            (at("class") + 6, AnnotationDraft::Declaration(NodeHandle(0))),
            (at("run"), AnnotationDraft::Declaration(NodeHandle(method_handle))),
            (at("target"), AnnotationDraft::InsnOffset(4)),
        ];
        Ok(DecompiledUnit {
            nodes: vec![
                NodeRef::class(unit.name.clone()),
                NodeRef::method(unit.name.clone(), "run()V"),
            ],
            text,
            annotations,
        })
    }
}

pub fn workbench(decompiler: Arc<FakeDecompiler>, threads: usize) -> Workbench {
    let cache = CodeCache::new(CodeCacheConfig::default()).unwrap();
    let executor = BackgroundExecutor::new(ExecutorConfig {
        threads,
        ..ExecutorConfig::default()
    });
    Workbench::new(decompiler, cache, executor).with_memory_check(false)
}

pub fn key(name: &str) -> UnitKey {
    UnitKey::for_bytes(name, name.as_bytes())
}
