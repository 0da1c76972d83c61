use std::sync::Arc;

use tempfile::tempdir;
use unravel_config::UnravelConfig;
use unravel_core::{NodeRef, Position};
use unravel_decompile::{DecompileError, UnitKey, Workbench, WorkbenchError};
use unravel_metadata::{Annotation, CommentTarget};

use super::{class_text, key, workbench, FakeDecompiler};

#[test]
fn decompiles_once_then_serves_from_cache() {
    let fake = Arc::new(FakeDecompiler::default());
    let wb = workbench(fake.clone(), 2);

    let first = wb.code(&key("a/Foo")).unwrap();
    let second = wb.code(&key("a/Foo")).unwrap();

    assert_eq!(fake.calls(), 1);
    assert_eq!(&*first.text, class_text("a/Foo"));
    assert!(Arc::ptr_eq(&first.metadata, &second.metadata));
    assert_eq!(wb.cache().stats().memory_hits, 1);

    let metadata = wb.metadata(&key("a/Foo")).unwrap();
    let call = first.text.find("target").unwrap() as u32;
    assert_eq!(metadata.annotation_at(call), Some(&Annotation::InsnOffset(4)));
    assert_eq!(metadata.node_at(call), Some(&NodeRef::method("a/Foo", "run()V")));
}

#[test]
fn changed_input_is_decompiled_again() {
    let fake = Arc::new(FakeDecompiler::default());
    let wb = workbench(fake.clone(), 1);

    wb.code(&UnitKey::for_bytes("a/Foo", b"v1")).unwrap();
    wb.code(&UnitKey::for_bytes("a/Foo", b"v2")).unwrap();
    wb.code(&UnitKey::for_bytes("a/Foo", b"v2")).unwrap();

    assert_eq!(fake.calls(), 2);
    assert_eq!(wb.cache().stats().entries, 1);
}

#[test]
fn failures_are_reported_and_not_cached() {
    let fake = Arc::new(FakeDecompiler::default());
    let wb = workbench(fake.clone(), 1);

    let err = wb.code(&key("a/Broken")).unwrap_err();
    assert!(
        matches!(err, WorkbenchError::Decompile(DecompileError::Failed { ref unit, .. }) if unit == "a/Broken"),
        "{err}"
    );
    assert!(wb.code(&key("a/Broken")).is_err());
    assert_eq!(fake.calls_for("a/Broken"), 2);
    assert_eq!(wb.cache().stats().entries, 0);
}

#[test]
fn dangling_node_handle_fails_the_unit() {
    let wb = workbench(Arc::new(FakeDecompiler::default()), 1);
    let err = wb.code(&key("a/Dangling")).unwrap_err();
    assert!(
        matches!(
            err,
            WorkbenchError::Decompile(DecompileError::UnresolvedNode { handle: 9, .. })
        ),
        "{err}"
    );
}

#[test]
fn comment_targets_resolve_against_cached_code() {
    let wb = workbench(Arc::new(FakeDecompiler::default()), 1);
    let text = class_text("a/Foo");

    let pos = text.find("target").unwrap() as u32;
    assert_eq!(
        wb.comment_target(&key("a/Foo"), pos).unwrap(),
        Some(CommentTarget::Insn {
            method: NodeRef::method("a/Foo", "run()V"),
            insn_offset: 4,
        })
    );

    let pos = text.find("run").unwrap() as u32;
    assert_eq!(
        wb.comment_target(&key("a/Foo"), pos).unwrap(),
        Some(CommentTarget::Node(NodeRef::method("a/Foo", "run()V")))
    );
}

#[test]
fn configured_workbench_reuses_disk_entries() {
    let dir = tempdir().unwrap();
    let mut config = UnravelConfig::default();
    config.cache.dir = Some(dir.path().join("code"));
    config.scheduler.threads = Some(1);
    config.navigation.history_limit = 2;

    let first = Arc::new(FakeDecompiler::default());
    let wb = Workbench::from_config(&config, first.clone()).unwrap();
    wb.code(&key("a/Foo")).unwrap();
    assert_eq!(first.calls(), 1);
    drop(wb);

    let second = Arc::new(FakeDecompiler::default());
    let wb = Workbench::from_config(&config, second.clone()).unwrap();
    let entry = wb.code(&key("a/Foo")).unwrap();
    assert_eq!(second.calls(), 0);
    assert_eq!(&*entry.text, class_text("a/Foo"));
    assert_eq!(wb.cache().stats().disk_hits, 1);

    // History limit comes from the config.
    let mut history = wb.history();
    for line in 1..=3 {
        history.add_position(Position::new(line, 0));
    }
    assert_eq!(history.size(), 2);
    assert_eq!(history.get_prev(), Some(Position::new(2, 0)));
}

#[test]
fn settings_version_bump_invalidates_disk_entries() {
    let dir = tempdir().unwrap();
    let mut config = UnravelConfig::default();
    config.cache.dir = Some(dir.path().to_path_buf());

    let fake = Arc::new(FakeDecompiler::default());
    Workbench::from_config(&config, fake.clone())
        .unwrap()
        .code(&key("a/Foo"))
        .unwrap();

    config.cache.settings_version = 1;
    Workbench::from_config(&config, fake.clone())
        .unwrap()
        .code(&key("a/Foo"))
        .unwrap();
    assert_eq!(fake.calls(), 2);
}
