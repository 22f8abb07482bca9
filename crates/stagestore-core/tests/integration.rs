//! Integration tests: full save -> read_all -> archive lifecycle against a real directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use stagestore_core::{
    ArchiveMode, Config, GroupName, Partition, Persistence, StageError, StageStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_store() -> (StageStore, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let store = StageStore::open(dir.path()).unwrap();
    (store, dir)
}

fn drained(store: &StageStore) -> BTreeSet<(String, String, Vec<u8>)> {
    let outcome = store.read_all().unwrap().drain();
    assert!(outcome.errors.is_empty(), "unexpected scan errors: {:?}", outcome.errors);
    outcome.records.iter()
        .map(|d| (d.group().to_string(), d.name().to_string(), d.content().unwrap()))
        .collect()
}

fn file_names(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir).unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

// ---------------------------------------------------------------------------
// Save + read_all
// ---------------------------------------------------------------------------

#[test]
fn test_concrete_scenario() {
    let (store, dir) = test_store();

    store.save("0xAA", "/f1", &[1, 2, 3]).unwrap();
    store.save("0xAA", "/f2", &[4, 5]).unwrap();

    let records = drained(&store);
    let expected: BTreeSet<_> = [
        ("0xAA".to_string(), "f1".to_string(), vec![1, 2, 3]),
        ("0xAA".to_string(), "f2".to_string(), vec![4, 5]),
    ].into_iter().collect();
    assert_eq!(records, expected);

    let report = store.archive("0xAA").unwrap();
    assert_eq!(report.mode, ArchiveMode::Renamed);

    assert!(!dir.path().join("current").join("0xAA").exists());
    let archived = dir.path().join("archive").join("0xAA");
    assert_eq!(fs::read(archived.join("f1")).unwrap(), vec![1, 2, 3]);
    assert_eq!(fs::read(archived.join("f2")).unwrap(), vec![4, 5]);
}

#[test]
fn test_read_all_returns_every_saved_record() {
    let (store, _dir) = test_store();

    let mut expected = BTreeSet::new();
    for g in 0..5 {
        let group = format!("0x{:06x}", g * 0x111111);
        for r in 0..7 {
            let name = format!("record{}", r);
            let data: Vec<u8> = (0..(g * 7 + r) as u8).collect();
            store.save(&group, &format!("/{}", name), &data).unwrap();
            expected.insert((group.clone(), name, data));
        }
    }

    assert_eq!(drained(&store), expected);
    assert_eq!(store.stats().records_emitted, 35);
}

#[test]
fn test_read_all_on_empty_root() {
    let (store, _dir) = test_store();

    let outcome = store.read_all().unwrap().drain();
    assert!(outcome.records.is_empty());
    assert!(outcome.errors.is_empty());
}

#[test]
fn test_read_all_returns_immediately_and_streams_on_demand() {
    let (store, _dir) = test_store();
    for i in 0..20 {
        store.save("g", &format!("/r{}", i), &[i]).unwrap();
    }

    let scan = store.read_all().unwrap();
    // nothing is handed over until someone receives
    thread::sleep(Duration::from_millis(50));
    assert_eq!(store.stats().records_emitted, 0);

    let (records, errors, guard) = scan.into_parts();
    let errors = thread::spawn(move || errors.iter().count());
    assert_eq!(records.iter().count(), 20);
    assert_eq!(errors.join().unwrap(), 0);
    drop(guard);
}

#[test]
fn test_overwrite_keeps_last_write() {
    let (store, _dir) = test_store();
    store.save("g", "/r", b"first").unwrap();
    store.save("g", "/r", b"second").unwrap();

    let records = drained(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(records.iter().next().unwrap().2, b"second");
}

#[test]
fn test_scan_survives_missing_current_partition() {
    let (store, dir) = test_store();
    store.save("g", "/r", b"x").unwrap();
    fs::remove_dir_all(dir.path().join("current")).unwrap();

    let outcome = store.read_all().unwrap().drain();
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.errors.len(), 1);
    assert!(matches!(outcome.errors[0], StageError::Io { .. }));
}

#[cfg(unix)]
#[test]
fn test_unreadable_group_does_not_stop_scan() {
    use std::os::unix::fs::PermissionsExt;

    if running_as_root() {
        eprintln!("skipping: permission bits are not enforced for root");
        return;
    }

    let (store, dir) = test_store();
    store.save("locked", "/r", b"hidden").unwrap();
    store.save("open", "/r1", b"1").unwrap();
    store.save("open", "/r2", b"2").unwrap();

    let locked = dir.path().join("current").join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    let outcome = store.read_all().unwrap().drain();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].io_kind(), Some(std::io::ErrorKind::PermissionDenied));
    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.records.iter().all(|d| d.group() == "open"));
}

#[test]
fn test_group_vanishing_mid_scan_is_reported_once() {
    let (store, dir) = test_store();
    for group in ["ga", "gb", "gc"] {
        store.save(group, "/r1", b"1").unwrap();
        store.save(group, "/r2", b"2").unwrap();
    }

    let (records, errors, guard) = store.read_all().unwrap().into_parts();
    let errors = thread::spawn(move || errors.iter().collect::<Vec<_>>());

    // the producer is now parked on the second record of `first`; no other group has been opened
    let first = records.recv().unwrap();
    let removed = ["ga", "gb", "gc"].into_iter().find(|g| *g != first.group()).unwrap();
    let removed_path = dir.path().join("current").join(removed);
    fs::remove_dir_all(&removed_path).unwrap();

    let mut seen = vec![first];
    seen.extend(records.iter());
    let errors = errors.join().unwrap();
    drop(guard);

    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|d| d.group() != removed));
    let groups: BTreeSet<&str> = seen.iter().map(|d| d.group()).collect();
    assert_eq!(groups.len(), 2);

    assert_eq!(errors.len(), 1, "got {:?}", errors);
    assert!(matches!(errors[0], StageError::Io { .. }));
    assert_eq!(errors[0].io_kind(), Some(std::io::ErrorKind::NotFound));
    assert_eq!(errors[0].path(), Some(removed_path.as_path()));
}

#[test]
fn test_content_failure_is_local_to_descriptor() {
    let (store, dir) = test_store();
    store.save("g", "/gone", b"1").unwrap();
    store.save("g", "/kept", b"2").unwrap();

    let outcome = store.read_all().unwrap().drain();
    assert!(outcome.errors.is_empty());
    fs::remove_file(dir.path().join("current").join("g").join("gone")).unwrap();

    for descriptor in &outcome.records {
        match descriptor.name() {
            "gone" => assert!(descriptor.content().unwrap_err().is_not_found()),
            "kept" => assert_eq!(descriptor.content().unwrap(), b"2"),
            other => panic!("unexpected record {}", other),
        }
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

#[test]
fn test_archive_removes_current_and_keeps_records() {
    let (store, dir) = test_store();
    store.save("0x424242", "/file11", b"some\n").unwrap();
    store.save("0x424242", "/file12", b"more\n").unwrap();
    store.save("0x777777", "/file21", b"other\n").unwrap();

    store.archive("0x424242").unwrap();

    assert!(!dir.path().join("current").join("0x424242").exists());
    assert_eq!(
        file_names(&dir.path().join("archive").join("0x424242")),
        ["file11", "file12"].iter().map(|s| s.to_string()).collect::<BTreeSet<String>>()
    );

    // the other group is untouched and still streams
    let records = drained(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(records.iter().next().unwrap().0, "0x777777");
}

#[test]
fn test_repeat_archive_accumulates_union() {
    let (store, dir) = test_store();

    store.save("0x424242", "/file11", b"a").unwrap();
    store.save("0x424242", "/file12", b"b").unwrap();
    assert_eq!(store.archive("0x424242").unwrap().mode, ArchiveMode::Renamed);

    store.save("0x424242", "/file13", b"c").unwrap();
    store.save("0x424242", "/file14", b"d").unwrap();
    store.save("0x424242", "/file11", b"a2").unwrap();
    let report = store.archive("0x424242").unwrap();
    assert_eq!(report.mode, ArchiveMode::Merged);
    assert_eq!(report.records_moved, 3);

    assert!(!dir.path().join("current").join("0x424242").exists());
    let archived = store.archived_records("0x424242").unwrap();
    let names: Vec<&str> = archived.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["file11", "file12", "file13", "file14"]);
    assert_eq!(archived[0].content().unwrap(), b"a2");

    let stats = store.stats();
    assert_eq!(stats.groups_archived, 2);
    assert_eq!(stats.groups_merged, 1);
    assert_eq!(stats.records_archived, 5);
}

#[test]
fn test_archive_unknown_group_is_not_found() {
    let (store, dir) = test_store();

    let err = store.archive("0xDEAD").unwrap_err();
    assert!(matches!(err, StageError::GroupNotFound { .. }));
    assert!(err.is_not_found());
    assert!(!dir.path().join("archive").join("0xDEAD").exists());
}

#[test]
fn test_archive_twice_without_new_writes() {
    let (store, _dir) = test_store();
    store.save("g", "/r", b"x").unwrap();
    store.archive("g").unwrap();

    assert!(matches!(store.archive("g"), Err(StageError::GroupNotFound { .. })));
    assert_eq!(store.archived_records("g").unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Open / validation
// ---------------------------------------------------------------------------

#[test]
fn test_open_fails_when_root_is_a_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();

    match StageStore::open(&file) {
        Err(StageError::PermissionDenied { path, .. }) => assert_eq!(path, file),
        other => panic!("Expected PermissionDenied, got {:?}", other),
    }
}

#[test]
fn test_open_fails_when_root_is_missing() {
    let dir = TempDir::new().unwrap();
    let err = StageStore::open(dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, StageError::PermissionDenied { .. }));
}

#[cfg(unix)]
#[test]
fn test_open_fails_when_root_is_read_only() {
    use std::os::unix::fs::PermissionsExt;

    if running_as_root() {
        eprintln!("skipping: permission bits are not enforced for root");
        return;
    }

    let dir = TempDir::new().unwrap();
    let root = dir.path().join("ro");
    fs::create_dir(&root).unwrap();
    fs::set_permissions(&root, fs::Permissions::from_mode(0o555)).unwrap();

    let result = StageStore::open(&root);
    fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(result, Err(StageError::PermissionDenied { .. })));
    assert!(!root.join("current").exists());
}

#[test]
fn test_open_fails_when_partition_slot_is_a_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("archive"), b"in the way").unwrap();

    let err = StageStore::open(dir.path()).unwrap_err();
    assert!(matches!(err, StageError::Io { .. }), "got {:?}", err);
}

#[test]
fn test_open_leaves_no_probe_files() {
    let (_store, dir) = test_store();
    assert_eq!(
        file_names(dir.path()),
        ["archive", "current"].iter().map(|s| s.to_string()).collect::<BTreeSet<String>>()
    );
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_saves_from_many_threads() {
    let (store, _dir) = test_store();
    let store = Arc::new(store);

    let mut handles = vec![];
    for t in 0..8u8 {
        let s = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..25u8 {
                s.save(&format!("group{}", t % 3), &format!("/t{}-r{}", t, i), &[t, i]).unwrap();
            }
        }));
    }
    for h in handles { h.join().unwrap(); }

    let records = drained(&store);
    assert_eq!(records.len(), 200);
    assert_eq!(store.list_groups(Partition::Current).unwrap().len(), 3);
}

#[test]
fn test_save_and_archive_race_loses_nothing() {
    let (store, _dir) = test_store();
    let store = Arc::new(store);

    let writer = {
        let s = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..100 {
                s.save("hot", &format!("/r{:03}", i), &[1]).unwrap();
            }
        })
    };

    let archiver = {
        let s = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..20 {
                match s.archive("hot") {
                    Ok(_) | Err(StageError::GroupNotFound { .. }) => {}
                    Err(e) => panic!("archive failed: {}", e),
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    writer.join().unwrap();
    archiver.join().unwrap();
    match store.archive("hot") {
        Ok(_) | Err(StageError::GroupNotFound { .. }) => {}
        Err(e) => panic!("final archive failed: {}", e),
    }

    assert_eq!(store.archived_records("hot").unwrap().len(), 100);
    let hot = GroupName::new("hot").unwrap();
    assert!(!store.list_groups(Partition::Current).unwrap().contains(&hot));
}

#[test]
fn test_abandoned_scan_does_not_leak_producer() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::buffered();
    config.emit_poll_interval = Duration::from_millis(2);
    let store = StageStore::open_with_config(dir.path(), config).unwrap();
    for i in 0..100 {
        store.save("g", &format!("/r{}", i), &[0]).unwrap();
    }

    let scan = store.read_all().unwrap();
    let first = scan.records().recv().unwrap();
    assert_eq!(first.group(), "g");

    let token = scan.cancel_token();
    let (_records, _errors, guard) = scan.into_parts();
    token.cancel();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !guard.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(guard.is_finished(), "cancelled producer should exit while receivers are still held");
}

#[test]
fn test_dyn_persistence_pipeline() {
    let (store, _dir) = test_store();
    let handle: Arc<dyn Persistence> = Arc::new(store);

    handle.save("0xAA", "/f1", &[9]).unwrap();
    let mut seen = Vec::new();
    let errors = handle.read_all().unwrap().for_each(|d| seen.push(d.content().unwrap()));
    assert!(errors.is_empty());
    assert_eq!(seen, vec![vec![9]]);

    handle.archive("0xAA").unwrap();
    assert!(handle.read_all().unwrap().drain().records.is_empty());
}
