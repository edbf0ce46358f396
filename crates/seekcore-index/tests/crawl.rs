//! Crawl and reindex behaviour against real directory trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use seekcore_index::{
    count, reindex, walk, IndexError, RebuildStrategy, RecordStore, ReindexOptions, SqliteStore,
};
use tempfile::TempDir;

fn create_tree() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    fs::create_dir_all(dir.path().join("scores/bach")).unwrap();
    fs::write(dir.path().join("Report_Final.pdf"), b"final").unwrap();
    fs::write(dir.path().join("scores/budget.pdf"), b"budget!").unwrap();
    fs::write(dir.path().join("scores/bach/Café.pdf"), b"c").unwrap();
    dir
}

fn canonical(dir: &TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).unwrap()
}

fn sorted_paths(store: &SqliteStore) -> Vec<String> {
    store
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.path().to_string())
        .collect()
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

#[test]
fn walk_yields_every_regular_file() {
    let dir = create_tree();
    let root = canonical(&dir);

    let mut records: Vec<_> = walk(dir.path()).unwrap().collect();
    records.sort_by(|a, b| a.path().cmp(b.path()));

    let mut expected = vec![
        path_str(&root.join("Report_Final.pdf")),
        path_str(&root.join("scores/budget.pdf")),
        path_str(&root.join("scores/bach/Café.pdf")),
    ];
    expected.sort();

    let paths: Vec<_> = records.iter().map(|r| r.path().to_string()).collect();
    assert_eq!(paths, expected);

    let budget = records.iter().find(|r| r.name() == "budget.pdf").unwrap();
    assert_eq!(budget.size(), 7);
}

#[test]
fn walk_is_restartable() {
    let dir = create_tree();
    let first: Vec<_> = walk(dir.path()).unwrap().collect();
    let second: Vec<_> = walk(dir.path()).unwrap().collect();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn count_ticks_up_to_file_total() {
    let dir = create_tree();
    let ticks: Vec<_> = count(dir.path()).collect();
    assert_eq!(ticks, vec![1, 2, 3]);
}

#[test]
fn count_of_missing_root_is_empty() {
    let dir = TempDir::new().unwrap();
    assert_eq!(count(&dir.path().join("missing")).count(), 0);
}

#[cfg(unix)]
#[test]
fn unreadable_entry_is_skipped_without_failing() {
    let dir = create_tree();
    std::os::unix::fs::symlink(
        dir.path().join("vanished.pdf"),
        dir.path().join("scores/dangling.pdf"),
    )
    .unwrap();

    let store = SqliteStore::open_in_memory().unwrap();
    let summary = reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();

    assert_eq!(summary.indexed, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(store.len().unwrap(), 3);
}

#[cfg(unix)]
#[test]
fn symlinked_file_is_indexed_under_link_path() {
    let dir = create_tree();
    let root = canonical(&dir);
    std::os::unix::fs::symlink(
        root.join("scores/budget.pdf"),
        root.join("budget-link.pdf"),
    )
    .unwrap();

    let records: Vec<_> = walk(dir.path()).unwrap().collect();
    let link = records
        .iter()
        .find(|r| r.name() == "budget-link.pdf")
        .expect("link indexed");
    assert_eq!(link.path(), path_str(&root.join("budget-link.pdf")));
    assert_eq!(link.size(), 7);
}

#[cfg(unix)]
#[test]
fn backslash_in_unix_file_name_is_kept() {
    let dir = create_tree();
    let root = canonical(&dir);
    fs::write(root.join("AC\\DC_live.pdf"), b"live").unwrap();

    let store = SqliteStore::open_in_memory().unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();

    let records = store.records().unwrap();
    let live = records
        .iter()
        .find(|r| r.path().ends_with("DC_live.pdf"))
        .expect("file indexed");
    assert_eq!(live.name(), "AC\\DC_live.pdf");
    assert_eq!(live.path(), path_str(&root.join("AC\\DC_live.pdf")));

    let found = store.find_by_substrings(&["ac".to_string()], 10).unwrap();
    assert_eq!(found, vec![live.path().to_string()]);
}

#[test]
fn missing_root_is_a_crawl_fault_and_keeps_store() {
    let dir = create_tree();
    let store = SqliteStore::open_in_memory().unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();

    for strategy in [RebuildStrategy::Swap, RebuildStrategy::TruncateFirst] {
        let options = ReindexOptions {
            strategy,
            ..ReindexOptions::default()
        };
        let err = reindex(&dir.path().join("missing"), &store, &options, |_| {}).unwrap_err();
        assert!(matches!(err, IndexError::CrawlFault { .. }));
        assert_eq!(store.len().unwrap(), 3);
    }
}

#[test]
fn file_as_root_is_a_crawl_fault() {
    let dir = create_tree();
    let err = walk(&dir.path().join("Report_Final.pdf")).err().unwrap();
    assert!(matches!(err, IndexError::CrawlFault { .. }));
}

#[test]
fn reindex_twice_is_idempotent() {
    let dir = create_tree();
    let store = SqliteStore::open_in_memory().unwrap();

    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();
    let first = store.records().unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();
    let second = store.records().unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn reindex_drops_files_removed_since_last_pass() {
    let dir = create_tree();
    let store = SqliteStore::open_in_memory().unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();

    fs::remove_file(dir.path().join("scores/budget.pdf")).unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();

    let paths = sorted_paths(&store);
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| !p.ends_with("budget.pdf")));
}

#[test]
fn progress_is_reported_after_each_chunk() {
    let dir = create_tree();
    fs::write(dir.path().join("a.pdf"), b"").unwrap();
    fs::write(dir.path().join("b.pdf"), b"").unwrap();

    let store = SqliteStore::open_in_memory().unwrap();
    let options = ReindexOptions {
        batch_size: 2,
        ..ReindexOptions::default()
    };
    let mut seen = Vec::new();
    let summary = reindex(dir.path(), &store, &options, |p| seen.push(p)).unwrap();

    assert_eq!(summary.indexed, 5);
    let indexed: Vec<_> = seen.iter().map(|p| p.indexed).collect();
    assert_eq!(indexed, vec![2, 4, 5]);
    assert!(seen.iter().all(|p| p.total == 5));
}

#[test]
fn interrupted_swap_keeps_previous_snapshot() {
    let dir = create_tree();
    let store = SqliteStore::open_in_memory().unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();
    let before = store.records().unwrap();

    fs::write(dir.path().join("new.pdf"), b"").unwrap();
    let cancel = Arc::new(AtomicBool::new(true));
    let options = ReindexOptions {
        cancel: Some(cancel),
        ..ReindexOptions::default()
    };
    let err = reindex(dir.path(), &store, &options, |_| {}).unwrap_err();

    assert!(matches!(err, IndexError::Interrupted));
    assert_eq!(store.records().unwrap(), before);
    assert!(store
        .find_by_substrings(&["new".to_string()], 10)
        .unwrap()
        .is_empty());
}

#[test]
fn interrupted_truncate_first_leaves_store_empty() {
    let dir = create_tree();
    let store = SqliteStore::open_in_memory().unwrap();
    reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();

    let options = ReindexOptions {
        strategy: RebuildStrategy::TruncateFirst,
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..ReindexOptions::default()
    };
    let err = reindex(dir.path(), &store, &options, |_| {}).unwrap_err();

    assert!(matches!(err, IndexError::Interrupted));
    assert!(store.is_empty().unwrap());
}

#[test]
fn reindex_persists_to_disk() {
    let dir = create_tree();
    let state = TempDir::new().unwrap();
    let db_path = state.path().join("file_index.db");

    {
        let store = SqliteStore::open(&db_path).unwrap();
        reindex(dir.path(), &store, &ReindexOptions::default(), |_| {}).unwrap();
    }

    let reopened = SqliteStore::open(&db_path).unwrap();
    assert_eq!(reopened.len().unwrap(), 3);
    let found = reopened
        .find_by_substrings(&["report".to_string()], 10)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].ends_with("Report_Final.pdf"));
}
