use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::{FileRecord, IndexError, RecordStore, Result, SqliteStore};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildStrategy {
    /// Fill a staging snapshot and swap it in once the walk completes.
    #[default]
    Swap,
    /// Truncate the live table first. Readers see a partial index while the pass runs,
    /// and an aborted pass leaves it that way.
    TruncateFirst,
}

#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub batch_size: usize,
    pub strategy: RebuildStrategy,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: RebuildStrategy::default(),
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexProgress {
    pub indexed: usize,
    /// Files seen by the counting pass; the walk may index fewer.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Running count of non-directory entries under `root`, one tick per entry.
/// Unreadable entries are passed over.
pub fn count(root: &Path) -> impl Iterator<Item = usize> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(error = %err, "count skipped entry");
                None
            }
        })
        .filter(|entry| !entry.file_type().is_dir())
        .scan(0usize, |seen, _| {
            *seen += 1;
            Some(*seen)
        })
}

/// Starts a fresh walk of `root`. Fails with [`IndexError::CrawlFault`] when the root
/// itself cannot be read; entries that fail later are logged and skipped.
pub fn walk(root: &Path) -> Result<Walk> {
    let crawl_fault = |source| IndexError::CrawlFault {
        path: root.to_path_buf(),
        source,
    };
    let root = fs::canonicalize(root).map_err(crawl_fault)?;
    fs::read_dir(&root).map_err(crawl_fault)?;

    Ok(Walk {
        inner: WalkDir::new(&root).follow_links(false).into_iter(),
        root,
        skipped: 0,
    })
}

pub struct Walk {
    inner: walkdir::IntoIter,
    root: PathBuf,
    skipped: usize,
}

impl Walk {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entries passed over so far because they could not be read.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn skip(&mut self, path: Option<&Path>, reason: &dyn std::fmt::Display) {
        self.skipped += 1;
        match path {
            Some(path) => warn!(path = %path.display(), reason = %reason, "entry skipped"),
            None => warn!(reason = %reason, "entry skipped"),
        }
    }

    fn record_for(&mut self, entry: &DirEntry) -> Option<FileRecord> {
        let file_type = entry.file_type();

        let metadata = if file_type.is_file() {
            match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    self.skip(Some(entry.path()), &err);
                    return None;
                }
            }
        } else if file_type.is_symlink() {
            match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => {
                    debug!(path = %entry.path().display(), "symlink to non-file ignored");
                    return None;
                }
                Err(err) => {
                    self.skip(Some(entry.path()), &err);
                    return None;
                }
            }
        } else {
            return None;
        };

        let Some(path) = entry.path().to_str() else {
            self.skip(Some(entry.path()), &"path is not valid UTF-8");
            return None;
        };

        Some(FileRecord::from_metadata(path, &metadata))
    }
}

impl Iterator for Walk {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf);
                    self.skip(path.as_deref(), &err);
                    continue;
                }
            };

            if let Some(record) = self.record_for(&entry) {
                return Some(record);
            }
        }
    }
}

/// Replaces the contents of `store` with a fresh walk of `root`, writing in chunks of
/// `options.batch_size` and calling `on_progress` after each chunk.
pub fn reindex<F>(
    root: &Path,
    store: &SqliteStore,
    options: &ReindexOptions,
    mut on_progress: F,
) -> Result<ReindexSummary>
where
    F: FnMut(ReindexProgress),
{
    let started = Instant::now();
    let walk = walk(root)?;
    info!(root = %walk.root().display(), strategy = ?options.strategy, "reindex started");

    let total = count(walk.root()).last().unwrap_or(0);
    debug!(total, "count pass finished");

    let (indexed, skipped) = match options.strategy {
        RebuildStrategy::Swap => {
            let staged = store.stage()?;
            let counts = fill(walk, &staged, total, options, &mut on_progress)?;
            staged.commit()?;
            counts
        }
        RebuildStrategy::TruncateFirst => fill(walk, store, total, options, &mut on_progress)?,
    };

    let summary = ReindexSummary {
        indexed,
        skipped,
        elapsed: started.elapsed(),
    };
    info!(
        indexed = summary.indexed,
        skipped = summary.skipped,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "reindex finished"
    );
    Ok(summary)
}

fn fill<S, F>(
    mut walk: Walk,
    target: &S,
    total: usize,
    options: &ReindexOptions,
    on_progress: &mut F,
) -> Result<(usize, usize)>
where
    S: RecordStore + ?Sized,
    F: FnMut(ReindexProgress),
{
    target.rebuild()?;

    let batch_size = options.batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut indexed = 0usize;

    loop {
        if is_cancelled(options) {
            warn!(indexed, "reindex interrupted");
            return Err(IndexError::Interrupted);
        }

        batch.clear();
        batch.extend(walk.by_ref().take(batch_size));
        if batch.is_empty() {
            break;
        }

        target.upsert_batch(&batch)?;
        indexed += batch.len();
        debug!(indexed, total, "chunk written");
        on_progress(ReindexProgress { indexed, total });
    }

    Ok((indexed, walk.skipped()))
}

fn is_cancelled(options: &ReindexOptions) -> bool {
    options
        .cancel
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}
