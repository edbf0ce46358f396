use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

mod crawl;
mod store;

pub use crawl::{
    count, reindex, walk, RebuildStrategy, ReindexOptions, ReindexProgress, ReindexSummary, Walk,
};
pub use store::{SqliteStore, StagedSnapshot};

pub type Result<T> = std::result::Result<T, IndexError>;

/// Metadata for one indexed file. `name` is always the last segment of `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    path: String,
    name: String,
    size: u64,
    modified: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        let path = path.into();
        let name = file_name_from_path(&path).to_string();
        Self {
            path,
            name,
            size,
            modified: modified.trunc_subsecs(0),
        }
    }

    pub fn from_metadata(path: impl Into<String>, metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        Self::new(path, metadata.len(), DateTime::<Utc>::from(modified))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Sortable text form persisted in the store, e.g. `2024-05-01T12:30:00Z`.
    pub fn modified_text(&self) -> String {
        self.modified.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[cfg(windows)]
const PATH_SEPARATORS: &[char] = &['\\', '/'];
#[cfg(not(windows))]
const PATH_SEPARATORS: &[char] = &['/'];

/// Last segment of `path`. `\` only separates segments on Windows.
pub fn file_name_from_path(path: &str) -> &str {
    path.rsplit(PATH_SEPARATORS).next().unwrap_or(path)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("storage fault: {message}")]
    StorageFault {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },
    #[error("crawl fault at {}: {source}", path.display())]
    CrawlFault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reindex interrupted")]
    Interrupted,
}

impl IndexError {
    pub(crate) fn storage(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::StorageFault {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Persistent table of [`FileRecord`]s keyed by path.
pub trait RecordStore {
    /// Discards every record.
    fn rebuild(&self) -> Result<()>;

    fn upsert(&self, record: &FileRecord) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(record))
    }

    /// Inserts or replaces all records in one transaction; nothing is written on failure.
    fn upsert_batch(&self, records: &[FileRecord]) -> Result<()>;

    /// Paths whose lowercased name contains every token. An empty token list matches nothing.
    fn find_by_substrings(&self, tokens: &[String], limit: usize) -> Result<Vec<String>>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn rebuild(&self) -> Result<()> {
        (**self).rebuild()
    }

    fn upsert(&self, record: &FileRecord) -> Result<()> {
        (**self).upsert(record)
    }

    fn upsert_batch(&self, records: &[FileRecord]) -> Result<()> {
        (**self).upsert_batch(records)
    }

    fn find_by_substrings(&self, tokens: &[String], limit: usize) -> Result<Vec<String>> {
        (**self).find_by_substrings(tokens, limit)
    }
}
