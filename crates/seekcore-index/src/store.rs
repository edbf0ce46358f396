//! SQLite-backed record store.
//!
//! Records live in a single `file_index` table. A reindex pass can write into a
//! staging table instead and swap it over the live one when the walk completes,
//! so readers only ever see a complete snapshot.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::{FileRecord, IndexError, RecordStore, Result};

const LIVE_TABLE: &str = "file_index";
const STAGING_TABLE: &str = "file_index_next";

#[derive(Debug, Clone, Copy)]
enum Table {
    Live,
    Staging,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::Live => LIVE_TABLE,
            Self::Staging => STAGING_TABLE,
        }
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) the database file, creating parent directories as needed.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::StorageFault {
                message: format!("failed to create {}: {}", parent.display(), e),
                source: None,
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| IndexError::storage(format!("failed to open {}", db_path.display()), e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| IndexError::storage("failed to set pragmas", e))?;

        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IndexError::storage("failed to open in-memory store", e))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        create_table(&conn, Table::Live)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Location of the database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {LIVE_TABLE}"), [], |row| {
                row.get(0)
            })
            .map_err(|e| IndexError::storage("failed to count records", e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT path, size, modified FROM {LIVE_TABLE} WHERE path = ?1"),
            params![path],
            read_record,
        )
        .optional()
        .map_err(|e| IndexError::storage(format!("failed to read {path}"), e))
    }

    /// Every record, ordered by path.
    pub fn records(&self) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT path, size, modified FROM {LIVE_TABLE} ORDER BY path"
            ))
            .map_err(|e| IndexError::storage("failed to prepare record scan", e))?;
        let rows = stmt
            .query_map([], read_record)
            .map_err(|e| IndexError::storage("failed to scan records", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| IndexError::storage("failed to scan records", e))
    }

    /// Starts a staging snapshot. Writes to it stay invisible to readers of this
    /// store until [`StagedSnapshot::commit`]; dropping it uncommitted discards it.
    pub fn stage(&self) -> Result<StagedSnapshot<'_>> {
        {
            let conn = self.lock()?;
            drop_table(&conn, Table::Staging)?;
            create_table(&conn, Table::Staging)?;
        }
        debug!("staging snapshot created");
        Ok(StagedSnapshot {
            store: self,
            committed: false,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexError::StorageFault {
            message: "store connection lock poisoned".to_string(),
            source: None,
        })
    }

    fn clear(&self, table: Table) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(&format!("DELETE FROM {}", table.name()), [])
            .map_err(|e| IndexError::storage(format!("failed to truncate {}", table.name()), e))?;
        Ok(())
    }

    fn upsert_into(&self, table: Table, records: &[FileRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| IndexError::storage("failed to begin batch", e))?;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT INTO {} (path, name, name_lc, size, modified)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(path) DO UPDATE SET
                         name = excluded.name,
                         name_lc = excluded.name_lc,
                         size = excluded.size,
                         modified = excluded.modified",
                    table.name()
                ))
                .map_err(|e| IndexError::storage("failed to prepare upsert", e))?;

            for record in records {
                stmt.execute(params![
                    record.path(),
                    record.name(),
                    record.name().to_lowercase(),
                    i64::try_from(record.size()).unwrap_or(i64::MAX),
                    record.modified_text(),
                ])
                .map_err(|e| IndexError::storage(format!("failed to write {}", record.path()), e))?;
            }
        }
        tx.commit()
            .map_err(|e| IndexError::storage("failed to commit batch", e))
    }

    fn find_in(&self, table: Table, tokens: &[String], limit: usize) -> Result<Vec<String>> {
        let tokens: Vec<String> = tokens
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // instr() keeps `%` and `_` in tokens literal, unlike LIKE.
        let predicate = (1..=tokens.len())
            .map(|i| format!("instr(name_lc, ?{i}) > 0"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT path FROM {} WHERE {predicate} ORDER BY rowid LIMIT {limit}",
            table.name()
        );

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| IndexError::storage("failed to prepare prefilter", e))?;
        let rows = stmt
            .query_map(params_from_iter(tokens.iter()), |row| row.get::<_, String>(0))
            .map_err(|e| IndexError::storage("failed to run prefilter", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| IndexError::storage("failed to read prefilter rows", e))
    }
}

impl RecordStore for SqliteStore {
    fn rebuild(&self) -> Result<()> {
        self.clear(Table::Live)
    }

    fn upsert_batch(&self, records: &[FileRecord]) -> Result<()> {
        self.upsert_into(Table::Live, records)
    }

    fn find_by_substrings(&self, tokens: &[String], limit: usize) -> Result<Vec<String>> {
        self.find_in(Table::Live, tokens, limit)
    }
}

/// A snapshot being built next to the live table of a [`SqliteStore`].
pub struct StagedSnapshot<'a> {
    store: &'a SqliteStore,
    committed: bool,
}

impl StagedSnapshot<'_> {
    /// Replaces the live table with the staged one in a single transaction.
    pub fn commit(mut self) -> Result<()> {
        let mut conn = self.store.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| IndexError::storage("failed to begin snapshot swap", e))?;
        tx.execute_batch(&format!(
            "DROP TABLE {LIVE_TABLE};
             ALTER TABLE {STAGING_TABLE} RENAME TO {LIVE_TABLE};"
        ))
        .map_err(|e| IndexError::storage("failed to swap snapshot", e))?;
        tx.commit()
            .map_err(|e| IndexError::storage("failed to commit snapshot swap", e))?;

        self.committed = true;
        debug!("staging snapshot swapped in");
        Ok(())
    }
}

impl RecordStore for StagedSnapshot<'_> {
    fn rebuild(&self) -> Result<()> {
        self.store.clear(Table::Staging)
    }

    fn upsert_batch(&self, records: &[FileRecord]) -> Result<()> {
        self.store.upsert_into(Table::Staging, records)
    }

    fn find_by_substrings(&self, tokens: &[String], limit: usize) -> Result<Vec<String>> {
        self.store.find_in(Table::Staging, tokens, limit)
    }
}

impl Drop for StagedSnapshot<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let result = self.store.lock().and_then(|conn| drop_table(&conn, Table::Staging));
        match result {
            Ok(()) => debug!("staging snapshot discarded"),
            Err(err) => warn!(error = %err, "failed to discard staging snapshot"),
        }
    }
}

fn create_table(conn: &Connection, table: Table) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            name_lc TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified TEXT NOT NULL
        );",
        table.name()
    ))
    .map_err(|e| IndexError::storage(format!("failed to create {}", table.name()), e))
}

fn drop_table(conn: &Connection, table: Table) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table.name()))
        .map_err(|e| IndexError::storage(format!("failed to drop {}", table.name()), e))
}

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(0)?;
    let size: i64 = row.get(1)?;
    let modified: String = row.get(2)?;
    let modified = DateTime::parse_from_rfc3339(&modified)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(FileRecord::new(path, u64::try_from(size).unwrap_or(0), modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(path: &str, size: u64) -> FileRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        FileRecord::new(path, size, ts)
    }

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn upsert_replaces_existing_path() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("/a/notes.pdf", 1)).unwrap();
        store.upsert(&record("/a/notes.pdf", 2)).unwrap();
        store
            .upsert_batch(&[record("/a/notes.pdf", 3), record("/b/other.pdf", 4)])
            .unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get("/a/notes.pdf").unwrap().unwrap().size(), 3);
    }

    #[test]
    fn repeated_identical_upsert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = record("/a/notes.pdf", 7);
        store.upsert(&rec).unwrap();
        store.upsert(&rec).unwrap();
        assert_eq!(store.records().unwrap(), vec![rec]);
    }

    #[test]
    fn failed_batch_leaves_no_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON file_index
                 WHEN NEW.path = '/bad.pdf'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let err = store
            .upsert_batch(&[record("/good.pdf", 1), record("/bad.pdf", 2)])
            .unwrap_err();
        assert!(matches!(err, IndexError::StorageFault { .. }));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn rebuild_discards_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[record("/a.pdf", 1), record("/b.pdf", 2)])
            .unwrap();
        store.rebuild().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn prefilter_matches_brute_force() {
        let store = SqliteStore::open_in_memory().unwrap();
        let paths = [
            "/a/Report_Final.pdf",
            "/b/report_draft.pdf",
            "/c/budget.pdf",
            "/d/ÉCOLE_report.PDF",
            "/e/100%_done.txt",
            "/f/a_b.txt",
            "/g/final/summary.txt",
        ];
        let records: Vec<_> = paths.iter().map(|p| record(p, 1)).collect();
        store.upsert_batch(&records).unwrap();

        let queries: &[&[&str]] = &[
            &["report"],
            &["report", "final"],
            &["REPORT", "pdf"],
            &["école"],
            &["%"],
            &["_"],
            &["a_b"],
            &["final"],
            &["zzz"],
            &["pdf", "budget", "e"],
        ];

        for query in queries {
            let lowered: Vec<String> = query.iter().map(|t| t.to_lowercase()).collect();
            let expected: Vec<String> = records
                .iter()
                .filter(|r| {
                    let name = r.name().to_lowercase();
                    lowered.iter().all(|t| name.contains(t.as_str()))
                })
                .map(|r| r.path().to_string())
                .collect();
            let actual = store.find_by_substrings(&tokens(query), usize::MAX).unwrap();
            assert_eq!(actual, expected, "query {query:?}");
        }
    }

    #[test]
    fn prefilter_with_no_tokens_is_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("/a.pdf", 1)).unwrap();
        assert!(store.find_by_substrings(&[], 10).unwrap().is_empty());
        assert!(store.find_by_substrings(&tokens(&[""]), 10).unwrap().is_empty());
    }

    #[test]
    fn prefilter_honours_limit_in_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let records: Vec<_> = (0..10).map(|i| record(&format!("/r/song{i}.pdf"), 1)).collect();
        store.upsert_batch(&records).unwrap();

        let found = store.find_by_substrings(&tokens(&["song"]), 3).unwrap();
        assert_eq!(found, vec!["/r/song0.pdf", "/r/song1.pdf", "/r/song2.pdf"]);
    }

    #[test]
    fn staged_snapshot_is_invisible_until_commit() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("/old/aria.pdf", 1)).unwrap();

        let staged = store.stage().unwrap();
        staged.upsert(&record("/new/aria.pdf", 1)).unwrap();
        assert_eq!(
            store.find_by_substrings(&tokens(&["aria"]), 10).unwrap(),
            vec!["/old/aria.pdf"]
        );
        assert_eq!(
            staged.find_by_substrings(&tokens(&["aria"]), 10).unwrap(),
            vec!["/new/aria.pdf"]
        );

        staged.commit().unwrap();
        assert_eq!(
            store.find_by_substrings(&tokens(&["aria"]), 10).unwrap(),
            vec!["/new/aria.pdf"]
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn dropped_snapshot_leaves_live_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("/old/aria.pdf", 1)).unwrap();
        {
            let staged = store.stage().unwrap();
            staged.rebuild().unwrap();
            staged.upsert(&record("/new/aria.pdf", 1)).unwrap();
        }
        assert_eq!(store.records().unwrap(), vec![record("/old/aria.pdf", 1)]);

        // A second stage after a discarded one starts empty.
        let staged = store.stage().unwrap();
        staged.commit().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/state/file_index.db");
        let store = SqliteStore::open(&db_path).unwrap();
        store.upsert(&record("/a.pdf", 1)).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&db_path).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        assert_eq!(reopened.path(), Some(db_path.as_path()));
    }
}
