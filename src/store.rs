//! SQLite persistence: books, queue, fix history, daily stats, API call log.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;

/// Book statuses as stored in the `books.status` column
pub mod status {
    pub const PENDING: &str = "pending";
    pub const QUEUED: &str = "queued";
    pub const VERIFIED: &str = "verified";
    pub const PENDING_FIX: &str = "pending_fix";
    pub const FIXED: &str = "fixed";
    pub const EMPTY: &str = "empty";
    pub const ERROR: &str = "error";
}

/// History record statuses
pub mod fix_status {
    pub const PENDING: &str = "pending";
    pub const APPLIED: &str = "applied";
    pub const ROLLED_BACK: &str = "rolled_back";
}

#[derive(Debug, Clone)]
pub struct Book {
    pub id: i64,
    pub path: String,
    pub author: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub queue_id: i64,
    pub book_id: i64,
    pub reason: String,
    pub added_at: String,
    pub path: String,
    pub author: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub book_id: i64,
    pub old_author: String,
    pub old_title: String,
    pub new_author: String,
    pub new_title: String,
    pub old_path: String,
    pub new_path: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Default, Clone)]
pub struct LibraryCounts {
    pub total_books: i64,
    pub queue_size: i64,
    pub fixed: i64,
    pub pending_fixes: i64,
    pub verified: i64,
}

#[derive(Debug, Clone)]
pub struct DailyStats {
    pub date: String,
    pub scanned: i64,
    pub queued: i64,
    pub fixed: i64,
    pub verified: i64,
    pub api_calls: i64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;

        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS books (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                path       TEXT NOT NULL UNIQUE,
                author     TEXT NOT NULL,
                title      TEXT NOT NULL,
                status     TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS queue (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id  INTEGER NOT NULL UNIQUE REFERENCES books(id) ON DELETE CASCADE,
                reason   TEXT NOT NULL,
                added_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id    INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                old_author TEXT NOT NULL,
                old_title  TEXT NOT NULL,
                new_author TEXT NOT NULL,
                new_title  TEXT NOT NULL,
                old_path   TEXT NOT NULL,
                new_path   TEXT NOT NULL,
                status     TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stats (
                date      TEXT PRIMARY KEY,
                scanned   INTEGER NOT NULL DEFAULT 0,
                queued    INTEGER NOT NULL DEFAULT 0,
                fixed     INTEGER NOT NULL DEFAULT 0,
                verified  INTEGER NOT NULL DEFAULT 0,
                api_calls INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS api_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                called_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_added ON queue(added_at);
            CREATE INDEX IF NOT EXISTS idx_history_created ON history(created_at);
            CREATE INDEX IF NOT EXISTS idx_api_log_called ON api_log(called_at);",
        )?;
        Ok(())
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    // ---------- books ----------

    /// Insert the book if unseen, otherwise return the existing row.
    /// The bool is true when a new row was inserted.
    pub fn upsert_book(&self, path: &str, author: &str, title: &str) -> Result<(Book, bool)> {
        if let Some(book) = self.book_by_path(path)? {
            return Ok((book, false));
        }

        let now = Self::now();
        self.conn.execute(
            "INSERT INTO books (path, author, title, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![path, author, title, status::PENDING, now],
        )?;
        let id = self.conn.last_insert_rowid();

        Ok((
            Book {
                id,
                path: path.to_string(),
                author: author.to_string(),
                title: title.to_string(),
                status: status::PENDING.to_string(),
            },
            true,
        ))
    }

    pub fn book_by_path(&self, path: &str) -> Result<Option<Book>> {
        let book = self
            .conn
            .query_row(
                "SELECT id, path, author, title, status FROM books WHERE path = ?1",
                params![path],
                Self::map_book,
            )
            .optional()?;
        Ok(book)
    }

    pub fn book_by_id(&self, id: i64) -> Result<Option<Book>> {
        let book = self
            .conn
            .query_row(
                "SELECT id, path, author, title, status FROM books WHERE id = ?1",
                params![id],
                Self::map_book,
            )
            .optional()?;
        Ok(book)
    }

    fn map_book(row: &rusqlite::Row) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            path: row.get(1)?,
            author: row.get(2)?,
            title: row.get(3)?,
            status: row.get(4)?,
        })
    }

    pub fn set_book_status(&self, id: i64, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE books SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, Self::now(), id],
        )?;
        Ok(())
    }

    /// Rewrite a book row after its folder moved
    pub fn relocate_book(
        &self,
        id: i64,
        path: &str,
        author: &str,
        title: &str,
        status: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE books SET path = ?1, author = ?2, title = ?3, status = ?4, updated_at = ?5
             WHERE id = ?6",
            params![path, author, title, status, Self::now(), id],
        )?;
        Ok(())
    }

    // ---------- queue ----------

    /// Enqueue a book for AI analysis. Deduplicated per book; returns
    /// false when the book was already waiting.
    pub fn enqueue(&self, book_id: i64, reason: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO queue (book_id, reason, added_at) VALUES (?1, ?2, ?3)",
            params![book_id, reason, Self::now()],
        )?;
        if inserted > 0 {
            self.set_book_status(book_id, status::QUEUED)?;
        }
        Ok(inserted > 0)
    }

    pub fn dequeue(&self, queue_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM queue WHERE id = ?1", params![queue_id])?;
        Ok(())
    }

    pub fn queue_len(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Oldest-first batch, joined with book identity
    pub fn next_batch(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT q.id, q.book_id, q.reason, q.added_at, b.path, b.author, b.title
             FROM queue q JOIN books b ON q.book_id = b.id
             ORDER BY q.added_at, q.id
             LIMIT ?1",
        )?;
        let items = stmt
            .query_map(params![limit as i64], Self::map_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn list_queue(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT q.id, q.book_id, q.reason, q.added_at, b.path, b.author, b.title
             FROM queue q JOIN books b ON q.book_id = b.id
             ORDER BY q.added_at, q.id",
        )?;
        let items = stmt
            .query_map([], Self::map_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn map_queue_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
        Ok(QueueItem {
            queue_id: row.get(0)?,
            book_id: row.get(1)?,
            reason: row.get(2)?,
            added_at: row.get(3)?,
            path: row.get(4)?,
            author: row.get(5)?,
            title: row.get(6)?,
        })
    }

    // ---------- history ----------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_history(
        &self,
        book_id: i64,
        old_author: &str,
        old_title: &str,
        new_author: &str,
        new_title: &str,
        old_path: &str,
        new_path: &str,
        status: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO history (book_id, old_author, old_title, new_author, new_title,
                                  old_path, new_path, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                book_id, old_author, old_title, new_author, new_title, old_path, new_path,
                status,
                Self::now()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn history_record(&self, id: i64) -> Result<Option<HistoryRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, book_id, old_author, old_title, new_author, new_title,
                        old_path, new_path, status, created_at
                 FROM history WHERE id = ?1",
                params![id],
                Self::map_history,
            )
            .optional()?;
        Ok(record)
    }

    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, book_id, old_author, old_title, new_author, new_title,
                    old_path, new_path, status, created_at
             FROM history ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], Self::map_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn map_history(row: &rusqlite::Row) -> rusqlite::Result<HistoryRecord> {
        Ok(HistoryRecord {
            id: row.get(0)?,
            book_id: row.get(1)?,
            old_author: row.get(2)?,
            old_title: row.get(3)?,
            new_author: row.get(4)?,
            new_title: row.get(5)?,
            old_path: row.get(6)?,
            new_path: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    pub fn set_history_status(&self, id: i64, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE history SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(())
    }

    // ---------- stats + rate limit ----------

    pub fn bump_stats(&self, scanned: i64, queued: i64, fixed: i64, verified: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO stats (date, scanned, queued, fixed, verified)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(date) DO UPDATE SET
                scanned = scanned + excluded.scanned,
                queued = queued + excluded.queued,
                fixed = fixed + excluded.fixed,
                verified = verified + excluded.verified",
            params![Self::today(), scanned, queued, fixed, verified],
        )?;
        Ok(())
    }

    /// Record one LLM request, for both daily stats and the rate window
    pub fn log_api_call(&self) -> Result<()> {
        self.conn.execute(
            "INSERT INTO api_log (called_at) VALUES (?1)",
            params![Self::now()],
        )?;
        self.conn.execute(
            "INSERT INTO stats (date, api_calls) VALUES (?1, 1)
             ON CONFLICT(date) DO UPDATE SET api_calls = api_calls + 1",
            params![Self::today()],
        )?;
        Ok(())
    }

    pub fn api_calls_in_last_hour(&self) -> Result<i64> {
        let cutoff = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM api_log WHERE called_at > ?1",
            params![cutoff],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn counts(&self) -> Result<LibraryCounts> {
        let count_status = |s: &str| -> Result<i64> {
            let n: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM books WHERE status = ?1",
                params![s],
                |r| r.get(0),
            )?;
            Ok(n)
        };

        Ok(LibraryCounts {
            total_books: self
                .conn
                .query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))?,
            queue_size: self.queue_len()?,
            fixed: count_status(status::FIXED)?,
            pending_fixes: count_status(status::PENDING_FIX)?,
            verified: count_status(status::VERIFIED)?,
        })
    }

    pub fn recent_stats(&self, days: usize) -> Result<Vec<DailyStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, scanned, queued, fixed, verified, api_calls
             FROM stats ORDER BY date DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![days as i64], |row| {
                Ok(DailyStats {
                    date: row.get(0)?,
                    scanned: row.get(1)?,
                    queued: row.get(2)?,
                    fixed: row.get(3)?,
                    verified: row.get(4)?,
                    api_calls: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_book_is_idempotent() {
        let store = seeded_store();
        let (book, inserted) = store
            .upsert_book("/lib/Dean Koontz/Whispers", "Dean Koontz", "Whispers")
            .unwrap();
        assert!(inserted);

        let (again, inserted) = store
            .upsert_book("/lib/Dean Koontz/Whispers", "Dean Koontz", "Whispers")
            .unwrap();
        assert!(!inserted);
        assert_eq!(book.id, again.id);
        assert_eq!(store.counts().unwrap().total_books, 1);
    }

    #[test]
    fn test_enqueue_dedup_and_fifo_order() {
        let store = seeded_store();
        let (first, _) = store.upsert_book("/lib/A/One", "A", "One").unwrap();
        let (second, _) = store.upsert_book("/lib/B/Two", "B", "Two").unwrap();

        assert!(store.enqueue(first.id, "year_in_author").unwrap());
        assert!(store.enqueue(second.id, "comma_formatted_author").unwrap());
        assert!(!store.enqueue(first.id, "year_in_author").unwrap());

        assert_eq!(store.queue_len().unwrap(), 2);

        let batch = store.next_batch(10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].book_id, first.id);
        assert_eq!(batch[1].book_id, second.id);

        let batch = store.next_batch(1).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].book_id, first.id);
    }

    #[test]
    fn test_enqueue_marks_book_queued() {
        let store = seeded_store();
        let (book, _) = store.upsert_book("/lib/A/One", "A", "One").unwrap();
        store.enqueue(book.id, "format_junk_in_author").unwrap();
        let book = store.book_by_id(book.id).unwrap().unwrap();
        assert_eq!(book.status, status::QUEUED);
    }

    #[test]
    fn test_history_round_trip() {
        let store = seeded_store();
        let (book, _) = store
            .upsert_book("/lib/The Funhouse/Dean Koontz", "The Funhouse", "Dean Koontz")
            .unwrap();

        let id = store
            .insert_history(
                book.id,
                "The Funhouse",
                "Dean Koontz",
                "Dean Koontz",
                "The Funhouse",
                "/lib/The Funhouse/Dean Koontz",
                "/lib/Dean Koontz/The Funhouse",
                fix_status::PENDING,
            )
            .unwrap();

        let record = store.history_record(id).unwrap().unwrap();
        assert_eq!(record.new_author, "Dean Koontz");
        assert_eq!(record.status, fix_status::PENDING);

        store.set_history_status(id, fix_status::APPLIED).unwrap();
        let record = store.history_record(id).unwrap().unwrap();
        assert_eq!(record.status, fix_status::APPLIED);
    }

    #[test]
    fn test_api_rate_window_counts_recent_calls() {
        let store = seeded_store();
        assert_eq!(store.api_calls_in_last_hour().unwrap(), 0);
        store.log_api_call().unwrap();
        store.log_api_call().unwrap();
        assert_eq!(store.api_calls_in_last_hour().unwrap(), 2);

        // A call older than the window is not counted
        let stale = (Utc::now() - Duration::hours(2)).to_rfc3339();
        store
            .conn
            .execute("INSERT INTO api_log (called_at) VALUES (?1)", params![stale])
            .unwrap();
        assert_eq!(store.api_calls_in_last_hour().unwrap(), 2);
    }

    #[test]
    fn test_bump_stats_accumulates() {
        let store = seeded_store();
        store.bump_stats(5, 2, 0, 0).unwrap();
        store.bump_stats(3, 1, 1, 2).unwrap();

        let stats = store.recent_stats(7).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].scanned, 8);
        assert_eq!(stats[0].queued, 3);
        assert_eq!(stats[0].fixed, 1);
        assert_eq!(stats[0].verified, 2);
    }
}
