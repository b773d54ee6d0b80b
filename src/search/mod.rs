//! Full-text search index over bookmark documents.
//!
//! The index lives in its own SQLite database as an FTS5 table keyed by
//! bookmark id. It is derived data: every document can be rebuilt from the
//! bookmark store.

mod query;

pub use query::{parse_query, to_match_expression, QueryExpr, SEARCHABLE_FIELDS};

use crate::error::{Result, TagmarkError};
use crate::models::Bookmark;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Fields searched when a query term names none
pub const DEFAULT_FIELDS: &[&str] = &["notes", "title", "tags"];

/// Searchable projection of a bookmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub notes: String,
    /// Comma separated lowercase tag names
    pub tags: String,
}

impl Document {
    pub fn from_bookmark(bookmark: &Bookmark) -> Self {
        Self {
            id: bookmark.id,
            title: bookmark.title.clone(),
            notes: bookmark.notes.clone(),
            tags: bookmark
                .tags
                .iter()
                .map(|t| t.to_lowercase())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// One page of ranked hits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    /// Bookmark ids, best match first
    pub ids: Vec<i64>,
    /// Number of matching documents over all pages
    pub total: u64,
    pub page: usize,
    pub page_len: usize,
    /// Tag name and number of matching documents carrying it, most common first
    pub facets: Vec<(String, u64)>,
}

fn match_error(err: rusqlite::Error) -> TagmarkError {
    match &err {
        rusqlite::Error::SqliteFailure(_, Some(msg))
            if msg.contains("fts5") || msg.contains("syntax error") || msg.contains("no such column") =>
        {
            TagmarkError::InvalidQuery(msg.clone())
        }
        _ => err.into(),
    }
}

pub struct SearchIndex {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SearchIndex {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::setup(conn, PathBuf::from(":memory:"))
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::setup(conn, path.to_path_buf())
    }

    fn setup(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS documents USING fts5(
                id UNINDEXED,
                title,
                notes,
                tags,
                tokenize = 'unicode61 remove_diacritics 2'
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panicking writer leaves no open transaction behind: IndexWriter
        // rolls back on drop.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exclusive writer; blocks while another writer is alive
    pub fn writer(&self) -> Result<IndexWriter<'_>> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(IndexWriter {
            conn,
            finished: false,
        })
    }

    /// Add or replace the document of `bookmark` and commit
    pub fn index_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let writer = self.writer()?;
        writer.upsert(&Document::from_bookmark(bookmark))?;
        writer.commit()
    }

    /// Same as [`SearchIndex::index_bookmark`]: documents are always replaced whole
    pub fn update_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        self.index_bookmark(bookmark)
    }

    /// Remove the document of `id`; a missing document is not an error
    pub fn delete_bookmark(&self, id: i64) -> Result<()> {
        let writer = self.writer()?;
        writer.delete(id)?;
        writer.commit()
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let doc = self
            .lock()
            .query_row(
                "SELECT rowid, title, notes, tags FROM documents WHERE rowid = ?1",
                [id],
                |row| {
                    Ok(Document {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        notes: row.get(2)?,
                        tags: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(doc)
    }

    pub fn document_count(&self) -> Result<u64> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn ranked_ids(
        conn: &Connection,
        expression: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT rowid FROM documents WHERE documents MATCH ?1
             ORDER BY rank, rowid LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map((expression, limit as i64, offset as i64), |row| row.get(0))
            .map_err(match_error)?;
        let ids = rows
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(match_error)?;
        Ok(ids)
    }

    /// Ids of the `limit` best-ranked documents matching `query`. The index
    /// knows nothing about visibility, so callers resolve these against the
    /// store before showing anything.
    pub fn matching_ids(&self, query: &str, fields: &[String], limit: usize) -> Result<Vec<i64>> {
        let expression = to_match_expression(query, fields)?;
        log::debug!("search {:?} compiled to {}", query, expression);
        Self::ranked_ids(&self.lock(), &expression, limit, 0)
    }

    /// Ranked search over `fields`. Malformed queries are `InvalidQuery`;
    /// a query matching nothing is an empty page.
    ///
    /// Totals and facets cover every indexed document, private ones
    /// included. This is an index maintenance view; user-facing search goes
    /// through `QueryEngine::full_text_search`.
    pub fn search(
        &self,
        query: &str,
        page: usize,
        page_len: usize,
        fields: &[String],
    ) -> Result<SearchPage> {
        if page < 1 || page_len < 1 {
            return Err(TagmarkError::InvalidInput(format!(
                "invalid page {page} of length {page_len}"
            )));
        }
        let expression = to_match_expression(query, fields)?;
        log::debug!("search {:?} compiled to {}", query, expression);

        let conn = self.lock();
        let ids = Self::ranked_ids(&conn, &expression, page_len, (page - 1) * page_len)?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut total = 0u64;
        {
            let mut stmt = conn.prepare("SELECT tags FROM documents WHERE documents MATCH ?1")?;
            let rows = stmt
                .query_map([&expression], |row| row.get::<_, String>(0))
                .map_err(match_error)?;
            for tags in rows {
                let tags = tags.map_err(match_error)?;
                total += 1;
                for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    *counts.entry(tag.to_string()).or_default() += 1;
                }
            }
        }
        let mut facets: Vec<(String, u64)> = counts.into_iter().collect();
        facets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(SearchPage {
            ids,
            total,
            page,
            page_len,
            facets,
        })
    }
}

/// Open write transaction on the index; rolls back on drop unless committed.
pub struct IndexWriter<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl IndexWriter<'_> {
    /// Insert `doc`, replacing any document with the same id
    pub fn upsert(&self, doc: &Document) -> Result<()> {
        self.conn
            .execute("DELETE FROM documents WHERE rowid = ?1", [doc.id])?;
        self.conn.execute(
            "INSERT INTO documents (rowid, id, title, notes, tags) VALUES (?1, ?1, ?2, ?3, ?4)",
            (doc.id, &doc.title, &doc.notes, &doc.tags),
        )?;
        Ok(())
    }

    /// Returns whether a document was removed
    pub fn delete(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM documents WHERE rowid = ?1", [id])?;
        Ok(removed > 0)
    }

    /// Remove every document
    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM documents", [])?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for IndexWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
