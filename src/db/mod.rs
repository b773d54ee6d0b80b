//! Relational store: schema, transactions and the row-level helpers the
//! query engine and the write path build on.

mod bookmarks;
mod dialect;
mod tags;
mod users;

pub use dialect::Dialect;
pub(crate) use bookmarks::{insert_bookmark_row, load_bookmarks};
pub(crate) use tags::{delete_orphan_tags, get_or_create_link, get_or_create_tag};

use crate::error::Result;
use rusqlite::{Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};

pub struct Store {
    conn: Connection,
    db_path: PathBuf,
}

impl Store {
    pub fn init_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        };
        db.setup_tables()?;
        Ok(db)
    }

    pub fn init(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let db = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        db.setup_tables()?;
        Ok(db)
    }

    /// Get the database file path
    pub fn get_path(&self) -> &Path {
        &self.db_path
    }

    /// Backend capabilities of this store
    pub fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction; dropping it without `commit()` rolls back
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    fn setup_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id integer PRIMARY KEY,
                username text NOT NULL UNIQUE,
                email text NOT NULL UNIQUE,
                password_hash text NOT NULL,
                active integer NOT NULL DEFAULT 1,
                admin integer NOT NULL DEFAULT 0,
                display_name text NOT NULL DEFAULT '',
                created_at text NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watched_users (
                user_id integer NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                other_user_id integer NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, other_user_id)
            );

            CREATE TABLE IF NOT EXISTS reset_tokens (
                id integer PRIMARY KEY,
                user_id integer NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                token text NOT NULL,
                created_at text NOT NULL
            );

            CREATE TABLE IF NOT EXISTS links (
                id integer PRIMARY KEY,
                href text NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS tags (
                id integer PRIMARY KEY,
                name text NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS bookmarks (
                id integer PRIMARY KEY,
                title text NOT NULL,
                notes text NOT NULL DEFAULT '',
                private integer NOT NULL DEFAULT 0,
                user_id integer REFERENCES users(id) ON DELETE CASCADE,
                link_id integer NOT NULL REFERENCES links(id),
                created_on text NOT NULL,
                modified_on text NOT NULL,
                indexed_on text
            );

            CREATE TABLE IF NOT EXISTS bookmark_tags (
                bookmark_id integer NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
                tag_id integer NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (bookmark_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_bookmarks_created ON bookmarks(created_on);
            CREATE INDEX IF NOT EXISTS idx_bookmarks_user ON bookmarks(user_id);
            CREATE INDEX IF NOT EXISTS idx_bookmark_tags_tag ON bookmark_tags(tag_id);",
        )?;
        Ok(())
    }
}
