//! Bulk loading of bookmarks and the JSON backup format.
//!
//! An import runs in a single store transaction. Link and tag ids are
//! resolved once per natural key and reused for every following row.

use crate::db::{
    delete_orphan_tags, get_or_create_link, get_or_create_tag, insert_bookmark_row, Store,
};
use crate::error::Result;
use crate::models::{Bookmark, NewBookmark, NewUser};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub const BACKUP_VERSION: u32 = 1;

/// Values keyed by a natural key, created on first lookup
#[derive(Debug)]
pub struct KeyedCache<K, V> {
    items: HashMap<K, V>,
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> KeyedCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, or the result of `create` which is then cached.
    /// A failed `create` caches nothing.
    pub fn get_or_try_insert<Q, F>(&mut self, key: &Q, create: F) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(&Q) -> Result<V>,
    {
        if let Some(value) = self.items.get(key) {
            return Ok(value.clone());
        }
        let value = create(key)?;
        self.items.insert(key.to_owned(), value.clone());
        Ok(value)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.items.get(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// New bookmark ids, in input order
    pub imported: Vec<i64>,
    /// Position within its list and reason for every rejected row
    pub skipped: Vec<(usize, String)>,
    pub users_created: usize,
}

/// One user and everything they saved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserBackup {
    pub username: String,
    pub email: String,
    #[serde(alias = "password")]
    pub password_hash: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub bookmarks: Vec<NewBookmark>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backup {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "backup")]
    pub users: Vec<UserBackup>,
}

fn default_version() -> u32 {
    BACKUP_VERSION
}

impl Backup {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn bookmark_count(&self) -> usize {
        self.users.iter().map(|u| u.bookmarks.len()).sum()
    }
}

fn backup_row(bookmark: Bookmark) -> NewBookmark {
    NewBookmark {
        url: bookmark.url,
        title: bookmark.title,
        notes: bookmark.notes,
        tags: bookmark.tags,
        private: bookmark.private,
        created_on: Some(bookmark.created_on),
        modified_on: Some(bookmark.modified_on),
    }
}

/// Snapshot every user with their bookmarks, oldest first
pub fn export_backup(store: &Store) -> Result<Backup> {
    let mut users = Vec::new();
    for user in store.list_users()? {
        let ids = store.user_bookmark_ids(user.id)?;
        let bookmarks = store
            .get_bookmarks(&ids)?
            .into_iter()
            .map(backup_row)
            .collect();
        users.push(UserBackup {
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            display_name: Some(user.display_name),
            admin: user.admin,
            bookmarks,
        });
    }
    let backup = Backup {
        version: BACKUP_VERSION,
        users,
    };
    info!(
        "Exported {} bookmarks of {} users",
        backup.bookmark_count(),
        backup.users.len()
    );
    Ok(backup)
}

/// Inserts many bookmarks at once, caching link and tag ids by name
pub struct BulkImporter<'a> {
    store: &'a Store,
    links: KeyedCache<String, i64>,
    tags: KeyedCache<String, i64>,
}

impl<'a> BulkImporter<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            links: KeyedCache::new(),
            tags: KeyedCache::new(),
        }
    }

    /// Insert `rows` for `owner`. Rows failing validation are skipped and
    /// reported; any storage error rolls the whole import back.
    pub fn import<I>(&mut self, owner: Option<i64>, rows: I) -> Result<ImportReport>
    where
        I: IntoIterator<Item = NewBookmark>,
    {
        let store = self.store;
        let tx = store.transaction()?;
        let mut report = ImportReport::default();
        self.insert_rows(&tx, owner, rows, &mut report)?;
        delete_orphan_tags(&tx)?;
        tx.commit()?;
        info!(
            "Imported {} bookmarks, skipped {}",
            report.imported.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Load a backup; users are matched by email and created when missing
    pub fn import_backup(&mut self, backup: &Backup) -> Result<ImportReport> {
        let store = self.store;
        let tx = store.transaction()?;
        let mut report = ImportReport::default();
        for user in &backup.users {
            let owner = match store.get_user_by_email(&user.email)? {
                Some(existing) => {
                    debug!("Restoring into existing user {}", existing.username);
                    existing.id
                }
                None => {
                    let created = store.create_user(&NewUser {
                        username: user.username.clone(),
                        email: user.email.clone(),
                        password_hash: user.password_hash.clone(),
                        admin: user.admin,
                        display_name: user.display_name.clone(),
                    })?;
                    report.users_created += 1;
                    created.id
                }
            };
            self.insert_rows(&tx, Some(owner), user.bookmarks.iter().cloned(), &mut report)?;
        }
        delete_orphan_tags(&tx)?;
        tx.commit()?;
        info!(
            "Restored {} bookmarks ({} new users), skipped {}",
            report.imported.len(),
            report.users_created,
            report.skipped.len()
        );
        Ok(report)
    }

    fn insert_rows<I>(
        &mut self,
        conn: &Connection,
        owner: Option<i64>,
        rows: I,
        report: &mut ImportReport,
    ) -> Result<()>
    where
        I: IntoIterator<Item = NewBookmark>,
    {
        for (position, row) in rows.into_iter().enumerate() {
            let tags = match row.validate() {
                Ok(tags) => tags,
                Err(e) => {
                    warn!("Skipping import row {}: {}", position, e);
                    report.skipped.push((position, e.to_string()));
                    continue;
                }
            };
            let link_id = self
                .links
                .get_or_try_insert(row.url.as_str(), |url| get_or_create_link(conn, url))?;
            let tag_ids = tags
                .iter()
                .map(|name| {
                    self.tags
                        .get_or_try_insert(name.as_str(), |name| Ok(get_or_create_tag(conn, name)?.id))
                })
                .collect::<Result<Vec<_>>>()?;
            report
                .imported
                .push(insert_bookmark_row(conn, owner, &row, link_id, &tag_ids)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagmarkError;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use tempfile::tempdir;

    fn store() -> Store {
        let store = Store::init_in_memory().unwrap();
        store
            .create_user(&NewUser::new("alice", "alice@example.com", "hash"))
            .unwrap();
        store
    }

    #[test]
    fn test_keyed_cache_creates_once() {
        let calls = Cell::new(0);
        let mut cache: KeyedCache<String, i64> = KeyedCache::new();
        for _ in 0..3 {
            let value = cache
                .get_or_try_insert("python", |_| {
                    calls.set(calls.get() + 1);
                    Ok(7)
                })
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.get("python"), Some(&7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keyed_cache_does_not_keep_failures() {
        let mut cache: KeyedCache<String, i64> = KeyedCache::new();
        let failed = cache.get_or_try_insert("x", |_| Err(TagmarkError::InvalidInput("no".into())));
        assert!(failed.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_try_insert("x", |_| Ok(1)).unwrap(), 1);
    }

    #[test]
    fn test_import_shares_links_and_tags() {
        let store = store();
        let mut importer = BulkImporter::new(&store);
        let rows = vec![
            NewBookmark::new("https://a.example", "A").tags(&["Python", "web"]),
            NewBookmark::new("https://a.example", "A again").tags(&["python"]),
            NewBookmark::new("https://b.example", "B").tags(&["web"]),
        ];
        let report = importer.import(Some(1), rows).unwrap();

        assert_eq!(report.imported.len(), 3);
        assert!(report.skipped.is_empty());
        assert_eq!(importer.links.len(), 2);
        assert_eq!(importer.tags.len(), 2);
        let first = store.get_bookmark(report.imported[0]).unwrap();
        let second = store.get_bookmark(report.imported[1]).unwrap();
        assert_eq!(first.link_id, second.link_id);
        assert_eq!(first.tags, vec!["python", "web"]);
    }

    #[test]
    fn test_import_keeps_timestamps_and_skips_bad_rows() {
        let store = store();
        let created = Utc.with_ymd_and_hms(2012, 5, 1, 10, 0, 0).unwrap();
        let rows = vec![
            NewBookmark::new("https://old.example", "Old").created_on(created),
            NewBookmark::new("https://bad.example", "Bad").tags(&["curly{brace"]),
        ];
        let report = BulkImporter::new(&store).import(Some(1), rows).unwrap();

        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.skipped[0].0, 1);
        let old = store.get_bookmark(report.imported[0]).unwrap();
        assert_eq!(old.created_on, created);
        assert_eq!(old.modified_on, created);
    }

    #[test]
    fn test_backup_round_trip_through_file() {
        let source = store();
        source
            .add_bookmark(
                Some(1),
                &NewBookmark::new("https://rust-lang.org", "Rust")
                    .tags(&["rust"])
                    .private(true),
            )
            .unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.json");
        export_backup(&source).unwrap().save(&path).unwrap();

        let target = Store::init_in_memory().unwrap();
        let backup = Backup::load(&path).unwrap();
        let report = BulkImporter::new(&target).import_backup(&backup).unwrap();

        assert_eq!(report.users_created, 1);
        let user = target.get_user_by_username("alice").unwrap();
        assert_eq!(user.password_hash, "hash");
        let restored = target.get_bookmark(report.imported[0]).unwrap();
        assert_eq!(restored.user_id, Some(user.id));
        assert!(restored.private);
        assert_eq!(restored.tags, vec!["rust"]);
    }

    #[test]
    fn test_backup_accepts_legacy_field_names() {
        let json = r#"{"backup": [{
            "username": "alice",
            "email": "alice@example.com",
            "password": "hash",
            "bookmarks": [{
                "url": "https://example.com",
                "title": "Example",
                "tags": ["demo"],
                "creation_date": "2013-01-02T03:04:05Z"
            }]
        }]}"#;
        let backup: Backup = serde_json::from_str(json).unwrap();
        assert_eq!(backup.version, BACKUP_VERSION);

        let store = store();
        let report = BulkImporter::new(&store).import_backup(&backup).unwrap();
        assert_eq!(report.users_created, 0);
        let restored = store.get_bookmark(report.imported[0]).unwrap();
        assert_eq!(restored.user_id, Some(1));
        assert_eq!(restored.created_on.to_rfc3339(), "2013-01-02T03:04:05+00:00");
    }
}
