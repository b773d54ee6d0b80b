use super::tags::{delete_orphan_tags, get_or_create_link, get_or_create_tag, get_or_create_tags};
use super::Store;
use crate::error::{Result, TagmarkError};
use crate::models::{Bookmark, BookmarkChanges, NewBookmark};
use crate::utils::{now_utc, placeholders};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

const BOOKMARK_COLUMNS: &str = "b.id, b.title, b.notes, b.private, b.user_id, b.link_id, l.href,
     b.created_on, b.modified_on, b.indexed_on";

fn bookmark_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bookmark> {
    Ok(Bookmark {
        id: row.get(0)?,
        title: row.get(1)?,
        notes: row.get(2)?,
        private: row.get(3)?,
        user_id: row.get(4)?,
        link_id: row.get(5)?,
        url: row.get(6)?,
        created_on: row.get(7)?,
        modified_on: row.get(8)?,
        indexed_on: row.get(9)?,
        tags: Vec::new(),
    })
}

/// Load full bookmarks for `ids`, returned in the order of `ids`.
/// Ids with no row are skipped. Two queries regardless of `ids.len()`.
pub(crate) fn load_bookmarks(conn: &Connection, ids: &[i64]) -> Result<Vec<Bookmark>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {BOOKMARK_COLUMNS} FROM bookmarks b JOIN links l ON l.id = b.link_id
         WHERE b.id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut by_id: HashMap<i64, Bookmark> = stmt
        .query_map(params_from_iter(ids.iter()), bookmark_from_row)?
        .map(|r| r.map(|b| (b.id, b)))
        .collect::<rusqlite::Result<_>>()?;

    let sql = format!(
        "SELECT bt.bookmark_id, t.name FROM bookmark_tags bt JOIN tags t ON t.id = bt.tag_id
         WHERE bt.bookmark_id IN ({}) ORDER BY t.name ASC",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (bookmark_id, name) = row?;
        if let Some(bookmark) = by_id.get_mut(&bookmark_id) {
            bookmark.tags.push(name);
        }
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Replace the tag set of a bookmark with `names` (already normalized)
fn set_bookmark_tags(conn: &Connection, bookmark_id: i64, names: &[String]) -> Result<()> {
    let current: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT t.name FROM bookmark_tags bt JOIN tags t ON t.id = bt.tag_id
             WHERE bt.bookmark_id = ?1",
        )?;
        let rows = stmt.query_map([bookmark_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for name in current.iter().filter(|n| !names.contains(n)) {
        conn.execute(
            "DELETE FROM bookmark_tags WHERE bookmark_id = ?1
             AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
            (bookmark_id, name),
        )?;
    }
    for name in names.iter().filter(|n| !current.contains(n)) {
        let tag = get_or_create_tag(conn, name)?;
        conn.execute(
            "INSERT OR IGNORE INTO bookmark_tags (bookmark_id, tag_id) VALUES (?1, ?2)",
            (bookmark_id, tag.id),
        )?;
    }
    Ok(())
}

/// Insert a validated bookmark on an open transaction; no orphan cleanup
pub(crate) fn insert_bookmark(
    conn: &Connection,
    owner: Option<i64>,
    new: &NewBookmark,
    tags: &[String],
) -> Result<i64> {
    let link_id = get_or_create_link(conn, &new.url)?;
    let tag_ids: Vec<i64> = get_or_create_tags(conn, tags)?
        .into_iter()
        .map(|t| t.id)
        .collect();
    insert_bookmark_row(conn, owner, new, link_id, &tag_ids)
}

/// Insert a bookmark whose link and tags are already resolved to ids
pub(crate) fn insert_bookmark_row(
    conn: &Connection,
    owner: Option<i64>,
    new: &NewBookmark,
    link_id: i64,
    tag_ids: &[i64],
) -> Result<i64> {
    let now = now_utc();
    let created_on = new.created_on.unwrap_or(now);
    let modified_on = new.modified_on.unwrap_or(created_on);

    conn.execute(
        "INSERT INTO bookmarks (title, notes, private, user_id, link_id, created_on, modified_on)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        (
            &new.title,
            &new.notes,
            new.private,
            owner,
            link_id,
            created_on,
            modified_on,
        ),
    )?;
    let id = conn.last_insert_rowid();

    for tag_id in tag_ids {
        conn.execute(
            "INSERT OR IGNORE INTO bookmark_tags (bookmark_id, tag_id) VALUES (?1, ?2)",
            (id, tag_id),
        )?;
    }
    Ok(id)
}

impl Store {
    /// Fetch one bookmark by id, regardless of visibility
    pub fn get_bookmark(&self, id: i64) -> Result<Bookmark> {
        load_bookmarks(&self.conn, &[id])?
            .pop()
            .ok_or_else(|| TagmarkError::not_found("Bookmark", id))
    }

    /// Owner of a bookmark; `NotFound` if the bookmark does not exist
    pub fn bookmark_owner(&self, id: i64) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT user_id FROM bookmarks WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| TagmarkError::not_found("Bookmark", id))
    }

    /// Create a bookmark with its link and tags in one transaction
    pub fn add_bookmark(&self, owner: Option<i64>, new: &NewBookmark) -> Result<i64> {
        let tags = new.validate()?;
        let tx = self.conn.unchecked_transaction()?;
        let id = insert_bookmark(&tx, owner, new, &tags)?;
        delete_orphan_tags(&tx)?;
        tx.commit()?;
        log::debug!("Added bookmark {} with tags {:?}", id, tags);
        Ok(id)
    }

    /// Apply `changes` to a bookmark; bumps `modified_on`.
    /// Tags dropped from the bookmark are deleted if nothing else uses them.
    pub fn update_bookmark(&self, id: i64, changes: &BookmarkChanges) -> Result<()> {
        let tags = changes.validate()?;
        let tx = self.conn.unchecked_transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM bookmarks WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(TagmarkError::not_found("Bookmark", id));
        }

        if let Some(url) = &changes.url {
            let link_id = get_or_create_link(&tx, url)?;
            tx.execute(
                "UPDATE bookmarks SET link_id = ?1 WHERE id = ?2",
                (link_id, id),
            )?;
        }
        if let Some(title) = &changes.title {
            tx.execute("UPDATE bookmarks SET title = ?1 WHERE id = ?2", (title, id))?;
        }
        if let Some(notes) = &changes.notes {
            tx.execute("UPDATE bookmarks SET notes = ?1 WHERE id = ?2", (notes, id))?;
        }
        if let Some(private) = changes.private {
            tx.execute(
                "UPDATE bookmarks SET private = ?1 WHERE id = ?2",
                (private, id),
            )?;
        }
        if let Some(tags) = &tags {
            set_bookmark_tags(&tx, id, tags)?;
        }
        tx.execute(
            "UPDATE bookmarks SET modified_on = ?1 WHERE id = ?2",
            (now_utc(), id),
        )?;

        delete_orphan_tags(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a bookmark and any tags it leaves orphaned
    pub fn delete_bookmark(&self, id: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM bookmarks WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(TagmarkError::not_found("Bookmark", id));
        }
        delete_orphan_tags(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Move every bookmark of `owner` tagged `old` to `new`.
    /// Returns the ids of the bookmarks that changed.
    pub fn rename_tag(&self, owner: i64, old: &str, new: &str) -> Result<Vec<i64>> {
        let old = old.trim().to_lowercase();
        let new = new.trim().to_lowercase();
        crate::tags::validate_tag_name(&new)?;
        if old == new {
            return Err(TagmarkError::InvalidInput(
                "old and new tag names are the same".into(),
            ));
        }

        let tx = self.conn.unchecked_transaction()?;
        let old_id: i64 = tx
            .query_row("SELECT id FROM tags WHERE name = ?1", [&old], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| TagmarkError::not_found("Tag", &old))?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT b.id FROM bookmarks b JOIN bookmark_tags bt ON bt.bookmark_id = b.id
                 WHERE bt.tag_id = ?1 AND b.user_id = ?2 ORDER BY b.id",
            )?;
            let rows = stmt.query_map((old_id, owner), |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let new_tag = get_or_create_tag(&tx, &new)?;
        let now = now_utc();
        for id in &ids {
            tx.execute(
                "DELETE FROM bookmark_tags WHERE bookmark_id = ?1 AND tag_id = ?2",
                (id, old_id),
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO bookmark_tags (bookmark_id, tag_id) VALUES (?1, ?2)",
                (id, new_tag.id),
            )?;
            tx.execute(
                "UPDATE bookmarks SET modified_on = ?1 WHERE id = ?2",
                (now, id),
            )?;
        }

        delete_orphan_tags(&tx)?;
        tx.commit()?;
        log::debug!("Renamed tag {:?} to {:?} on {} bookmarks", old, new, ids.len());
        Ok(ids)
    }

    /// Stamp the last successful index sync; `false` if the bookmark is gone
    pub fn mark_indexed(&self, id: i64, when: DateTime<Utc>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE bookmarks SET indexed_on = ?1 WHERE id = ?2",
            (when, id),
        )?;
        Ok(updated > 0)
    }

    /// Ids of the bookmarks owned by `owner`, oldest first
    pub fn user_bookmark_ids(&self, owner: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM bookmarks WHERE user_id = ?1 ORDER BY created_on, id")?;
        let ids = stmt
            .query_map([owner], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Every bookmark id, ascending
    pub fn all_bookmark_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM bookmarks ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Load several bookmarks by id, keeping the order of `ids`
    pub fn get_bookmarks(&self, ids: &[i64]) -> Result<Vec<Bookmark>> {
        load_bookmarks(&self.conn, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(store: &Store, url: &str, tags: &[&str]) -> i64 {
        store
            .add_bookmark(Some(1), &NewBookmark::new(url, "Title").tags(tags))
            .unwrap()
    }

    fn store_with_user() -> Store {
        let store = Store::init_in_memory().unwrap();
        store
            .create_user(&crate::models::NewUser::new("alice", "alice@example.com", "x"))
            .unwrap();
        store
    }

    #[test]
    fn test_add_and_get_bookmark() {
        let store = store_with_user();
        let new = NewBookmark::new("https://example.com", "Example")
            .notes("Some notes")
            .tags(&["Web", "python"])
            .private(true);
        let id = store.add_bookmark(Some(1), &new).unwrap();

        let bookmark = store.get_bookmark(id).unwrap();
        assert_eq!(bookmark.title, "Example");
        assert_eq!(bookmark.notes, "Some notes");
        assert_eq!(bookmark.url, "https://example.com");
        assert!(bookmark.private);
        assert_eq!(bookmark.user_id, Some(1));
        assert_eq!(bookmark.tags, vec!["python", "web"]);
        assert_eq!(bookmark.created_on, bookmark.modified_on);
        assert!(bookmark.indexed_on.is_none());
    }

    #[test]
    fn test_same_url_reuses_link() {
        let store = store_with_user();
        let a = add(&store, "https://example.com", &["a"]);
        let b = add(&store, "https://example.com", &["b"]);
        assert_eq!(
            store.get_bookmark(a).unwrap().link_id,
            store.get_bookmark(b).unwrap().link_id
        );
    }

    #[test]
    fn test_get_bookmark_not_found() {
        let store = store_with_user();
        assert!(store.get_bookmark(999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_bookmark_fields_and_tags() {
        let store = store_with_user();
        let id = add(&store, "https://example.com", &["web", "old"]);
        let before = store.get_bookmark(id).unwrap();

        let changes = BookmarkChanges {
            url: Some("https://example.org".into()),
            title: Some("Renamed".into()),
            tags: Some(vec!["web".into(), "New".into()]),
            ..Default::default()
        };
        store.update_bookmark(id, &changes).unwrap();

        let after = store.get_bookmark(id).unwrap();
        assert_eq!(after.title, "Renamed");
        assert_eq!(after.url, "https://example.org");
        assert_eq!(after.tags, vec!["new", "web"]);
        assert_eq!(after.created_on, before.created_on);
        assert!(after.modified_on >= before.modified_on);
        // "old" lost its last reference
        assert!(store.get_tag("old").unwrap_err().is_not_found());
        // the previous link is kept
        assert!(store.get_link("https://example.com").is_ok());
    }

    #[test]
    fn test_update_missing_bookmark() {
        let store = store_with_user();
        let result = store.update_bookmark(42, &BookmarkChanges::default());
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_removes_orphan_tags_only() {
        let store = store_with_user();
        let a = add(&store, "https://a.example", &["shared", "only-a"]);
        add(&store, "https://b.example", &["shared"]);

        store.delete_bookmark(a).unwrap();
        assert!(store.get_bookmark(a).unwrap_err().is_not_found());
        assert!(store.get_tag("only-a").unwrap_err().is_not_found());
        assert!(store.get_tag("shared").is_ok());
        assert!(store.delete_bookmark(a).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_tag() {
        let store = store_with_user();
        let a = add(&store, "https://a.example", &["js"]);
        let b = add(&store, "https://b.example", &["js", "javascript"]);

        let changed = store.rename_tag(1, "JS", "javascript").unwrap();
        assert_eq!(changed, vec![a, b]);
        assert_eq!(store.get_bookmark(a).unwrap().tags, vec!["javascript"]);
        assert_eq!(store.get_bookmark(b).unwrap().tags, vec!["javascript"]);
        assert!(store.get_tag("js").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_tag_only_touches_owner() {
        let store = store_with_user();
        store
            .create_user(&crate::models::NewUser::new("bob", "bob@example.com", "x"))
            .unwrap();
        let mine = add(&store, "https://a.example", &["js"]);
        let theirs = store
            .add_bookmark(Some(2), &NewBookmark::new("https://b.example", "B").tags(&["js"]))
            .unwrap();

        store.rename_tag(1, "js", "ecmascript").unwrap();
        assert_eq!(store.get_bookmark(mine).unwrap().tags, vec!["ecmascript"]);
        assert_eq!(store.get_bookmark(theirs).unwrap().tags, vec!["js"]);
    }

    #[test]
    fn test_mark_indexed() {
        let store = store_with_user();
        let id = add(&store, "https://a.example", &["a"]);
        let when = now_utc();
        assert!(store.mark_indexed(id, when).unwrap());
        assert_eq!(store.get_bookmark(id).unwrap().indexed_on, Some(when));
        assert!(!store.mark_indexed(999, when).unwrap());
    }

    #[test]
    fn test_get_bookmarks_keeps_order() {
        let store = store_with_user();
        let a = add(&store, "https://a.example", &["a"]);
        let b = add(&store, "https://b.example", &["b"]);
        let c = add(&store, "https://c.example", &["c"]);
        let ids: Vec<_> = store
            .get_bookmarks(&[c, 999, a, b])
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![c, a, b]);
        assert_eq!(store.all_bookmark_ids().unwrap(), vec![a, b, c]);
    }
}
