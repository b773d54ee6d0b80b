use super::Store;
use crate::error::{Result, TagmarkError};
use crate::models::Tag;
use crate::tags::normalize_tags;
use crate::utils::placeholders;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

/// Find or insert a tag; the name is lowercased first
pub(crate) fn get_or_create_tag(conn: &Connection, name: &str) -> Result<Tag> {
    let name = name.trim().to_lowercase();
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", [&name])?;
    let id: i64 = conn.query_row("SELECT id FROM tags WHERE name = ?1", [&name], |row| {
        row.get(0)
    })?;
    Ok(Tag { id, name })
}

/// Find or insert every tag in `names` (lowercased, deduplicated, sorted)
pub(crate) fn get_or_create_tags<S: AsRef<str>>(conn: &Connection, names: &[S]) -> Result<Vec<Tag>> {
    normalize_tags(names)
        .iter()
        .map(|name| get_or_create_tag(conn, name))
        .collect()
}

/// Existing tags among `names`; unknown names are skipped
pub(crate) fn find_tags<S: AsRef<str>>(conn: &Connection, names: &[S]) -> Result<Vec<Tag>> {
    let names = normalize_tags(names);
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, name FROM tags WHERE name IN ({}) ORDER BY name",
        placeholders(names.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(params_from_iter(names.iter()), |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

/// Delete tags no bookmark refers to. Must run inside the transaction that
/// changed the bookmark-tag association.
pub(crate) fn delete_orphan_tags(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM tags WHERE NOT EXISTS
            (SELECT 1 FROM bookmark_tags bt WHERE bt.tag_id = tags.id)",
        [],
    )?;
    if deleted > 0 {
        log::debug!("Deleted {} orphan tags", deleted);
    }
    Ok(deleted)
}

/// Find or insert a link by its exact URL
pub(crate) fn get_or_create_link(conn: &Connection, href: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO links (href) VALUES (?1)", [href])?;
    let id = conn.query_row("SELECT id FROM links WHERE href = ?1", [href], |row| {
        row.get(0)
    })?;
    Ok(id)
}

impl Store {
    /// Look up a tag by name, case-insensitively
    pub fn get_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim().to_lowercase();
        self.conn
            .query_row("SELECT id, name FROM tags WHERE name = ?1", [&name], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?
            .ok_or_else(|| TagmarkError::not_found("Tag", name))
    }

    pub fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        get_or_create_tag(&self.conn, name)
    }

    pub fn get_or_create_tags<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Tag>> {
        let tx = self.conn.unchecked_transaction()?;
        let tags = get_or_create_tags(&tx, names)?;
        tx.commit()?;
        Ok(tags)
    }

    /// Tags matching `names`, ignoring case
    pub fn get_many_tags<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Tag>> {
        find_tags(&self.conn, names)
    }

    /// Tags whose name starts with `prefix`, ascending by name
    pub fn search_tags(&self, prefix: &str, limit: usize) -> Result<Vec<Tag>> {
        let escaped = prefix
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let mut stmt = self.conn.prepare(
            "SELECT id, name FROM tags WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name ASC LIMIT ?2",
        )?;
        let tags = stmt
            .query_map((format!("{escaped}%"), limit as i64), |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn delete_orphan_tags(&self) -> Result<usize> {
        delete_orphan_tags(&self.conn)
    }

    /// Look up a link id by its exact URL
    pub fn get_link(&self, href: &str) -> Result<i64> {
        self.conn
            .query_row("SELECT id FROM links WHERE href = ?1", [href], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| TagmarkError::not_found("Link", href))
    }
}
