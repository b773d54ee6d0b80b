//! Bookmark write path.
//!
//! Every mutation commits to the store first and then tells an [`IndexHook`]
//! so the search index can follow. Hook failures never undo a committed
//! write; they are logged and the index catches up on the next reindex.

use crate::config::{Config, IndexingMode};
use crate::db::Store;
use crate::error::{Result, TagmarkError};
use crate::import::{Backup, BulkImporter, ImportReport};
use crate::models::{Bookmark, BookmarkChanges, NewBookmark};
use crate::queue::IndexQueue;
use crate::search::SearchIndex;
use crate::utils::now_utc;
use log::{debug, error};

/// How a hook handled a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Handed to the index worker
    Queued,
    /// Already applied to the index
    Indexed,
}

/// Receives committed bookmark changes
pub trait IndexHook {
    fn bookmark_saved(&self, bookmark: &Bookmark, created: bool) -> Result<HookOutcome>;
    fn bookmark_deleted(&self, bookmark_id: i64) -> Result<HookOutcome>;
}

/// Enqueues index operations for the worker
pub struct QueueHook {
    queue: IndexQueue,
}

impl QueueHook {
    pub fn new(queue: IndexQueue) -> Self {
        Self { queue }
    }
}

impl IndexHook for QueueHook {
    fn bookmark_saved(&self, bookmark: &Bookmark, created: bool) -> Result<HookOutcome> {
        if created {
            self.queue.push_index(bookmark.id)?;
        } else {
            self.queue.push_update(bookmark.id)?;
        }
        Ok(HookOutcome::Queued)
    }

    fn bookmark_deleted(&self, bookmark_id: i64) -> Result<HookOutcome> {
        self.queue.push_delete(bookmark_id)?;
        Ok(HookOutcome::Queued)
    }
}

/// Writes straight into the index
pub struct DirectHook<'a> {
    index: &'a SearchIndex,
}

impl<'a> DirectHook<'a> {
    pub fn new(index: &'a SearchIndex) -> Self {
        Self { index }
    }
}

impl IndexHook for DirectHook<'_> {
    fn bookmark_saved(&self, bookmark: &Bookmark, _created: bool) -> Result<HookOutcome> {
        self.index.index_bookmark(bookmark)?;
        Ok(HookOutcome::Indexed)
    }

    fn bookmark_deleted(&self, bookmark_id: i64) -> Result<HookOutcome> {
        self.index.delete_bookmark(bookmark_id)?;
        Ok(HookOutcome::Indexed)
    }
}

/// The hook configured by `indexing.mode`
pub fn select_hook<'a>(
    config: &Config,
    queue: IndexQueue,
    index: &'a SearchIndex,
) -> Box<dyn IndexHook + 'a> {
    match config.indexing.mode {
        IndexingMode::Queue => Box::new(QueueHook::new(queue)),
        IndexingMode::Direct => Box::new(DirectHook::new(index)),
    }
}

/// A committed write plus the bookmarks whose index notification failed.
/// The search index lags for `unsynced` ids until the next reindex.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub value: T,
    pub unsynced: Vec<i64>,
}

impl<T> Committed<T> {
    pub fn is_synced(&self) -> bool {
        self.unsynced.is_empty()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

pub struct Archive<'a> {
    store: &'a Store,
    hook: Box<dyn IndexHook + 'a>,
}

impl<'a> Archive<'a> {
    pub fn new(store: &'a Store, hook: Box<dyn IndexHook + 'a>) -> Self {
        Self { store, hook }
    }

    /// Returns whether the index was told about the change
    fn notify_saved(&self, bookmark: &Bookmark, created: bool) -> bool {
        match self.hook.bookmark_saved(bookmark, created) {
            Ok(HookOutcome::Indexed) => {
                if let Err(e) = self.store.mark_indexed(bookmark.id, now_utc()) {
                    error!("Could not stamp bookmark {} as indexed: {}", bookmark.id, e);
                }
                true
            }
            Ok(HookOutcome::Queued) => true,
            Err(e) => {
                error!("Index hook failed for bookmark {} (non-fatal): {}", bookmark.id, e);
                false
            }
        }
    }

    fn notify_deleted(&self, bookmark_id: i64) -> bool {
        match self.hook.bookmark_deleted(bookmark_id) {
            Ok(_) => true,
            Err(e) => {
                error!("Index hook failed for deleted bookmark {} (non-fatal): {}", bookmark_id, e);
                false
            }
        }
    }

    fn notify_saved_all(&self, ids: &[i64], created: bool) -> Result<Vec<i64>> {
        Ok(self
            .store
            .get_bookmarks(ids)?
            .iter()
            .filter(|bookmark| !self.notify_saved(bookmark, created))
            .map(|bookmark| bookmark.id)
            .collect())
    }

    fn check_owner(&self, owner: i64, bookmark_id: i64) -> Result<()> {
        if self.store.bookmark_owner(bookmark_id)? != Some(owner) {
            return Err(TagmarkError::PermissionDenied(format!(
                "bookmark {bookmark_id} does not belong to user {owner}"
            )));
        }
        Ok(())
    }

    fn saved(&self, bookmark: Bookmark, created: bool) -> Committed<Bookmark> {
        let unsynced = if self.notify_saved(&bookmark, created) {
            Vec::new()
        } else {
            vec![bookmark.id]
        };
        Committed {
            value: bookmark,
            unsynced,
        }
    }

    pub fn create_bookmark(&self, owner: i64, new: &NewBookmark) -> Result<Committed<Bookmark>> {
        let id = self.store.add_bookmark(Some(owner), new)?;
        let bookmark = self.store.get_bookmark(id)?;
        Ok(self.saved(bookmark, true))
    }

    /// Apply `changes` to a bookmark of `owner`. An empty change set leaves
    /// the bookmark untouched.
    pub fn update_bookmark(
        &self,
        owner: i64,
        id: i64,
        changes: &BookmarkChanges,
    ) -> Result<Committed<Bookmark>> {
        self.check_owner(owner, id)?;
        if changes.is_empty() {
            debug!("Nothing to update on bookmark {}", id);
            return Ok(Committed {
                value: self.store.get_bookmark(id)?,
                unsynced: Vec::new(),
            });
        }
        self.store.update_bookmark(id, changes)?;
        let bookmark = self.store.get_bookmark(id)?;
        Ok(self.saved(bookmark, false))
    }

    pub fn delete_bookmark(&self, owner: i64, id: i64) -> Result<Committed<()>> {
        self.check_owner(owner, id)?;
        self.store.delete_bookmark(id)?;
        let unsynced = if self.notify_deleted(id) {
            Vec::new()
        } else {
            vec![id]
        };
        Ok(Committed {
            value: (),
            unsynced,
        })
    }

    /// Rename a tag across the bookmarks of `owner`; the value is the ids of
    /// the retagged bookmarks
    pub fn rename_tag(&self, owner: i64, old: &str, new: &str) -> Result<Committed<Vec<i64>>> {
        let changed = self.store.rename_tag(owner, old, new)?;
        let unsynced = self.notify_saved_all(&changed, false)?;
        Ok(Committed {
            value: changed,
            unsynced,
        })
    }

    /// Delete a user and everything they saved; the value is the ids of the
    /// deleted bookmarks
    pub fn delete_user(&self, user_id: i64) -> Result<Committed<Vec<i64>>> {
        let deleted = self.store.delete_user(user_id)?;
        let unsynced = deleted
            .iter()
            .copied()
            .filter(|id| !self.notify_deleted(*id))
            .collect();
        Ok(Committed {
            value: deleted,
            unsynced,
        })
    }

    /// Import bookmarks for `owner` in one transaction
    pub fn import<I>(&self, owner: i64, rows: I) -> Result<Committed<ImportReport>>
    where
        I: IntoIterator<Item = NewBookmark>,
    {
        let report = BulkImporter::new(self.store).import(Some(owner), rows)?;
        let unsynced = self.notify_saved_all(&report.imported, true)?;
        Ok(Committed {
            value: report,
            unsynced,
        })
    }

    /// Load a backup, creating missing users, in one transaction
    pub fn restore(&self, backup: &Backup) -> Result<Committed<ImportReport>> {
        let report = BulkImporter::new(self.store).import_backup(backup)?;
        let unsynced = self.notify_saved_all(&report.imported, true)?;
        Ok(Committed {
            value: report,
            unsynced,
        })
    }
}
