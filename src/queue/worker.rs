use super::{Decoded, IndexOp, IndexQueue, QueueMessage};
use crate::db::Store;
use crate::error::Result;
use crate::models::Bookmark;
use crate::search::{Document, SearchIndex};
use crate::utils::now_utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Bookmarks loaded per round trip during a full reindex
const REINDEX_BATCH: usize = 500;

/// Shortest pause after a broker error, whatever the poll interval
const MIN_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// What a single `work_once` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing arrived within the wait
    Idle,
    Indexed(i64),
    Deleted(i64),
    /// Undecodable, unknown or stale message; discarded
    Dropped,
    /// Processing failed; the message stays on the processing list
    Failed(i64),
}

/// Consumer side of the index queue
pub struct IndexWorker<'a> {
    store: &'a Store,
    index: &'a SearchIndex,
    queue: IndexQueue,
}

impl<'a> IndexWorker<'a> {
    pub fn new(store: &'a Store, index: &'a SearchIndex, queue: IndexQueue) -> Self {
        Self {
            store,
            index,
            queue,
        }
    }

    pub fn queue(&self) -> &IndexQueue {
        &self.queue
    }

    /// Take at most one message and handle it.
    ///
    /// Errors are only returned for broker failures; a failing bookmark is
    /// reported as [`WorkOutcome::Failed`] and its message is left in flight.
    pub fn work_once(&self, wait: Duration) -> Result<WorkOutcome> {
        let broker = self.queue.broker();
        let Some(payload) =
            broker.move_next(self.queue.incoming(), self.queue.processing(), wait)?
        else {
            return Ok(WorkOutcome::Idle);
        };
        log::debug!("Processing new operation: {}", payload);

        let outcome = match QueueMessage::decode(&payload) {
            Err(e) => {
                log::warn!("Dropping invalid message {:?}: {}", payload, e);
                WorkOutcome::Dropped
            }
            Ok(Decoded::UnknownOp { code, bookmark_id }) => {
                log::error!("Invalid op {} for bookmark {}", code, bookmark_id);
                WorkOutcome::Dropped
            }
            Ok(Decoded::Message(message)) => match self.process(message) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!(
                        "Failed to {} bookmark {}: {}",
                        message.op,
                        message.bookmark_id,
                        e
                    );
                    return Ok(WorkOutcome::Failed(message.bookmark_id));
                }
            },
        };

        broker.remove(self.queue.processing(), &payload)?;
        log::debug!("Operation on {} completed", payload);
        Ok(outcome)
    }

    fn process(&self, message: QueueMessage) -> Result<WorkOutcome> {
        let id = message.bookmark_id;
        match message.op {
            IndexOp::Index | IndexOp::Update => {
                let bookmark = match self.store.get_bookmark(id) {
                    Ok(bookmark) => bookmark,
                    Err(e) if e.is_not_found() => {
                        log::warn!("Bookmark {} is gone, dropping {}", id, message.op);
                        self.index.delete_bookmark(id)?;
                        return Ok(WorkOutcome::Dropped);
                    }
                    Err(e) => return Err(e),
                };
                self.index_bookmark(&bookmark)?;
                Ok(WorkOutcome::Indexed(id))
            }
            IndexOp::Delete => {
                self.index.delete_bookmark(id)?;
                Ok(WorkOutcome::Deleted(id))
            }
        }
    }

    fn index_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let writer = self.index.writer()?;
        writer.upsert(&Document::from_bookmark(bookmark))?;
        writer.commit()?;
        self.store.mark_indexed(bookmark.id, now_utc())?;
        Ok(())
    }

    /// Process messages until `shutdown` is set. Returns the number of
    /// messages taken off the queue.
    pub fn run(&self, shutdown: &AtomicBool, wait: Duration) -> usize {
        log::info!(
            "Index worker listening on {:?} (processing list {:?})",
            self.queue.incoming(),
            self.queue.processing()
        );
        let mut processed = 0;
        while !shutdown.load(Ordering::SeqCst) {
            match self.work_once(wait) {
                Ok(WorkOutcome::Idle) => {}
                Ok(_) => processed += 1,
                Err(e) => {
                    log::error!("Queue broker error: {}", e);
                    std::thread::sleep(wait.max(MIN_ERROR_BACKOFF));
                }
            }
        }
        log::info!("Index worker stopped after {} messages", processed);
        processed
    }

    /// Rebuild the whole index from the store in one index transaction.
    /// Returns the number of documents written.
    pub fn reindex_all(&self) -> Result<usize> {
        let ids = self.store.all_bookmark_ids()?;
        let writer = self.index.writer()?;
        writer.clear()?;
        for chunk in ids.chunks(REINDEX_BATCH) {
            for bookmark in self.store.get_bookmarks(chunk)? {
                writer.upsert(&Document::from_bookmark(&bookmark))?;
            }
        }
        writer.commit()?;

        let now = now_utc();
        let tx = self.store.transaction()?;
        for id in &ids {
            self.store.mark_indexed(*id, now)?;
        }
        tx.commit()?;
        log::info!("Reindexed {} bookmarks", ids.len());
        Ok(ids.len())
    }
}
