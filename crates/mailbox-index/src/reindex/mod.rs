//! Background reindexing
//!
//! A [`MailboxIndex`] runs at most one reindex job at a time. The job lives on
//! its own thread and feeds items through the write batcher as out-of-sequence
//! writes, taking the mailbox lock once per item. Progress is kept in atomics
//! so [`MailboxIndex::get_reindex_status`] never waits on the job.
//!
//! ```text
//! Idle --start--> Running --done--> Idle
//!                    |
//!                    +--cancel--> Cancelled
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::MailboxIndex;
use crate::models::{ItemId, ItemType, ModSeq};

/// Live counters shared with the job thread
#[derive(Debug, Default)]
struct ReindexProgress {
    succeeded: AtomicU64,
    failed: AtomicU64,
    total: AtomicU64,
    running: AtomicBool,
    cancelled: AtomicBool,
    /// Serializes changes to `running` with cancellation
    transition: Mutex<()>,
}

impl ReindexProgress {
    fn transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Zero the counters and mark a new job running
    fn start(&self, total: u64) {
        let _transition = self.transition();
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    fn finish(&self) {
        let _transition = self.transition();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Flag a running job for cancellation; false when nothing is running
    fn request_cancel(&self) -> bool {
        let _transition = self.transition();
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    fn snapshot(&self) -> ReindexStatus {
        ReindexStatus {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}

/// Clears the running flag however the job ends
struct RunningFlag(Arc<ReindexProgress>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Reindex bookkeeping owned by a [`MailboxIndex`]
#[derive(Debug, Default)]
pub(crate) struct ReindexSlot {
    progress: Arc<ReindexProgress>,
    job: Mutex<Option<JoinHandle<()>>>,
}

/// Which items a reindex covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReindexScope {
    /// Every item; the index is cleared first
    All,
    Types(BTreeSet<ItemType>),
    Ids(Vec<ItemId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartOutcome {
    Started,
    /// A job was already running; its counters were left alone
    AlreadyRunning,
}

/// Coarse state of a handle's reindex job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexState {
    Idle,
    Running,
    Cancelled,
}

impl ReindexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Point-in-time copy of reindex progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexStatus {
    pub succeeded: u64,
    pub failed: u64,
    /// 0 while unknown
    pub total: u64,
    pub running: bool,
    pub cancelled: bool,
}

impl ReindexStatus {
    /// Items still to process; 0 while the total is unknown
    pub fn remaining(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        self.total.saturating_sub(self.succeeded + self.failed)
    }

    pub fn state(&self) -> ReindexState {
        if self.cancelled {
            ReindexState::Cancelled
        } else if self.running {
            ReindexState::Running
        } else {
            ReindexState::Idle
        }
    }
}

impl MailboxIndex {
    /// Rebuild the whole index in the background
    pub fn start_reindex(self: &Arc<Self>) -> Result<StartOutcome> {
        self.start_reindex_scope(ReindexScope::All)
    }

    /// Reindex every item of the given types
    pub fn start_reindex_by_type(
        self: &Arc<Self>,
        types: BTreeSet<ItemType>,
    ) -> Result<StartOutcome> {
        self.start_reindex_scope(ReindexScope::Types(types))
    }

    /// Reindex specific items
    pub fn start_reindex_by_id(self: &Arc<Self>, ids: Vec<ItemId>) -> Result<StartOutcome> {
        self.start_reindex_scope(ReindexScope::Ids(ids))
    }

    pub fn start_reindex_scope(self: &Arc<Self>, scope: ReindexScope) -> Result<StartOutcome> {
        let progress = &self.reindex.progress;
        let mut job = self.reindex.job.lock().map_err(|_| {
            IndexError::LockPoisoned(format!("reindex job of mailbox {}", self.mailbox_id()))
        })?;

        if progress.running.load(Ordering::SeqCst) {
            info!(
                "Reindex already running on mailbox {}",
                self.mailbox_id()
            );
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(finished) = job.take() {
            if finished.join().is_err() {
                warn!("Previous reindex of mailbox {} panicked", self.mailbox_id());
            }
        }

        // Typed scopes are listed up front so the total is known
        let ids = match scope {
            ReindexScope::All => None,
            ReindexScope::Types(types) => {
                let mailbox = self.mailbox()?;
                let ids = mailbox
                    .store()
                    .list_item_ids(Some(&types))
                    .map_err(|e| IndexError::store("list items for reindex", e))?;
                Some(ids)
            }
            ReindexScope::Ids(ids) => Some(ids),
        };

        progress.start(ids.as_ref().map_or(0, |ids| ids.len() as u64));

        let index = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("reindex-{}", self.mailbox_id()))
            .spawn(move || index.run_reindex(ids));
        match spawned {
            Ok(handle) => {
                *job = Some(handle);
                info!("Started reindex of mailbox {}", self.mailbox_id());
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                progress.finish();
                Err(IndexError::indexing("spawn reindex thread", e.into()))
            }
        }
    }

    /// Snapshot of the current or last job's progress
    pub fn get_reindex_status(&self) -> ReindexStatus {
        self.reindex.progress.snapshot()
    }

    /// Ask a running job to stop after its current item
    ///
    /// Items already indexed stay indexed. Does nothing when idle.
    pub fn cancel_reindex(&self) -> ReindexStatus {
        let progress = &self.reindex.progress;
        if progress.request_cancel() {
            info!("Cancelling reindex of mailbox {}", self.mailbox_id());
        }
        progress.snapshot()
    }

    /// Block until the current job, if any, has finished
    pub fn wait_for_reindex(&self) -> ReindexStatus {
        let handle = self
            .reindex
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Reindex of mailbox {} panicked", self.mailbox_id());
            }
        }
        self.get_reindex_status()
    }

    fn run_reindex(self: Arc<Self>, ids: Option<Vec<ItemId>>) {
        let progress = Arc::clone(&self.reindex.progress);
        let _running = RunningFlag(Arc::clone(&progress));

        let ids = match ids {
            Some(ids) => ids,
            None => match self.clear_for_reindex() {
                Ok(ids) => {
                    progress.total.store(ids.len() as u64, Ordering::SeqCst);
                    ids
                }
                Err(e) => {
                    error!("Reindex of mailbox {} could not start: {}", self.mailbox_id(), e);
                    return;
                }
            },
        };

        for id in ids {
            if progress.cancelled.load(Ordering::SeqCst) {
                info!("Reindex of mailbox {} cancelled", self.mailbox_id());
                break;
            }
            match self.reindex_item(id) {
                Ok(()) => {
                    progress.succeeded.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) if e.is_fatal() => {
                    progress.failed.fetch_add(1, Ordering::SeqCst);
                    error!(
                        "Reindex of mailbox {} stopped at item {}: {}",
                        self.mailbox_id(),
                        id,
                        e
                    );
                    break;
                }
                Err(e) => {
                    progress.failed.fetch_add(1, Ordering::SeqCst);
                    warn!("Reindex of item {} in mailbox {} failed: {}", id, self.mailbox_id(), e);
                }
            }
        }

        let status = progress.snapshot();
        info!(
            "Reindex of mailbox {} finished: {} succeeded, {} failed",
            self.mailbox_id(),
            status.succeeded,
            status.failed
        );
    }

    /// Empty the index and list every item to rebuild it from
    fn clear_for_reindex(&self) -> Result<Vec<ItemId>> {
        let mailbox = self.mailbox()?;
        self.locked(&mailbox, |_, locked| locked.clear())?;
        let ids = mailbox
            .store()
            .list_item_ids(None)
            .map_err(|e| IndexError::store("list items for reindex", e))?;
        debug!("Reindexing {} items of mailbox {}", ids.len(), self.mailbox_id());
        Ok(ids)
    }

    fn reindex_item(&self, id: ItemId) -> Result<()> {
        let mailbox = self.mailbox()?;
        self.locked(&mailbox, |_, locked| {
            let item = mailbox
                .store()
                .load_item(id)
                .map_err(|e| IndexError::store(format!("load item {id}"), e))?
                .ok_or(IndexError::ItemNotFound(id))?;

            locked.begin_write()?;
            let indexed =
                locked.index_item(&item.item, &item.documents, ModSeq::OutOfSequence, true);
            let ended = locked.end_write();
            indexed?;
            ended
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::index::with_mailbox_and_index_locked;
    use crate::mailbox::{InMemoryItemStore, Mailbox, MailboxId};
    use crate::models::{IndexDocument, IndexItem, IndexableItem};

    fn item(id: u32, item_type: ItemType) -> IndexableItem {
        IndexableItem::new(
            IndexItem::new(ItemId(id), item_type),
            vec![IndexDocument::new(format!("item number {id}"))],
        )
    }

    fn mailbox_with(id: u32, items: Vec<IndexableItem>) -> Arc<Mailbox> {
        Mailbox::builder(MailboxId(id))
            .store(Arc::new(InMemoryItemStore::with_items(items)))
            .build()
    }

    #[test]
    fn test_remaining() {
        let status = |total, succeeded, failed| ReindexStatus {
            succeeded,
            failed,
            total,
            running: true,
            cancelled: false,
        };
        assert_eq!(status(10, 7, 1).remaining(), 2);
        assert_eq!(status(10, 10, 0).remaining(), 0);
        assert_eq!(status(0, 3, 1).remaining(), 0);
        assert_eq!(status(2, 3, 1).remaining(), 0);
    }

    #[test]
    fn test_state_labels() {
        let mut status = ReindexStatus::default();
        assert_eq!(status.state().as_str(), "idle");
        status.running = true;
        assert_eq!(status.state().as_str(), "running");
        status.cancelled = true;
        assert_eq!(status.state().as_str(), "cancelled");
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let mailbox = Mailbox::builder(MailboxId(1)).build();
        let index = mailbox.index().unwrap();
        let status = index.cancel_reindex();
        assert_eq!(status, ReindexStatus::default());
        assert_eq!(status.state(), ReindexState::Idle);
    }

    #[test]
    fn test_cancel_after_finish_stays_idle() {
        let mailbox = mailbox_with(4, vec![item(1, ItemType::Message)]);
        let index = mailbox.index().unwrap();
        index.start_reindex().unwrap();
        index.wait_for_reindex();

        let status = index.cancel_reindex();
        assert!(!status.cancelled);
        assert_eq!(status.state(), ReindexState::Idle);
    }

    #[test]
    fn test_job_finish_waits_for_cancel_check() {
        let progress = Arc::new(ReindexProgress::default());
        progress.start(3);

        // A job ending while a cancel holds the transition lock waits for it
        let transition = progress.transition();
        let flag = RunningFlag(Arc::clone(&progress));
        let finisher = thread::spawn(move || drop(flag));
        thread::sleep(Duration::from_millis(50));
        assert!(progress.running.load(Ordering::SeqCst));
        progress.cancelled.store(true, Ordering::SeqCst);
        drop(transition);
        finisher.join().unwrap();

        let status = progress.snapshot();
        assert!(!status.running);
        assert_eq!(status.state(), ReindexState::Cancelled);

        // Once finished, a cancel request is refused
        progress.start(3);
        progress.finish();
        assert!(!progress.request_cancel());
        assert_eq!(progress.snapshot().state(), ReindexState::Idle);
    }

    #[test]
    fn test_reindex_all_rebuilds_from_store() {
        let mailbox = mailbox_with(2, vec![item(1, ItemType::Message), item(2, ItemType::Contact)]);
        let index = mailbox.index().unwrap();

        // A document with no backing item disappears on a full rebuild
        with_mailbox_and_index_locked(&mailbox, |_, locked| {
            locked.index_item(
                &IndexItem::new(ItemId(99), ItemType::Message),
                &[IndexDocument::new("stale")],
                ModSeq::OutOfSequence,
                true,
            )
        })
        .unwrap();
        assert_eq!(index.num_docs().unwrap(), 1);

        assert_eq!(index.start_reindex().unwrap(), StartOutcome::Started);
        let status = index.wait_for_reindex();
        assert_eq!((status.succeeded, status.failed, status.total), (2, 0, 2));
        assert!(!status.running);
        assert_eq!(index.num_docs().unwrap(), 2);
        assert_eq!(mailbox.index_watermark(), None);
    }

    #[test]
    fn test_reindex_by_type_sets_total_up_front() {
        let mailbox = mailbox_with(
            3,
            vec![
                item(1, ItemType::Message),
                item(2, ItemType::Contact),
                item(3, ItemType::Message),
            ],
        );
        let index = mailbox.index().unwrap();

        index
            .start_reindex_by_type(BTreeSet::from([ItemType::Message]))
            .unwrap();
        assert_eq!(index.get_reindex_status().total, 2);
        let status = index.wait_for_reindex();
        assert_eq!((status.succeeded, status.failed), (2, 0));
        assert_eq!(index.num_docs().unwrap(), 2);
    }

    #[test]
    fn test_missing_item_counts_as_failed() {
        let mailbox = mailbox_with(4, vec![item(1, ItemType::Message)]);
        let index = mailbox.index().unwrap();

        index.start_reindex_by_id(vec![ItemId(1), ItemId(42)]).unwrap();
        let status = index.wait_for_reindex();
        assert_eq!((status.succeeded, status.failed, status.total), (1, 1, 2));
        assert_eq!(status.remaining(), 0);
    }

    #[test]
    fn test_restart_resets_counters() {
        let mailbox = mailbox_with(5, vec![item(1, ItemType::Message)]);
        let index = mailbox.index().unwrap();

        index.start_reindex_by_id(vec![ItemId(7)]).unwrap();
        assert_eq!(index.wait_for_reindex().failed, 1);

        index.start_reindex_by_id(vec![ItemId(1)]).unwrap();
        let status = index.wait_for_reindex();
        assert_eq!((status.succeeded, status.failed, status.total), (1, 0, 1));
    }
}
