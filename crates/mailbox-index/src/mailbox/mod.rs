//! Mailbox: lock owner, item source and index handle registry
//!
//! A [`Mailbox`] owns at most one [`MailboxIndex`], created lazily on first
//! use and kept until [`Mailbox::discard_index`]. All index mutation happens
//! while the mailbox lock is held; [`MailboxGuard`] is the proof of that, and
//! the index write lock can only be taken with one.

mod account;
mod store;

pub use account::{AccountConfig, StaticAccountConfig};
pub use store::{InMemoryItemStore, ItemStore};

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::{IndexEngine, IndexLocation, TantivyEngine};
use crate::error::{IndexError, Result};
use crate::index::{
    IndexWriteGuard, MailboxIndex, holds_index_write_lock, with_mailbox_and_index_locked,
};
use crate::models::{IndexableItem, ItemId, ModSeq, SyncToken};

/// Mailbox identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MailboxId(pub u32);

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives "indexed through" notifications
pub trait IndexingListener: Send + Sync {
    fn indexing_completed(
        &self,
        mailbox: MailboxId,
        count: usize,
        token: SyncToken,
        succeeded: bool,
    );
}

/// Opens the engine backing a mailbox's index
pub type EngineFactory =
    Box<dyn Fn(MailboxId) -> anyhow::Result<Box<dyn IndexEngine>> + Send + Sync>;

#[derive(Debug, Default)]
struct IndexWatermark {
    through: Option<SyncToken>,
    /// Set once an in-order batch fails; later commits cannot close the gap
    gap: bool,
}

/// A mailbox as seen by the index coordinator
pub struct Mailbox {
    id: MailboxId,
    account: Arc<dyn AccountConfig>,
    store: Arc<dyn ItemStore>,
    lock: Mutex<()>,
    last_change: AtomicU64,
    watermark: Mutex<IndexWatermark>,
    index: RwLock<Option<Arc<MailboxIndex>>>,
    listener: Option<Arc<dyn IndexingListener>>,
    engine_factory: EngineFactory,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("account", &self.account.account_id())
            .field("last_change", &self.last_change.load(Ordering::SeqCst))
            .finish()
    }
}

/// Builder for [`Mailbox`]
pub struct MailboxBuilder {
    id: MailboxId,
    account: Option<Arc<dyn AccountConfig>>,
    store: Option<Arc<dyn ItemStore>>,
    listener: Option<Arc<dyn IndexingListener>>,
    engine_factory: Option<EngineFactory>,
}

impl MailboxBuilder {
    pub fn account(mut self, account: Arc<dyn AccountConfig>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn store(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn IndexingListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(MailboxId) -> anyhow::Result<Box<dyn IndexEngine>> + Send + Sync + 'static,
    {
        self.engine_factory = Some(Box::new(factory));
        self
    }

    /// Keep the index on disk under `root/<mailbox id>`
    pub fn index_root(self, root: impl Into<PathBuf>, writer_heap_bytes: usize) -> Self {
        let root = root.into();
        self.engine_factory(move |id| {
            let location = IndexLocation::Directory(root.join(id.to_string()));
            Ok(Box::new(TantivyEngine::open(location, writer_heap_bytes)?))
        })
    }

    pub fn build(self) -> Arc<Mailbox> {
        let id = self.id;
        Arc::new(Mailbox {
            id,
            account: self
                .account
                .unwrap_or_else(|| Arc::new(StaticAccountConfig::new(id.to_string()))),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryItemStore::new())),
            lock: Mutex::new(()),
            last_change: AtomicU64::new(0),
            watermark: Mutex::new(IndexWatermark::default()),
            index: RwLock::new(None),
            listener: self.listener,
            engine_factory: self
                .engine_factory
                .unwrap_or_else(|| Box::new(in_memory_engine) as EngineFactory),
        })
    }
}

fn in_memory_engine(_: MailboxId) -> anyhow::Result<Box<dyn IndexEngine>> {
    Ok(Box::new(TantivyEngine::in_memory()?))
}

/// Proof that the current thread holds a mailbox's lock
///
/// Not `Send`: the lock is released on the thread that took it.
pub struct MailboxGuard<'a> {
    mailbox: &'a Mailbox,
    owner: ThreadId,
    _lock: MutexGuard<'a, ()>,
}

impl MailboxGuard<'_> {
    pub fn mailbox_id(&self) -> MailboxId {
        self.mailbox.id
    }

    pub(crate) fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Allocate the next modification sequence for a mutation
    pub fn next_mod_seq(&mut self) -> ModSeq {
        ModSeq::Sequenced(self.mailbox.last_change.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn last_change(&self) -> u64 {
        self.mailbox.last_change.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MailboxGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxGuard")
            .field("mailbox", &self.mailbox.id)
            .field("owner", &self.owner)
            .finish()
    }
}

impl Mailbox {
    pub fn builder(id: MailboxId) -> MailboxBuilder {
        MailboxBuilder {
            id,
            account: None,
            store: None,
            listener: None,
            engine_factory: None,
        }
    }

    pub fn id(&self) -> MailboxId {
        self.id
    }

    pub fn account(&self) -> &dyn AccountConfig {
        self.account.as_ref()
    }

    pub fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    /// Acquire the mailbox lock
    ///
    /// Must not be called while this thread holds an index write lock.
    pub fn lock(&self) -> MailboxGuard<'_> {
        debug_assert!(
            !holds_index_write_lock(),
            "mailbox {} locked while holding an index write lock",
            self.id
        );
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        MailboxGuard {
            mailbox: self,
            owner: thread::current().id(),
            _lock: lock,
        }
    }

    fn registry_poisoned(&self) -> IndexError {
        IndexError::LockPoisoned(format!("index registry of mailbox {}", self.id))
    }

    /// The mailbox's index handle, opened on first use
    pub fn index(self: &Arc<Self>) -> Result<Arc<MailboxIndex>> {
        if let Some(index) = self.cached_index()? {
            return Ok(index);
        }

        let mut slot = self.index.write().map_err(|_| self.registry_poisoned())?;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let engine = (self.engine_factory)(self.id)
            .map_err(|e| IndexError::indexing(format!("open index for mailbox {}", self.id), e))?;
        let index = Arc::new(MailboxIndex::new(self, engine));
        *slot = Some(Arc::clone(&index));
        info!("Opened index for mailbox {}", self.id);
        Ok(index)
    }

    /// The index handle if it has been opened
    pub fn cached_index(&self) -> Result<Option<Arc<MailboxIndex>>> {
        let slot = self.index.read().map_err(|_| self.registry_poisoned())?;
        Ok(slot.as_ref().map(Arc::clone))
    }

    /// Drop the cached index handle, cancelling any running reindex
    pub fn discard_index(&self) -> Option<Arc<MailboxIndex>> {
        let taken = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(index) = &taken {
            index.cancel_reindex();
            debug!("Discarded index handle for mailbox {}", self.id);
        }
        taken
    }

    /// Store an item and index it as the next mutation
    pub fn add_item(self: &Arc<Self>, item: IndexableItem) -> Result<ModSeq> {
        with_mailbox_and_index_locked(self, |guard, locked| {
            let mod_seq = guard.next_mod_seq();
            self.store_and_index(locked, item, mod_seq)?;
            Ok(mod_seq)
        })
    }

    /// Store and index several items in one bulk-write session
    pub fn add_items(self: &Arc<Self>, items: Vec<IndexableItem>) -> Result<Vec<ModSeq>> {
        with_mailbox_and_index_locked(self, |guard, locked| {
            locked.begin_write()?;

            let mut mod_seqs = Vec::with_capacity(items.len());
            let mut result = Ok(());
            for item in items {
                let mod_seq = guard.next_mod_seq();
                if let Err(e) = self.store_and_index(locked, item, mod_seq) {
                    result = Err(e);
                    break;
                }
                mod_seqs.push(mod_seq);
            }

            let ended = locked.end_write();
            result?;
            ended?;
            Ok(mod_seqs)
        })
    }

    fn store_and_index(
        &self,
        locked: &mut IndexWriteGuard<'_>,
        item: IndexableItem,
        mod_seq: ModSeq,
    ) -> Result<()> {
        self.store
            .put_item(item.clone())
            .map_err(|e| IndexError::store(format!("store item {}", item.id()), e))?;
        locked.index_item(&item.item, &item.documents, mod_seq, true)
    }

    /// Remove an item and its documents; false if the item did not exist
    pub fn delete_item(self: &Arc<Self>, id: ItemId) -> Result<bool> {
        with_mailbox_and_index_locked(self, |guard, locked| {
            let existed = self
                .store
                .remove_item(id)
                .map_err(|e| IndexError::store(format!("remove item {id}"), e))?;
            if !existed {
                return Ok(false);
            }
            let mod_seq = guard.next_mod_seq();
            locked.delete_documents(&[id], mod_seq)?;
            Ok(true)
        })
    }

    /// Re-resolve the index analyzer after an account setting change
    pub fn refresh_analyzer(self: &Arc<Self>) -> Result<()> {
        with_mailbox_and_index_locked(self, |_, locked| locked.refresh_analyzer())
    }

    /// Record that the index is caught up through `token`
    pub fn indexing_completed(&self, count: usize, token: SyncToken, succeeded: bool) {
        {
            let mut watermark = self.watermark.lock().unwrap_or_else(PoisonError::into_inner);
            if succeeded {
                if !watermark.gap && watermark.through.is_none_or(|t| token > t) {
                    watermark.through = Some(token);
                }
                debug!(
                    "Mailbox {} indexed {} items through {}",
                    self.id, count, token
                );
            } else {
                watermark.gap = true;
                warn!(
                    "Mailbox {} failed to index {} items through {}",
                    self.id, count, token
                );
            }
        }

        if let Some(listener) = &self.listener {
            listener.indexing_completed(self.id, count, token, succeeded);
        }
    }

    /// Highest sync token the index is known to be caught up with
    pub fn index_watermark(&self) -> Option<SyncToken> {
        self.watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .through
    }

    /// Whether the text index lags the mailbox's mutations
    pub fn is_text_index_out_of_sync(&self) -> bool {
        let last_change = self.last_change.load(Ordering::SeqCst);
        let watermark = self.watermark.lock().unwrap_or_else(PoisonError::into_inner);
        watermark.gap || watermark.through.map_or(0, |t| t.change()) < last_change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexDocument, IndexItem, ItemType};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingListener {
        calls: StdMutex<Vec<(usize, SyncToken, bool)>>,
    }

    impl IndexingListener for RecordingListener {
        fn indexing_completed(
            &self,
            _: MailboxId,
            count: usize,
            token: SyncToken,
            succeeded: bool,
        ) {
            self.calls.lock().unwrap().push((count, token, succeeded));
        }
    }

    fn message(id: u32, text: &str) -> IndexableItem {
        IndexableItem::new(
            IndexItem::new(ItemId(id), ItemType::Message),
            vec![IndexDocument::new(text)],
        )
    }

    #[test]
    fn test_index_handle_is_cached() {
        let mailbox = Mailbox::builder(MailboxId(1)).build();
        assert!(mailbox.cached_index().unwrap().is_none());
        let first = mailbox.index().unwrap();
        let second = mailbox.index().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let discarded = mailbox.discard_index().unwrap();
        assert!(Arc::ptr_eq(&first, &discarded));
        let reopened = mailbox.index().unwrap();
        assert!(!Arc::ptr_eq(&first, &reopened));
    }

    #[test]
    fn test_add_item_advances_watermark() {
        let listener = Arc::new(RecordingListener::default());
        let mailbox = Mailbox::builder(MailboxId(2))
            .listener(listener.clone())
            .build();

        let seq = mailbox.add_item(message(1, "hello")).unwrap();
        assert_eq!(seq, ModSeq::Sequenced(1));
        assert_eq!(mailbox.index_watermark(), Some(SyncToken(1)));
        assert!(!mailbox.is_text_index_out_of_sync());
        assert_eq!(*listener.calls.lock().unwrap(), vec![(1, SyncToken(1), true)]);
    }

    #[test]
    fn test_add_items_reports_once() {
        let listener = Arc::new(RecordingListener::default());
        let mailbox = Mailbox::builder(MailboxId(3))
            .listener(listener.clone())
            .build();

        let seqs = mailbox
            .add_items(vec![message(1, "a"), message(2, "b"), message(3, "c")])
            .unwrap();
        assert_eq!(seqs.len(), 3);
        assert_eq!(*listener.calls.lock().unwrap(), vec![(3, SyncToken(3), true)]);
        assert_eq!(mailbox.store().count_items().unwrap(), 3);
    }

    #[test]
    fn test_delete_item() {
        let mailbox = Mailbox::builder(MailboxId(4)).build();
        mailbox.add_item(message(1, "hello")).unwrap();
        assert!(mailbox.delete_item(ItemId(1)).unwrap());
        assert!(!mailbox.delete_item(ItemId(1)).unwrap());
        assert_eq!(mailbox.index_watermark(), Some(SyncToken(2)));
        assert_eq!(mailbox.index().unwrap().num_docs().unwrap(), 0);
    }

    #[test]
    fn test_out_of_sync_until_indexed() {
        let mailbox = Mailbox::builder(MailboxId(5)).build();
        {
            let mut guard = mailbox.lock();
            guard.next_mod_seq();
        }
        assert!(mailbox.is_text_index_out_of_sync());
        mailbox.indexing_completed(1, SyncToken(1), true);
        assert!(!mailbox.is_text_index_out_of_sync());
    }

    #[test]
    fn test_failed_batch_leaves_gap() {
        let mailbox = Mailbox::builder(MailboxId(6)).build();
        {
            let mut guard = mailbox.lock();
            guard.next_mod_seq();
            guard.next_mod_seq();
        }
        mailbox.indexing_completed(1, SyncToken(1), false);
        mailbox.indexing_completed(1, SyncToken(2), true);
        assert_eq!(mailbox.index_watermark(), None);
        assert!(mailbox.is_text_index_out_of_sync());
    }

    struct SwitchableAccount {
        analyzer: StdMutex<Option<String>>,
    }

    impl AccountConfig for SwitchableAccount {
        fn account_id(&self) -> &str {
            "switchable"
        }

        fn text_analyzer(&self) -> anyhow::Result<Option<String>> {
            Ok(self.analyzer.lock().unwrap().clone())
        }

        fn batched_indexing_size(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_refresh_analyzer_follows_account() {
        let account = Arc::new(SwitchableAccount {
            analyzer: StdMutex::new(None),
        });
        let mailbox = Mailbox::builder(MailboxId(8))
            .account(account.clone())
            .build();
        let index = mailbox.index().unwrap();
        assert_eq!(index.analyzer().unwrap().name(), "standard");

        *account.analyzer.lock().unwrap() = Some("english".to_string());
        mailbox.refresh_analyzer().unwrap();
        assert_eq!(index.analyzer().unwrap().name(), "english");
    }

    #[test]
    fn test_engine_factory_failure() {
        let mailbox = Mailbox::builder(MailboxId(7))
            .engine_factory(|_| Err(anyhow::anyhow!("no space")))
            .build();
        let err = mailbox.index().unwrap_err();
        assert!(matches!(err, IndexError::IndexingFailed { .. }));
    }
}
