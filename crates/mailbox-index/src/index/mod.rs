//! Per-mailbox index coordinator
//!
//! [`MailboxIndex`] owns one mailbox's engine handle. Mutations are methods
//! of the [`IndexWriteGuard`] handed out by [`with_mailbox_and_index_locked`];
//! searches and term browsing only take the read lock, long enough to open a
//! searcher.

mod lock;
mod sort;
mod writer;

pub use lock::{IndexWriteGuard, with_mailbox_and_index_locked};
pub(crate) use lock::holds_index_write_lock;
pub use sort::to_native_sort;
pub(crate) use writer::PendingBatch;

use std::sync::{Arc, RwLock, RwLockReadGuard, Weak};

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::{Analyzer, BrowseTerm, IndexEngine, IndexSearcher, TermField};
use crate::error::{IndexError, Result};
use crate::mailbox::{AccountConfig, Mailbox, MailboxId};
use crate::reindex::ReindexSlot;

/// Address fields whose domains can be browsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressField {
    From,
    To,
}

/// State guarded by the index lock
pub(crate) struct IndexState {
    pub(crate) engine: Box<dyn IndexEngine>,
    pub(crate) analyzer: Analyzer,
    /// Account setting the analyzer was resolved from
    analyzer_setting: Option<String>,
    pub(crate) batch: PendingBatch,
    pub(crate) write_depth: usize,
}

impl IndexState {
    /// Switch analyzers if the account setting changed
    fn apply_analyzer_setting(&mut self, setting: Option<String>, mailbox_id: MailboxId) {
        if setting == self.analyzer_setting {
            return;
        }
        let analyzer = Analyzer::resolve(setting.as_deref());
        if analyzer != self.analyzer {
            info!(
                "Mailbox {} text analyzer changed from {} to {}",
                mailbox_id,
                self.analyzer.name(),
                analyzer.name()
            );
        }
        self.analyzer = analyzer;
        self.analyzer_setting = setting;
    }
}

/// Index handle for one mailbox
///
/// Created and cached by [`Mailbox::index`]; holds only a weak reference back
/// to its mailbox.
pub struct MailboxIndex {
    mailbox_id: MailboxId,
    mailbox: Weak<Mailbox>,
    state: RwLock<IndexState>,
    pub(crate) reindex: ReindexSlot,
}

impl std::fmt::Debug for MailboxIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxIndex")
            .field("mailbox_id", &self.mailbox_id)
            .finish()
    }
}

/// Account analyzer setting; lookup failures use the default
fn analyzer_setting(account: &dyn AccountConfig) -> Option<String> {
    account.text_analyzer().unwrap_or_else(|e| {
        debug!(
            "Analyzer lookup failed for account {}: {:#}",
            account.account_id(),
            e
        );
        None
    })
}

/// Account batch size; lookup failures disable batching
fn batch_size(account: &dyn AccountConfig) -> usize {
    account.batched_indexing_size().unwrap_or_else(|e| {
        debug!(
            "Batch size lookup failed for account {}: {:#}",
            account.account_id(),
            e
        );
        0
    })
}

impl MailboxIndex {
    pub(crate) fn new(mailbox: &Arc<Mailbox>, engine: Box<dyn IndexEngine>) -> Self {
        let setting = analyzer_setting(mailbox.account());
        Self {
            mailbox_id: mailbox.id(),
            mailbox: Arc::downgrade(mailbox),
            state: RwLock::new(IndexState {
                engine,
                analyzer: Analyzer::resolve(setting.as_deref()),
                analyzer_setting: setting,
                batch: PendingBatch::default(),
                write_depth: 0,
            }),
            reindex: ReindexSlot::default(),
        }
    }

    pub fn mailbox_id(&self) -> MailboxId {
        self.mailbox_id
    }

    /// The owning mailbox, if it is still alive
    pub fn mailbox(&self) -> Result<Arc<Mailbox>> {
        self.mailbox
            .upgrade()
            .ok_or(IndexError::MailboxGone(self.mailbox_id))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state.read().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> IndexError {
        IndexError::LockPoisoned(format!("index of mailbox {}", self.mailbox_id))
    }

    /// Analyzer currently used for documents and queries
    pub fn analyzer(&self) -> Result<Analyzer> {
        Ok(self.read_state()?.analyzer.clone())
    }

    /// Account batch size for in-order writes; 0 when batching is disabled
    pub fn batched_indexing_count(&self) -> usize {
        self.mailbox
            .upgrade()
            .map_or(0, |mailbox| batch_size(mailbox.account()))
    }

    pub fn use_batched_indexing(&self) -> bool {
        self.batched_indexing_count() > 0
    }

    /// Open a searcher together with the analyzer queries must use
    pub(crate) fn open_searcher(&self) -> Result<(Box<dyn IndexSearcher>, Analyzer)> {
        let state = self.read_state()?;
        let searcher = state
            .engine
            .open_searcher()
            .map_err(|e| IndexError::query("open searcher", e))?;
        Ok((searcher, state.analyzer.clone()))
    }

    fn browse(&self, field: TermField, pattern: Option<&str>) -> Result<Vec<BrowseTerm>> {
        let regex = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| IndexError::InvalidRequest(format!("bad browse pattern: {e}")))?;
        self.read_state()?
            .engine
            .browse_terms(field, regex.as_ref())
            .map_err(|e| IndexError::query(format!("browse {field:?}"), e))
    }

    /// Domains appearing in an address field, optionally matching a regex
    pub fn browse_domains(
        &self,
        field: AddressField,
        pattern: Option<&str>,
    ) -> Result<Vec<BrowseTerm>> {
        let field = match field {
            AddressField::From => TermField::FromDomain,
            AddressField::To => TermField::ToDomain,
        };
        self.browse(field, pattern)
    }

    /// Attachment content types
    pub fn browse_attachments(&self, pattern: Option<&str>) -> Result<Vec<BrowseTerm>> {
        self.browse(TermField::Attachment, pattern)
    }

    /// Recognized object kinds
    pub fn browse_objects(&self, pattern: Option<&str>) -> Result<Vec<BrowseTerm>> {
        self.browse(TermField::Object, pattern)
    }

    /// Expand `prefix*` against a field's terms
    ///
    /// Returns at most `max` terms and whether that is every match.
    pub fn expand_wildcard_token(
        &self,
        field: TermField,
        prefix: &str,
        max: usize,
    ) -> Result<(Vec<String>, bool)> {
        self.read_state()?
            .engine
            .expand_prefix(field, &prefix.to_lowercase(), max)
            .map_err(|e| IndexError::query(format!("expand {prefix}*"), e))
    }

    pub fn num_docs(&self) -> Result<u64> {
        Ok(self.read_state()?.engine.num_docs())
    }

    pub fn bytes_read(&self) -> Result<u64> {
        Ok(self.read_state()?.engine.bytes_read())
    }

    pub fn bytes_written(&self) -> Result<u64> {
        Ok(self.read_state()?.engine.bytes_written())
    }

    /// Searchers opened and not yet released
    pub fn open_searchers(&self) -> Result<usize> {
        Ok(self.read_state()?.engine.open_searchers())
    }
}

impl IndexWriteGuard<'_> {
    /// Re-read the account's analyzer setting
    pub fn refresh_analyzer(&mut self) -> Result<()> {
        let setting = analyzer_setting(self.index.mailbox()?.account());
        self.state.apply_analyzer_setting(setting, self.index.mailbox_id);
        Ok(())
    }

    /// Drop cached engine resources
    pub fn evict(&mut self) {
        self.state.engine.evict();
        debug!("Evicted index resources for mailbox {}", self.index.mailbox_id);
    }

    /// Delete the whole index, leaving it empty
    ///
    /// Uncommitted changes are discarded.
    pub fn delete_index(&mut self) -> Result<()> {
        let state = &mut *self.state;
        state.batch = PendingBatch::default();
        state
            .engine
            .delete_index()
            .map_err(|e| IndexError::indexing("delete index", e))?;
        info!("Deleted index for mailbox {}", self.index.mailbox_id);
        Ok(())
    }
}
