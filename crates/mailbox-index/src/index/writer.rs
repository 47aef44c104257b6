//! Write batching
//!
//! Writes made inside a `begin_write`/`end_write` session are committed
//! together when the outermost session ends, or earlier once the account's
//! batch size is reached. Writes outside a session commit immediately. Each
//! commit that contains in-order items is reported to the mailbox exactly
//! once through `indexing_completed`.

use log::{debug, error, warn};

use crate::error::{IndexError, Result};
use crate::models::{IndexDocument, IndexItem, ItemId, ModSeq, SyncToken};

use super::lock::Completion;
use super::{IndexState, IndexWriteGuard, MailboxIndex, analyzer_setting, batch_size};

/// Writes since the last commit
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    items: usize,
    in_order: usize,
    highest: Option<SyncToken>,
}

impl PendingBatch {
    fn record(&mut self, mod_seq: ModSeq) {
        self.items += 1;
        if let Some(token) = mod_seq.sync_token() {
            self.in_order += 1;
            self.highest = self.highest.max(Some(token));
        }
    }

    pub(crate) fn items(&self) -> usize {
        self.items
    }

    fn is_empty(&self) -> bool {
        self.items == 0
    }
}

/// Outcome of ending a batch
#[must_use]
struct Flushed {
    in_order: usize,
    highest: Option<SyncToken>,
    result: anyhow::Result<()>,
}

impl Flushed {
    fn nothing() -> Self {
        Self {
            in_order: 0,
            highest: None,
            result: Ok(()),
        }
    }
}

impl IndexState {
    /// Commit the pending batch
    fn flush(&mut self) -> Flushed {
        let batch = std::mem::take(&mut self.batch);
        if batch.is_empty() {
            return Flushed::nothing();
        }

        let result = self.engine.commit();
        if let Err(e) = &result {
            error!("Index commit of {} items failed: {:#}", batch.items, e);
            if let Err(e) = self.engine.rollback() {
                warn!("Index rollback failed: {:#}", e);
            }
        }
        Flushed {
            in_order: batch.in_order,
            highest: batch.highest,
            result,
        }
    }

    /// Throw away the pending batch after a failed write
    fn discard(&mut self, cause: anyhow::Error) -> Flushed {
        let batch = std::mem::take(&mut self.batch);
        if let Err(e) = self.engine.rollback() {
            warn!("Index rollback failed: {:#}", e);
        }
        Flushed {
            in_order: batch.in_order,
            highest: batch.highest,
            result: Err(cause),
        }
    }
}

impl IndexWriteGuard<'_> {
    /// Open a bulk-write session, or nest inside the current one
    pub fn begin_write(&mut self) -> Result<()> {
        let state = &mut *self.state;
        if state.write_depth == 0 {
            state
                .engine
                .begin_write()
                .map_err(|e| IndexError::indexing("begin bulk write", e))?;
        }
        state.write_depth += 1;
        Ok(())
    }

    /// Close a bulk-write session, committing when the outermost one ends
    pub fn end_write(&mut self) -> Result<()> {
        let state = &mut *self.state;
        let flushed = match state.write_depth {
            0 => {
                debug!(
                    "end_write without an open session on mailbox {}",
                    self.index.mailbox_id
                );
                return Ok(());
            }
            1 => {
                state.write_depth = 0;
                state.engine.end_write();
                state.flush()
            }
            _ => {
                state.write_depth -= 1;
                return Ok(());
            }
        };
        self.report(flushed, "commit bulk write")
    }

    /// Index the documents of one item
    ///
    /// With `delete_first`, documents previously indexed for the item are
    /// replaced. On failure the whole pending batch is discarded and
    /// reported as failed.
    pub fn index_item(
        &mut self,
        item: &IndexItem,
        documents: &[IndexDocument],
        mod_seq: ModSeq,
        delete_first: bool,
    ) -> Result<()> {
        let mailbox = self.index.mailbox()?;
        let setting = analyzer_setting(mailbox.account());
        let batch_limit = batch_size(mailbox.account());

        let state = &mut *self.state;
        state.apply_analyzer_setting(setting, self.index.mailbox_id);
        let added = state.engine.add_documents(
            item,
            mod_seq,
            documents,
            &state.analyzer,
            delete_first,
        );
        let flushed = match added {
            Err(e) => state.discard(e),
            Ok(()) => {
                state.batch.record(mod_seq);
                if state.write_depth == 0
                    || (batch_limit > 0 && state.batch.in_order >= batch_limit)
                {
                    state.flush()
                } else {
                    return Ok(());
                }
            }
        };
        self.report(flushed, &format!("index item {}", item.id))
    }

    /// Remove all documents of the given items
    ///
    /// Returns the ids the engine processed.
    pub fn delete_documents(&mut self, ids: &[ItemId], mod_seq: ModSeq) -> Result<Vec<ItemId>> {
        let state = &mut *self.state;
        let (deleted, flushed) = match state.engine.delete_documents(ids) {
            Err(e) => (Vec::new(), state.discard(e)),
            Ok(deleted) => {
                state.batch.record(mod_seq);
                if state.write_depth == 0 {
                    (deleted, state.flush())
                } else {
                    return Ok(deleted);
                }
            }
        };
        self.report(flushed, "delete documents")?;
        Ok(deleted)
    }

    /// Remove every document, committing unless inside a session
    pub(crate) fn clear(&mut self) -> Result<()> {
        let state = &mut *self.state;
        let flushed = match state.engine.delete_all_documents() {
            Err(e) => state.discard(e),
            Ok(()) => {
                state.batch.record(ModSeq::OutOfSequence);
                if state.write_depth == 0 {
                    state.flush()
                } else {
                    return Ok(());
                }
            }
        };
        self.report(flushed, "clear index")
    }

    /// Queue the batch's completion and surface its commit result
    fn report(&mut self, flushed: Flushed, context: &str) -> Result<()> {
        if let Some(token) = flushed.highest {
            self.completions.push(Completion {
                count: flushed.in_order,
                token,
                succeeded: flushed.result.is_ok(),
            });
        }
        flushed
            .result
            .map_err(|e| IndexError::indexing(context.to_string(), e))
    }
}

impl MailboxIndex {
    /// Tell the mailbox a batch of in-order items finished
    ///
    /// Does nothing for an empty batch.
    pub fn indexing_completed(&self, count: usize, token: SyncToken, succeeded: bool) {
        if count == 0 {
            return;
        }
        match self.mailbox.upgrade() {
            Some(mailbox) => mailbox.indexing_completed(count, token, succeeded),
            None => debug!(
                "Mailbox {} gone before indexing of {} completed",
                self.mailbox_id, token
            ),
        }
    }
}
