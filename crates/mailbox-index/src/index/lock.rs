//! Lock ordering between a mailbox and its index
//!
//! The mailbox lock is always taken before the index write lock, and both
//! are only ever taken together through [`with_mailbox_and_index_locked`].
//! The resulting [`IndexWriteGuard`] is the only handle that can mutate an
//! index. Debug builds reject a mailbox lock or a second index write lock
//! requested by a thread that already holds an index write lock.

use std::cell::Cell;
use std::sync::{Arc, RwLockWriteGuard};
use std::thread;

use crate::error::Result;
use crate::mailbox::{Mailbox, MailboxGuard};
use crate::models::SyncToken;

use super::{IndexState, MailboxIndex};

thread_local! {
    static HELD_INDEX_WRITE_LOCKS: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread holds any index write lock
pub(crate) fn holds_index_write_lock() -> bool {
    HELD_INDEX_WRITE_LOCKS.with(|held| held.get() > 0)
}

struct HeldMarker;

impl HeldMarker {
    fn acquire() -> Self {
        HELD_INDEX_WRITE_LOCKS.with(|held| held.set(held.get() + 1));
        HeldMarker
    }
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        HELD_INDEX_WRITE_LOCKS.with(|held| held.set(held.get().saturating_sub(1)));
    }
}

/// A committed batch of in-order items, reported once the index lock is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    pub(crate) count: usize,
    pub(crate) token: SyncToken,
    pub(crate) succeeded: bool,
}

/// Exclusive access to an index, taken under its mailbox's lock
///
/// Every index mutation is a method on this guard.
pub struct IndexWriteGuard<'a> {
    pub(super) index: &'a MailboxIndex,
    pub(super) state: RwLockWriteGuard<'a, IndexState>,
    pub(super) completions: Vec<Completion>,
    _held: HeldMarker,
}

impl IndexWriteGuard<'_> {
    /// Name of the active analyzer
    pub fn analyzer_name(&self) -> &'static str {
        self.state.analyzer.name()
    }

    /// Nesting depth of open bulk-write sessions
    pub fn write_depth(&self) -> usize {
        self.state.write_depth
    }

    /// Items written since the last commit
    pub fn pending_items(&self) -> usize {
        self.state.batch.items()
    }

    fn into_completions(self) -> Vec<Completion> {
        self.completions
    }
}

impl MailboxIndex {
    /// Take the index write lock under `proof`
    fn lock_for_write(&self, proof: &MailboxGuard<'_>) -> Result<IndexWriteGuard<'_>> {
        debug_assert_eq!(
            proof.mailbox_id(),
            self.mailbox_id,
            "index lock requested with another mailbox's guard"
        );
        debug_assert_eq!(
            proof.owner(),
            thread::current().id(),
            "index lock requested with a mailbox guard held by another thread"
        );
        debug_assert!(
            !holds_index_write_lock(),
            "index of mailbox {} locked while holding an index write lock",
            self.mailbox_id
        );
        let state = self.state.write().map_err(|_| self.poisoned())?;
        Ok(IndexWriteGuard {
            index: self,
            state,
            completions: Vec::new(),
            _held: HeldMarker::acquire(),
        })
    }

    /// Run `body` with `mailbox`'s lock and then this index's write lock held
    ///
    /// Batches committed by `body` are reported after the index lock is
    /// released and before the mailbox lock is.
    pub(crate) fn locked<R>(
        &self,
        mailbox: &Mailbox,
        body: impl FnOnce(&mut MailboxGuard<'_>, &mut IndexWriteGuard<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = mailbox.lock();
        let (result, completions) = {
            let mut locked = self.lock_for_write(&guard)?;
            let result = body(&mut guard, &mut locked);
            (result, locked.into_completions())
        };
        for completion in completions {
            self.indexing_completed(completion.count, completion.token, completion.succeeded);
        }
        result
    }
}

/// Run `body` with the mailbox lock and then the index write lock held
///
/// Both locks are released in reverse order on every exit path. "Indexed
/// through" notifications for batches committed inside `body` are delivered
/// between the two releases.
pub fn with_mailbox_and_index_locked<R>(
    mailbox: &Arc<Mailbox>,
    body: impl FnOnce(&mut MailboxGuard<'_>, &mut IndexWriteGuard<'_>) -> Result<R>,
) -> Result<R> {
    let index = mailbox.index()?;
    index.locked(mailbox, body)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::error::IndexError;
    use crate::mailbox::MailboxId;
    use crate::models::{IndexDocument, IndexItem, ItemId, ItemType, ModSeq};

    #[test]
    fn test_scoped_locking_releases_both() {
        let mailbox = Mailbox::builder(MailboxId(1)).build();
        let depth = with_mailbox_and_index_locked(&mailbox, |guard, locked| {
            assert_eq!(guard.mailbox_id(), MailboxId(1));
            assert!(holds_index_write_lock());
            Ok(locked.write_depth())
        })
        .unwrap();
        assert_eq!(depth, 0);
        assert!(!holds_index_write_lock());

        // Both locks are free again
        with_mailbox_and_index_locked(&mailbox, |_, locked| {
            locked.begin_write()?;
            locked.end_write()
        })
        .unwrap();
    }

    #[test]
    fn test_mutation_inside_scope_completes() {
        let mailbox = Mailbox::builder(MailboxId(9)).build();
        let worker = Arc::clone(&mailbox);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = with_mailbox_and_index_locked(&worker, |_, locked| {
                locked.index_item(
                    &IndexItem::new(ItemId(1), ItemType::Message),
                    &[IndexDocument::new("inside the scope")],
                    ModSeq::OutOfSequence,
                    true,
                )
            });
            let _ = tx.send(result.is_ok());
        });

        let succeeded = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("indexing inside the lock scope did not return");
        assert!(succeeded);
        assert_eq!(mailbox.index().unwrap().num_docs().unwrap(), 1);
    }

    #[test]
    fn test_completion_reported_after_index_lock_released() {
        let mailbox = Mailbox::builder(MailboxId(10)).build();
        with_mailbox_and_index_locked(&mailbox, |guard, locked| {
            let seq = guard.next_mod_seq();
            locked.index_item(
                &IndexItem::new(ItemId(1), ItemType::Message),
                &[IndexDocument::new("hello")],
                seq,
                true,
            )?;
            // Committed, but not yet reported
            assert_eq!(locked.completions.len(), 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(mailbox.index_watermark(), Some(SyncToken(1)));
    }

    #[test]
    fn test_watermark_unchanged_inside_scope() {
        let mailbox = Mailbox::builder(MailboxId(12)).build();
        let observer = Arc::clone(&mailbox);
        with_mailbox_and_index_locked(&mailbox, |guard, locked| {
            let seq = guard.next_mod_seq();
            locked.index_item(
                &IndexItem::new(ItemId(1), ItemType::Message),
                &[IndexDocument::new("hello")],
                seq,
                true,
            )?;
            assert_eq!(observer.index_watermark(), None);
            Ok(())
        })
        .unwrap();
        assert_eq!(mailbox.index_watermark(), Some(SyncToken(1)));
    }

    #[test]
    fn test_body_error_propagates() {
        let mailbox = Mailbox::builder(MailboxId(2)).build();
        let result: Result<()> = with_mailbox_and_index_locked(&mailbox, |_, _| {
            Err(IndexError::InvalidRequest("nope".to_string()))
        });
        assert!(matches!(result, Err(IndexError::InvalidRequest(_))));
        assert!(!holds_index_write_lock());
    }

    #[test]
    fn test_release_on_panic() {
        let mailbox = Mailbox::builder(MailboxId(3)).build();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = with_mailbox_and_index_locked(&mailbox, |_, _| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!holds_index_write_lock());
        let _guard = mailbox.lock();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "while holding an index write lock")]
    fn test_mailbox_lock_inside_index_lock_is_rejected() {
        let mailbox = Mailbox::builder(MailboxId(4)).build();
        let other = Mailbox::builder(MailboxId(5)).build();
        let _: Result<()> = with_mailbox_and_index_locked(&mailbox, |_, _| {
            let _inner = other.lock();
            Ok(())
        });
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "while holding an index write lock")]
    fn test_second_index_lock_is_rejected() {
        let mailbox = Mailbox::builder(MailboxId(11)).build();
        let index = mailbox.index().unwrap();
        let guard = mailbox.lock();
        let _first = index.lock_for_write(&guard).unwrap();
        let _second = index.lock_for_write(&guard);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "another mailbox's guard")]
    fn test_guard_for_other_mailbox_is_rejected() {
        let mailbox = Mailbox::builder(MailboxId(6)).build();
        let other = Mailbox::builder(MailboxId(7)).build();
        let index = mailbox.index().unwrap();
        let guard = other.lock();
        let _ = index.lock_for_write(&guard);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_guard_from_other_thread_is_rejected() {
        let mailbox = Mailbox::builder(MailboxId(8)).build();
        let index = mailbox.index().unwrap();
        let guard = mailbox.lock();
        thread::scope(|s| {
            s.spawn(|| {
                let _ = index.lock_for_write(&guard);
            });
        });
    }
}
