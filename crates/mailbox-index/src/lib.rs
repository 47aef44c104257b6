//! Mailbox index crate - per-mailbox full-text index coordination
//!
//! This crate keeps one searchable index per mailbox consistent with the
//! mailbox's content:
//! - Lock discipline between a mailbox and its index
//! - Batched writes with "indexed through" completion tracking
//! - Query execution with native and deferred sorting
//! - Cancellable background reindexing with progress counters
//! - A tantivy-backed engine behind the `IndexEngine` trait

pub mod admin;
pub mod engine;
pub mod error;
pub mod index;
pub mod mailbox;
pub mod models;
pub mod query;
pub mod reindex;
pub mod settings;

pub use admin::{
    ReindexAction, ReindexProgressInfo, ReindexRequest, ReindexResponse, handle_reindex,
};
pub use engine::{
    Analyzer, BrowseTerm, IndexEngine, IndexLocation, IndexSearcher, NativeSort, SearchHit,
    SortField, SortType, TantivyEngine, TermField,
};
pub use error::{IndexError, Result};
pub use index::{
    AddressField, IndexWriteGuard, MailboxIndex, to_native_sort, with_mailbox_and_index_locked,
};
pub use mailbox::{
    AccountConfig, InMemoryItemStore, IndexingListener, ItemStore, Mailbox, MailboxBuilder,
    MailboxGuard, MailboxId, StaticAccountConfig,
};
pub use models::{
    AppointmentSpan, IndexDocument, IndexItem, IndexableItem, ItemId, ItemType, ModSeq, SortBy,
    SortCriterion, SortDirection, SyncToken, TaskInfo, TaskStatus, parse_types,
};
pub use query::{
    OperationContext, Protocol, QueryOp, SearchParams, SearchResults, compile_query, search,
};
pub use reindex::{ReindexScope, ReindexState, ReindexStatus, StartOutcome};
pub use settings::IndexSettings;
