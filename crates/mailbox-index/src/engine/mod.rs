//! Inverted-index engine adapter
//!
//! The coordinator consumes the engine only through [`IndexEngine`] and
//! [`IndexSearcher`]. [`TantivyEngine`] is the production implementation.

mod analyzer;
mod schema;
mod tantivy_engine;

pub use analyzer::Analyzer;
pub use tantivy_engine::{DEFAULT_HEAP_SIZE, IndexLocation, TantivyEngine};

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{IndexDocument, IndexItem, ItemId, ItemType, ModSeq, TaskInfo};
use crate::query::QueryOp;

/// Marker error for memory exhaustion inside an engine
///
/// Callers propagate it immediately without running cleanup.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ResourceExhausted(pub String);

/// Field a native sort reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Name,
    Subject,
    Size,
    Date,
}

/// How sort keys compare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortType {
    String,
    Numeric,
}

/// The engine's own sort descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeSort {
    pub field: SortField,
    pub kind: SortType,
    pub reverse: bool,
}

/// Term dictionaries that can be enumerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermField {
    Content,
    Subject,
    From,
    To,
    FromDomain,
    ToDomain,
    Attachment,
    Object,
}

/// A term and the number of documents containing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseTerm {
    pub text: String,
    pub freq: u64,
}

/// Opaque handle to a matched document, valid for the searcher that made it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocRef(pub u64);

/// A materialized search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub item_id: ItemId,
    pub index_id: ItemId,
    pub item_type: ItemType,
    pub mod_seq: ModSeq,
    pub date: DateTime<Utc>,
    pub size: u64,
    pub sort_subject: String,
    pub sort_sender: String,
    pub task: Option<TaskInfo>,
}

/// Durable inverted index for a single mailbox
///
/// Mutating calls are only made while the caller holds the index write lock;
/// `open_searcher` and the browse calls may run concurrently with each other.
pub trait IndexEngine: Send + Sync {
    /// Prepare for several writes that will be committed together
    fn begin_write(&mut self) -> Result<()>;

    /// Leave bulk mode; pending changes are committed separately
    fn end_write(&mut self);

    /// Add the documents of one item, optionally removing older ones first
    fn add_documents(
        &mut self,
        item: &IndexItem,
        mod_seq: ModSeq,
        documents: &[IndexDocument],
        analyzer: &Analyzer,
        delete_first: bool,
    ) -> Result<()>;

    /// Remove all documents of the given items, returning the ids processed
    fn delete_documents(&mut self, ids: &[ItemId]) -> Result<Vec<ItemId>>;

    /// Remove every document (takes effect on commit)
    fn delete_all_documents(&mut self) -> Result<()>;

    /// Make pending changes durable and visible to new searchers
    fn commit(&mut self) -> Result<()>;

    /// Discard uncommitted changes
    fn rollback(&mut self) -> Result<()>;

    /// Open a point-in-time searcher
    fn open_searcher(&self) -> Result<Box<dyn IndexSearcher>>;

    /// Enumerate the terms of a field, optionally filtered by a pattern
    fn browse_terms(&self, field: TermField, pattern: Option<&Regex>) -> Result<Vec<BrowseTerm>>;

    /// Terms starting with `prefix`, at most `max`; the flag is false when
    /// more terms matched than were returned
    fn expand_prefix(&self, field: TermField, prefix: &str, max: usize)
    -> Result<(Vec<String>, bool)>;

    /// Number of documents visible to searchers
    fn num_docs(&self) -> u64;

    fn bytes_read(&self) -> u64;

    fn bytes_written(&self) -> u64;

    /// Number of searchers opened and not yet released
    fn open_searchers(&self) -> usize;

    /// Drop cached writer and reader resources
    fn evict(&mut self);

    /// Delete the entire index, leaving an empty one in its place
    fn delete_index(&mut self) -> Result<()>;
}

/// Point-in-time view used by one query
///
/// Dropping the searcher releases it.
pub trait IndexSearcher: Send {
    /// Run a query, returning matches in native order (or `sort` order),
    /// one per item
    fn search(
        &mut self,
        query: &QueryOp,
        sort: Option<&NativeSort>,
        analyzer: &Analyzer,
    ) -> Result<Vec<DocRef>>;

    /// Load the stored fields of a match
    fn load(&mut self, doc: DocRef) -> Result<SearchHit>;
}
