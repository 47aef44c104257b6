//! Error types for the index coordinator

use crate::engine::ResourceExhausted;
use crate::mailbox::MailboxId;
use crate::models::ItemId;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the index coordinator
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Engine failure while writing; only the failing batch is affected
    #[error("indexing failed: {context}")]
    IndexingFailed {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Engine failure while searching or browsing
    #[error("search failed: {context}")]
    QueryFailed {
        context: String,
        #[source]
        source: BoxError,
    },

    /// The mailbox item store could not be read or written
    #[error("item store failed: {context}")]
    StoreFailed {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A text query would read an index that is behind the mailbox
    #[error("text index out of sync")]
    TextIndexOutOfSync,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("mailbox {0} is no longer available")]
    MailboxGone(MailboxId),

    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl IndexError {
    pub(crate) fn indexing(context: impl Into<String>, source: anyhow::Error) -> Self {
        match exhausted(&source) {
            Some(e) => e,
            None => Self::IndexingFailed {
                context: context.into(),
                source: source.into(),
            },
        }
    }

    pub(crate) fn query(context: impl Into<String>, source: anyhow::Error) -> Self {
        match exhausted(&source) {
            Some(e) => e,
            None => Self::QueryFailed {
                context: context.into(),
                source: source.into(),
            },
        }
    }

    pub(crate) fn store(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StoreFailed {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Whether the handle that produced this error can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted(_) | Self::MailboxGone(_) | Self::LockPoisoned(_)
        )
    }
}

fn exhausted(source: &anyhow::Error) -> Option<IndexError> {
    source
        .downcast_ref::<ResourceExhausted>()
        .map(|e| IndexError::ResourceExhausted(e.0.clone()))
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
