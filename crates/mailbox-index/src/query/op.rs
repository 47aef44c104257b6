//! Compiled query operations

use std::ops::Bound;

use crate::models::ItemId;

/// Full-text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    /// Content, subject and both address fields
    Any,
    Content,
    Subject,
    From,
    To,
}

/// Exact-match fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeywordField {
    Type,
    FromDomain,
    ToDomain,
    Attachment,
    Object,
}

/// Numeric fields supporting ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    /// Milliseconds since the epoch
    Date,
    Size,
    AppointmentStart,
    AppointmentEnd,
}

/// A compiled query, executed by an engine searcher
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    MatchAll,
    /// Analyzed text; every token must match
    Text { field: TextField, text: String },
    /// Analyzed terms starting with `prefix`
    Prefix { field: TextField, prefix: String },
    Keyword { field: KeywordField, value: String },
    Range {
        field: NumericField,
        lower: Bound<i64>,
        upper: Bound<i64>,
    },
    ItemIds(Vec<ItemId>),
    /// All sub-operations must match
    And(Vec<QueryOp>),
}

impl QueryOp {
    /// Combine operations, collapsing trivial conjunctions
    pub fn and(mut ops: Vec<QueryOp>) -> QueryOp {
        ops.retain(|op| *op != QueryOp::MatchAll);
        match ops.len() {
            0 => QueryOp::MatchAll,
            1 => ops.remove(0),
            _ => QueryOp::And(ops),
        }
    }

    /// Number of operations that read the full-text index
    pub fn count_text_operations(&self) -> usize {
        match self {
            Self::Text { .. } | Self::Prefix { .. } => 1,
            Self::And(ops) => ops.iter().map(Self::count_text_operations).sum(),
            Self::MatchAll | Self::Keyword { .. } | Self::Range { .. } | Self::ItemIds(_) => 0,
        }
    }

    pub fn has_text_operation(&self) -> bool {
        self.count_text_operations() > 0
    }
}
