//! Mutation sequence markers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker for "indexed through mutation N"
///
/// Produced by the mailbox. The index coordinator only forwards it back to
/// the mailbox when a batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncToken(pub u64);

impl SyncToken {
    pub fn new(change: u64) -> Self {
        Self(change)
    }

    pub fn change(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Modification sequence attached to an index write
///
/// `OutOfSequence` marks adds that are not part of the mailbox's increasing
/// mutation stream (targeted reindex). They never advance the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModSeq {
    Sequenced(u64),
    OutOfSequence,
}

impl ModSeq {
    pub fn is_out_of_sequence(&self) -> bool {
        matches!(self, Self::OutOfSequence)
    }

    /// Token this write would complete, if it is part of the ordered stream
    pub fn sync_token(&self) -> Option<SyncToken> {
        match self {
            Self::Sequenced(seq) => Some(SyncToken(*seq)),
            Self::OutOfSequence => None,
        }
    }

    /// Raw value as stored in the index; out-of-sequence adds store -1
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Sequenced(seq) => i64::try_from(*seq).unwrap_or(i64::MAX),
            Self::OutOfSequence => -1,
        }
    }
}

impl From<i64> for ModSeq {
    fn from(raw: i64) -> Self {
        if raw < 0 {
            Self::OutOfSequence
        } else {
            Self::Sequenced(raw as u64)
        }
    }
}
