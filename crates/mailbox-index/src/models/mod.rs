//! Domain models shared by the index coordinator

mod item;
mod sort;
mod sync;

pub use item::{
    AppointmentSpan, IndexDocument, IndexItem, IndexableItem, ItemId, ItemType, TaskInfo,
    TaskStatus, parse_types,
};
pub use sort::{SortBy, SortCriterion, SortDirection};
pub use sync::{ModSeq, SyncToken};
