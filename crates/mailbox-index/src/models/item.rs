//! Mail item data handed to the index
//!
//! The coordinator never looks inside an [`IndexDocument`]; it only forwards
//! documents to the engine together with the item-level scalars carried by
//! [`IndexItem`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::IndexError;

/// Mailbox-scoped item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u32);

impl ItemId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ItemId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Kind of mail item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Appointment,
    Chat,
    Contact,
    Conversation,
    Document,
    Message,
    Note,
    Tag,
    Task,
    Wiki,
}

impl ItemType {
    pub const ALL: [ItemType; 10] = [
        ItemType::Appointment,
        ItemType::Chat,
        ItemType::Contact,
        ItemType::Conversation,
        ItemType::Document,
        ItemType::Message,
        ItemType::Note,
        ItemType::Tag,
        ItemType::Task,
        ItemType::Wiki,
    ];

    /// Name used in search and admin requests
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Chat => "chat",
            Self::Contact => "contact",
            Self::Conversation => "conversation",
            Self::Document => "document",
            Self::Message => "message",
            Self::Note => "note",
            Self::Tag => "tag",
            Self::Task => "task",
            Self::Wiki => "wiki",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        // "briefcase" is the user-facing name for documents
        if lower == "briefcase" {
            return Ok(Self::Document);
        }
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| IndexError::InvalidRequest(format!("unknown item type: {}", s.trim())))
    }
}

/// Parse a comma-separated list of item types, e.g. `"message,contact"`
pub fn parse_types(types: &str) -> Result<BTreeSet<ItemType>, IndexError> {
    types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ItemType::from_str)
        .collect()
}

/// Item-level scalars the index must carry for sorting and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub id: ItemId,
    /// Secondary id shared by items indexed as one unit (e.g. a conversation)
    pub index_id: ItemId,
    pub item_type: ItemType,
    pub date: DateTime<Utc>,
    pub size: u64,
    pub sort_subject: String,
    pub sort_sender: String,
}

impl IndexItem {
    pub fn new(id: ItemId, item_type: ItemType) -> Self {
        Self {
            id,
            index_id: id,
            item_type,
            date: DateTime::<Utc>::UNIX_EPOCH,
            size: 0,
            sort_subject: String::new(),
            sort_sender: String::new(),
        }
    }

    pub fn index_id(mut self, index_id: ItemId) -> Self {
        self.index_id = index_id;
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn sort_subject(mut self, subject: impl Into<String>) -> Self {
        self.sort_subject = subject.into();
        self
    }

    pub fn sort_sender(mut self, sender: impl Into<String>) -> Self {
        self.sort_sender = sender.into();
        self
    }
}

/// Time span of a calendar item, in milliseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSpan {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Task completion states, in their natural sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "NEED")]
    NotStarted,
    #[serde(rename = "INPR")]
    InProgress,
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "DEFERRED")]
    Deferred,
    #[serde(rename = "COMP")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NEED",
            Self::InProgress => "INPR",
            Self::Waiting => "WAITING",
            Self::Deferred => "DEFERRED",
            Self::Completed => "COMP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEED" => Some(Self::NotStarted),
            "INPR" => Some(Self::InProgress),
            "WAITING" => Some(Self::Waiting),
            "DEFERRED" => Some(Self::Deferred),
            "COMP" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Task attributes needed for task-specific orderings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub due: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub percent_complete: u8,
}

/// One indexable unit of an item (the item body, an attachment, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<String>,
    #[serde(default)]
    pub to: Vec<String>,
    /// Attachment content types, e.g. `application/pdf`
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Recognized object kinds, e.g. `url`, `phone`
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub appointment: Option<AppointmentSpan>,
    #[serde(default)]
    pub task: Option<TaskInfo>,
}

impl IndexDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn from_address(mut self, address: impl Into<String>) -> Self {
        self.from.push(address.into());
        self
    }

    pub fn to_address(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn attachment(mut self, content_type: impl Into<String>) -> Self {
        self.attachments.push(content_type.into());
        self
    }

    pub fn object(mut self, kind: impl Into<String>) -> Self {
        self.objects.push(kind.into());
        self
    }

    pub fn appointment(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.appointment = Some(AppointmentSpan { start_ms, end_ms });
        self
    }

    pub fn task(mut self, task: TaskInfo) -> Self {
        self.task = Some(task);
        self
    }

    /// Approximate number of bytes this document contributes to the index
    pub fn byte_len(&self) -> usize {
        self.content.len()
            + self.subject.len()
            + self.from.iter().chain(&self.to).map(String::len).sum::<usize>()
            + self.attachments.iter().chain(&self.objects).map(String::len).sum::<usize>()
    }
}

/// An item together with the documents produced for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexableItem {
    pub item: IndexItem,
    pub documents: Vec<IndexDocument>,
}

impl IndexableItem {
    pub fn new(item: IndexItem, documents: Vec<IndexDocument>) -> Self {
        Self { item, documents }
    }

    pub fn id(&self) -> ItemId {
        self.item.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types() {
        let types = parse_types("message, contact,briefcase").unwrap();
        assert_eq!(
            types.into_iter().collect::<Vec<_>>(),
            vec![ItemType::Contact, ItemType::Document, ItemType::Message]
        );
    }

    #[test]
    fn test_parse_types_rejects_unknown() {
        let err = parse_types("message,bogus").unwrap_err();
        assert!(matches!(err, IndexError::InvalidRequest(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_item_type_names_roundtrip() {
        for t in ItemType::ALL {
            assert_eq!(t.as_str().parse::<ItemType>().unwrap(), t);
        }
    }

    #[test]
    fn test_task_status_order() {
        assert!(TaskStatus::NotStarted < TaskStatus::InProgress);
        assert!(TaskStatus::Deferred < TaskStatus::Completed);
        assert_eq!(TaskStatus::parse("INPR"), Some(TaskStatus::InProgress));
        assert_eq!(TaskStatus::parse("nope"), None);
    }

    #[test]
    fn test_item_builder_defaults_index_id() {
        let item = IndexItem::new(ItemId(7), ItemType::Message).size(42);
        assert_eq!(item.index_id, ItemId(7));
        assert_eq!(item.size, 42);
    }

    #[test]
    fn test_document_deserializes_with_missing_fields() {
        let doc: IndexDocument = serde_json::from_str(r#"{"content": "hello"}"#).unwrap();
        assert_eq!(doc.content, "hello");
        assert!(doc.from.is_empty());
        assert!(doc.task.is_none());
    }
}
