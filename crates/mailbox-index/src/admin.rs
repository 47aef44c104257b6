//! Administrative reindex requests
//!
//! In-process request and response shapes for starting, polling and
//! cancelling a mailbox reindex.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::MailboxIndex;
use crate::models::parse_types;
use crate::query::parse_item_ids;
use crate::reindex::{ReindexScope, ReindexStatus, StartOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexAction {
    Start,
    Status,
    Cancel,
}

impl std::str::FromStr for ReindexAction {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "status" => Ok(Self::Status),
            "cancel" => Ok(Self::Cancel),
            _ => Err(IndexError::InvalidRequest(format!("unknown action: {s}"))),
        }
    }
}

/// A reindex request
///
/// `types` and `ids` are comma-separated and only used by `start`; at most
/// one of them may be given. Neither means the whole mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<String>,
}

impl ReindexRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            types: None,
            ids: None,
        }
    }

    pub fn types(mut self, types: impl Into<String>) -> Self {
        self.types = Some(types.into());
        self
    }

    pub fn ids(mut self, ids: impl Into<String>) -> Self {
        self.ids = Some(ids.into());
        self
    }

    fn scope(&self) -> Result<ReindexScope> {
        match (&self.types, &self.ids) {
            (Some(_), Some(_)) => Err(IndexError::InvalidRequest(
                "can't specify both 'types' and 'ids'".to_string(),
            )),
            (Some(types), None) => {
                let types = parse_types(types)?;
                if types.is_empty() {
                    return Err(IndexError::InvalidRequest("no item types given".to_string()));
                }
                Ok(ReindexScope::Types(types))
            }
            (None, Some(ids)) => {
                let ids = parse_item_ids(ids)?;
                if ids.is_empty() {
                    return Err(IndexError::InvalidRequest("no item ids given".to_string()));
                }
                Ok(ReindexScope::Ids(ids))
            }
            (None, None) => Ok(ReindexScope::All),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexProgressInfo {
    pub succeeded: u64,
    pub failed: u64,
    pub remaining: u64,
}

impl From<ReindexStatus> for ReindexProgressInfo {
    fn from(status: ReindexStatus) -> Self {
        Self {
            succeeded: status.succeeded,
            failed: status.failed,
            remaining: status.remaining(),
        }
    }
}

/// Reply to a [`ReindexRequest`]
///
/// `status` is `started`, `running`, `idle` or `cancelled`. Progress is only
/// included for `status` and `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ReindexProgressInfo>,
}

impl ReindexResponse {
    fn label(status: &str) -> Self {
        Self {
            status: status.to_string(),
            progress: None,
        }
    }

    fn progress(status: ReindexStatus) -> Self {
        Self {
            status: status.state().as_str().to_string(),
            progress: Some(status.into()),
        }
    }
}

/// Handle a reindex request against a mailbox's index
pub fn handle_reindex(
    index: &Arc<MailboxIndex>,
    request: &ReindexRequest,
) -> Result<ReindexResponse> {
    let action: ReindexAction = request.action.parse()?;
    info!(
        "Reindex {:?} requested for mailbox {}",
        action,
        index.mailbox_id()
    );

    match action {
        ReindexAction::Start => {
            // A running job answers any start, even a malformed one
            if index.get_reindex_status().running {
                return Ok(ReindexResponse::label("running"));
            }
            let scope = request.scope()?;
            match index.start_reindex_scope(scope)? {
                StartOutcome::Started => Ok(ReindexResponse::label("started")),
                StartOutcome::AlreadyRunning => Ok(ReindexResponse::label("running")),
            }
        }
        ReindexAction::Status => Ok(ReindexResponse::progress(index.get_reindex_status())),
        ReindexAction::Cancel => Ok(ReindexResponse::progress(index.cancel_reindex())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{InMemoryItemStore, Mailbox, MailboxId};
    use crate::models::{IndexDocument, IndexItem, IndexableItem, ItemId, ItemType};

    fn index_with_items(id: u32, count: u32) -> (Arc<Mailbox>, Arc<MailboxIndex>) {
        let items = (1..=count).map(|i| {
            IndexableItem::new(
                IndexItem::new(ItemId(i), ItemType::Message),
                vec![IndexDocument::new("body")],
            )
        });
        let mailbox = Mailbox::builder(MailboxId(id))
            .store(Arc::new(InMemoryItemStore::with_items(items)))
            .build();
        let index = mailbox.index().unwrap();
        (mailbox, index)
    }

    #[test]
    fn test_unknown_action() {
        let (_mailbox, index) = index_with_items(1, 0);
        let err = handle_reindex(&index, &ReindexRequest::new("restart")).unwrap_err();
        assert!(matches!(err, IndexError::InvalidRequest(_)));
    }

    #[test]
    fn test_invalid_scopes() {
        let (_mailbox, index) = index_with_items(2, 0);
        let both = ReindexRequest::new("start").types("message").ids("1");
        let bad_type = ReindexRequest::new("start").types("spaceship");
        let bad_id = ReindexRequest::new("start").ids("1,two");
        for request in [both, bad_type, bad_id] {
            let err = handle_reindex(&index, &request).unwrap_err();
            assert!(matches!(err, IndexError::InvalidRequest(_)), "{request:?}");
        }
        assert_eq!(index.get_reindex_status(), ReindexStatus::default());
    }

    #[test]
    fn test_start_then_status() {
        let (_mailbox, index) = index_with_items(3, 3);
        let started = handle_reindex(&index, &ReindexRequest::new("START").ids("1, 2,3")).unwrap();
        assert_eq!(started, ReindexResponse::label("started"));

        index.wait_for_reindex();
        let status = handle_reindex(&index, &ReindexRequest::new("status")).unwrap();
        assert_eq!(status.status, "idle");
        assert_eq!(
            status.progress,
            Some(ReindexProgressInfo {
                succeeded: 3,
                failed: 0,
                remaining: 0
            })
        );
    }

    #[test]
    fn test_cancel_when_idle() {
        let (_mailbox, index) = index_with_items(4, 0);
        let response = handle_reindex(&index, &ReindexRequest::new("cancel")).unwrap();
        assert_eq!(response.status, "idle");
        assert_eq!(
            response.progress,
            Some(ReindexProgressInfo {
                succeeded: 0,
                failed: 0,
                remaining: 0
            })
        );
    }

    #[test]
    fn test_response_json_shape() {
        let response = ReindexResponse::label("started");
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"status":"started"}"#
        );
    }
}
