//! Query execution against a mailbox index
//!
//! [`search`] rewrites calendar windows into the query, compiles it, refuses
//! text queries against a stale index, runs it on a fresh searcher and hands
//! back a lazy [`SearchResults`]. Orderings the engine cannot execute (task
//! and localized sorts) are applied afterwards by re-sorting the results.

mod op;
mod parser;
mod results;

pub use op::{KeywordField, NumericField, QueryOp, TextField};
pub use parser::{compile_query, parse_item_ids};
pub use results::{SearchResults, collation_key};

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::to_native_sort;
use crate::mailbox::Mailbox;
use crate::models::SortBy;

/// Protocol a search request arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Soap,
    Imap,
    Rest,
    Admin,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Soap => "soap",
            Self::Imap => "imap",
            Self::Rest => "rest",
            Self::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Who is asking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Account of the requester, if authenticated
    pub requester: Option<String>,
}

impl OperationContext {
    pub fn new(requester: impl Into<String>) -> Self {
        Self {
            requester: Some(requester.into()),
        }
    }
}

/// Parameters of one search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub sort: SortBy,
    /// Calendar window start in ms; 0 for none
    #[serde(default)]
    pub cal_start_ms: i64,
    /// Calendar window end in ms; 0 for none
    #[serde(default)]
    pub cal_end_ms: i64,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            sort: SortBy::default(),
            cal_start_ms: 0,
            cal_end_ms: 0,
        }
    }

    pub fn sort(mut self, sort: SortBy) -> Self {
        self.sort = sort;
        self
    }

    pub fn calendar_window(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.cal_start_ms = start_ms;
        self.cal_end_ms = end_ms;
        self
    }

    /// Restrict the query to appointments overlapping the calendar window
    fn apply_calendar_window(&mut self) {
        if self.cal_start_ms <= 0 && self.cal_end_ms <= 0 {
            return;
        }
        let mut query = format!("({})", self.query);
        if self.cal_start_ms > 0 {
            query.push_str(&format!(" appt-end:>={}", self.cal_start_ms));
        }
        if self.cal_end_ms > 0 {
            query.push_str(&format!(" appt-start:<={}", self.cal_end_ms));
        }
        self.query = query;
    }
}

/// The sort to execute natively, and the sort to apply afterwards if any
fn plan_sort(requested: SortBy) -> (SortBy, Option<SortBy>) {
    if requested.is_task_sort() {
        (SortBy::DATE_DESC, Some(requested))
    } else if requested.is_localized_sort() {
        (requested, Some(requested))
    } else {
        (requested, None)
    }
}

/// Run a search against a mailbox's index
///
/// `params.query` is rewritten in place when a calendar window is set. Text
/// queries fail with [`IndexError::TextIndexOutOfSync`] when
/// `text_index_out_of_sync` is set; other queries run regardless.
pub fn search(
    protocol: Protocol,
    context: &OperationContext,
    mailbox: &Arc<Mailbox>,
    params: &mut SearchParams,
    text_index_out_of_sync: bool,
) -> Result<SearchResults> {
    let index = mailbox.index()?;
    params.apply_calendar_window();

    let (executed, deferred) = plan_sort(params.sort);
    let op = compile_query(&params.query)?;
    if text_index_out_of_sync && op.has_text_operation() {
        debug!(
            "Refusing text query on mailbox {}: index out of sync",
            mailbox.id()
        );
        return Err(IndexError::TextIndexOutOfSync);
    }

    debug!(
        "Search on mailbox {} via {} for {:?}: {:?} sort {}",
        mailbox.id(),
        protocol,
        context.requester,
        params.query,
        params.sort
    );

    let native = to_native_sort(executed);
    let (mut searcher, analyzer) = index.open_searcher()?;
    let refs = match searcher.search(&op, native.as_ref(), &analyzer) {
        Ok(refs) => refs,
        Err(e) => {
            let err = IndexError::query(format!("execute {:?}", params.query), e);
            if matches!(err, IndexError::ResourceExhausted(_)) {
                warn!("Abandoning searcher after resource exhaustion");
                std::mem::forget(searcher);
            } else {
                drop(searcher);
            }
            return Err(err);
        }
    };

    let results = SearchResults::lazy(searcher, refs, executed, native);
    Ok(match deferred {
        Some(sort) => results.resorted(sort),
        None => results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SortField, SortType};
    use crate::models::{IndexDocument, IndexItem, IndexableItem, ItemId, ItemType};

    #[test]
    fn test_calendar_window_rewrite() {
        let mut params = SearchParams::new("standup").calendar_window(100, 200);
        params.apply_calendar_window();
        assert_eq!(params.query, "(standup) appt-end:>=100 appt-start:<=200");

        let mut params = SearchParams::new("standup").calendar_window(0, 200);
        params.apply_calendar_window();
        assert_eq!(params.query, "(standup) appt-start:<=200");

        let mut params = SearchParams::new("standup");
        params.apply_calendar_window();
        assert_eq!(params.query, "standup");
    }

    #[test]
    fn test_plan_sort() {
        assert_eq!(
            plan_sort(SortBy::TASK_DUE_ASC),
            (SortBy::DATE_DESC, Some(SortBy::TASK_DUE_ASC))
        );
        assert_eq!(
            plan_sort(SortBy::NAME_LOCALIZED_ASC),
            (SortBy::NAME_LOCALIZED_ASC, Some(SortBy::NAME_LOCALIZED_ASC))
        );
        assert_eq!(plan_sort(SortBy::SUBJECT_ASC), (SortBy::SUBJECT_ASC, None));
    }

    #[test]
    fn test_search_releases_searcher() {
        let mailbox = Mailbox::builder(crate::mailbox::MailboxId(1)).build();
        mailbox
            .add_item(IndexableItem::new(
                IndexItem::new(ItemId(1), ItemType::Message).sort_subject("hello"),
                vec![IndexDocument::new("hello world")],
            ))
            .unwrap();
        let index = mailbox.index().unwrap();

        let mut params = SearchParams::new("hello").sort(SortBy::SUBJECT_ASC);
        let results = search(
            Protocol::Soap,
            &OperationContext::default(),
            &mailbox,
            &mut params,
            false,
        )
        .unwrap();
        assert_eq!(results.sort(), SortBy::SUBJECT_ASC);
        let native = results.native_sort().unwrap();
        assert_eq!((native.field, native.kind), (SortField::Subject, SortType::String));
        assert_eq!(index.open_searchers().unwrap(), 1);

        let hits = results.collect_hits().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.open_searchers().unwrap(), 0);
    }

    #[test]
    fn test_bad_query_opens_no_searcher() {
        let mailbox = Mailbox::builder(crate::mailbox::MailboxId(2)).build();
        let mut params = SearchParams::new("larger:huge");
        let err = search(
            Protocol::Rest,
            &OperationContext::new("alice"),
            &mailbox,
            &mut params,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidRequest(_)));
        assert_eq!(mailbox.index().unwrap().open_searchers().unwrap(), 0);
    }
}
