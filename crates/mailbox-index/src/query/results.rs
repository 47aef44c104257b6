//! Lazy search result sequences

use std::cmp::Ordering;
use std::vec;

use log::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::engine::{DocRef, IndexSearcher, NativeSort, SearchHit};
use crate::error::{IndexError, Result};
use crate::models::{SortBy, SortCriterion, TaskInfo};

enum Source {
    /// Hits loaded from the searcher one at a time
    Lazy {
        searcher: Box<dyn IndexSearcher>,
        refs: vec::IntoIter<DocRef>,
    },
    Buffered(vec::IntoIter<SearchHit>),
    Done,
}

/// Single-pass sequence of search hits
///
/// The searcher backing the sequence is released once the sequence is
/// exhausted, fails, or is dropped. A deferred sort buffers every hit on the
/// first call to `next` and yields them re-ordered.
pub struct SearchResults {
    sort: SortBy,
    native_sort: Option<NativeSort>,
    resort: Option<SortBy>,
    source: Source,
}

impl SearchResults {
    pub(crate) fn lazy(
        searcher: Box<dyn IndexSearcher>,
        refs: Vec<DocRef>,
        sort: SortBy,
        native_sort: Option<NativeSort>,
    ) -> Self {
        Self {
            sort,
            native_sort,
            resort: None,
            source: Source::Lazy {
                searcher,
                refs: refs.into_iter(),
            },
        }
    }

    /// Re-order the whole sequence by `sort` before yielding anything
    pub(crate) fn resorted(mut self, sort: SortBy) -> Self {
        self.sort = sort;
        self.resort = Some(sort);
        self
    }

    /// Sort the caller asked for
    pub fn sort(&self) -> SortBy {
        self.sort
    }

    /// Sort the engine executed with
    pub fn native_sort(&self) -> Option<NativeSort> {
        self.native_sort
    }

    /// Whether results are re-ordered after the engine query
    pub fn is_resorted(&self) -> bool {
        self.resort.is_some() || matches!(self.source, Source::Buffered(_))
    }

    /// Drain every remaining hit, stopping at the first error
    pub fn collect_hits(self) -> Result<Vec<SearchHit>> {
        self.collect()
    }

    fn buffer(&mut self, sort: SortBy) -> Result<()> {
        let mut hits = Vec::new();
        for hit in self.by_ref() {
            hits.push(hit?);
        }
        sort_hits(&mut hits, sort);
        debug!("Re-sorted {} hits by {}", hits.len(), sort);
        self.source = Source::Buffered(hits.into_iter());
        Ok(())
    }

    fn fail(&mut self, err: IndexError) -> IndexError {
        match std::mem::replace(&mut self.source, Source::Done) {
            // Under memory pressure the searcher is abandoned, not closed
            Source::Lazy { searcher, .. } if matches!(err, IndexError::ResourceExhausted(_)) => {
                warn!("Abandoning searcher after resource exhaustion");
                std::mem::forget(searcher);
            }
            _ => {}
        }
        err
    }
}

impl Iterator for SearchResults {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(sort) = self.resort.take() {
            if let Err(e) = self.buffer(sort) {
                return Some(Err(e));
            }
        }

        let loaded = match &mut self.source {
            Source::Lazy { searcher, refs } => refs.next().map(|doc| searcher.load(doc)),
            Source::Buffered(hits) => return hits.next().map(Ok),
            Source::Done => return None,
        };

        match loaded {
            Some(Ok(hit)) => Some(Ok(hit)),
            Some(Err(e)) => {
                let err = IndexError::query("load search hit", e);
                Some(Err(self.fail(err)))
            }
            None => {
                // Exhausted; release the searcher now
                self.source = Source::Done;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.source {
            Source::Lazy { refs, .. } => (0, Some(refs.len())),
            Source::Buffered(hits) => hits.size_hint(),
            Source::Done => (0, Some(0)),
        }
    }
}

impl std::fmt::Debug for SearchResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResults")
            .field("sort", &self.sort)
            .field("native_sort", &self.native_sort)
            .field("remaining", &self.size_hint().1)
            .finish()
    }
}

/// Collation key for locale-aware name ordering
///
/// Accents are stripped and case is folded so that `Émile` sorts with `emile`.
pub fn collation_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare optional keys, placing missing values last in either direction
fn cmp_present<T: Ord>(a: Option<T>, b: Option<T>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn task(hit: &SearchHit) -> Option<&TaskInfo> {
    hit.task.as_ref()
}

/// Stable in-memory sort for orderings the engine cannot execute
pub(crate) fn sort_hits(hits: &mut [SearchHit], sort: SortBy) {
    let descending = sort.is_descending();
    match sort.criterion {
        SortCriterion::TaskDue => hits.sort_by(|a, b| {
            cmp_present(
                task(a).and_then(|t| t.due),
                task(b).and_then(|t| t.due),
                descending,
            )
        }),
        SortCriterion::TaskStatus => hits.sort_by(|a, b| {
            cmp_present(task(a).map(|t| t.status), task(b).map(|t| t.status), descending)
        }),
        SortCriterion::TaskPercentComplete => hits.sort_by(|a, b| {
            cmp_present(
                task(a).map(|t| t.percent_complete),
                task(b).map(|t| t.percent_complete),
                descending,
            )
        }),
        SortCriterion::NameLocalized => {
            hits.sort_by_cached_key(|hit| collation_key(&hit.sort_sender));
            if descending {
                hits.reverse();
            }
        }
        other => debug!("No in-memory ordering for {:?}", other),
    }
}
