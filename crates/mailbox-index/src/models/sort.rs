//! Logical sort specifications

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a search result list is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortCriterion {
    None,
    Date,
    Subject,
    Name,
    NameNaturalOrder,
    Sender,
    Size,
    TaskDue,
    TaskStatus,
    TaskPercentComplete,
    NameLocalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A logical (criterion, direction) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortBy {
    pub criterion: SortCriterion,
    pub direction: SortDirection,
}

impl SortBy {
    pub const NONE: SortBy = SortBy::new(SortCriterion::None, SortDirection::Ascending);
    pub const DATE_ASC: SortBy = SortBy::new(SortCriterion::Date, SortDirection::Ascending);
    pub const DATE_DESC: SortBy = SortBy::new(SortCriterion::Date, SortDirection::Descending);
    pub const SUBJECT_ASC: SortBy = SortBy::new(SortCriterion::Subject, SortDirection::Ascending);
    pub const SUBJECT_DESC: SortBy = SortBy::new(SortCriterion::Subject, SortDirection::Descending);
    pub const NAME_ASC: SortBy = SortBy::new(SortCriterion::Name, SortDirection::Ascending);
    pub const NAME_DESC: SortBy = SortBy::new(SortCriterion::Name, SortDirection::Descending);
    pub const SIZE_ASC: SortBy = SortBy::new(SortCriterion::Size, SortDirection::Ascending);
    pub const SIZE_DESC: SortBy = SortBy::new(SortCriterion::Size, SortDirection::Descending);
    pub const TASK_DUE_ASC: SortBy = SortBy::new(SortCriterion::TaskDue, SortDirection::Ascending);
    pub const TASK_DUE_DESC: SortBy =
        SortBy::new(SortCriterion::TaskDue, SortDirection::Descending);
    pub const NAME_LOCALIZED_ASC: SortBy =
        SortBy::new(SortCriterion::NameLocalized, SortDirection::Ascending);

    pub const fn new(criterion: SortCriterion, direction: SortDirection) -> Self {
        Self {
            criterion,
            direction,
        }
    }

    pub fn is_descending(&self) -> bool {
        self.direction == SortDirection::Descending
    }

    /// Task orderings cannot be expressed as a native index sort
    pub fn is_task_sort(&self) -> bool {
        matches!(
            self.criterion,
            SortCriterion::TaskDue | SortCriterion::TaskStatus | SortCriterion::TaskPercentComplete
        )
    }

    pub fn is_localized_sort(&self) -> bool {
        self.criterion == SortCriterion::NameLocalized
    }

    /// Request-level name, e.g. `dateDesc` or `taskDueAsc`
    pub fn name(&self) -> String {
        let base = match self.criterion {
            SortCriterion::None => return "none".to_string(),
            SortCriterion::Date => "date",
            SortCriterion::Subject => "subj",
            SortCriterion::Name => "name",
            SortCriterion::NameNaturalOrder => "nameNatural",
            SortCriterion::Sender => "sender",
            SortCriterion::Size => "size",
            SortCriterion::TaskDue => "taskDue",
            SortCriterion::TaskStatus => "taskStatus",
            SortCriterion::TaskPercentComplete => "taskPerc",
            SortCriterion::NameLocalized => "nameLocalized",
        };
        let suffix = if self.is_descending() { "Desc" } else { "Asc" };
        format!("{base}{suffix}")
    }

    /// Parse a request-level sort name
    ///
    /// Unknown names fall back to date-descending rather than failing the
    /// search.
    pub fn parse(name: &str) -> SortBy {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("none") {
            return SortBy::NONE;
        }

        let lower = name.to_ascii_lowercase();
        let (base, direction) = if let Some(base) = lower.strip_suffix("desc") {
            (base, SortDirection::Descending)
        } else if let Some(base) = lower.strip_suffix("asc") {
            (base, SortDirection::Ascending)
        } else {
            debug!("sort '{}' has no direction, using dateDesc", name);
            return SortBy::DATE_DESC;
        };

        let criterion = match base {
            "date" => SortCriterion::Date,
            "subj" | "subject" => SortCriterion::Subject,
            "name" => SortCriterion::Name,
            "namenatural" => SortCriterion::NameNaturalOrder,
            "sender" => SortCriterion::Sender,
            "size" => SortCriterion::Size,
            "taskdue" => SortCriterion::TaskDue,
            "taskstatus" => SortCriterion::TaskStatus,
            "taskperc" => SortCriterion::TaskPercentComplete,
            "namelocalized" => SortCriterion::NameLocalized,
            _ => {
                debug!("unknown sort '{}', using dateDesc", name);
                return SortBy::DATE_DESC;
            }
        };
        SortBy::new(criterion, direction)
    }
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::DATE_DESC
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
