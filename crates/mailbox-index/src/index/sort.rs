//! Logical sort to engine sort translation

use crate::engine::{NativeSort, SortField, SortType};
use crate::models::{SortBy, SortCriterion};

/// Date descending, used for every criterion without a native mapping
const DATE_DESC: NativeSort = NativeSort {
    field: SortField::Date,
    kind: SortType::String,
    reverse: true,
};

/// Map a logical sort to the engine's sort descriptor
///
/// `SortBy::NONE` maps to no sort (engine order). Criteria other than name,
/// sender, subject and size fall back to date descending whatever the
/// requested direction.
pub fn to_native_sort(sort: SortBy) -> Option<NativeSort> {
    let reverse = sort.is_descending();
    let native = match sort.criterion {
        SortCriterion::None => return None,
        SortCriterion::Name | SortCriterion::NameNaturalOrder | SortCriterion::Sender => {
            NativeSort {
                field: SortField::Name,
                kind: SortType::String,
                reverse,
            }
        }
        SortCriterion::Subject => NativeSort {
            field: SortField::Subject,
            kind: SortType::String,
            reverse,
        },
        SortCriterion::Size => NativeSort {
            field: SortField::Size,
            kind: SortType::Numeric,
            reverse,
        },
        SortCriterion::Date
        | SortCriterion::TaskDue
        | SortCriterion::TaskStatus
        | SortCriterion::TaskPercentComplete
        | SortCriterion::NameLocalized => DATE_DESC,
    };
    Some(native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortDirection;

    const ALL_CRITERIA: [SortCriterion; 11] = [
        SortCriterion::None,
        SortCriterion::Date,
        SortCriterion::Subject,
        SortCriterion::Name,
        SortCriterion::NameNaturalOrder,
        SortCriterion::Sender,
        SortCriterion::Size,
        SortCriterion::TaskDue,
        SortCriterion::TaskStatus,
        SortCriterion::TaskPercentComplete,
        SortCriterion::NameLocalized,
    ];

    #[test]
    fn test_none_has_no_native_sort() {
        assert_eq!(to_native_sort(SortBy::NONE), None);
    }

    #[test]
    fn test_mapped_criteria_follow_direction() {
        let name = to_native_sort(SortBy::NAME_DESC).unwrap();
        assert_eq!(name.field, SortField::Name);
        assert_eq!(name.kind, SortType::String);
        assert!(name.reverse);

        let sender = to_native_sort(SortBy::new(SortCriterion::Sender, SortDirection::Ascending))
            .unwrap();
        assert_eq!(sender.field, SortField::Name);
        assert!(!sender.reverse);

        let subject = to_native_sort(SortBy::SUBJECT_ASC).unwrap();
        assert_eq!(subject.field, SortField::Subject);
        assert!(!subject.reverse);

        let size = to_native_sort(SortBy::SIZE_DESC).unwrap();
        assert_eq!(size.field, SortField::Size);
        assert_eq!(size.kind, SortType::Numeric);
        assert!(size.reverse);
    }

    #[test]
    fn test_unmapped_criteria_fall_back_to_date_desc() {
        let mapped = [
            SortCriterion::None,
            SortCriterion::Name,
            SortCriterion::NameNaturalOrder,
            SortCriterion::Sender,
            SortCriterion::Subject,
            SortCriterion::Size,
        ];
        for criterion in ALL_CRITERIA.into_iter().filter(|c| !mapped.contains(c)) {
            for direction in [SortDirection::Ascending, SortDirection::Descending] {
                assert_eq!(
                    to_native_sort(SortBy::new(criterion, direction)),
                    Some(DATE_DESC),
                    "{criterion:?} {direction:?}"
                );
            }
        }
    }
}
