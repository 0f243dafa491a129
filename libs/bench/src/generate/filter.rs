//! Filter Specification: the structured predicate attached to a query.
//!
//! Semantics are shared by every backend translation and by the exact oracle:
//! - `must_include` is conjunctive, every listed label has to be present
//! - `must_exclude` is conjunctive negation, none of the listed labels may be present
//! - date bounds are closed, `gte <= publication_date <= lte`
//!
//! A filter with no bound and empty label sets constrains nothing; the
//! generator stores it as "no filter" so it is never confused with a filter
//! that legitimately matches zero documents.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

use super::DocumentPayload;

/// Which date bounds a filter carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilterMode {
    None,
    LowerBound,
    UpperBound,
    BothBounds,
}

/// Closed interval over publication dates, in unix epoch seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilter {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gte: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lte: Option<i64>,
}

impl DateFilter {
    pub fn mode(&self) -> DateFilterMode {
        match (self.gte, self.lte) {
            (None, None) => DateFilterMode::None,
            (Some(_), None) => DateFilterMode::LowerBound,
            (None, Some(_)) => DateFilterMode::UpperBound,
            (Some(_), Some(_)) => DateFilterMode::BothBounds,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.mode() == DateFilterMode::None
    }

    pub fn matches(&self, date: i64) -> bool {
        self.gte.map_or(true, |lo| date >= lo) && self.lte.map_or(true, |hi| date <= hi)
    }
}

/// Required and forbidden labels of one payload field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFilter {
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub must_include: BTreeSet<u32>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub must_exclude: BTreeSet<u32>,
}

impl LabelFilter {
    pub fn is_unconstrained(&self) -> bool {
        self.must_include.is_empty() && self.must_exclude.is_empty()
    }

    pub fn matches(&self, labels: &BTreeSet<u32>) -> bool {
        self.must_include.is_subset(labels) && self.must_exclude.is_disjoint(labels)
    }

    /// Labels present in both sets, empty for a well-formed filter.
    pub fn overlap(&self) -> Vec<u32> {
        self.must_include
            .intersection(&self.must_exclude)
            .copied()
            .collect()
    }
}

/// Filter over every payload field of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub publication_date: DateFilter,
    #[serde(default)]
    pub authors: LabelFilter,
    #[serde(default)]
    pub tags: LabelFilter,
}

impl QueryFilter {
    pub fn is_unconstrained(&self) -> bool {
        self.publication_date.is_unconstrained()
            && self.authors.is_unconstrained()
            && self.tags.is_unconstrained()
    }

    /// `None` for a filter that constrains nothing.
    pub fn normalized(self) -> Option<Self> {
        (!self.is_unconstrained()).then_some(self)
    }

    pub fn matches(&self, payload: &DocumentPayload) -> bool {
        self.publication_date.matches(payload.publication_date)
            && self.authors.matches(&payload.authors)
            && self.tags.matches(&payload.tags)
    }

    /// Reject filters whose include and exclude sets share a label.
    pub fn validate(&self, query_index: usize) -> Result<(), GenerationError> {
        for (field, labels) in [("authors", &self.authors), ("tags", &self.tags)] {
            let overlap = labels.overlap();
            if !overlap.is_empty() {
                return Err(GenerationError::OverlappingLabels {
                    query_index,
                    field,
                    labels: overlap,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(date: i64, authors: &[u32], tags: &[u32]) -> DocumentPayload {
        DocumentPayload {
            publication_date: date,
            authors: authors.iter().copied().collect(),
            tags: tags.iter().copied().collect(),
            link: String::new(),
        }
    }

    fn labels(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_date_bounds_are_closed() {
        let filter = DateFilter {
            gte: Some(10),
            lte: Some(20),
        };
        assert_eq!(filter.mode(), DateFilterMode::BothBounds);
        assert!(filter.matches(10));
        assert!(filter.matches(20));
        assert!(!filter.matches(9));
        assert!(!filter.matches(21));
        assert_eq!(DateFilter { gte: None, lte: Some(1) }.mode(), DateFilterMode::UpperBound);
    }

    #[test]
    fn test_include_is_conjunctive() {
        let filter = LabelFilter {
            must_include: labels(&[1, 2]),
            must_exclude: BTreeSet::new(),
        };
        assert!(filter.matches(&labels(&[1, 2, 3])));
        assert!(!filter.matches(&labels(&[1, 3])));
    }

    #[test]
    fn test_exclude_is_conjunctive_negation() {
        let filter = LabelFilter {
            must_include: BTreeSet::new(),
            must_exclude: labels(&[4, 5]),
        };
        assert!(filter.matches(&labels(&[1])));
        assert!(!filter.matches(&labels(&[1, 5])));
    }

    #[test]
    fn test_unconstrained_normalizes_to_none() {
        assert_eq!(QueryFilter::default().normalized(), None);
        let filter = QueryFilter {
            tags: LabelFilter {
                must_include: labels(&[3]),
                must_exclude: BTreeSet::new(),
            },
            ..Default::default()
        };
        assert_eq!(filter.clone().normalized(), Some(filter));
    }

    #[test]
    fn test_empty_match_filter_is_still_a_filter() {
        let filter = QueryFilter {
            publication_date: DateFilter {
                gte: Some(100),
                lte: Some(100),
            },
            ..Default::default()
        };
        assert!(!filter.matches(&payload(99, &[], &[])));
        assert!(filter.normalized().is_some());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let filter = QueryFilter {
            authors: LabelFilter {
                must_include: labels(&[1, 2]),
                must_exclude: labels(&[2, 3]),
            },
            ..Default::default()
        };
        assert_eq!(
            filter.validate(7),
            Err(GenerationError::OverlappingLabels {
                query_index: 7,
                field: "authors",
                labels: vec![2],
            })
        );
    }

    #[test]
    fn test_compact_serialization() {
        let filter = QueryFilter {
            publication_date: DateFilter { gte: Some(5), lte: None },
            ..Default::default()
        };
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"{"publication_date":{"gte":5},"authors":{},"tags":{}}"#);
        assert_eq!(serde_json::from_str::<QueryFilter>(&json).unwrap(), filter);
    }

    #[test]
    fn test_matches_all_fields() {
        let filter = QueryFilter {
            publication_date: DateFilter { gte: Some(0), lte: None },
            authors: LabelFilter {
                must_include: labels(&[1]),
                must_exclude: BTreeSet::new(),
            },
            tags: LabelFilter {
                must_include: BTreeSet::new(),
                must_exclude: labels(&[9]),
            },
        };
        assert!(filter.matches(&payload(5, &[1], &[2])));
        assert!(!filter.matches(&payload(5, &[1], &[9])));
        assert!(!filter.matches(&payload(-1, &[1], &[2])));
    }
}
