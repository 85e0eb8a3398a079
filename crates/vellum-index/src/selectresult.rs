//! Results of pushing one query predicate through an index.
//!
//! `SelectKey` yields either id containers (iterable without touching
//! payloads) or row-scan comparators. The container side is a tagged sum
//! of iterator kinds: a shared idset, a materialized sort permutation, or
//! a dense row-id range.

use std::sync::Arc;

use vellum_idset::IdSet;
use vellum_types::RowId;

use crate::comparator::Comparator;

/// One iterable id container.
#[derive(Debug, Clone)]
pub enum SingleKeyResult {
    /// Shared sorted idset (vector or B-tree form).
    Ids(Arc<IdSet>),
    /// Ids permuted by a materialized sort order.
    SortedIds(Arc<Vec<RowId>>),
    /// Dense half-open row-id range `[begin, end)`.
    Range { begin: RowId, end: RowId },
}

impl SingleKeyResult {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Ids(ids) => ids.len(),
            Self::SortedIds(ids) => ids.len(),
            Self::Range { begin, end } => (*end - *begin) as usize,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate ids in the container's native order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = RowId> + '_> {
        match self {
            Self::Ids(ids) => ids.iter(),
            Self::SortedIds(ids) => Box::new(ids.iter().copied()),
            Self::Range { begin, end } => Box::new(*begin..*end),
        }
    }

    #[must_use]
    pub fn contains(&self, id: RowId) -> bool {
        match self {
            Self::Ids(ids) => ids.contains(id),
            Self::SortedIds(ids) => ids.contains(&id),
            Self::Range { begin, end } => id >= *begin && id < *end,
        }
    }
}

/// Result of selecting data for one query predicate: zero or more id
/// containers (a disjunction) and zero or more comparators.
#[derive(Debug, Clone, Default)]
pub struct SelectKeyResult {
    pub ids: Vec<SingleKeyResult>,
    pub comparators: Vec<Comparator>,
    /// Full-text only: relevancy per id, aligned with the order of the
    /// single `SortedIds` container the FT index returns.
    pub ranks: Vec<i32>,
}

impl SelectKeyResult {
    #[must_use]
    pub fn from_ids(ids: Vec<SingleKeyResult>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_comparator(cmp: Comparator) -> Self {
        Self {
            comparators: vec![cmp],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn has_comparators(&self) -> bool {
        !self.comparators.is_empty()
    }

    /// Upper bound of iteration cost, capped at `limit`.
    #[must_use]
    pub fn max_iterations(&self, limit: usize) -> usize {
        let mut count = 0usize;
        for r in &self.ids {
            count = count.saturating_add(r.len());
            if count > limit {
                return limit;
            }
        }
        count
    }

    /// Union every container into one ascending id list.
    #[must_use]
    pub fn merge_ids(&self) -> Vec<RowId> {
        let mut out: Vec<RowId> = Vec::new();
        for r in &self.ids {
            out.extend(r.iter());
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Membership across all containers.
    #[must_use]
    pub fn contains(&self, id: RowId) -> bool {
        self.ids.iter().any(|r| r.contains(id))
    }
}

/// Results for every key of one predicate (distinct selects can produce
/// several; almost always exactly one).
pub type SelectKeyResults = Vec<SelectKeyResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_iter() {
        let r = SingleKeyResult::Range { begin: 2, end: 5 };
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(r.len(), 3);
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }

    #[test]
    fn test_merge_ids_unions() {
        let a = SingleKeyResult::Ids(Arc::new(IdSet::from_vec(vec![1, 3])));
        let b = SingleKeyResult::Ids(Arc::new(IdSet::from_vec(vec![2, 3])));
        let res = SelectKeyResult::from_ids(vec![a, b]);
        assert_eq!(res.merge_ids(), vec![1, 2, 3]);
        assert_eq!(res.max_iterations(100), 4);
    }
}
