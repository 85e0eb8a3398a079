//! Per-key id containers.

use std::sync::Arc;

use vellum_idset::{AddMode, IdSet};
use vellum_types::RowId;

/// Sort-order id: a dense small integer allocated to ordered indexes at
/// optimization time. 0 means "no sort order".
pub type SortType = u16;

/// Ids of the rows holding one key value, plus the materialized
/// permutations for every built sort order.
#[derive(Debug, Clone, Default)]
pub struct KeyEntry {
    ids: Arc<IdSet>,
    /// `sorted[sort_id - 1]` is the id list permuted by that sort order.
    sorted: Vec<Arc<Vec<RowId>>>,
}

impl KeyEntry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ids(&self) -> &Arc<IdSet> {
        &self.ids
    }

    pub fn add(&mut self, id: RowId, mode: AddMode) {
        Arc::make_mut(&mut self.ids).add(id, mode);
        self.sorted.clear();
    }

    pub fn erase(&mut self, id: RowId) {
        Arc::make_mut(&mut self.ids).erase(id);
        self.sorted.clear();
    }

    pub fn commit(&mut self) {
        if !self.ids.is_committed() {
            Arc::make_mut(&mut self.ids).commit();
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// The id list permuted by `sort_id`, falling back to ascending order
    /// when that permutation has not been materialized.
    #[must_use]
    pub fn sorted(&self, sort_id: SortType) -> Option<Arc<Vec<RowId>>> {
        if sort_id == 0 {
            return None;
        }
        self.sorted.get(usize::from(sort_id) - 1).cloned()
    }

    /// Install the permutation for `sort_id` using the row→position map
    /// built by the index optimizer.
    pub fn update_sorted(&mut self, sort_id: SortType, ids2sorts: &[u32]) {
        if sort_id == 0 {
            return;
        }
        let slot = usize::from(sort_id) - 1;
        if self.sorted.len() <= slot {
            self.sorted.resize_with(slot + 1, Default::default);
        }
        let mut ids = self.ids.to_vec();
        ids.sort_by_key(|&id| ids2sorts.get(id as usize).copied().unwrap_or(u32::MAX));
        self.sorted[slot] = Arc::new(ids);
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.ids.heap_size()
            + self
                .sorted
                .iter()
                .map(|s| s.len() * std::mem::size_of::<RowId>())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_erase() {
        let mut e = KeyEntry::new();
        e.add(3, AddMode::Ordered);
        e.add(1, AddMode::Ordered);
        assert_eq!(e.ids().to_vec(), vec![1, 3]);
        e.erase(1);
        assert_eq!(e.ids().to_vec(), vec![3]);
    }

    #[test]
    fn test_sorted_permutation() {
        let mut e = KeyEntry::new();
        for id in [0u32, 1, 2] {
            e.add(id, AddMode::Ordered);
        }
        // Sort order: row 2 first, then 0, then 1.
        let ids2sorts = vec![1u32, 2, 0];
        e.update_sorted(1, &ids2sorts);
        assert_eq!(*e.sorted(1).unwrap(), vec![2, 0, 1]);
        assert!(e.sorted(0).is_none());
    }

    #[test]
    fn test_mutation_invalidates_sorted() {
        let mut e = KeyEntry::new();
        e.add(0, AddMode::Ordered);
        e.update_sorted(1, &[0]);
        assert!(e.sorted(1).is_some());
        e.add(1, AddMode::Ordered);
        assert!(e.sorted(1).is_none());
    }
}
