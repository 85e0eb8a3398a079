//! Sorted row-id sets.
//!
//! The hot representation is a sorted `Vec<RowId>`; above
//! [`BTREE_THRESHOLD`] the set flips to a `BTreeSet` so `erase` stays
//! cheap on huge posting sets. `Unordered` adds append and defer sorting
//! to [`IdSet::commit`], which index commit calls once per batch.

use std::collections::BTreeSet;

use vellum_types::RowId;

/// Representation switch point, in ids.
pub const BTREE_THRESHOLD: usize = 50_000;

/// Insert mode for [`IdSet::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// Pick `Ordered` or `Unordered` based on the current state.
    Auto,
    /// Keep the set sorted on every insert.
    Ordered,
    /// Append now, sort on `commit`.
    Unordered,
}

#[derive(Debug, Clone)]
enum Repr {
    Vec(Vec<RowId>),
    BTree(BTreeSet<RowId>),
}

/// Sorted set of row ids with a B-tree overflow form.
#[derive(Debug, Clone)]
pub struct IdSet {
    repr: Repr,
    /// Count of deferred (unsorted) ids at the vector tail.
    unsorted_tail: usize,
}

impl Default for IdSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            repr: Repr::Vec(Vec::new()),
            unsorted_tail: 0,
        }
    }

    #[must_use]
    pub fn from_vec(mut ids: Vec<RowId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self {
            repr: Repr::Vec(ids),
            unsorted_tail: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Vec(v) => v.len(),
            Repr::BTree(s) => s.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no deferred adds are pending.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.unsorted_tail == 0
    }

    /// Insert `id`. Duplicate inserts are ignored (after commit for the
    /// unordered path).
    pub fn add(&mut self, id: RowId, mode: AddMode) {
        let unsorted_tail = &mut self.unsorted_tail;
        let overflow = match &mut self.repr {
            Repr::Vec(v) => {
                let unordered = match mode {
                    AddMode::Unordered => true,
                    AddMode::Ordered => false,
                    AddMode::Auto => *unsorted_tail > 0,
                };
                if unordered {
                    v.push(id);
                    *unsorted_tail += 1;
                } else {
                    debug_assert!(*unsorted_tail == 0);
                    match v.binary_search(&id) {
                        Ok(_) => {}
                        Err(pos) => v.insert(pos, id),
                    }
                }
                v.len() > BTREE_THRESHOLD
            }
            Repr::BTree(s) => {
                s.insert(id);
                false
            }
        };
        if overflow {
            self.commit();
            if let Repr::Vec(v) = &mut self.repr {
                let ids = std::mem::take(v);
                self.repr = Repr::BTree(ids.into_iter().collect());
            }
        }
    }

    /// Remove `id`; O(log n) on either representation.
    pub fn erase(&mut self, id: RowId) {
        self.commit();
        match &mut self.repr {
            Repr::Vec(v) => {
                if let Ok(pos) = v.binary_search(&id) {
                    v.remove(pos);
                }
            }
            Repr::BTree(s) => {
                s.remove(&id);
            }
        }
    }

    /// Sort and dedup any deferred adds.
    pub fn commit(&mut self) {
        if self.unsorted_tail == 0 {
            return;
        }
        if let Repr::Vec(v) = &mut self.repr {
            v.sort_unstable();
            v.dedup();
        }
        self.unsorted_tail = 0;
    }

    #[must_use]
    pub fn contains(&self, id: RowId) -> bool {
        match &self.repr {
            Repr::Vec(v) => {
                if self.unsorted_tail == 0 {
                    v.binary_search(&id).is_ok()
                } else {
                    v.contains(&id)
                }
            }
            Repr::BTree(s) => s.contains(&id),
        }
    }

    /// Ids in ascending order. Callers must [`Self::commit`] first when
    /// deferred adds may be pending.
    pub fn iter(&self) -> Box<dyn Iterator<Item = RowId> + '_> {
        match &self.repr {
            Repr::Vec(v) => Box::new(v.iter().copied()),
            Repr::BTree(s) => Box::new(s.iter().copied()),
        }
    }

    /// Materialize into a plain vector (ascending).
    #[must_use]
    pub fn to_vec(&self) -> Vec<RowId> {
        match &self.repr {
            Repr::Vec(v) => {
                if self.unsorted_tail == 0 {
                    v.clone()
                } else {
                    let mut out = v.clone();
                    out.sort_unstable();
                    out.dedup();
                    out
                }
            }
            Repr::BTree(s) => s.iter().copied().collect(),
        }
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        match &self.repr {
            Repr::Vec(v) => v.capacity() * std::mem::size_of::<RowId>(),
            Repr::BTree(s) => s.len() * (std::mem::size_of::<RowId>() + 16),
        }
    }
}

impl FromIterator<RowId> for IdSet {
    fn from_iter<T: IntoIterator<Item = RowId>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_add_keeps_sorted() {
        let mut s = IdSet::new();
        for id in [5u32, 1, 3, 2, 4] {
            s.add(id, AddMode::Ordered);
        }
        assert_eq!(s.to_vec(), vec![1, 2, 3, 4, 5]);
        assert!(s.is_committed());
    }

    #[test]
    fn test_unordered_defers_to_commit() {
        let mut s = IdSet::new();
        for id in [5u32, 1, 5, 2] {
            s.add(id, AddMode::Unordered);
        }
        assert!(!s.is_committed());
        s.commit();
        assert_eq!(s.to_vec(), vec![1, 2, 5]);
    }

    #[test]
    fn test_erase() {
        let mut s = IdSet::from_vec(vec![1, 2, 3]);
        s.erase(2);
        assert_eq!(s.to_vec(), vec![1, 3]);
        s.erase(99);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_btree_overflow() {
        let mut s = IdSet::new();
        for id in 0..(BTREE_THRESHOLD as u32 + 10) {
            s.add(id, AddMode::Unordered);
        }
        s.commit();
        assert_eq!(s.len(), BTREE_THRESHOLD + 10);
        assert!(s.contains(BTREE_THRESHOLD as u32 + 5));
        s.erase(7);
        assert!(!s.contains(7));
    }

    #[test]
    fn test_duplicate_ordered_add_is_noop() {
        let mut s = IdSet::new();
        s.add(1, AddMode::Ordered);
        s.add(1, AddMode::Ordered);
        assert_eq!(s.len(), 1);
    }
}
