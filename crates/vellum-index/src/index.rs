//! The polymorphic index surface.
//!
//! Concrete indexes (ordered/unordered stores, the full-text index) sit
//! behind `Box<dyn Index>` in the namespace. Shared state lives in
//! [`IndexBase`]; the trait carries the operations the namespace engine
//! and the selector need.

use std::any::Any;
use std::sync::Arc;

use vellum_error::Result;
use vellum_types::{CondType, Cx, RowId, Value};

use crate::comparator::ComparatorField;
use crate::def::{IndexDef, IndexMemStat};
use crate::keyentry::SortType;
use crate::selectresult::SelectKeyResults;

/// Per-select options handed to [`Index::select_key`].
#[derive(Debug, Clone)]
pub struct SelectOpts {
    /// Live rows in the namespace; the comparator-fallback fraction is
    /// computed against this.
    pub items_count: usize,
    /// Iteration bound above which an idset is not materialized.
    pub max_iterations: usize,
    pub distinct: bool,
    pub disable_idset_cache: bool,
    pub force_comparator: bool,
    pub unbuilt_sort_orders: bool,
    pub in_transaction: bool,
}

impl Default for SelectOpts {
    fn default() -> Self {
        Self {
            items_count: 0,
            max_iterations: usize::MAX,
            distinct: false,
            disable_idset_cache: false,
            force_comparator: false,
            unbuilt_sort_orders: false,
            in_transaction: false,
        }
    }
}

/// Context for building sort orders across a namespace's ordered indexes.
///
/// `ids2sorts[sort_id - 1][row_id]` is the row's position in that sort
/// order; rows outside the index sort last.
#[derive(Debug, Default)]
pub struct SortOrdersCtx {
    pub rows: usize,
    pub ids2sorts: Vec<Vec<u32>>,
}

impl SortOrdersCtx {
    #[must_use]
    pub fn new(rows: usize, sorted_indexes: usize) -> Self {
        Self {
            rows,
            ids2sorts: vec![vec![u32::MAX; rows]; sorted_indexes],
        }
    }

    #[must_use]
    pub fn map_for(&self, sort_id: SortType) -> Option<&[u32]> {
        if sort_id == 0 {
            return None;
        }
        self.ids2sorts.get(usize::from(sort_id) - 1).map(Vec::as_slice)
    }
}

/// State common to every index implementation.
#[derive(Debug, Clone)]
pub struct IndexBase {
    pub def: IndexDef,
    pub sort_id: SortType,
    pub cmp_field: ComparatorField,
}

impl IndexBase {
    #[must_use]
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            sort_id: 0,
            cmp_field: ComparatorField::Field(0),
        }
    }
}

/// Polymorphic index capability.
pub trait Index: Send + Sync + std::fmt::Debug {
    fn def(&self) -> &IndexDef;

    fn name(&self) -> &str {
        &self.def().name
    }

    fn is_ordered(&self) -> bool;

    fn is_fulltext(&self) -> bool {
        false
    }

    fn sort_id(&self) -> SortType;
    fn set_sort_id(&mut self, id: SortType);

    /// Bind the payload location comparators for this index read from.
    fn bind_comparator_field(&mut self, field: ComparatorField);

    /// Insert `keys` for row `id`; an empty slice files the row under the
    /// sparse/array "no value" entry. Returns the key values as stored
    /// (dense single-value indexes must preserve these in the payload).
    fn upsert(&mut self, keys: &[Value], id: RowId) -> Result<Vec<Value>>;

    /// Remove `keys` for row `id`; dying strings are pushed to `retired`.
    fn delete(&mut self, keys: &[Value], id: RowId, retired: &mut Vec<Arc<str>>) -> Result<()>;

    fn select_key(
        &self,
        keys: &[Value],
        cond: CondType,
        sort_id: SortType,
        opts: &SelectOpts,
        cx: &Cx,
    ) -> Result<SelectKeyResults>;

    /// Sort deferred id additions; called by index optimization.
    fn commit(&mut self);

    /// Fill this index's sort order (ordered indexes with a sort id).
    fn make_sort_orders(&mut self, ctx: &mut SortOrdersCtx);

    /// Rebuild the per-entry sorted permutations from the fresh context.
    fn update_sorted_ids(&mut self, ctx: &SortOrdersCtx);

    /// Row ids in index order; empty unless built by `make_sort_orders`.
    fn sort_orders(&self) -> &[RowId];

    fn clear_cache(&self);

    fn keys_count(&self) -> usize;

    fn mem_stat(&self) -> IndexMemStat;

    fn clone_index(&self) -> Box<dyn Index>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
