//! Generic ordered/unordered index stores.
//!
//! [`StoreIndex`] is instantiated over a key type ([`IndexKey`]) and a map
//! shape ([`KeyMap`]): `HashMap` for hash indexes, `BTreeMap` for tree and
//! TTL indexes. Sparse and array variants share the same store; rows with
//! no value land in the `empty_ids` entry, queryable with `IS NULL`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use tracing::trace;
use vellum_error::Result;
use vellum_idset::{AddMode, IdSet};
use vellum_types::{CondType, Cx, RowId, Value};

use crate::cache::{IdSetCache, IdSetCacheKey};
use crate::comparator::{like_match, Comparator, ComparatorField};
use crate::def::{IndexDef, IndexMemStat};
use crate::index::{Index, IndexBase, SelectOpts, SortOrdersCtx};
use crate::indexkey::IndexKey;
use crate::keyentry::{KeyEntry, SortType};
use crate::selectresult::{SelectKeyResult, SelectKeyResults, SingleKeyResult};

/// Map shape abstraction: hash (unordered) or btree (ordered).
pub trait KeyMap<K: IndexKey>: Default + Clone + Send + Sync + std::fmt::Debug + 'static {
    const ORDERED: bool;

    fn get(&self, k: &K) -> Option<&KeyEntry>;
    fn entry_mut(&mut self, k: K) -> &mut KeyEntry;
    fn remove_key(&mut self, k: &K) -> Option<K>;
    fn len(&self) -> usize;
    fn for_each(&self, f: &mut dyn FnMut(&K, &KeyEntry));
    fn for_each_mut(&mut self, f: &mut dyn FnMut(&K, &mut KeyEntry));
    /// Visit entries selected by an ordered condition. Unordered maps
    /// never get here (the caller downgraded to a comparator).
    fn range_scan(
        &self,
        cond: CondType,
        from: &K,
        to: Option<&K>,
        f: &mut dyn FnMut(&K, &KeyEntry),
    );
}

impl<K: IndexKey> KeyMap<K> for HashMap<K, KeyEntry> {
    const ORDERED: bool = false;

    fn get(&self, k: &K) -> Option<&KeyEntry> {
        Self::get(self, k)
    }

    fn entry_mut(&mut self, k: K) -> &mut KeyEntry {
        self.entry(k).or_default()
    }

    fn remove_key(&mut self, k: &K) -> Option<K> {
        self.remove_entry(k).map(|(k, _)| k)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &KeyEntry)) {
        for (k, e) in self {
            f(k, e);
        }
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&K, &mut KeyEntry)) {
        for (k, e) in self.iter_mut() {
            f(k, e);
        }
    }

    fn range_scan(
        &self,
        _cond: CondType,
        _from: &K,
        _to: Option<&K>,
        _f: &mut dyn FnMut(&K, &KeyEntry),
    ) {
        debug_assert!(false, "range scan on an unordered map");
    }
}

impl<K: IndexKey> KeyMap<K> for BTreeMap<K, KeyEntry> {
    const ORDERED: bool = true;

    fn get(&self, k: &K) -> Option<&KeyEntry> {
        Self::get(self, k)
    }

    fn entry_mut(&mut self, k: K) -> &mut KeyEntry {
        self.entry(k).or_default()
    }

    fn remove_key(&mut self, k: &K) -> Option<K> {
        self.remove_entry(k).map(|(k, _)| k)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &KeyEntry)) {
        for (k, e) in self {
            f(k, e);
        }
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&K, &mut KeyEntry)) {
        for (k, e) in self.iter_mut() {
            f(k, e);
        }
    }

    fn range_scan(
        &self,
        cond: CondType,
        from: &K,
        to: Option<&K>,
        f: &mut dyn FnMut(&K, &KeyEntry),
    ) {
        let bounds: (Bound<&K>, Bound<&K>) = match cond {
            CondType::Lt => (Bound::Unbounded, Bound::Excluded(from)),
            CondType::Le => (Bound::Unbounded, Bound::Included(from)),
            CondType::Gt => (Bound::Excluded(from), Bound::Unbounded),
            CondType::Ge => (Bound::Included(from), Bound::Unbounded),
            CondType::Range => match to {
                Some(to) => (Bound::Included(from), Bound::Included(to)),
                None => return,
            },
            _ => return,
        };
        for (k, e) in self.range(bounds) {
            f(k, e);
        }
    }
}

/// Unordered (hash) store.
pub type HashStore<K> = HashMap<K, KeyEntry>;
/// Ordered (tree) store.
pub type TreeStore<K> = BTreeMap<K, KeyEntry>;

/// Generic index over a key type and a map shape.
#[derive(Debug)]
pub struct StoreIndex<K: IndexKey, M: KeyMap<K>> {
    base: IndexBase,
    map: M,
    empty_ids: KeyEntry,
    cache: IdSetCache,
    sort_orders: Vec<RowId>,
    _key: PhantomData<K>,
}

impl<K: IndexKey, M: KeyMap<K>> StoreIndex<K, M> {
    #[must_use]
    pub fn new(def: IndexDef) -> Self {
        Self {
            base: IndexBase::new(def),
            map: M::default(),
            empty_ids: KeyEntry::new(),
            cache: IdSetCache::default(),
            sort_orders: Vec::new(),
            _key: PhantomData,
        }
    }

    fn key_of(&self, v: &Value) -> Result<K> {
        K::from_value(v, self.base.def.opts.collate, &self.base.def.name)
    }

    fn comparator(&self, cond: CondType, keys: &[Value]) -> Comparator {
        Comparator::new(
            self.base.cmp_field.clone(),
            cond,
            keys.to_vec(),
            self.base.def.opts.collate,
        )
    }

    fn comparator_result(&self, cond: CondType, keys: &[Value]) -> SelectKeyResults {
        vec![SelectKeyResult::from_comparator(self.comparator(cond, keys))]
    }

    fn push_entry(&self, res: &mut SelectKeyResult, entry: &KeyEntry, sort_id: SortType) {
        match entry.sorted(sort_id) {
            Some(sorted) => res.ids.push(SingleKeyResult::SortedIds(sorted)),
            None => res.ids.push(SingleKeyResult::Ids(Arc::clone(entry.ids()))),
        }
    }

    /// Candidate-count bound above which `SelectKey` hands back a
    /// comparator instead of materializing ids.
    fn fallback_bound(&self, opts: &SelectOpts) -> usize {
        opts.max_iterations.min((opts.items_count / 2).max(1))
    }

    fn supports_empty(&self) -> bool {
        self.base.def.opts.sparse || self.base.def.opts.array
    }

    fn cached_merge(
        &self,
        keys: &[Value],
        cond: CondType,
        sort_id: SortType,
        opts: &SelectOpts,
        collect: impl FnOnce() -> Vec<RowId>,
    ) -> SingleKeyResult {
        let use_cache = !opts.disable_idset_cache && !self.base.def.is_composite();
        let cache_key = IdSetCacheKey {
            keys: keys.to_vec(),
            cond,
            sort_id,
        };
        if use_cache {
            if let Some(hit) = self.cache.get(&cache_key) {
                trace!(index = %self.base.def.name, "idset cache hit");
                return SingleKeyResult::Ids(hit);
            }
        }
        let ids = Arc::new(IdSet::from_vec(collect()));
        if use_cache {
            self.cache.put(cache_key, Arc::clone(&ids));
        }
        SingleKeyResult::Ids(ids)
    }
}

impl<K: IndexKey, M: KeyMap<K>> Index for StoreIndex<K, M> {
    fn def(&self) -> &IndexDef {
        &self.base.def
    }

    fn is_ordered(&self) -> bool {
        M::ORDERED
    }

    fn sort_id(&self) -> SortType {
        self.base.sort_id
    }

    fn set_sort_id(&mut self, id: SortType) {
        self.base.sort_id = id;
    }

    fn bind_comparator_field(&mut self, field: ComparatorField) {
        self.base.cmp_field = field;
    }

    fn upsert(&mut self, keys: &[Value], id: RowId) -> Result<Vec<Value>> {
        self.cache.clear();
        if keys.is_empty() {
            self.empty_ids.add(id, AddMode::Auto);
            return Ok(Vec::new());
        }
        let mut stored = Vec::with_capacity(keys.len());
        for v in keys {
            let k = self.key_of(v)?;
            stored.push(k.to_value());
            self.map.entry_mut(k).add(id, AddMode::Auto);
        }
        Ok(stored)
    }

    fn delete(&mut self, keys: &[Value], id: RowId, retired: &mut Vec<Arc<str>>) -> Result<()> {
        self.cache.clear();
        if keys.is_empty() {
            self.empty_ids.erase(id);
            return Ok(());
        }
        for v in keys {
            let k = self.key_of(v)?;
            let now_empty = match self.map.get(&k) {
                Some(_) => {
                    let entry = self.map.entry_mut(k.clone());
                    entry.erase(id);
                    entry.is_empty()
                }
                None => continue,
            };
            if now_empty {
                if let Some(owned) = self.map.remove_key(&k) {
                    owned.retire(retired);
                }
            }
        }
        Ok(())
    }

    fn select_key(
        &self,
        keys: &[Value],
        cond: CondType,
        sort_id: SortType,
        opts: &SelectOpts,
        cx: &Cx,
    ) -> Result<SelectKeyResults> {
        cx.checkpoint()?;
        let is_pk = self.base.def.opts.pk;
        if opts.force_comparator && !is_pk {
            return Ok(self.comparator_result(cond, keys));
        }
        let mut res = SelectKeyResult::default();
        match cond {
            CondType::Any => return Ok(self.comparator_result(cond, keys)),
            CondType::Empty => {
                if self.supports_empty() {
                    self.push_entry(&mut res, &self.empty_ids, sort_id);
                } else {
                    return Ok(self.comparator_result(cond, keys));
                }
            }
            CondType::Eq | CondType::Set => {
                for v in keys {
                    let k = self.key_of(v)?;
                    if let Some(entry) = self.map.get(&k) {
                        self.push_entry(&mut res, entry, sort_id);
                    }
                }
                let total = res.max_iterations(usize::MAX);
                if !is_pk && total > self.fallback_bound(opts) {
                    trace!(
                        index = %self.base.def.name,
                        total,
                        "comparator fallback for large candidate set"
                    );
                    return Ok(self.comparator_result(cond, keys));
                }
            }
            CondType::AllSet => {
                // No required values: the whole namespace qualifies.
                if keys.is_empty() {
                    res.ids.push(SingleKeyResult::Range {
                        begin: 0,
                        end: opts.items_count as RowId,
                    });
                    return Ok(vec![res]);
                }
                // Intersection across every key's idset.
                let mut entries = Vec::with_capacity(keys.len());
                for v in keys {
                    let k = self.key_of(v)?;
                    match self.map.get(&k) {
                        Some(e) => entries.push(e),
                        None => {
                            res.ids.clear();
                            return Ok(vec![res]);
                        }
                    }
                }
                if let Some((first, rest)) = entries.split_first() {
                    let ids: Vec<RowId> = first
                        .ids()
                        .iter()
                        .filter(|&id| rest.iter().all(|e| e.ids().contains(id)))
                        .collect();
                    res.ids
                        .push(SingleKeyResult::Ids(Arc::new(IdSet::from_vec(ids))));
                }
            }
            CondType::Lt | CondType::Le | CondType::Gt | CondType::Ge | CondType::Range => {
                if !M::ORDERED || keys.is_empty() {
                    return Ok(self.comparator_result(cond, keys));
                }
                let from = self.key_of(&keys[0])?;
                let to = match cond {
                    CondType::Range => {
                        let hi = self.key_of(keys.get(1).unwrap_or(&Value::Null))?;
                        if from > hi {
                            // Reversed bounds select nothing.
                            return Ok(vec![res]);
                        }
                        Some(hi)
                    }
                    _ => None,
                };
                let merged = self.cached_merge(keys, cond, sort_id, opts, || {
                    let mut ids = Vec::new();
                    self.map
                        .range_scan(cond, &from, to.as_ref(), &mut |_, entry| {
                            ids.extend(entry.ids().iter());
                        });
                    ids
                });
                if merged.len() > self.fallback_bound(opts) {
                    return Ok(self.comparator_result(cond, keys));
                }
                res.ids.push(merged);
            }
            CondType::Like => {
                if !M::ORDERED {
                    return Ok(self.comparator_result(cond, keys));
                }
                let Some(Value::Str(pattern)) = keys.first() else {
                    return Ok(self.comparator_result(cond, keys));
                };
                let collate = self.base.def.opts.collate;
                let merged = self.cached_merge(keys, cond, sort_id, opts, || {
                    let mut ids = Vec::new();
                    self.map.for_each(&mut |k, entry| {
                        if let Value::Str(s) = k.to_value() {
                            if like_match(&s, pattern, collate) {
                                ids.extend(entry.ids().iter());
                            }
                        }
                    });
                    ids
                });
                res.ids.push(merged);
            }
            CondType::DWithin => return Ok(self.comparator_result(cond, keys)),
        }
        Ok(vec![res])
    }

    fn commit(&mut self) {
        self.map.for_each_mut(&mut |_, entry| entry.commit());
        self.empty_ids.commit();
    }

    fn make_sort_orders(&mut self, ctx: &mut SortOrdersCtx) {
        if !M::ORDERED || self.base.sort_id == 0 {
            return;
        }
        let slot = usize::from(self.base.sort_id) - 1;
        let Some(ids2sorts) = ctx.ids2sorts.get_mut(slot) else {
            return;
        };
        let sort_orders = &mut self.sort_orders;
        sort_orders.clear();
        let mut pos = 0u32;
        self.map.for_each(&mut |_, entry| {
            for id in entry.ids().iter() {
                sort_orders.push(id);
                if let Some(p) = ids2sorts.get_mut(id as usize) {
                    *p = pos;
                }
                pos += 1;
            }
        });
        // Rows without a key (sparse empties) sort after everything else.
        for id in self.empty_ids.ids().iter() {
            sort_orders.push(id);
            if let Some(p) = ids2sorts.get_mut(id as usize) {
                *p = pos;
            }
            pos += 1;
        }
    }

    fn update_sorted_ids(&mut self, ctx: &SortOrdersCtx) {
        for sort_id in 1..=ctx.ids2sorts.len() as u16 {
            let Some(map) = ctx.map_for(sort_id) else {
                continue;
            };
            self.map
                .for_each_mut(&mut |_, entry| entry.update_sorted(sort_id, map));
            self.empty_ids.update_sorted(sort_id, map);
        }
    }

    fn sort_orders(&self) -> &[RowId] {
        &self.sort_orders
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }

    fn keys_count(&self) -> usize {
        self.map.len()
    }

    fn mem_stat(&self) -> IndexMemStat {
        let mut idsets_size = self.empty_ids.heap_size();
        self.map.for_each(&mut |_, entry| {
            idsets_size += entry.heap_size();
        });
        IndexMemStat {
            name: self.base.def.name.clone(),
            unique_keys_count: self.map.len(),
            idsets_size,
            sort_orders_size: self.sort_orders.len() * std::mem::size_of::<RowId>(),
            cache_items: self.cache.len(),
        }
    }

    fn clone_index(&self) -> Box<dyn Index> {
        Box::new(Self {
            base: self.base.clone(),
            map: self.map.clone(),
            empty_ids: self.empty_ids.clone(),
            cache: IdSetCache::default(),
            sort_orders: self.sort_orders.clone(),
            _key: PhantomData,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{IndexOpts, IndexType};
    use crate::indexkey::{IntKey, StrKey};
    use vellum_types::FieldKind;

    fn opts_all() -> SelectOpts {
        SelectOpts {
            items_count: 1_000_000,
            ..SelectOpts::default()
        }
    }

    fn int_tree() -> StoreIndex<IntKey, TreeStore<IntKey>> {
        StoreIndex::new(IndexDef::new(
            "score",
            FieldKind::Int,
            IndexType::Tree,
            IndexOpts::default(),
        ))
    }

    fn select_ids(
        idx: &dyn Index,
        keys: &[Value],
        cond: CondType,
    ) -> Vec<RowId> {
        let res = idx
            .select_key(keys, cond, 0, &opts_all(), &Cx::background())
            .unwrap();
        res[0].merge_ids()
    }

    #[test]
    fn test_eq_lookup() {
        let mut idx = int_tree();
        idx.upsert(&[Value::Int(10)], 1).unwrap();
        idx.upsert(&[Value::Int(10)], 2).unwrap();
        idx.upsert(&[Value::Int(20)], 3).unwrap();
        idx.commit();
        assert_eq!(select_ids(&idx, &[Value::Int(10)], CondType::Eq), vec![1, 2]);
        assert!(select_ids(&idx, &[Value::Int(99)], CondType::Eq).is_empty());
    }

    #[test]
    fn test_range_and_reversed() {
        let mut idx = int_tree();
        for (id, v) in [(1u32, 10i64), (2, 20), (3, 30), (4, 40), (5, 50)] {
            idx.upsert(&[Value::Int(v)], id).unwrap();
        }
        idx.commit();
        assert_eq!(
            select_ids(&idx, &[Value::Int(20), Value::Int(40)], CondType::Range),
            vec![2, 3, 4]
        );
        // Reversed bounds: empty.
        assert!(
            select_ids(&idx, &[Value::Int(40), Value::Int(20)], CondType::Range).is_empty()
        );
        // Equal bounds behave as Eq.
        assert_eq!(
            select_ids(&idx, &[Value::Int(30), Value::Int(30)], CondType::Range),
            vec![3]
        );
        assert_eq!(select_ids(&idx, &[Value::Int(40)], CondType::Ge), vec![4, 5]);
        assert_eq!(select_ids(&idx, &[Value::Int(20)], CondType::Lt), vec![1]);
    }

    #[test]
    fn test_delete_removes_entry() {
        let mut idx = int_tree();
        idx.upsert(&[Value::Int(10)], 1).unwrap();
        let mut retired = Vec::new();
        idx.delete(&[Value::Int(10)], 1, &mut retired).unwrap();
        assert!(select_ids(&idx, &[Value::Int(10)], CondType::Eq).is_empty());
        assert_eq!(idx.keys_count(), 0);
    }

    #[test]
    fn test_string_delete_retires_arc() {
        let mut idx: StoreIndex<StrKey, HashStore<StrKey>> = StoreIndex::new(IndexDef::new(
            "name",
            FieldKind::String,
            IndexType::Hash,
            IndexOpts::default(),
        ));
        idx.upsert(&[Value::from("alice")], 1).unwrap();
        let mut retired = Vec::new();
        idx.delete(&[Value::from("alice")], 1, &mut retired).unwrap();
        assert_eq!(retired.len(), 1);
        assert_eq!(&*retired[0], "alice");
    }

    #[test]
    fn test_like_on_ordered_strings() {
        let mut idx: StoreIndex<StrKey, TreeStore<StrKey>> = StoreIndex::new(IndexDef::new(
            "name",
            FieldKind::String,
            IndexType::Tree,
            IndexOpts::default(),
        ));
        idx.upsert(&[Value::from("alice")], 1).unwrap();
        idx.upsert(&[Value::from("bob")], 2).unwrap();
        idx.upsert(&[Value::from("anna")], 3).unwrap();
        idx.commit();
        assert_eq!(
            select_ids(&idx, &[Value::from("a%")], CondType::Like),
            vec![1, 3]
        );
    }

    #[test]
    fn test_sparse_empty_ids() {
        let mut idx: StoreIndex<IntKey, HashStore<IntKey>> = StoreIndex::new(IndexDef::new(
            "opt",
            FieldKind::Int,
            IndexType::Hash,
            IndexOpts::default().sparse(),
        ));
        idx.upsert(&[Value::Int(5)], 1).unwrap();
        idx.upsert(&[], 2).unwrap();
        idx.commit();
        assert_eq!(select_ids(&idx, &[], CondType::Empty), vec![2]);
    }

    #[test]
    fn test_force_comparator() {
        let mut idx = int_tree();
        idx.upsert(&[Value::Int(1)], 1).unwrap();
        let opts = SelectOpts {
            force_comparator: true,
            items_count: 10,
            ..SelectOpts::default()
        };
        let res = idx
            .select_key(&[Value::Int(1)], CondType::Eq, 0, &opts, &Cx::background())
            .unwrap();
        assert!(res[0].has_comparators());
        assert!(res[0].ids.is_empty());
    }

    #[test]
    fn test_sort_orders_roundtrip() {
        let mut idx = int_tree();
        // Insert out of key order: row 0 has the largest key.
        idx.upsert(&[Value::Int(30)], 0).unwrap();
        idx.upsert(&[Value::Int(10)], 1).unwrap();
        idx.upsert(&[Value::Int(20)], 2).unwrap();
        idx.commit();
        idx.set_sort_id(1);
        let mut ctx = SortOrdersCtx::new(3, 1);
        idx.make_sort_orders(&mut ctx);
        assert_eq!(idx.sort_orders(), &[1, 2, 0]);
        idx.update_sorted_ids(&ctx);
        let res = idx
            .select_key(
                &[Value::Int(10), Value::Int(30)],
                CondType::Set,
                1,
                &opts_all(),
                &Cx::background(),
            )
            .unwrap();
        // Both single results come back bound to the sort order.
        let collected: Vec<RowId> = res[0].ids.iter().flat_map(|r| r.iter()).collect();
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn test_idset_cache_cleared_on_mutation() {
        let mut idx = int_tree();
        for (id, v) in [(1u32, 10i64), (2, 20)] {
            idx.upsert(&[Value::Int(v)], id).unwrap();
        }
        idx.commit();
        let before = select_ids(&idx, &[Value::Int(5)], CondType::Gt);
        assert_eq!(before, vec![1, 2]);
        idx.upsert(&[Value::Int(15)], 3).unwrap();
        idx.commit();
        let after = select_ids(&idx, &[Value::Int(5)], CondType::Gt);
        assert_eq!(after, vec![1, 2, 3]);
    }
}
