//! Secondary index layer: ordered and unordered stores, sparse and
//! composite variants, idset caching, comparators and sort-order
//! materialization.

pub mod cache;
pub mod comparator;
pub mod def;
pub mod index;
pub mod indexkey;
pub mod keyentry;
pub mod selectresult;
pub mod store;

pub use cache::{IdSetCache, IdSetCacheKey, DEFAULT_IDSET_CACHE_SIZE};
pub use comparator::{like_match, Comparator, ComparatorField};
pub use def::{IndexDef, IndexMemStat, IndexOpts, IndexType};
pub use index::{Index, IndexBase, SelectOpts, SortOrdersCtx};
pub use indexkey::{CompositeKey, DoubleKey, IndexKey, IntKey, StrKey};
pub use keyentry::{KeyEntry, SortType};
pub use selectresult::{SelectKeyResult, SelectKeyResults, SingleKeyResult};
pub use store::{HashStore, KeyMap, StoreIndex, TreeStore};

use vellum_error::{Result, VellumError};
use vellum_types::FieldKind;

/// Build a store index from its definition.
///
/// Full-text definitions are rejected here: the FT layer owns those
/// constructors and the namespace routes to it by index type.
pub fn create_index(def: IndexDef) -> Result<Box<dyn Index>> {
    def.validate()?;
    if def.is_fulltext() {
        return Err(VellumError::Logic(format!(
            "index '{}' is full-text and is built by the ft layer",
            def.name
        )));
    }
    let ordered = def.is_ordered();
    Ok(match (def.field_kind, ordered) {
        (FieldKind::Int | FieldKind::Int64 | FieldKind::Bool, false) => {
            Box::new(StoreIndex::<IntKey, HashStore<IntKey>>::new(def))
        }
        (FieldKind::Int | FieldKind::Int64 | FieldKind::Bool, true) => {
            Box::new(StoreIndex::<IntKey, TreeStore<IntKey>>::new(def))
        }
        (FieldKind::Double, false) => {
            Box::new(StoreIndex::<DoubleKey, HashStore<DoubleKey>>::new(def))
        }
        (FieldKind::Double, true) => {
            Box::new(StoreIndex::<DoubleKey, TreeStore<DoubleKey>>::new(def))
        }
        (FieldKind::String, false) => Box::new(StoreIndex::<StrKey, HashStore<StrKey>>::new(def)),
        (FieldKind::String, true) => Box::new(StoreIndex::<StrKey, TreeStore<StrKey>>::new(def)),
        (FieldKind::Composite, false) => {
            Box::new(StoreIndex::<CompositeKey, HashStore<CompositeKey>>::new(def))
        }
        (FieldKind::Composite, true) => {
            Box::new(StoreIndex::<CompositeKey, TreeStore<CompositeKey>>::new(def))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_types::{CondType, Cx, Value};

    #[test]
    fn test_factory_dispatch() {
        let idx = create_index(IndexDef::new(
            "id",
            FieldKind::Int,
            IndexType::Hash,
            IndexOpts::default().pk(),
        ))
        .unwrap();
        assert!(!idx.is_ordered());
        let idx = create_index(IndexDef::new(
            "score",
            FieldKind::Double,
            IndexType::Tree,
            IndexOpts::default(),
        ))
        .unwrap();
        assert!(idx.is_ordered());
    }

    #[test]
    fn test_factory_rejects_fulltext() {
        let err = create_index(IndexDef::new(
            "text",
            FieldKind::String,
            IndexType::FulltextFast,
            IndexOpts::default(),
        ))
        .unwrap_err();
        assert_eq!(err.kind(), vellum_error::ErrorKind::Logic);
    }

    #[test]
    fn test_composite_index_lookup() {
        let mut idx = create_index(IndexDef::new(
            "a+b",
            FieldKind::Composite,
            IndexType::Hash,
            IndexOpts::default(),
        ))
        .unwrap();
        let key = |a: i64, b: i64| Value::Tuple(vec![Value::Int(a), Value::Int(b)]);
        idx.upsert(&[key(1, 2)], 0).unwrap();
        idx.upsert(&[key(1, 3)], 1).unwrap();
        idx.upsert(&[key(2, 2)], 2).unwrap();
        idx.commit();
        let res = idx
            .select_key(
                &[key(1, 2)],
                CondType::Eq,
                0,
                &SelectOpts {
                    items_count: 1000,
                    ..SelectOpts::default()
                },
                &Cx::background(),
            )
            .unwrap();
        assert_eq!(res[0].merge_ids(), vec![0]);
    }
}
