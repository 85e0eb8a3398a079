//! Public API facade for VellumDB.
//!
//! An embeddable in-memory document database with optional persistent
//! storage, secondary indexes (hash/tree/TTL, sparse and composite), a
//! SQL and JSON-DSL query layer with joins and aggregations,
//! transactions with copy-on-write commits, and fast full-text search.
//!
//! ```
//! use vellum::{Db, IndexDef, IndexOpts, IndexType, FieldKind};
//!
//! let db = Db::new();
//! db.open_namespace("items").unwrap();
//! db.add_index(
//!     "items",
//!     IndexDef::new("id", FieldKind::Int, IndexType::Hash, IndexOpts::default().pk()),
//! )
//! .unwrap();
//! db.upsert("items", r#"{"id": 1, "title": "first"}"#).unwrap();
//! let results = db.execute_sql("SELECT * FROM items WHERE id = 1").unwrap();
//! assert_eq!(results.len(), 1);
//! ```

pub use vellum_core::{
    AggregationResult, AggregationValue, Db, FacetResult, Item, ItemMode, Namespace,
    NamespaceConfig, NsContext, QueryResults, ResultRow, Transaction, WalRecord,
};
pub use vellum_error::{ErrorKind, Result, VellumError};
pub use vellum_ft::{FtConfig, FtSynonym};
pub use vellum_index::{IndexDef, IndexOpts, IndexType};
pub use vellum_query::{from_dsl, parse_sql, to_dsl, AggType, Query, QueryType};
pub use vellum_storage::{MemStorage, Storage};
pub use vellum_types::{CollateMode, CondType, Cx, FieldKind, OpType, Value};
