//! Core data types shared by every VellumDB crate: dynamically-typed
//! values, the row payload layout, the JSON-path tags matcher, the CJSON
//! codec, LSNs and the cancellation context.

pub mod cjson;
pub mod cond;
pub mod cx;
pub mod lsn;
pub mod payload;
pub mod tags;
pub mod value;
pub mod varint;

pub use cond::{CondType, OpType};
pub use cx::Cx;
pub use lsn::Lsn;
pub use payload::{Payload, PayloadFieldType, PayloadType, PayloadValue, PayloadWriter, TUPLE_FIELD};
pub use tags::{ArrayIndex, IndexedPathNode, TagName, TagsMatcher, TagsPath};
pub use value::{collate_cmp, numeric_collate_parts, CollateMode, FieldKind, Value, ValueArray};

/// Dense integer identifying an item inside a namespace; row id is the
/// item's index in the namespace's `items` vector.
pub type RowId = u32;
