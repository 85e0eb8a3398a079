//! VellumDB core: the namespace engine (item lifecycle, WAL,
//! transactions, TTL, background optimization), the selector with joins
//! and aggregations, and the [`Db`] facade.

pub mod aggregator;
pub mod config;
pub mod db;
pub mod item;
pub mod itemmodifier;
pub mod namespace;
pub mod results;
pub mod selector;
pub mod stringsholder;
pub mod transaction;
pub mod wal;

pub use config::NamespaceConfig;
pub use db::Db;
pub use item::Item;
pub use namespace::{ItemMode, Namespace, NsContext};
pub use results::{
    AggregationResult, AggregationValue, FacetResult, JoinedRows, QueryResults, ResultRow,
};
pub use selector::JoinData;
pub use stringsholder::StringsHolder;
pub use transaction::{Transaction, TxStep};
pub use wal::{Wal, WalRecord};
