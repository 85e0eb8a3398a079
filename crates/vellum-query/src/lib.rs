//! Query model and parsers: the canonical [`Query`] tree, the SQL
//! parser, and the JSON DSL encoder/decoder.

pub mod dsl;
pub mod lexer;
pub mod query;
pub mod sqlparser;

pub use dsl::{from_dsl, to_dsl};
pub use query::{
    render_value, AggType, AggregateEntry, CalcTotal, FilterKind, FilterNode, JoinOnEntry,
    JoinType, JoinedQuery, Query, QueryEntry, QueryType, SortingEntry, UpdateEntry, UpdateMode,
};
pub use sqlparser::parse as parse_sql;
