//! Query results.

use serde_json::Value as Json;
use vellum_error::Result;
use vellum_query::AggType;
use vellum_types::{PayloadType, PayloadValue, RowId, TagsMatcher, Value};

use crate::item::payload_to_json;

/// Joined rows attached to one result row.
#[derive(Debug, Clone)]
pub struct JoinedRows {
    pub namespace: String,
    pub rows: Vec<Json>,
}

/// One matched row.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub row_id: RowId,
    pub payload: PayloadValue,
    /// Full-text relevancy in `[0, 255]`; 0 outside FT queries.
    pub rank: i32,
    pub joined: Vec<JoinedRows>,
}

/// One facet bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetResult {
    pub values: Vec<String>,
    pub count: usize,
}

/// Aggregation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationValue {
    Double(f64),
    Facets(Vec<FacetResult>),
    Distinct(Vec<Value>),
}

/// One computed aggregation.
#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub agg_type: AggType,
    pub fields: Vec<String>,
    pub value: AggregationValue,
}

/// The result of a select (or the rows touched by update/delete).
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    pub rows: Vec<ResultRow>,
    pub aggregations: Vec<AggregationResult>,
    /// Present when `COUNT(*)` / `COUNT_CACHED(*)` was requested.
    pub total_count: Option<usize>,
    pub explain: Option<String>,
    /// Rendering context captured from the namespace at select time.
    pub payload_type: PayloadType,
    pub tags: TagsMatcher,
    /// Projection from `SELECT field, ...`; empty means all fields.
    pub select_filter: Vec<String>,
    /// Rows contributed by MERGE sub-queries, pre-rendered (they belong
    /// to other namespaces).
    pub merged_rows: Vec<Json>,
}

impl QueryResults {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render one row as a JSON document (joined rows nested under
    /// `joined_<namespace>`).
    pub fn row_json(&self, i: usize) -> Result<Json> {
        let row = &self.rows[i];
        let mut json = payload_to_json(&self.payload_type, &self.tags, &row.payload)?;
        if !self.select_filter.is_empty() {
            if let Json::Object(obj) = &mut json {
                obj.retain(|key, _| self.select_filter.iter().any(|f| f == key));
            }
        }
        if let Json::Object(obj) = &mut json {
            for joined in &row.joined {
                obj.insert(
                    format!("joined_{}", joined.namespace),
                    Json::Array(joined.rows.clone()),
                );
            }
        }
        Ok(json)
    }

    /// Render every row, merged sub-query rows included.
    pub fn to_json(&self) -> Result<Vec<Json>> {
        let mut out: Vec<Json> = (0..self.rows.len())
            .map(|i| self.row_json(i))
            .collect::<Result<_>>()?;
        out.extend(self.merged_rows.iter().cloned());
        Ok(out)
    }
}
