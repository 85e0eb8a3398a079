//! JSON DSL: the query tree mirrored as JSON.
//!
//! `to_dsl` / `from_dsl` are exact structural inverses: encoding a query
//! and parsing it back yields an equal [`Query`], including joins,
//! brackets, sort, aggregations and equal-positions.

use serde_json::{json, Map, Value as Json};
use vellum_error::{Result, VellumError};
use vellum_types::cjson::{json_to_value, value_to_json};
use vellum_types::{CondType, OpType, Value};

use crate::query::{
    AggType, AggregateEntry, CalcTotal, FilterKind, FilterNode, JoinOnEntry, JoinType,
    JoinedQuery, Query, QueryEntry, QueryType, SortingEntry, UpdateEntry, UpdateMode,
};

/// Encode a query as its JSON DSL document.
#[must_use]
pub fn to_dsl(query: &Query) -> Json {
    let mut root = Map::new();
    root.insert("namespace".into(), json!(query.namespace));
    root.insert(
        "type".into(),
        json!(match query.query_type {
            QueryType::Select => "select",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
            QueryType::Truncate => "truncate",
        }),
    );
    if let Some(limit) = query.limit {
        root.insert("limit".into(), json!(limit));
    }
    if query.offset > 0 {
        root.insert("offset".into(), json!(query.offset));
    }
    root.insert("req_total".into(), json!(query.calc_total.dsl_name()));
    if query.explain {
        root.insert("explain".into(), json!(true));
    }
    if query.strict_mode {
        root.insert("strict_mode".into(), json!(true));
    }
    if !query.select_filter.is_empty() {
        root.insert("select_filter".into(), json!(query.select_filter));
    }

    let filters: Vec<Json> = query.filters.iter().map(|f| filter_to_dsl(f, query)).collect();
    if !filters.is_empty() {
        root.insert("filters".into(), Json::Array(filters));
    }

    if !query.sort.is_empty() {
        root.insert(
            "sort".into(),
            Json::Array(query.sort.iter().map(sort_to_dsl).collect()),
        );
    }
    if !query.equal_positions.is_empty() {
        root.insert("equal_positions".into(), json!(query.equal_positions));
    }
    if !query.aggregations.is_empty() {
        root.insert(
            "aggregations".into(),
            Json::Array(query.aggregations.iter().map(agg_to_dsl).collect()),
        );
    }
    if !query.merge_queries.is_empty() {
        root.insert(
            "merge_queries".into(),
            Json::Array(query.merge_queries.iter().map(to_dsl).collect()),
        );
    }

    let updates: Vec<Json> = query
        .update_entries
        .iter()
        .filter(|e| e.mode != UpdateMode::Drop)
        .map(|e| {
            json!({
                "name": e.column,
                "values": e.values.iter().map(value_to_json).collect::<Vec<_>>(),
                "is_expression": e.is_expression,
                "mode": if e.mode == UpdateMode::SetJson { "set_json" } else { "set" },
            })
        })
        .collect();
    if !updates.is_empty() {
        root.insert("update_fields".into(), Json::Array(updates));
    }
    let drops: Vec<Json> = query
        .update_entries
        .iter()
        .filter(|e| e.mode == UpdateMode::Drop)
        .map(|e| json!(e.column))
        .collect();
    if !drops.is_empty() {
        root.insert("drop_fields".into(), Json::Array(drops));
    }
    Json::Object(root)
}

fn filter_to_dsl(node: &FilterNode, query: &Query) -> Json {
    let mut obj = Map::new();
    obj.insert("op".into(), json!(node.op.dsl_name()));
    match &node.kind {
        FilterKind::Cond(entry) => {
            obj.insert("field".into(), json!(entry.field));
            obj.insert("cond".into(), json!(entry.cond.dsl_name()));
            match entry.values.len() {
                0 => {}
                1 => {
                    obj.insert("value".into(), value_to_json(&entry.values[0]));
                }
                _ => {
                    obj.insert(
                        "value".into(),
                        Json::Array(entry.values.iter().map(value_to_json).collect()),
                    );
                }
            }
        }
        FilterKind::Bracket {
            filters,
            equal_positions,
        } => {
            obj.insert(
                "filters".into(),
                Json::Array(filters.iter().map(|f| filter_to_dsl(f, query)).collect()),
            );
            if !equal_positions.is_empty() {
                obj.insert("equal_positions".into(), json!(equal_positions));
            }
        }
        FilterKind::BetweenFields { left, cond, right } => {
            obj.insert("first_field".into(), json!(left));
            obj.insert("cond".into(), json!(cond.dsl_name()));
            obj.insert("second_field".into(), json!(right));
        }
        FilterKind::JoinRef(idx) => {
            if let Some(join) = query.join_queries.get(*idx) {
                obj.insert("join_query".into(), join_to_dsl(join));
            }
        }
        FilterKind::AlwaysFalse => {
            obj.insert("always_false".into(), json!(true));
        }
    }
    Json::Object(obj)
}

fn join_to_dsl(join: &JoinedQuery) -> Json {
    let mut obj = match to_dsl(&join.query) {
        Json::Object(map) => map,
        _ => Map::new(),
    };
    obj.remove("type");
    obj.insert("type".into(), json!(join.join_type.dsl_name()));
    obj.insert(
        "on".into(),
        Json::Array(
            join.on
                .iter()
                .map(|on| {
                    json!({
                        "op": on.op.dsl_name(),
                        "left_field": on.left_field,
                        "condition": on.cond.dsl_name(),
                        "right_field": on.right_field,
                    })
                })
                .collect(),
        ),
    );
    Json::Object(obj)
}

fn sort_to_dsl(entry: &SortingEntry) -> Json {
    let mut obj = Map::new();
    obj.insert("field".into(), json!(entry.expression));
    obj.insert("desc".into(), json!(entry.desc));
    if !entry.forced_values.is_empty() {
        obj.insert(
            "values".into(),
            Json::Array(entry.forced_values.iter().map(value_to_json).collect()),
        );
    }
    Json::Object(obj)
}

fn agg_to_dsl(agg: &AggregateEntry) -> Json {
    let mut obj = Map::new();
    obj.insert("type".into(), json!(agg.agg_type.name()));
    obj.insert("fields".into(), json!(agg.fields));
    if !agg.sort.is_empty() {
        obj.insert(
            "sort".into(),
            Json::Array(agg.sort.iter().map(sort_to_dsl).collect()),
        );
    }
    if let Some(limit) = agg.limit {
        obj.insert("limit".into(), json!(limit));
    }
    if agg.offset > 0 {
        obj.insert("offset".into(), json!(agg.offset));
    }
    Json::Object(obj)
}

/// Parse a JSON DSL document into a query.
pub fn from_dsl(dsl: &Json) -> Result<Query> {
    let obj = dsl
        .as_object()
        .ok_or_else(|| VellumError::Parse("DSL root must be an object".to_owned()))?;
    let mut query = Query::new(str_key(obj, "namespace")?);
    query.query_type = match obj.get("type").and_then(Json::as_str).unwrap_or("select") {
        "select" => QueryType::Select,
        "update" => QueryType::Update,
        "delete" => QueryType::Delete,
        "truncate" => QueryType::Truncate,
        other => {
            return Err(VellumError::Parse(format!("unknown query type '{other}'")));
        }
    };
    query.limit = obj.get("limit").and_then(Json::as_u64).map(|v| v as usize);
    query.offset = obj.get("offset").and_then(Json::as_u64).unwrap_or(0) as usize;
    query.calc_total = match obj.get("req_total").and_then(Json::as_str) {
        None | Some("disabled") => CalcTotal::Disabled,
        Some("enabled") => CalcTotal::Enabled,
        Some("cached") => CalcTotal::Cached,
        Some(other) => {
            return Err(VellumError::Parse(format!("unknown req_total '{other}'")));
        }
    };
    query.explain = obj.get("explain").and_then(Json::as_bool).unwrap_or(false);
    query.strict_mode = obj
        .get("strict_mode")
        .and_then(Json::as_bool)
        .unwrap_or(false);
    if let Some(filter) = obj.get("select_filter").and_then(Json::as_array) {
        query.select_filter = filter
            .iter()
            .filter_map(Json::as_str)
            .map(str::to_owned)
            .collect();
    }

    if let Some(filters) = obj.get("filters").and_then(Json::as_array) {
        for f in filters {
            parse_filter(f, &mut query)?;
        }
    }
    if let Some(sorts) = obj.get("sort").and_then(Json::as_array) {
        for s in sorts {
            query.sort.push(parse_sort(s)?);
        }
    }
    if let Some(eqps) = obj.get("equal_positions").and_then(Json::as_array) {
        for eqp in eqps {
            let fields = eqp
                .as_array()
                .ok_or_else(|| VellumError::Parse("equal_positions entry".to_owned()))?
                .iter()
                .filter_map(Json::as_str)
                .map(str::to_owned)
                .collect();
            query.equal_positions.push(fields);
        }
    }
    if let Some(aggs) = obj.get("aggregations").and_then(Json::as_array) {
        for a in aggs {
            query.aggregations.push(parse_agg(a)?);
        }
    }
    if let Some(merges) = obj.get("merge_queries").and_then(Json::as_array) {
        for m in merges {
            query.merge_queries.push(from_dsl(m)?);
        }
    }
    if let Some(updates) = obj.get("update_fields").and_then(Json::as_array) {
        for u in updates {
            let uo = u
                .as_object()
                .ok_or_else(|| VellumError::Parse("update_fields entry".to_owned()))?;
            let values = uo
                .get("values")
                .and_then(Json::as_array)
                .map(|vs| vs.iter().map(json_to_value).collect())
                .unwrap_or_default();
            query.update_entries.push(UpdateEntry {
                column: str_key(uo, "name")?,
                values,
                mode: if uo.get("mode").and_then(Json::as_str) == Some("set_json") {
                    UpdateMode::SetJson
                } else {
                    UpdateMode::Set
                },
                is_expression: uo
                    .get("is_expression")
                    .and_then(Json::as_bool)
                    .unwrap_or(false),
            });
        }
    }
    if let Some(drops) = obj.get("drop_fields").and_then(Json::as_array) {
        for d in drops.iter().filter_map(Json::as_str) {
            query.update_entries.push(UpdateEntry {
                column: d.to_owned(),
                values: Vec::new(),
                mode: UpdateMode::Drop,
                is_expression: false,
            });
        }
    }
    Ok(query)
}

fn parse_filter(node: &Json, query: &mut Query) -> Result<()> {
    let obj = node
        .as_object()
        .ok_or_else(|| VellumError::Parse("filter entry must be an object".to_owned()))?;
    let op = match obj.get("op").and_then(Json::as_str) {
        None => OpType::And,
        Some(name) => OpType::from_dsl_name(name)?,
    };
    if let Some(join) = obj.get("join_query") {
        let (joined, _) = parse_join(join)?;
        let idx = query.join_queries.len();
        query.join_queries.push(joined);
        query.filters.push(FilterNode {
            op,
            kind: FilterKind::JoinRef(idx),
        });
        return Ok(());
    }
    if let Some(filters) = obj.get("filters").and_then(Json::as_array) {
        let mut sub = Query::new(String::new());
        for f in filters {
            parse_filter(f, &mut sub)?;
        }
        // Sub-brackets cannot carry joins of their own.
        if !sub.join_queries.is_empty() {
            return Err(VellumError::Parse(
                "joins are not allowed inside brackets".to_owned(),
            ));
        }
        let mut equal_positions = Vec::new();
        if let Some(eqps) = obj.get("equal_positions").and_then(Json::as_array) {
            for eqp in eqps {
                equal_positions.push(
                    eqp.as_array()
                        .ok_or_else(|| VellumError::Parse("equal_positions entry".to_owned()))?
                        .iter()
                        .filter_map(Json::as_str)
                        .map(str::to_owned)
                        .collect(),
                );
            }
        }
        query.filters.push(FilterNode {
            op,
            kind: FilterKind::Bracket {
                filters: sub.filters,
                equal_positions,
            },
        });
        return Ok(());
    }
    if obj.get("always_false").and_then(Json::as_bool) == Some(true) {
        query.filters.push(FilterNode {
            op,
            kind: FilterKind::AlwaysFalse,
        });
        return Ok(());
    }
    if let Some(first) = obj.get("first_field").and_then(Json::as_str) {
        let cond = CondType::from_dsl_name(
            obj.get("cond")
                .and_then(Json::as_str)
                .ok_or_else(|| VellumError::Parse("missing cond".to_owned()))?,
        )?;
        query.filters.push(FilterNode {
            op,
            kind: FilterKind::BetweenFields {
                left: first.to_owned(),
                cond,
                right: str_key(obj, "second_field")?,
            },
        });
        return Ok(());
    }
    let cond = CondType::from_dsl_name(
        obj.get("cond")
            .and_then(Json::as_str)
            .ok_or_else(|| VellumError::Parse("filter entry missing cond".to_owned()))?,
    )?;
    let values = match obj.get("value") {
        None | Some(Json::Null) => Vec::new(),
        Some(Json::Array(items)) => items.iter().map(json_to_value).collect(),
        Some(single) => vec![json_to_value(single)],
    };
    query.filters.push(FilterNode {
        op,
        kind: FilterKind::Cond(QueryEntry {
            field: str_key(obj, "field")?,
            cond,
            values,
        }),
    });
    Ok(())
}

fn parse_join(node: &Json) -> Result<(JoinedQuery, JoinType)> {
    let obj = node
        .as_object()
        .ok_or_else(|| VellumError::Parse("join_query must be an object".to_owned()))?;
    let join_type = match obj.get("type").and_then(Json::as_str) {
        Some("left") => JoinType::LeftJoin,
        Some("inner") => JoinType::InnerJoin,
        Some("orinner") => JoinType::OrInnerJoin,
        other => {
            return Err(VellumError::Parse(format!(
                "unknown join type {other:?}"
            )));
        }
    };
    let mut inner = node.clone();
    if let Some(map) = inner.as_object_mut() {
        map.remove("on");
        map.insert("type".into(), json!("select"));
    }
    let sub_query = from_dsl(&inner)?;
    let mut on = Vec::new();
    if let Some(entries) = obj.get("on").and_then(Json::as_array) {
        for e in entries {
            let eo = e
                .as_object()
                .ok_or_else(|| VellumError::Parse("join on entry".to_owned()))?;
            on.push(JoinOnEntry {
                op: match eo.get("op").and_then(Json::as_str) {
                    None => OpType::And,
                    Some(name) => OpType::from_dsl_name(name)?,
                },
                left_field: str_key(eo, "left_field")?,
                cond: CondType::from_dsl_name(
                    eo.get("condition")
                        .and_then(Json::as_str)
                        .ok_or_else(|| VellumError::Parse("join missing condition".to_owned()))?,
                )?,
                right_field: str_key(eo, "right_field")?,
            });
        }
    }
    Ok((
        JoinedQuery {
            join_type,
            query: sub_query,
            on,
        },
        join_type,
    ))
}

fn parse_sort(node: &Json) -> Result<SortingEntry> {
    let obj = node
        .as_object()
        .ok_or_else(|| VellumError::Parse("sort entry must be an object".to_owned()))?;
    Ok(SortingEntry {
        expression: str_key(obj, "field")?,
        desc: obj.get("desc").and_then(Json::as_bool).unwrap_or(false),
        forced_values: obj
            .get("values")
            .and_then(Json::as_array)
            .map(|vs| vs.iter().map(json_to_value).collect())
            .unwrap_or_default(),
    })
}

fn parse_agg(node: &Json) -> Result<AggregateEntry> {
    let obj = node
        .as_object()
        .ok_or_else(|| VellumError::Parse("aggregation entry".to_owned()))?;
    let type_name = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| VellumError::Parse("aggregation missing type".to_owned()))?;
    let agg_type = AggType::from_name(type_name)
        .ok_or_else(|| VellumError::Parse(format!("unknown aggregation '{type_name}'")))?;
    let fields = obj
        .get("fields")
        .and_then(Json::as_array)
        .map(|fs| fs.iter().filter_map(Json::as_str).map(str::to_owned).collect())
        .unwrap_or_default();
    let mut entry = AggregateEntry::new(agg_type, fields);
    if let Some(sorts) = obj.get("sort").and_then(Json::as_array) {
        for s in sorts {
            entry.sort.push(parse_sort(s)?);
        }
    }
    entry.limit = obj.get("limit").and_then(Json::as_u64).map(|v| v as usize);
    entry.offset = obj.get("offset").and_then(Json::as_u64).unwrap_or(0) as usize;
    Ok(entry)
}

fn str_key(obj: &Map<String, Json>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(Json::as_str)
        .map(str::to_owned)
        .ok_or_else(|| VellumError::Parse(format!("missing string key '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlparser;

    fn roundtrip(q: &Query) -> Query {
        from_dsl(&to_dsl(q)).unwrap()
    }

    #[test]
    fn test_dsl_roundtrip_simple() {
        let q = sqlparser::parse(
            "SELECT * FROM items WHERE id IN (1, 2) AND (a = 1 OR b = 2) \
             ORDER BY name DESC LIMIT 10 OFFSET 3",
        )
        .unwrap();
        assert_eq!(roundtrip(&q), q);
    }

    #[test]
    fn test_dsl_roundtrip_joins() {
        let q = sqlparser::parse(
            "SELECT * FROM books INNER JOIN authors ON books.author_id = authors.id \
             WHERE authors.name LIKE 'A%'",
        )
        .unwrap();
        assert_eq!(roundtrip(&q), q);

        let q = sqlparser::parse(
            "SELECT * FROM books LEFT JOIN authors ON books.author_id = authors.id",
        )
        .unwrap();
        assert_eq!(roundtrip(&q), q);
    }

    #[test]
    fn test_dsl_roundtrip_aggregations_and_equal_positions() {
        let q = sqlparser::parse(
            "SELECT FACET(brand, price, LIMIT 5, OFFSET 1), SUM(price) FROM items \
             WHERE a = 1 EQUAL_POSITION(f1, f2)",
        )
        .unwrap();
        assert_eq!(roundtrip(&q), q);
    }

    #[test]
    fn test_dsl_roundtrip_update() {
        let q = sqlparser::parse("UPDATE ns SET a = 5 DROP b WHERE id = 1").unwrap();
        assert_eq!(roundtrip(&q), q);
    }

    #[test]
    fn test_dsl_roundtrip_merge() {
        let q =
            sqlparser::parse("SELECT * FROM a WHERE x = 1 MERGE (SELECT * FROM b WHERE y = 2)")
                .unwrap();
        assert_eq!(roundtrip(&q), q);
    }

    #[test]
    fn test_dsl_explicit_document() {
        let dsl = serde_json::json!({
            "namespace": "items",
            "type": "select",
            "limit": 5,
            "req_total": "cached",
            "filters": [
                {"op": "and", "cond": "eq", "field": "id", "value": 3},
                {"op": "not", "cond": "like", "field": "name", "value": "x%"},
            ],
            "sort": [{"field": "id", "desc": false}],
        });
        let q = from_dsl(&dsl).unwrap();
        assert_eq!(q.namespace, "items");
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.calc_total, CalcTotal::Cached);
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.filters[1].op, OpType::Not);
    }

    #[test]
    fn test_dsl_rejects_unknown_cond() {
        let dsl = serde_json::json!({
            "namespace": "items",
            "filters": [{"op": "and", "cond": "wat", "field": "id", "value": 1}],
        });
        assert!(from_dsl(&dsl).is_err());
    }
}
