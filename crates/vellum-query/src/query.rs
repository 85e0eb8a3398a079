//! The canonical query tree.
//!
//! Both the SQL parser and the JSON DSL produce this structure; the
//! selector consumes it. Filters form a tree of operator-tagged nodes
//! (brackets nest), equal-position lists attach to the bracket they were
//! declared in, and joined/merged sub-queries ride along unparsed.

use vellum_types::{CondType, OpType, Value};

/// Verb of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    #[default]
    Select,
    Update,
    Delete,
    Truncate,
}

/// Total-count calculation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalcTotal {
    #[default]
    Disabled,
    Enabled,
    Cached,
}

impl CalcTotal {
    #[must_use]
    pub const fn dsl_name(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Cached => "cached",
        }
    }
}

/// One predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
    pub field: String,
    pub cond: CondType,
    pub values: Vec<Value>,
}

/// A filter node: an operator plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub op: OpType,
    pub kind: FilterKind,
}

/// Payload of one filter node.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    Cond(QueryEntry),
    /// Nested bracket with its own equal-position lists.
    Bracket {
        filters: Vec<FilterNode>,
        equal_positions: Vec<Vec<String>>,
    },
    /// Field-to-field comparison.
    BetweenFields {
        left: String,
        cond: CondType,
        right: String,
    },
    /// Reference to `Query::join_queries[idx]` (ON-conditions applied in
    /// the filter sequence, `OR INNER JOIN` semantics).
    JoinRef(usize),
    /// A condition the parser proved unsatisfiable.
    AlwaysFalse,
}

/// One ORDER BY element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortingEntry {
    pub expression: String,
    pub desc: bool,
    /// Forced-sort prefix: rows with these values (in this order) come
    /// first, the rest follow in plain order.
    pub forced_values: Vec<Value>,
}

/// Aggregation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggType {
    Sum,
    Avg,
    Min,
    Max,
    Facet,
    Distinct,
    Count,
    CountCached,
}

impl AggType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Facet => "facet",
            Self::Distinct => "distinct",
            Self::Count => "count",
            Self::CountCached => "count_cached",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "facet" => Self::Facet,
            "distinct" => Self::Distinct,
            "count" => Self::Count,
            "count_cached" => Self::CountCached,
            _ => return None,
        })
    }
}

/// One aggregation request.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEntry {
    pub agg_type: AggType,
    pub fields: Vec<String>,
    pub sort: Vec<SortingEntry>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AggregateEntry {
    #[must_use]
    pub fn new(agg_type: AggType, fields: Vec<String>) -> Self {
        Self {
            agg_type,
            fields,
            sort: Vec::new(),
            limit: None,
            offset: 0,
        }
    }
}

/// Join flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    LeftJoin,
    InnerJoin,
    OrInnerJoin,
}

impl JoinType {
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::LeftJoin => "LEFT JOIN",
            Self::InnerJoin => "INNER JOIN",
            Self::OrInnerJoin => "OR INNER JOIN",
        }
    }

    #[must_use]
    pub const fn dsl_name(self) -> &'static str {
        match self {
            Self::LeftJoin => "left",
            Self::InnerJoin => "inner",
            Self::OrInnerJoin => "orinner",
        }
    }
}

/// One ON-condition of a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOnEntry {
    pub op: OpType,
    pub left_field: String,
    pub cond: CondType,
    pub right_field: String,
}

/// A joined sub-query.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedQuery {
    pub join_type: JoinType,
    pub query: Query,
    pub on: Vec<JoinOnEntry>,
}

/// Field update mode in an UPDATE query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Set,
    SetJson,
    Drop,
}

/// One SET/DROP element of an UPDATE query.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    pub column: String,
    pub values: Vec<Value>,
    pub mode: UpdateMode,
    pub is_expression: bool,
}

/// The canonical query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub namespace: String,
    pub query_type: QueryType,
    pub filters: Vec<FilterNode>,
    pub sort: Vec<SortingEntry>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub calc_total: CalcTotal,
    pub aggregations: Vec<AggregateEntry>,
    pub join_queries: Vec<JoinedQuery>,
    pub merge_queries: Vec<Query>,
    pub select_filter: Vec<String>,
    pub update_entries: Vec<UpdateEntry>,
    pub equal_positions: Vec<Vec<String>>,
    pub explain: bool,
    pub strict_mode: bool,
    pub with_rank: bool,
}

impl Query {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Builder helper: append an AND condition.
    #[must_use]
    pub fn where_cond(mut self, field: impl Into<String>, cond: CondType, values: Vec<Value>) -> Self {
        self.filters.push(FilterNode {
            op: OpType::And,
            kind: FilterKind::Cond(QueryEntry {
                field: field.into(),
                cond,
                values,
            }),
        });
        self
    }

    #[must_use]
    pub fn sorted(mut self, expression: impl Into<String>, desc: bool) -> Self {
        self.sort.push(SortingEntry {
            expression: expression.into(),
            desc,
            forced_values: Vec::new(),
        });
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Render back to SQL. Reparsing the output yields an equal query
    /// (up to literal formatting).
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        match self.query_type {
            QueryType::Select => {
                out.push_str("SELECT ");
                let mut parts: Vec<String> = Vec::new();
                if self.calc_total == CalcTotal::Enabled {
                    parts.push("COUNT(*)".to_owned());
                }
                if self.calc_total == CalcTotal::Cached {
                    parts.push("COUNT_CACHED(*)".to_owned());
                }
                for agg in &self.aggregations {
                    parts.push(render_aggregation(agg));
                }
                if !self.select_filter.is_empty() {
                    parts.extend(self.select_filter.iter().cloned());
                } else if parts.is_empty() {
                    parts.push("*".to_owned());
                }
                out.push_str(&parts.join(", "));
                out.push_str(" FROM ");
                out.push_str(&self.namespace);
            }
            QueryType::Update => {
                out.push_str("UPDATE ");
                out.push_str(&self.namespace);
                let sets: Vec<String> = self
                    .update_entries
                    .iter()
                    .filter(|e| e.mode != UpdateMode::Drop)
                    .map(|e| {
                        let value = match e.values.first() {
                            // Expressions re-render verbatim.
                            Some(Value::Str(expr)) if e.is_expression => expr.to_string(),
                            Some(v) => render_value(v),
                            None => "NULL".to_owned(),
                        };
                        format!("{} = {}", e.column, value)
                    })
                    .collect();
                let drops: Vec<String> = self
                    .update_entries
                    .iter()
                    .filter(|e| e.mode == UpdateMode::Drop)
                    .map(|e| e.column.clone())
                    .collect();
                if !sets.is_empty() {
                    out.push_str(" SET ");
                    out.push_str(&sets.join(", "));
                }
                if !drops.is_empty() {
                    out.push_str(" DROP ");
                    out.push_str(&drops.join(", "));
                }
            }
            QueryType::Delete => {
                out.push_str("DELETE FROM ");
                out.push_str(&self.namespace);
            }
            QueryType::Truncate => {
                out.push_str("TRUNCATE ");
                out.push_str(&self.namespace);
                return out;
            }
        }

        for join in &self.join_queries {
            out.push(' ');
            out.push_str(join.join_type.sql_name());
            out.push(' ');
            out.push_str(&join.query.namespace);
            out.push_str(" ON ");
            for (i, on) in join.on.iter().enumerate() {
                if i > 0 {
                    out.push_str(match on.op {
                        OpType::And => " AND ",
                        OpType::Or => " OR ",
                        OpType::Not => " AND NOT ",
                    });
                }
                out.push_str(&format!(
                    "{}.{} {} {}.{}",
                    self.namespace,
                    on.left_field,
                    on.cond.sql_name(),
                    join.query.namespace,
                    on.right_field
                ));
            }
        }

        // Joined sub-query conditions render in the WHERE clause with
        // their namespace prefix; the parser routes them back.
        let mut where_filters: Vec<FilterNode> = self
            .filters
            .iter()
            .filter(|n| !matches!(n.kind, FilterKind::JoinRef(_)))
            .cloned()
            .collect();
        for join in &self.join_queries {
            for node in &join.query.filters {
                let mut node = node.clone();
                if let FilterKind::Cond(entry) = &mut node.kind {
                    entry.field = format!("{}.{}", join.query.namespace, entry.field);
                }
                where_filters.push(node);
            }
        }
        if !where_filters.is_empty() {
            out.push_str(" WHERE ");
            render_filters(&where_filters, &mut out);
        }
        for eqp in &self.equal_positions {
            out.push_str(" EQUAL_POSITION(");
            out.push_str(&eqp.join(", "));
            out.push(')');
        }
        if !self.sort.is_empty() {
            out.push_str(" ORDER BY ");
            let parts: Vec<String> = self.sort.iter().map(render_sort_entry).collect();
            out.push_str(&parts.join(", "));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        if self.offset > 0 {
            out.push_str(&format!(" OFFSET {}", self.offset));
        }
        for merge in &self.merge_queries {
            out.push_str(" MERGE (");
            out.push_str(&merge.to_sql());
            out.push(')');
        }
        out
    }
}

fn render_sort_entry(s: &SortingEntry) -> String {
    let mut out = s.expression.clone();
    if !s.forced_values.is_empty() {
        let vals: Vec<String> = s.forced_values.iter().map(render_value).collect();
        out.push('(');
        out.push_str(&vals.join(", "));
        out.push(')');
    }
    if s.desc {
        out.push_str(" DESC");
    } else {
        out.push_str(" ASC");
    }
    out
}

fn render_aggregation(agg: &AggregateEntry) -> String {
    if agg.agg_type == AggType::Count {
        return "COUNT(*)".to_owned();
    }
    if agg.agg_type == AggType::CountCached {
        return "COUNT_CACHED(*)".to_owned();
    }
    let mut inner = agg.fields.join(", ");
    for s in &agg.sort {
        inner.push_str(", ORDER BY ");
        inner.push_str(&render_sort_entry(s));
    }
    if let Some(limit) = agg.limit {
        inner.push_str(&format!(", LIMIT {limit}"));
    }
    if agg.offset > 0 {
        inner.push_str(&format!(", OFFSET {}", agg.offset));
    }
    format!("{}({})", agg.agg_type.name().to_uppercase(), inner)
}

fn render_filters(filters: &[FilterNode], out: &mut String) {
    // Join references render through the JOIN clause, not the filter list.
    let filters: Vec<&FilterNode> = filters
        .iter()
        .filter(|n| !matches!(n.kind, FilterKind::JoinRef(_)))
        .collect();
    for (i, node) in filters.iter().enumerate() {
        if i > 0 {
            match node.op {
                OpType::And => out.push_str(" AND "),
                OpType::Or => out.push_str(" OR "),
                OpType::Not => out.push_str(" AND NOT "),
            }
        } else if node.op == OpType::Not {
            out.push_str("NOT ");
        }
        match &node.kind {
            FilterKind::Cond(entry) => render_cond(entry, out),
            FilterKind::Bracket { filters, .. } => {
                out.push('(');
                render_filters(filters, out);
                out.push(')');
            }
            FilterKind::BetweenFields { left, cond, right } => {
                out.push_str(&format!("{left} {} {right}", cond.sql_name()));
            }
            FilterKind::JoinRef(_) => {}
            FilterKind::AlwaysFalse => out.push_str("FALSE"),
        }
    }
}

fn render_cond(entry: &QueryEntry, out: &mut String) {
    match entry.cond {
        CondType::Any => out.push_str(&format!("{} IS NOT NULL", entry.field)),
        CondType::Empty => out.push_str(&format!("{} IS NULL", entry.field)),
        CondType::Set | CondType::AllSet => {
            let kw = if entry.cond == CondType::Set {
                "IN"
            } else {
                "ALLSET"
            };
            let vals: Vec<String> = entry.values.iter().map(render_value).collect();
            out.push_str(&format!("{} {kw} ({})", entry.field, vals.join(", ")));
        }
        CondType::Range => {
            let vals: Vec<String> = entry.values.iter().map(render_value).collect();
            out.push_str(&format!("{} RANGE({})", entry.field, vals.join(", ")));
        }
        CondType::DWithin => {
            let x = entry.values.first().map_or_else(String::new, render_value);
            let y = entry.values.get(1).map_or_else(String::new, render_value);
            let d = entry.values.get(2).map_or_else(String::new, render_value);
            out.push_str(&format!(
                "ST_DWITHIN({}, ST_GEOMFROMTEXT('POINT({x} {y})'), {d})",
                entry.field
            ));
        }
        _ => {
            out.push_str(&format!(
                "{} {} {}",
                entry.field,
                entry.cond.sql_name(),
                entry.values.first().map_or("NULL".to_owned(), render_value)
            ));
        }
    }
}

/// SQL literal form of a value.
#[must_use]
pub fn render_value(v: &Value) -> String {
    match v {
        Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.render(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_sql() {
        let q = Query::new("items")
            .where_cond("id", CondType::Eq, vec![Value::Int(7)])
            .sorted("name", true)
            .with_limit(10)
            .with_offset(5);
        let sql = q.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM items WHERE id = 7 ORDER BY name DESC LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn test_string_literal_escaped() {
        assert_eq!(render_value(&Value::from("o'brien")), "'o''brien'");
    }

    #[test]
    fn test_forced_sort_rendering() {
        let mut q = Query::new("ns");
        q.sort.push(SortingEntry {
            expression: "score".to_owned(),
            desc: true,
            forced_values: vec![Value::Int(30), Value::Int(10)],
        });
        assert_eq!(q.to_sql(), "SELECT * FROM ns ORDER BY score(30, 10) DESC");
    }

    #[test]
    fn test_truncate_sql() {
        let mut q = Query::new("ns");
        q.query_type = QueryType::Truncate;
        assert_eq!(q.to_sql(), "TRUNCATE ns");
    }
}
