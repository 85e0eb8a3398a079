//! Select execution: planning, iterator composition, comparator
//! fallback, joins and sorting.
//!
//! Every predicate is pushed through its index's `SelectKey`; the
//! cheapest AND-connected id container drives the scan and the full
//! filter tree is verified per candidate row. Rows stream into the
//! aggregators before limit/offset trims the result.

use std::collections::HashMap;

use serde_json::Value as Json;
use tracing::trace;
use vellum_error::{Result, VellumError};
use vellum_index::{Comparator, ComparatorField, SelectKeyResult, SelectOpts};
use vellum_query::{
    CalcTotal, FilterKind, FilterNode, JoinOnEntry, JoinType, Query, QueryEntry, SortingEntry,
};
use vellum_types::{CondType, Cx, OpType, Payload, PayloadValue, RowId, Value};

use crate::aggregator::Aggregator;
use crate::namespace::Namespace;
use crate::results::{JoinedRows, QueryResults, ResultRow};

/// Right-side result cap for turning an inner join into a driving
/// `IN`-set on the left plan.
pub const MAX_PRESELECT_KEYS: usize = 200;

/// How a row value is read during the scan.
#[derive(Debug, Clone)]
pub(crate) enum FieldAccess {
    Field(usize),
    Json {
        path: String,
        tags: vellum_types::TagsPath,
    },
}

impl FieldAccess {
    pub(crate) fn values(&self, ns: &Namespace, payload: &PayloadValue) -> Result<Vec<Value>> {
        let pl = Payload::new(&ns.payload_type, payload);
        match self {
            Self::Field(f) => pl.get(*f),
            Self::Json { path, tags } => pl.get_by_json_path(path, tags, &ns.tags),
        }
    }
}

pub(crate) fn resolve_access(ns: &Namespace, field: &str, strict: bool) -> Result<FieldAccess> {
    if let Some(f) = ns.payload_type.field_index(field) {
        return Ok(FieldAccess::Field(f));
    }
    if let Some(f) = ns.payload_type.field_by_json_path(field) {
        return Ok(FieldAccess::Field(f));
    }
    if strict {
        return Err(VellumError::Params(format!(
            "unknown field '{field}' in strict mode"
        )));
    }
    let tags = ns
        .tags
        .clone()
        .path_to_tags(field, false)
        .ok()
        .flatten()
        .unwrap_or_default();
    Ok(FieldAccess::Json {
        path: field.to_owned(),
        tags,
    })
}

/// One pre-resolved join: the right namespace has already been selected
/// by the facade; the selector only matches and attaches.
#[derive(Debug, Clone)]
pub struct JoinData {
    pub join_idx: usize,
    pub join_type: JoinType,
    pub namespace: String,
    pub on: Vec<JoinOnEntry>,
    /// Rendered right rows.
    pub right_rows: Vec<Json>,
    /// Per right row, per ON entry: the right field's values.
    pub right_on_values: Vec<Vec<Vec<Value>>>,
}

impl JoinData {
    /// Indices of right rows matching the left row's ON values.
    fn matching_rows(&self, left_values: &[Vec<Value>]) -> Vec<usize> {
        let mut out = Vec::new();
        for (r, right_values) in self.right_on_values.iter().enumerate() {
            let mut acc = true;
            for (i, on) in self.on.iter().enumerate() {
                let matched = entry_matches(&left_values[i], on.cond, &right_values[i]);
                acc = if i == 0 {
                    matched
                } else {
                    match on.op {
                        OpType::And => acc && matched,
                        OpType::Or => acc || matched,
                        OpType::Not => acc && !matched,
                    }
                };
            }
            if acc {
                out.push(r);
            }
        }
        out
    }

    /// Distinct right-side key values of the first Eq ON entry, for the
    /// pre-select optimization.
    fn preselect_keys(&self) -> Option<Vec<Value>> {
        let first = self.on.first()?;
        if first.cond != CondType::Eq {
            return None;
        }
        let mut keys: Vec<Value> = Vec::new();
        for right_values in &self.right_on_values {
            for v in &right_values[0] {
                if !keys.contains(v) {
                    keys.push(v.clone());
                }
            }
        }
        Some(keys)
    }
}

fn entry_matches(left: &[Value], cond: CondType, right: &[Value]) -> bool {
    use std::cmp::Ordering;
    left.iter().any(|l| {
        right.iter().any(|r| {
            let ord = l.cmp_with_collate(r, vellum_types::CollateMode::None);
            match cond {
                CondType::Eq | CondType::Set => ord == Ordering::Equal,
                CondType::Lt => ord == Ordering::Less,
                CondType::Le => ord != Ordering::Greater,
                CondType::Gt => ord == Ordering::Greater,
                CondType::Ge => ord != Ordering::Less,
                _ => false,
            }
        })
    })
}

enum Node {
    Ids(SelectKeyResult),
    Cmp(Comparator),
    Join {
        data_idx: usize,
        left_access: Vec<FieldAccess>,
    },
    Bracket {
        children: Vec<(OpType, Node)>,
        equal_positions: Vec<Vec<(String, Comparator)>>,
    },
    Between {
        left: FieldAccess,
        cond: CondType,
        right: FieldAccess,
    },
    AlwaysFalse,
    AlwaysTrue,
}

struct Plan {
    root: Vec<(OpType, Node)>,
    equal_positions: Vec<Vec<(String, Comparator)>>,
    /// Rank per row id for FT-driven queries.
    ft_ranks: HashMap<RowId, i32>,
    /// Driving candidates in scan order, or None for a full scan.
    driving: Option<Vec<RowId>>,
    explain: Vec<String>,
}

/// Execute a select.
pub fn execute(
    ns: &Namespace,
    query: &Query,
    joins: &[JoinData],
    cx: &Cx,
) -> Result<QueryResults> {
    let mut plan = build_plan(ns, query, joins, cx)?;

    let mut aggregators: Vec<Aggregator> = query
        .aggregations
        .iter()
        .map(|entry| Aggregator::new(ns, entry))
        .collect::<Result<_>>()?;

    let mut matched: Vec<ResultRow> = Vec::new();
    let mut scanned = 0usize;
    let candidates: Box<dyn Iterator<Item = RowId>> = match plan.driving.take() {
        Some(ids) => Box::new(ids.into_iter()),
        None => Box::new(0..ns.items.len() as RowId),
    };
    for row in candidates {
        scanned += 1;
        if scanned % 1024 == 0 {
            cx.checkpoint()?;
        }
        let Some(payload) = ns.items.get(row as usize).and_then(Option::as_ref) else {
            continue;
        };
        if !eval_all(ns, &plan.root, &plan.equal_positions, joins, row, payload)? {
            continue;
        }
        for agg in &mut aggregators {
            agg.aggregate(ns, payload)?;
        }
        matched.push(ResultRow {
            row_id: row,
            payload: payload.clone(),
            rank: plan.ft_ranks.get(&row).copied().unwrap_or(0),
            joined: Vec::new(),
        });
    }

    let mut results = QueryResults {
        payload_type: ns.payload_type.clone(),
        tags: ns.tags.clone(),
        select_filter: query.select_filter.clone(),
        ..QueryResults::default()
    };

    results.total_count = match query.calc_total {
        CalcTotal::Disabled => None,
        CalcTotal::Enabled => Some(matched.len()),
        CalcTotal::Cached => {
            let key = query.to_sql();
            let mut cache = ns.count_cache.lock();
            let total = *cache.entry(key).or_insert(matched.len());
            Some(total)
        }
    };

    sort_rows(ns, &mut matched, &query.sort)?;

    // Offset/limit trim after sorting; aggregations saw every match.
    let offset = query.offset.min(matched.len());
    let mut rows: Vec<ResultRow> = matched.split_off(offset);
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    // Attach joined documents.
    if !joins.is_empty() {
        for row in &mut rows {
            for data in joins {
                let left_access: Vec<FieldAccess> = data
                    .on
                    .iter()
                    .map(|on| resolve_access(ns, &on.left_field, query.strict_mode))
                    .collect::<Result<_>>()?;
                let left_values: Vec<Vec<Value>> = left_access
                    .iter()
                    .map(|a| a.values(ns, &row.payload))
                    .collect::<Result<_>>()?;
                let matching = data.matching_rows(&left_values);
                if !matching.is_empty() {
                    row.joined.push(JoinedRows {
                        namespace: data.namespace.clone(),
                        rows: matching
                            .into_iter()
                            .map(|r| data.right_rows[r].clone())
                            .collect(),
                    });
                }
            }
        }
    }

    results.rows = rows;
    results.aggregations = aggregators
        .into_iter()
        .map(Aggregator::into_result)
        .collect();
    if query.explain {
        results.explain = Some(plan.explain.join("; "));
    }
    Ok(results)
}

fn build_plan(
    ns: &Namespace,
    query: &Query,
    joins: &[JoinData],
    cx: &Cx,
) -> Result<Plan> {
    let mut explain = Vec::new();
    let mut ft_ranks = HashMap::new();
    let mut ft_order: Option<Vec<RowId>> = None;
    let root = build_nodes(
        ns,
        &query.filters,
        query,
        joins,
        cx,
        &mut ft_ranks,
        &mut ft_order,
        &mut explain,
    )?;
    let equal_positions = resolve_equal_positions(ns, &query.equal_positions, &query.filters)?;

    // Driving choice: the cheapest AND-connected id container; the FT
    // result wins outright so rank order is preserved. Any top-level OR
    // disqualifies a driving set — rows outside it could still match.
    let has_or = root.iter().skip(1).any(|(op, _)| *op == OpType::Or);
    let mut driving: Option<Vec<RowId>> = if has_or { None } else { ft_order };
    if driving.is_none() && !has_or {
        let mut best: Option<(usize, Vec<RowId>)> = None;
        for (op, node) in &root {
            if *op != OpType::And {
                continue;
            }
            let ids = match node {
                Node::Ids(res) if !res.has_comparators() && !res.ids.is_empty() => {
                    res.merge_ids()
                }
                Node::Join { data_idx, .. } => {
                    let Some(keys) = joins[*data_idx].preselect_keys() else {
                        continue;
                    };
                    if keys.len() > MAX_PRESELECT_KEYS {
                        continue;
                    }
                    // Inner-join pre-select: drive the left scan through
                    // an injected `left_field IN {right keys}`.
                    let on = &joins[*data_idx].on[0];
                    let Some(i) = ns.find_index(&on.left_field) else {
                        continue;
                    };
                    let opts = SelectOpts {
                        items_count: ns.items.len(),
                        ..SelectOpts::default()
                    };
                    let res =
                        ns.indexes[i].select_key(&keys, CondType::Set, 0, &opts, cx)?;
                    let Some(first) = res.into_iter().next() else {
                        continue;
                    };
                    if first.has_comparators() {
                        continue;
                    }
                    explain.push(format!(
                        "inner join on '{}' pre-selected into IN ({} keys)",
                        on.left_field,
                        keys.len()
                    ));
                    first.merge_ids()
                }
                _ => continue,
            };
            if best.as_ref().map_or(true, |(len, _)| ids.len() < *len) {
                best = Some((ids.len(), ids));
            }
        }
        driving = best.map(|(_, ids)| ids);
    }
    match &driving {
        Some(ids) => explain.push(format!("driving idset of {} rows", ids.len())),
        None => explain.push("full scan".to_owned()),
    }
    Ok(Plan {
        root,
        equal_positions,
        ft_ranks,
        driving,
        explain,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_nodes(
    ns: &Namespace,
    filters: &[FilterNode],
    query: &Query,
    joins: &[JoinData],
    cx: &Cx,
    ft_ranks: &mut HashMap<RowId, i32>,
    ft_order: &mut Option<Vec<RowId>>,
    explain: &mut Vec<String>,
) -> Result<Vec<(OpType, Node)>> {
    let mut out = Vec::with_capacity(filters.len());
    for filter in filters {
        let node = match &filter.kind {
            FilterKind::AlwaysFalse => Node::AlwaysFalse,
            FilterKind::BetweenFields { left, cond, right } => Node::Between {
                left: resolve_access(ns, left, query.strict_mode)?,
                cond: *cond,
                right: resolve_access(ns, right, query.strict_mode)?,
            },
            FilterKind::Bracket {
                filters,
                equal_positions,
            } => {
                let children = build_nodes(
                    ns, filters, query, joins, cx, ft_ranks, ft_order, explain,
                )?;
                let eqp = resolve_equal_positions(ns, equal_positions, filters)?;
                Node::Bracket {
                    children,
                    equal_positions: eqp,
                }
            }
            FilterKind::JoinRef(idx) => {
                let Some(data_idx) = joins.iter().position(|j| j.join_idx == *idx) else {
                    // Unresolved (or left) joins never filter.
                    out.push((filter.op, Node::AlwaysTrue));
                    continue;
                };
                if joins[data_idx].join_type == JoinType::LeftJoin {
                    Node::AlwaysTrue
                } else {
                    let left_access = joins[data_idx]
                        .on
                        .iter()
                        .map(|on| resolve_access(ns, &on.left_field, query.strict_mode))
                        .collect::<Result<_>>()?;
                    Node::Join {
                        data_idx,
                        left_access,
                    }
                }
            }
            FilterKind::Cond(entry) => build_cond_node(
                ns, entry, filter.op, query, cx, ft_ranks, ft_order, explain,
            )?,
        };
        out.push((filter.op, node));
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn build_cond_node(
    ns: &Namespace,
    entry: &QueryEntry,
    op: OpType,
    query: &Query,
    cx: &Cx,
    ft_ranks: &mut HashMap<RowId, i32>,
    ft_order: &mut Option<Vec<RowId>>,
    explain: &mut Vec<String>,
) -> Result<Node> {
    if let Some(i) = ns.find_index(&entry.field) {
        let index = &ns.indexes[i];
        if index.is_fulltext() {
            if op != OpType::And && op != OpType::Or {
                return Err(VellumError::QueryExec(
                    "full-text condition cannot be negated".to_owned(),
                ));
            }
            if ft_order.is_some() {
                return Err(VellumError::QueryExec(
                    "only one full-text condition per query".to_owned(),
                ));
            }
            let opts = SelectOpts {
                items_count: ns.items.len(),
                ..SelectOpts::default()
            };
            let mut res = index.select_key(&entry.values, entry.cond, 0, &opts, cx)?;
            let first = res
                .drain(..)
                .next()
                .ok_or_else(|| VellumError::QueryExec("empty full-text result".to_owned()))?;
            let order: Vec<RowId> = first.ids.first().map(|c| c.iter().collect()).unwrap_or_default();
            for (row, rank) in order.iter().zip(&first.ranks) {
                ft_ranks.insert(*row, *rank);
            }
            explain.push(format!(
                "full-text '{}' matched {} rows",
                entry.field,
                order.len()
            ));
            *ft_order = Some(order);
            return Ok(Node::Ids(first));
        }
        let opts = SelectOpts {
            items_count: ns.items.len(),
            distinct: false,
            ..SelectOpts::default()
        };
        let res = index.select_key(&entry.values, entry.cond, 0, &opts, cx)?;
        let first = res.into_iter().next().unwrap_or_default();
        explain.push(format!(
            "index '{}' {} -> {}",
            entry.field,
            entry.cond.sql_name(),
            if first.has_comparators() {
                "comparator".to_owned()
            } else {
                format!("{} ids", first.max_iterations(usize::MAX))
            }
        ));
        return Ok(Node::Ids(first));
    }
    // Non-indexed field: row-scan comparator over the payload/tuple.
    let access = resolve_access(ns, &entry.field, query.strict_mode)?;
    let cmp_field = match access {
        FieldAccess::Field(f) => ComparatorField::Field(f),
        FieldAccess::Json { path, tags } => ComparatorField::Json { path, tags },
    };
    explain.push(format!("scan comparator on '{}'", entry.field));
    Ok(Node::Cmp(Comparator::new(
        cmp_field,
        entry.cond,
        entry.values.clone(),
        vellum_types::CollateMode::None,
    )))
}

fn resolve_equal_positions(
    ns: &Namespace,
    equal_positions: &[Vec<String>],
    filters: &[FilterNode],
) -> Result<Vec<Vec<(String, Comparator)>>> {
    let mut out = Vec::new();
    for fields in equal_positions {
        let mut resolved = Vec::new();
        for field in fields {
            // The field's condition inside this bracket drives the
            // per-position check.
            let Some(entry) = find_cond(filters, field) else {
                return Err(VellumError::Params(format!(
                    "equal_position field '{field}' has no condition in the bracket"
                )));
            };
            let access = resolve_access(ns, field, false)?;
            let cmp_field = match access {
                FieldAccess::Field(f) => ComparatorField::Field(f),
                FieldAccess::Json { path, tags } => ComparatorField::Json { path, tags },
            };
            resolved.push((
                field.clone(),
                Comparator::new(
                    cmp_field,
                    entry.cond,
                    entry.values.clone(),
                    vellum_types::CollateMode::None,
                ),
            ));
        }
        out.push(resolved);
    }
    Ok(out)
}

fn find_cond<'a>(filters: &'a [FilterNode], field: &str) -> Option<&'a QueryEntry> {
    for f in filters {
        match &f.kind {
            FilterKind::Cond(entry) if entry.field == field => return Some(entry),
            FilterKind::Bracket { filters, .. } => {
                if let Some(found) = find_cond(filters, field) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

fn eval_all(
    ns: &Namespace,
    nodes: &[(OpType, Node)],
    equal_positions: &[Vec<(String, Comparator)>],
    joins: &[JoinData],
    row: RowId,
    payload: &PayloadValue,
) -> Result<bool> {
    if !eval_nodes(ns, nodes, joins, row, payload)? {
        return Ok(false);
    }
    check_equal_positions(ns, equal_positions, payload)
}

fn eval_nodes(
    ns: &Namespace,
    nodes: &[(OpType, Node)],
    joins: &[JoinData],
    row: RowId,
    payload: &PayloadValue,
) -> Result<bool> {
    let mut acc = true;
    for (i, (op, node)) in nodes.iter().enumerate() {
        // Short-circuit: an OR after a true accumulator can be skipped.
        if i > 0 && *op == OpType::Or && acc {
            continue;
        }
        let value = eval_node(ns, node, joins, row, payload)?;
        acc = if i == 0 {
            match op {
                OpType::Not => !value,
                _ => value,
            }
        } else {
            match op {
                OpType::And => acc && value,
                OpType::Or => acc || value,
                OpType::Not => acc && !value,
            }
        };
    }
    Ok(acc)
}

fn eval_node(
    ns: &Namespace,
    node: &Node,
    joins: &[JoinData],
    row: RowId,
    payload: &PayloadValue,
) -> Result<bool> {
    Ok(match node {
        Node::AlwaysTrue => true,
        Node::AlwaysFalse => false,
        Node::Ids(res) => {
            if res.has_comparators() {
                let pl = Payload::new(&ns.payload_type, payload);
                let mut ok = true;
                for cmp in &res.comparators {
                    if !cmp.matches(&pl, &ns.tags)? {
                        ok = false;
                        break;
                    }
                }
                ok
            } else {
                res.contains(row)
            }
        }
        Node::Cmp(cmp) => {
            let pl = Payload::new(&ns.payload_type, payload);
            cmp.matches(&pl, &ns.tags)?
        }
        Node::Join {
            data_idx,
            left_access,
        } => {
            let data = &joins[*data_idx];
            let left_values: Vec<Vec<Value>> = left_access
                .iter()
                .map(|a| a.values(ns, payload))
                .collect::<Result<_>>()?;
            !data.matching_rows(&left_values).is_empty()
        }
        Node::Between { left, cond, right } => {
            let l = left.values(ns, payload)?;
            let r = right.values(ns, payload)?;
            entry_matches(&l, *cond, &r)
        }
        Node::Bracket {
            children,
            equal_positions,
        } => {
            eval_nodes(ns, children, joins, row, payload)?
                && check_equal_positions(ns, equal_positions, payload)?
        }
    })
}

/// Equal-positions: some array position must satisfy every listed
/// field's condition simultaneously.
fn check_equal_positions(
    ns: &Namespace,
    groups: &[Vec<(String, Comparator)>],
    payload: &PayloadValue,
) -> Result<bool> {
    for group in groups {
        let mut arrays: Vec<Vec<Value>> = Vec::with_capacity(group.len());
        for (_, cmp) in group {
            let values = match &cmp.field {
                ComparatorField::Field(f) => {
                    Payload::new(&ns.payload_type, payload).get(*f)?
                }
                ComparatorField::Json { path, tags } => Payload::new(&ns.payload_type, payload)
                    .get_by_json_path(path, tags, &ns.tags)?,
                ComparatorField::Composite(_) => Vec::new(),
            };
            arrays.push(values);
        }
        let min_len = arrays.iter().map(Vec::len).min().unwrap_or(0);
        let mut found = false;
        for pos in 0..min_len {
            if group
                .iter()
                .zip(&arrays)
                .all(|((_, cmp), vals)| cmp.matches_values(&vals[pos..=pos]))
            {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sort_rows(ns: &Namespace, rows: &mut Vec<ResultRow>, sort: &[SortingEntry]) -> Result<()> {
    if sort.is_empty() {
        return Ok(());
    }
    struct SortKeyed {
        accessors: Vec<Option<FieldAccess>>,
        desc: Vec<bool>,
    }
    let mut keyed = SortKeyed {
        accessors: Vec::new(),
        desc: Vec::new(),
    };
    for entry in sort {
        if entry.expression == "rank" {
            keyed.accessors.push(None);
        } else {
            keyed
                .accessors
                .push(Some(resolve_access(ns, &entry.expression, false)?));
        }
        keyed.desc.push(entry.desc);
    }

    // Precompute sort keys per row.
    let mut decorated: Vec<(Vec<Vec<Value>>, i32, ResultRow)> = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        let mut keys = Vec::with_capacity(keyed.accessors.len());
        for access in &keyed.accessors {
            match access {
                Some(access) => keys.push(access.values(ns, &row.payload)?),
                None => keys.push(Vec::new()),
            }
        }
        decorated.push((keys, row.rank, row));
    }
    decorated.sort_by(|a, b| {
        for (i, desc) in keyed.desc.iter().enumerate() {
            let ord = if keyed.accessors[i].is_none() {
                a.1.cmp(&b.1)
            } else {
                compare_value_lists(&a.0[i], &b.0[i])
            };
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        a.2.row_id.cmp(&b.2.row_id)
    });
    let mut sorted: Vec<ResultRow> = decorated.into_iter().map(|(_, _, row)| row).collect();

    // Forced sort: the first entry's value list pins a result prefix.
    // The forced list is honored in order until a value with no matching
    // rows appears; everything else keeps the plain order.
    if let Some(first) = sort.first() {
        if !first.forced_values.is_empty() {
            let access = match &keyed.accessors[0] {
                Some(access) => access.clone(),
                None => return replace_rows(rows, sorted),
            };
            let mut prefix: Vec<ResultRow> = Vec::new();
            let mut rest = sorted;
            for forced in &first.forced_values {
                let mut found_any = false;
                let mut remaining = Vec::with_capacity(rest.len());
                for row in rest {
                    let values = access.values(ns, &row.payload)?;
                    if values.iter().any(|v| v == forced) {
                        prefix.push(row);
                        found_any = true;
                    } else {
                        remaining.push(row);
                    }
                }
                rest = remaining;
                if !found_any {
                    break;
                }
            }
            prefix.extend(rest);
            sorted = prefix;
        }
    }
    replace_rows(rows, sorted)?;
    trace!(rows = rows.len(), "rows sorted");
    Ok(())
}

fn replace_rows(rows: &mut Vec<ResultRow>, sorted: Vec<ResultRow>) -> Result<()> {
    *rows = sorted;
    Ok(())
}

fn compare_value_lists(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.cmp(y);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
