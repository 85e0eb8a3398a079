//! Aggregation folds: sum/avg/min/max, faceting, distinct and counts.

use std::collections::{HashMap, HashSet};

use vellum_error::{Result, VellumError};
use vellum_query::{AggType, AggregateEntry};
use vellum_types::{PayloadValue, Value};

use crate::namespace::Namespace;
use crate::results::{AggregationResult, AggregationValue, FacetResult};
use crate::selector::{resolve_access, FieldAccess};

enum AggState {
    Fold { sum: f64, min: f64, max: f64, hits: usize },
    Facet(HashMap<Vec<Value>, usize>),
    Distinct {
        seen: HashSet<Value>,
        ordered: Vec<Value>,
    },
    Count(usize),
}

/// One in-flight aggregation.
pub struct Aggregator {
    entry: AggregateEntry,
    accessors: Vec<FieldAccess>,
    state: AggState,
}

impl Aggregator {
    pub fn new(ns: &Namespace, entry: &AggregateEntry) -> Result<Self> {
        if matches!(
            entry.agg_type,
            AggType::Sum | AggType::Avg | AggType::Min | AggType::Max | AggType::Distinct
        ) && entry.fields.len() != 1
        {
            return Err(VellumError::Params(format!(
                "{} aggregation expects exactly one field",
                entry.agg_type.name()
            )));
        }
        let accessors = entry
            .fields
            .iter()
            .map(|f| resolve_access(ns, f, false))
            .collect::<Result<_>>()?;
        let state = match entry.agg_type {
            AggType::Facet => AggState::Facet(HashMap::new()),
            AggType::Distinct => AggState::Distinct {
                seen: HashSet::new(),
                ordered: Vec::new(),
            },
            AggType::Count | AggType::CountCached => AggState::Count(0),
            _ => AggState::Fold {
                sum: 0.0,
                min: f64::MAX,
                max: f64::MIN,
                hits: 0,
            },
        };
        Ok(Self {
            entry: entry.clone(),
            accessors,
            state,
        })
    }

    /// Fold one matching row.
    pub fn aggregate(&mut self, ns: &Namespace, payload: &PayloadValue) -> Result<()> {
        match &mut self.state {
            AggState::Count(n) => *n += 1,
            AggState::Fold {
                sum,
                min,
                max,
                hits,
            } => {
                for value in self.accessors[0].values(ns, payload)? {
                    let Some(v) = value.as_double() else {
                        continue;
                    };
                    *sum += v;
                    *min = min.min(v);
                    *max = max.max(v);
                    *hits += 1;
                }
            }
            AggState::Distinct { seen, ordered } => {
                for value in self.accessors[0].values(ns, payload)? {
                    if value.is_null() {
                        continue;
                    }
                    if seen.insert(value.clone()) {
                        ordered.push(value);
                    }
                }
            }
            AggState::Facet(buckets) => {
                let mut key = Vec::with_capacity(self.accessors.len());
                for access in &self.accessors {
                    key.push(
                        access
                            .values(ns, payload)?
                            .into_iter()
                            .next()
                            .unwrap_or(Value::Null),
                    );
                }
                *buckets.entry(key).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// Finish the fold.
    #[must_use]
    pub fn into_result(self) -> AggregationResult {
        let value = match self.state {
            AggState::Count(n) => AggregationValue::Double(n as f64),
            AggState::Fold {
                sum,
                min,
                max,
                hits,
            } => AggregationValue::Double(match self.entry.agg_type {
                AggType::Sum => sum,
                AggType::Avg => {
                    if hits == 0 {
                        0.0
                    } else {
                        sum / hits as f64
                    }
                }
                AggType::Min => {
                    if hits == 0 {
                        0.0
                    } else {
                        min
                    }
                }
                _ => {
                    if hits == 0 {
                        0.0
                    } else {
                        max
                    }
                }
            }),
            AggState::Distinct { ordered, .. } => AggregationValue::Distinct(ordered),
            AggState::Facet(buckets) => {
                AggregationValue::Facets(facet_results(buckets, &self.entry))
            }
        };
        AggregationResult {
            agg_type: self.entry.agg_type,
            fields: self.entry.fields,
            value,
        }
    }
}

fn facet_results(
    buckets: HashMap<Vec<Value>, usize>,
    entry: &AggregateEntry,
) -> Vec<FacetResult> {
    let mut rows: Vec<(Vec<Value>, usize)> = buckets.into_iter().collect();
    if entry.sort.is_empty() {
        // Deterministic default: ascending by bucket values.
        rows.sort_by(|a, b| compare_keys(&a.0, &b.0));
    } else {
        rows.sort_by(|a, b| {
            for sort in &entry.sort {
                let ord = if sort.expression == "count" {
                    a.1.cmp(&b.1)
                } else {
                    let idx = entry
                        .fields
                        .iter()
                        .position(|f| *f == sort.expression)
                        .unwrap_or(0);
                    a.0.get(idx).cmp(&b.0.get(idx))
                };
                let ord = if sort.desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            compare_keys(&a.0, &b.0)
        });
    }
    let offset = entry.offset.min(rows.len());
    let mut rows = rows.split_off(offset);
    if let Some(limit) = entry.limit {
        rows.truncate(limit);
    }
    rows.into_iter()
        .map(|(values, count)| FacetResult {
            values: values.iter().map(Value::render).collect(),
            count,
        })
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.cmp(y);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
