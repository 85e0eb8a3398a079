//! Row-scan comparators.
//!
//! When an index declines to materialize an idset (too many candidates,
//! an unordered index asked for a range, a non-indexed field) the
//! predicate is evaluated row by row during the scan through one of
//! these.

use std::cmp::Ordering;

use vellum_error::Result;
use vellum_types::{
    collate_cmp, CollateMode, CondType, Payload, TagsMatcher, TagsPath, Value,
};

/// Where the comparator reads its left-hand values from.
#[derive(Debug, Clone)]
pub enum ComparatorField {
    /// Indexed payload field.
    Field(usize),
    /// Non-indexed location addressed through the tags matcher.
    Json { path: String, tags: TagsPath },
    /// Composite index: the tuple of the listed payload fields.
    Composite(Vec<usize>),
}

/// A predicate applied to one row during a scan.
#[derive(Debug, Clone)]
pub struct Comparator {
    pub field: ComparatorField,
    pub cond: CondType,
    pub values: Vec<Value>,
    pub collate: CollateMode,
}

impl Comparator {
    #[must_use]
    pub fn new(
        field: ComparatorField,
        cond: CondType,
        values: Vec<Value>,
        collate: CollateMode,
    ) -> Self {
        Self {
            field,
            cond,
            values,
            collate,
        }
    }

    /// Evaluate against one row.
    pub fn matches(&self, payload: &Payload<'_>, tm: &TagsMatcher) -> Result<bool> {
        let vals = match &self.field {
            ComparatorField::Field(idx) => payload.get(*idx)?,
            ComparatorField::Json { path, tags } => payload.get_by_json_path(path, tags, tm)?,
            ComparatorField::Composite(fields) => {
                let mut tuple = Vec::with_capacity(fields.len());
                for &f in fields {
                    tuple.push(payload.get(f)?.into_iter().next().unwrap_or(Value::Null));
                }
                vec![Value::Tuple(tuple)]
            }
        };
        Ok(self.matches_values(&vals))
    }

    /// Evaluate against already-extracted field values.
    #[must_use]
    pub fn matches_values(&self, vals: &[Value]) -> bool {
        let present = vals.iter().any(|v| !v.is_null());
        match self.cond {
            CondType::Any => present,
            CondType::Empty => !present,
            CondType::Eq => self
                .values
                .first()
                .is_some_and(|want| vals.iter().any(|v| self.value_eq(v, want))),
            CondType::Set => vals
                .iter()
                .any(|v| self.values.iter().any(|want| self.value_eq(v, want))),
            // Vacuously true on an empty value list: no value is required.
            CondType::AllSet => self
                .values
                .iter()
                .all(|want| vals.iter().any(|v| self.value_eq(v, want))),
            CondType::Lt => self.any_cmp(vals, |o| o == Ordering::Less),
            CondType::Le => self.any_cmp(vals, |o| o != Ordering::Greater),
            CondType::Gt => self.any_cmp(vals, |o| o == Ordering::Greater),
            CondType::Ge => self.any_cmp(vals, |o| o != Ordering::Less),
            CondType::Range => {
                let (Some(lo), Some(hi)) = (self.values.first(), self.values.get(1)) else {
                    return false;
                };
                vals.iter().any(|v| {
                    v.cmp_with_collate(lo, self.collate) != Ordering::Less
                        && v.cmp_with_collate(hi, self.collate) != Ordering::Greater
                })
            }
            CondType::Like => {
                let Some(Value::Str(pattern)) = self.values.first() else {
                    return false;
                };
                vals.iter().any(|v| match v {
                    Value::Str(s) => like_match(s, pattern, self.collate),
                    _ => false,
                })
            }
            CondType::DWithin => self.dwithin(vals),
        }
    }

    fn value_eq(&self, a: &Value, b: &Value) -> bool {
        a.cmp_with_collate(b, self.collate) == Ordering::Equal
    }

    fn any_cmp(&self, vals: &[Value], pred: impl Fn(Ordering) -> bool) -> bool {
        let Some(want) = self.values.first() else {
            return false;
        };
        vals.iter()
            .any(|v| !v.is_null() && pred(v.cmp_with_collate(want, self.collate)))
    }

    fn dwithin(&self, vals: &[Value]) -> bool {
        let (Some(px), Some(py), Some(dist)) = (
            self.values.first().and_then(Value::as_double),
            self.values.get(1).and_then(Value::as_double),
            self.values.get(2).and_then(Value::as_double),
        ) else {
            return false;
        };
        let (Some(x), Some(y)) = (
            vals.first().and_then(Value::as_double),
            vals.get(1).and_then(Value::as_double),
        ) else {
            return false;
        };
        let dx = x - px;
        let dy = y - py;
        (dx * dx + dy * dy).sqrt() <= dist
    }
}

/// SQL LIKE matching: `%` matches any run, `_` any single character.
#[must_use]
pub fn like_match(s: &str, pattern: &str, collate: CollateMode) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    // Iterative wildcard match with backtracking over the last `%`.
    let (mut si, mut pi) = (0usize, 0usize);
    let (mut star_p, mut star_s) = (usize::MAX, 0usize);
    while si < s.len() {
        if pi < p.len() && (p[pi] == '_' || char_eq(p[pi], s[si], collate)) {
            si += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star_p = pi;
            star_s = si;
            pi += 1;
        } else if star_p != usize::MAX {
            star_s += 1;
            si = star_s;
            pi = star_p + 1;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

fn char_eq(a: char, b: char, collate: CollateMode) -> bool {
    match collate {
        CollateMode::None | CollateMode::Numeric => a == b,
        CollateMode::AsciiCi | CollateMode::Utf8Ci => {
            collate_cmp(
                a.encode_utf8(&mut [0u8; 4]),
                b.encode_utf8(&mut [0u8; 4]),
                collate,
            ) == Ordering::Equal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(cond: CondType, values: Vec<Value>) -> Comparator {
        Comparator::new(ComparatorField::Field(1), cond, values, CollateMode::None)
    }

    #[test]
    fn test_eq_and_set() {
        let c = cmp(CondType::Eq, vec![Value::Int(5)]);
        assert!(c.matches_values(&[Value::Int(5)]));
        assert!(c.matches_values(&[Value::Double(5.0)]));
        assert!(!c.matches_values(&[Value::Int(6)]));

        let c = cmp(CondType::Set, vec![Value::Int(1), Value::Int(2)]);
        assert!(c.matches_values(&[Value::Int(2)]));
        assert!(!c.matches_values(&[Value::Int(3)]));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let c = cmp(CondType::Set, vec![]);
        assert!(!c.matches_values(&[Value::Int(1)]));
    }

    #[test]
    fn test_allset() {
        let c = cmp(CondType::AllSet, vec![Value::Int(1), Value::Int(2)]);
        assert!(c.matches_values(&[Value::Int(2), Value::Int(1), Value::Int(9)]));
        assert!(!c.matches_values(&[Value::Int(1)]));
    }

    #[test]
    fn test_range_reversed_is_empty() {
        let c = cmp(CondType::Range, vec![Value::Int(10), Value::Int(1)]);
        assert!(!c.matches_values(&[Value::Int(5)]));
        let c = cmp(CondType::Range, vec![Value::Int(3), Value::Int(3)]);
        assert!(c.matches_values(&[Value::Int(3)]));
    }

    #[test]
    fn test_any_empty() {
        let any = cmp(CondType::Any, vec![]);
        let empty = cmp(CondType::Empty, vec![]);
        assert!(any.matches_values(&[Value::Int(0)]));
        assert!(!any.matches_values(&[]));
        assert!(empty.matches_values(&[]));
        assert!(empty.matches_values(&[Value::Null]));
        assert!(!empty.matches_values(&[Value::Int(0)]));
    }

    #[test]
    fn test_like() {
        assert!(like_match("hello", "h%o", CollateMode::None));
        assert!(like_match("hello", "_ello", CollateMode::None));
        assert!(!like_match("hello", "h_o", CollateMode::None));
        assert!(like_match("Alice", "a%", CollateMode::AsciiCi));
        assert!(!like_match("Alice", "a%", CollateMode::None));
        assert!(like_match("abc", "%", CollateMode::None));
    }

    #[test]
    fn test_dwithin() {
        let c = cmp(
            CondType::DWithin,
            vec![Value::Double(0.0), Value::Double(0.0), Value::Double(5.0)],
        );
        assert!(c.matches_values(&[Value::Double(3.0), Value::Double(4.0)]));
        assert!(!c.matches_values(&[Value::Double(4.0), Value::Double(4.0)]));
    }
}
