//! Dynamically-typed values and field kinds.
//!
//! [`Value`] is the variant scalar flowing through payloads, indexes and
//! query conditions. Schema-level typing is kept separately in
//! [`FieldKind`]: 32-bit integer fields are range-checked on ingest but
//! stored as `i64` in memory, so the value enum stays small.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vellum_error::{Result, VellumError};
use xxhash_rust::xxh64::Xxh64;

/// Schema-level kind of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Int,
    Int64,
    Double,
    Bool,
    String,
    Composite,
}

impl FieldKind {
    /// Parse the textual kind used in index definitions.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "int" => Ok(Self::Int),
            "int64" => Ok(Self::Int64),
            "double" => Ok(Self::Double),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            "composite" => Ok(Self::Composite),
            other => Err(VellumError::Params(format!("unknown field kind '{other}'"))),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Composite => "composite",
        }
    }
}

/// String collation applied by string-keyed indexes and comparators.
///
/// Collation is data, not a type: the same index code path handles every
/// mode by normalizing or comparing through [`collate_cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollateMode {
    #[default]
    None,
    AsciiCi,
    Utf8Ci,
    Numeric,
}

/// Compare two strings under a collation mode.
#[must_use]
pub fn collate_cmp(a: &str, b: &str, mode: CollateMode) -> Ordering {
    match mode {
        CollateMode::None => a.cmp(b),
        CollateMode::AsciiCi => {
            let ai = a.bytes().map(|c| c.to_ascii_lowercase());
            let bi = b.bytes().map(|c| c.to_ascii_lowercase());
            ai.cmp(bi)
        }
        CollateMode::Utf8Ci => {
            let ai = a.chars().flat_map(char::to_lowercase);
            let bi = b.chars().flat_map(char::to_lowercase);
            ai.cmp(bi)
        }
        CollateMode::Numeric => {
            let (na, ra) = numeric_collate_parts(a);
            let (nb, rb) = numeric_collate_parts(b);
            match na.partial_cmp(&nb) {
                Some(Ordering::Equal) | None => ra.cmp(rb),
                Some(ord) => ord,
            }
        }
    }
}

/// Split a string into its leading number and the remaining text, the way
/// numeric collation compares it. Exposed so hash implementations can stay
/// consistent with [`collate_cmp`].
#[must_use]
pub fn numeric_collate_parts(s: &str) -> (f64, &str) {
    let t = s.trim_start();
    let mut end = 0;
    for (i, c) in t.char_indices() {
        if c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')) || c == '.' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    match t[..end].parse::<f64>() {
        Ok(n) => (n, &t[end..]),
        Err(_) => (0.0, t),
    }
}

/// A dynamically-typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    /// Composite-index key: the tuple of constituent field values.
    Tuple(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(Arc::from(s.into().into_boxed_str()))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Tuple(_) => "tuple",
        }
    }

    /// Numeric view used by aggregation and relaxed comparison.
    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            Self::Str(s) => s.parse().ok(),
            Self::Null | Self::Tuple(_) => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            Self::Double(d) => Some(*d as i64),
            Self::Str(s) => s.parse().ok(),
            Self::Null | Self::Tuple(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as the string the SQL surface would print.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Double(d) => format_double(*d),
            Self::Str(s) => s.to_string(),
            Self::Tuple(vs) => {
                let parts: Vec<String> = vs.iter().map(Value::render).collect();
                format!("({})", parts.join(","))
            }
        }
    }

    /// Strict total ordering within a type family; cross-family ordering is
    /// by type rank. Used by ordered index stores.
    #[must_use]
    pub fn cmp_with_collate(&self, other: &Self, collate: CollateMode) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Double(b)) => (*a as f64).total_cmp(b),
            (Self::Double(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Str(a), Self::Str(b)) => collate_cmp(a, b, collate),
            (Self::Tuple(a), Self::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp_with_collate(y, collate);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Relaxed cross-type equality: numerically equal int/double compare
    /// equal, nulls only equal nulls. Used by DISTINCT and equality joins.
    #[must_use]
    pub fn relaxed_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.relaxed_eq(y))
            }
            (Self::Null, _) | (_, Self::Null) | (Self::Str(_), _) | (_, Self::Str(_)) => false,
            _ => match (self.as_double(), other.as_double()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Feed this value into a streaming hasher; tuples hash element-wise.
    pub fn hash_into(&self, h: &mut Xxh64) {
        match self {
            Self::Null => h.update(&[0]),
            Self::Bool(b) => h.update(&[1, u8::from(*b)]),
            Self::Int(i) => {
                h.update(&[2]);
                h.update(&i.to_le_bytes());
            }
            Self::Double(d) => {
                h.update(&[3]);
                h.update(&d.to_bits().to_le_bytes());
            }
            Self::Str(s) => {
                h.update(&[4]);
                h.update(s.as_bytes());
            }
            Self::Tuple(vs) => {
                h.update(&[5]);
                for v in vs {
                    v.hash_into(h);
                }
            }
        }
    }

    /// Validate and coerce a value for storage in a field of `kind`.
    pub fn coerce_to(self, kind: FieldKind, field: &str) -> Result<Self> {
        match (kind, self) {
            (_, Self::Null) => Ok(Self::Null),
            (FieldKind::Int, v) => {
                let i = v.as_int().ok_or_else(|| type_err(field, "int", &v))?;
                if i32::try_from(i).is_err() {
                    return Err(VellumError::Params(format!(
                        "value {i} is out of range for int field '{field}'"
                    )));
                }
                Ok(Self::Int(i))
            }
            (FieldKind::Int64, v) => {
                v.as_int().map(Self::Int).ok_or_else(|| type_err(field, "int64", &v))
            }
            (FieldKind::Double, v) => v
                .as_double()
                .map(Self::Double)
                .ok_or_else(|| type_err(field, "double", &v)),
            (FieldKind::Bool, Self::Bool(b)) => Ok(Self::Bool(b)),
            (FieldKind::Bool, Self::Int(i)) => Ok(Self::Bool(i != 0)),
            (FieldKind::Bool, v) => Err(type_err(field, "bool", &v)),
            (FieldKind::String, v @ Self::Str(_)) => Ok(v),
            (FieldKind::String, v) => Ok(Self::string(v.render())),
            (FieldKind::Composite, v) => Ok(v),
        }
    }

    const fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Double(_) => 2,
            Self::Str(_) => 3,
            Self::Tuple(_) => 4,
        }
    }
}

fn type_err(field: &str, want: &str, got: &Value) -> VellumError {
    VellumError::Params(format!(
        "expected {want} for field '{field}', got {}",
        got.kind_name()
    ))
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{d:.1}")
    } else {
        format!("{d}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_with_collate(other, CollateMode::None) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_with_collate(other, CollateMode::None)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            // Int and Double hash identically when numerically equal so the
            // map lookup `1 == 1.0` agrees with cmp_with_collate.
            Self::Int(i) => {
                state.write_u8(2);
                state.write_u64((*i as f64).to_bits());
            }
            Self::Double(d) => {
                state.write_u8(2);
                state.write_u64(d.to_bits());
            }
            Self::Str(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Self::Tuple(vs) => {
                state.write_u8(4);
                for v in vs {
                    v.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::string(v)
    }
}

/// A list of values; conditions and multi-value fields carry these.
pub type ValueArray = Vec<Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_type_equality() {
        assert_eq!(Value::Int(3), Value::Double(3.0));
        assert!(Value::Int(3).relaxed_eq(&Value::Double(3.0)));
        assert!(!Value::Int(3).relaxed_eq(&Value::Double(3.5)));
    }

    #[test]
    fn test_collate_ascii_ci() {
        assert_eq!(
            collate_cmp("Hello", "hELLO", CollateMode::AsciiCi),
            Ordering::Equal
        );
        assert_eq!(collate_cmp("a", "B", CollateMode::AsciiCi), Ordering::Less);
    }

    #[test]
    fn test_collate_numeric() {
        assert_eq!(collate_cmp("2", "10", CollateMode::Numeric), Ordering::Less);
        assert_eq!(
            collate_cmp("10x", "10y", CollateMode::Numeric),
            Ordering::Less
        );
    }

    #[test]
    fn test_int_range_check() {
        assert!(Value::Int(1 << 40).coerce_to(FieldKind::Int, "f").is_err());
        assert!(Value::Int(1 << 40).coerce_to(FieldKind::Int64, "f").is_ok());
    }

    #[test]
    fn test_tuple_ordering() {
        let a = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Tuple(vec![Value::Int(1), Value::Int(3)]);
        assert!(a < b);
    }

    #[test]
    fn test_null_relaxed_eq() {
        assert!(Value::Null.relaxed_eq(&Value::Null));
        assert!(!Value::Null.relaxed_eq(&Value::Int(0)));
    }
}
