//! Key types for the index store matrix.
//!
//! One generic store implementation covers `{i64, f64, string+collate,
//! composite}` × `{hash, tree}` through these key types; the runtime
//! dispatch lives in the factory, not in a type hierarchy.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use vellum_error::{Result, VellumError};
use vellum_types::{collate_cmp, numeric_collate_parts, CollateMode, Value};

/// A value usable as an index store key.
pub trait IndexKey:
    Clone + Eq + Hash + Ord + Send + Sync + std::fmt::Debug + 'static
{
    fn from_value(v: &Value, collate: CollateMode, index: &str) -> Result<Self>;
    fn to_value(&self) -> Value;

    /// Hand ref-counted strings to the retirement list on delete, so
    /// readers that still reference them stay valid.
    fn retire(self, _retired: &mut Vec<Arc<str>>) {}
}

/// Integer key; also carries bool fields (false < true as 0 < 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntKey(pub i64);

impl IndexKey for IntKey {
    fn from_value(v: &Value, _collate: CollateMode, index: &str) -> Result<Self> {
        v.as_int().map(Self).ok_or_else(|| {
            VellumError::Params(format!(
                "cannot use {} value as a key of index '{index}'",
                v.kind_name()
            ))
        })
    }

    fn to_value(&self) -> Value {
        Value::Int(self.0)
    }
}

/// Double key ordered by `total_cmp`.
#[derive(Debug, Clone, Copy)]
pub struct DoubleKey(pub f64);

impl PartialEq for DoubleKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for DoubleKey {}

impl PartialOrd for DoubleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DoubleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for DoubleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.to_bits());
    }
}

impl IndexKey for DoubleKey {
    fn from_value(v: &Value, _collate: CollateMode, index: &str) -> Result<Self> {
        v.as_double().map(Self).ok_or_else(|| {
            VellumError::Params(format!(
                "cannot use {} value as a key of index '{index}'",
                v.kind_name()
            ))
        })
    }

    fn to_value(&self) -> Value {
        Value::Double(self.0)
    }
}

/// String key comparing and hashing through its collate mode.
#[derive(Debug, Clone)]
pub struct StrKey {
    pub raw: Arc<str>,
    collate: CollateMode,
}

impl StrKey {
    #[must_use]
    pub fn new(raw: Arc<str>, collate: CollateMode) -> Self {
        Self { raw, collate }
    }
}

impl PartialEq for StrKey {
    fn eq(&self, other: &Self) -> bool {
        collate_cmp(&self.raw, &other.raw, self.collate) == Ordering::Equal
    }
}

impl Eq for StrKey {}

impl PartialOrd for StrKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StrKey {
    fn cmp(&self, other: &Self) -> Ordering {
        collate_cmp(&self.raw, &other.raw, self.collate)
    }
}

impl Hash for StrKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.collate {
            CollateMode::None => self.raw.as_bytes().hash(state),
            CollateMode::AsciiCi => {
                for b in self.raw.bytes() {
                    state.write_u8(b.to_ascii_lowercase());
                }
            }
            CollateMode::Utf8Ci => {
                for c in self.raw.chars().flat_map(char::to_lowercase) {
                    state.write_u32(c as u32);
                }
            }
            CollateMode::Numeric => {
                let (n, rest) = numeric_collate_parts(&self.raw);
                state.write_u64(n.to_bits());
                rest.as_bytes().hash(state);
            }
        }
    }
}

impl IndexKey for StrKey {
    fn from_value(v: &Value, collate: CollateMode, _index: &str) -> Result<Self> {
        Ok(match v {
            Value::Str(s) => Self::new(Arc::clone(s), collate),
            other => Self::new(Arc::from(other.render().into_boxed_str()), collate),
        })
    }

    fn to_value(&self) -> Value {
        Value::Str(Arc::clone(&self.raw))
    }

    fn retire(self, retired: &mut Vec<Arc<str>>) {
        retired.push(self.raw);
    }
}

/// Composite key: the tuple of constituent field values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(pub Vec<Value>);

impl IndexKey for CompositeKey {
    fn from_value(v: &Value, _collate: CollateMode, index: &str) -> Result<Self> {
        match v {
            Value::Tuple(vs) => Ok(Self(vs.clone())),
            other => Err(VellumError::Params(format!(
                "composite index '{index}' expects a tuple key, got {}",
                other.kind_name()
            ))),
        }
    }

    fn to_value(&self) -> Value {
        Value::Tuple(self.0.clone())
    }

    fn retire(self, retired: &mut Vec<Arc<str>>) {
        for v in self.0 {
            if let Value::Str(s) = v {
                retired.push(s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(t: &T) -> u64 {
        let mut h = DefaultHasher::new();
        t.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_str_key_ci_eq_hash_agree() {
        let a = StrKey::new(Arc::from("Hello"), CollateMode::AsciiCi);
        let b = StrKey::new(Arc::from("hELLO"), CollateMode::AsciiCi);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_str_key_numeric_order() {
        let a = StrKey::new(Arc::from("2"), CollateMode::Numeric);
        let b = StrKey::new(Arc::from("10"), CollateMode::Numeric);
        assert!(a < b);
    }

    #[test]
    fn test_int_key_from_string_value() {
        let k = IntKey::from_value(&Value::from("42"), CollateMode::None, "id").unwrap();
        assert_eq!(k, IntKey(42));
        assert!(IntKey::from_value(&Value::Null, CollateMode::None, "id").is_err());
    }

    #[test]
    fn test_composite_key_ordering() {
        let a = CompositeKey(vec![Value::Int(1), Value::from("a")]);
        let b = CompositeKey(vec![Value::Int(1), Value::from("b")]);
        assert!(a < b);
        assert_eq!(hash_of(&a), hash_of(&a.clone()));
    }
}
