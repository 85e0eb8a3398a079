//! Index definitions: the persisted description of one index.

use serde::{Deserialize, Serialize};
use vellum_error::{Result, VellumError};
use vellum_types::{CollateMode, FieldKind};

/// Concrete index implementation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Unordered hash index.
    Hash,
    /// Ordered tree index; required for range conditions and sort orders.
    Tree,
    /// Ordered tree over int64 timestamps; rows expire after
    /// [`IndexDef::expire_after`] seconds.
    Ttl,
    /// Fast full-text index.
    #[serde(rename = "text")]
    FulltextFast,
}

/// Index options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOpts {
    #[serde(default)]
    pub pk: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub dense: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub collate: CollateMode,
}

impl IndexOpts {
    #[must_use]
    pub const fn pk(mut self) -> Self {
        self.pk = true;
        self
    }

    #[must_use]
    pub const fn array(mut self) -> Self {
        self.array = true;
        self
    }

    #[must_use]
    pub const fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    #[must_use]
    pub const fn collate(mut self, mode: CollateMode) -> Self {
        self.collate = mode;
        self
    }
}

/// Persisted definition of one index.
///
/// Composite indexes carry a `+`-joined name (`"a+b"`) and list their
/// constituent fields in `json_paths`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub json_paths: Vec<String>,
    pub field_kind: FieldKind,
    pub index_type: IndexType,
    #[serde(default)]
    pub opts: IndexOpts,
    /// TTL in seconds for [`IndexType::Ttl`] indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<i64>,
}

impl IndexDef {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: FieldKind,
        index_type: IndexType,
        opts: IndexOpts,
    ) -> Self {
        let name = name.into();
        let json_paths = if name.contains('+') {
            name.split('+').map(str::to_owned).collect()
        } else {
            vec![name.clone()]
        };
        Self {
            name,
            json_paths,
            field_kind: kind,
            index_type,
            opts,
            expire_after: None,
        }
    }

    #[must_use]
    pub const fn with_expire_after(mut self, seconds: i64) -> Self {
        self.expire_after = Some(seconds);
        self
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.field_kind == FieldKind::Composite
    }

    #[must_use]
    pub const fn is_fulltext(&self) -> bool {
        matches!(self.index_type, IndexType::FulltextFast)
    }

    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        matches!(self.index_type, IndexType::Tree | IndexType::Ttl)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(VellumError::Params("index name is empty".to_owned()));
        }
        if self.opts.pk && (self.opts.array || self.opts.sparse) {
            return Err(VellumError::Params(format!(
                "PK index '{}' cannot be array or sparse",
                self.name
            )));
        }
        if self.index_type == IndexType::Ttl {
            if self.field_kind != FieldKind::Int64 {
                return Err(VellumError::Params(format!(
                    "TTL index '{}' requires an int64 field",
                    self.name
                )));
            }
            if self.expire_after.is_none() {
                return Err(VellumError::Params(format!(
                    "TTL index '{}' requires expire_after",
                    self.name
                )));
            }
        }
        if self.is_composite() && self.json_paths.len() < 2 {
            return Err(VellumError::Params(format!(
                "composite index '{}' needs at least two fields",
                self.name
            )));
        }
        Ok(())
    }
}

/// Memory accounting for one index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexMemStat {
    pub name: String,
    pub unique_keys_count: usize,
    pub idsets_size: usize,
    pub sort_orders_size: usize,
    pub cache_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_name_splits_paths() {
        let def = IndexDef::new(
            "a+b",
            FieldKind::Composite,
            IndexType::Hash,
            IndexOpts::default(),
        );
        assert_eq!(def.json_paths, vec!["a", "b"]);
        assert!(def.is_composite());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_ttl_requires_int64() {
        let def = IndexDef::new(
            "date",
            FieldKind::Int64,
            IndexType::Ttl,
            IndexOpts::default(),
        );
        assert!(def.validate().is_err());
        assert!(def.with_expire_after(60).validate().is_ok());
    }

    #[test]
    fn test_pk_cannot_be_sparse() {
        let def = IndexDef::new(
            "id",
            FieldKind::Int,
            IndexType::Hash,
            IndexOpts::default().pk().sparse(),
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let def = IndexDef::new(
            "title",
            FieldKind::String,
            IndexType::Tree,
            IndexOpts::default().collate(CollateMode::Utf8Ci),
        );
        let json = serde_json::to_string(&def).unwrap();
        let back: IndexDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, def.name);
        assert_eq!(back.opts.collate, def.opts.collate);
    }
}
