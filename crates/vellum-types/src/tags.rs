//! Tags matcher: the JSON-path ↔ numeric-tag bijection of a namespace.
//!
//! Every distinct member name observed in item JSON gets a 16-bit tag; a
//! [`TagsPath`] (sequence of tags) identifies a nested location. A path once
//! tagged keeps its tag for the life of the namespace: tags are only ever
//! added, so persisted CJSON never needs rewriting when the matcher grows.

use std::collections::HashMap;

use vellum_error::{Result, VellumError};

use crate::varint::{read_uvarint, write_uvarint};

/// Numeric tag of one JSON member name. Tag 0 is reserved ("no name").
pub type TagName = u16;

/// A nested JSON location as a sequence of name tags.
pub type TagsPath = Vec<TagName>;

/// Array addressing inside an update-expression path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayIndex {
    NotSet,
    /// `[*]` — the operation applies to every element.
    ForAllItems,
    At(u32),
}

/// One node of an indexed path used by update expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPathNode {
    pub name_tag: TagName,
    pub index: ArrayIndex,
}

/// Path ↔ tag bijection for a namespace.
#[derive(Debug, Clone, Default)]
pub struct TagsMatcher {
    name_to_tag: HashMap<String, TagName>,
    tag_to_name: Vec<String>,
    version: u32,
    updated: bool,
}

impl TagsMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Count of assigned tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tag_to_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tag_to_name.is_empty()
    }

    /// Set when a tag was added since the last [`Self::reset_updated`];
    /// the namespace observes this to persist a new version.
    #[must_use]
    pub const fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn reset_updated(&mut self) {
        self.updated = false;
    }

    /// Resolve a member name to its tag, optionally creating it.
    pub fn name_to_tag(&mut self, name: &str, create: bool) -> Result<Option<TagName>> {
        if let Some(&tag) = self.name_to_tag.get(name) {
            return Ok(Some(tag));
        }
        if !create {
            return Ok(None);
        }
        let next = self.tag_to_name.len() + 1;
        let tag = TagName::try_from(next)
            .map_err(|_| VellumError::Logic("tags matcher overflow (65535 names)".to_owned()))?;
        self.name_to_tag.insert(name.to_owned(), tag);
        self.tag_to_name.push(name.to_owned());
        self.version += 1;
        self.updated = true;
        Ok(Some(tag))
    }

    /// Look up a name without creating.
    #[must_use]
    pub fn tag_of(&self, name: &str) -> Option<TagName> {
        self.name_to_tag.get(name).copied()
    }

    #[must_use]
    pub fn name_of(&self, tag: TagName) -> Option<&str> {
        if tag == 0 {
            return None;
        }
        self.tag_to_name.get(usize::from(tag) - 1).map(String::as_str)
    }

    /// Convert a dotted JSON path (`"nested.a"`) into a tags path.
    pub fn path_to_tags(&mut self, path: &str, create: bool) -> Result<Option<TagsPath>> {
        let mut out = TagsPath::new();
        for part in path.split('.') {
            if part.is_empty() {
                return Err(VellumError::Params(format!("invalid json path '{path}'")));
            }
            match self.name_to_tag(part, create)? {
                Some(tag) => out.push(tag),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Structurally merge another matcher (e.g. one carried by an incoming
    /// item serialized against an older/foreign tags state).
    ///
    /// Succeeds when `other`'s tag assignments are a subset-compatible
    /// extension of ours: every tag they both define must name the same
    /// member. New names are adopted with fresh tags.
    pub fn try_merge(&mut self, other: &Self) -> bool {
        for (i, name) in other.tag_to_name.iter().enumerate() {
            if let Some(ours) = self.tag_to_name.get(i) {
                if ours != name {
                    return false;
                }
            }
        }
        for name in other.tag_to_name.iter().skip(self.tag_to_name.len()) {
            // Cannot collide: verified disjoint above.
            let tag = self.tag_to_name.len() + 1;
            if TagName::try_from(tag).is_err() {
                return false;
            }
            self.name_to_tag.insert(name.clone(), tag as TagName);
            self.tag_to_name.push(name.clone());
            self.version += 1;
            self.updated = true;
        }
        true
    }

    /// Serialize to the byte form persisted in the `tags` sys record.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_uvarint(&mut out, u64::from(self.version));
        write_uvarint(&mut out, self.tag_to_name.len() as u64);
        for name in &self.tag_to_name {
            write_uvarint(&mut out, name.len() as u64);
            out.extend_from_slice(name.as_bytes());
        }
        out
    }

    /// Rebuild from [`Self::serialize`] output.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let bad = || VellumError::ParseBin("truncated tags matcher record".to_owned());
        let (version, mut pos) = read_uvarint(data).ok_or_else(bad)?;
        let (count, n) = read_uvarint(&data[pos..]).ok_or_else(bad)?;
        pos += n;
        let mut tm = Self {
            version: version as u32,
            ..Self::default()
        };
        for _ in 0..count {
            let (len, n) = read_uvarint(&data[pos..]).ok_or_else(bad)?;
            pos += n;
            let end = pos + len as usize;
            if end > data.len() {
                return Err(bad());
            }
            let name = std::str::from_utf8(&data[pos..end])
                .map_err(|_| VellumError::ParseBin("non-utf8 tag name".to_owned()))?;
            let tag = tm.tag_to_name.len() as u16 + 1;
            tm.name_to_tag.insert(name.to_owned(), tag);
            tm.tag_to_name.push(name.to_owned());
            pos = end;
        }
        Ok(tm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        let mut tm = TagsMatcher::new();
        let a = tm.name_to_tag("a", true).unwrap().unwrap();
        let b = tm.name_to_tag("b", true).unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(tm.name_to_tag("a", true).unwrap().unwrap(), a);
        assert_eq!(tm.name_of(a), Some("a"));
    }

    #[test]
    fn test_path_to_tags() {
        let mut tm = TagsMatcher::new();
        let p = tm.path_to_tags("nested.value", true).unwrap().unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(tm.path_to_tags("nested.value", false).unwrap().unwrap(), p);
        assert_eq!(tm.path_to_tags("missing.path", false).unwrap(), None);
    }

    #[test]
    fn test_merge_compatible() {
        let mut a = TagsMatcher::new();
        a.name_to_tag("x", true).unwrap();
        let mut b = a.clone();
        b.name_to_tag("y", true).unwrap();
        assert!(a.try_merge(&b));
        assert_eq!(a.tag_of("y"), b.tag_of("y"));
    }

    #[test]
    fn test_merge_conflicting() {
        let mut a = TagsMatcher::new();
        a.name_to_tag("x", true).unwrap();
        let mut b = TagsMatcher::new();
        b.name_to_tag("y", true).unwrap();
        assert!(!a.try_merge(&b));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut tm = TagsMatcher::new();
        tm.name_to_tag("id", true).unwrap();
        tm.name_to_tag("nested", true).unwrap();
        tm.name_to_tag("value", true).unwrap();
        let restored = TagsMatcher::deserialize(&tm.serialize()).unwrap();
        assert_eq!(restored.version(), tm.version());
        assert_eq!(restored.tag_of("value"), tm.tag_of("value"));
    }
}
