//! CJSON: the compact tagged binary encoding of a JSON tree.
//!
//! Every node starts with a ctag varint packing the node type (low 3 bits)
//! and the member's name tag from the [`TagsMatcher`](crate::TagsMatcher)
//! (remaining bits). Objects are member sequences terminated by an `End`
//! ctag; arrays carry an element count and untagged elements. Integers are
//! zigzag varints, doubles are IEEE 754 LE.
//!
//! Item records persisted to storage are `{LSN: u64 LE, CJSON bytes}`; the
//! reserved payload field 0 holds the CJSON of the item's non-indexed
//! members.

use serde_json::{Map, Number};

use vellum_error::{Result, VellumError};

use crate::tags::{TagName, TagsMatcher, TagsPath};
use crate::value::Value;
use crate::varint::{read_uvarint, read_varint, write_uvarint, write_varint};

const TAG_END: u64 = 0;
const TAG_VARINT: u64 = 1;
const TAG_DOUBLE: u64 = 2;
const TAG_STRING: u64 = 3;
const TAG_BOOL: u64 = 4;
const TAG_NULL: u64 = 5;
const TAG_ARRAY: u64 = 6;
const TAG_OBJECT: u64 = 7;

const TYPE_BITS: u64 = 3;
const TYPE_MASK: u64 = (1 << TYPE_BITS) - 1;

fn ctag(type_tag: u64, name: TagName) -> u64 {
    (u64::from(name) << TYPE_BITS) | type_tag
}

/// Encode a JSON tree to CJSON, assigning tags for new member names.
pub fn encode(tm: &mut TagsMatcher, json: &serde_json::Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_node(tm, json, 0, &mut out)?;
    Ok(out)
}

fn encode_node(
    tm: &mut TagsMatcher,
    json: &serde_json::Value,
    name: TagName,
    out: &mut Vec<u8>,
) -> Result<()> {
    match json {
        serde_json::Value::Null => write_uvarint(out, ctag(TAG_NULL, name)),
        serde_json::Value::Bool(b) => {
            write_uvarint(out, ctag(TAG_BOOL, name));
            out.push(u8::from(*b));
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                write_uvarint(out, ctag(TAG_VARINT, name));
                write_varint(out, i);
            } else {
                let d = n.as_f64().unwrap_or(f64::NAN);
                write_uvarint(out, ctag(TAG_DOUBLE, name));
                out.extend_from_slice(&d.to_le_bytes());
            }
        }
        serde_json::Value::String(s) => {
            write_uvarint(out, ctag(TAG_STRING, name));
            write_uvarint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        serde_json::Value::Array(items) => {
            write_uvarint(out, ctag(TAG_ARRAY, name));
            write_uvarint(out, items.len() as u64);
            for item in items {
                encode_node(tm, item, 0, out)?;
            }
        }
        serde_json::Value::Object(members) => {
            write_uvarint(out, ctag(TAG_OBJECT, name));
            for (key, val) in members {
                let tag = tm
                    .name_to_tag(key, true)?
                    .ok_or_else(|| VellumError::Logic("tag creation failed".to_owned()))?;
                encode_node(tm, val, tag, out)?;
            }
            write_uvarint(out, ctag(TAG_END, 0));
        }
    }
    Ok(())
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn bad(&self) -> VellumError {
        VellumError::ParseBin(format!("malformed cjson at byte {}", self.pos))
    }

    fn uvarint(&mut self) -> Result<u64> {
        let (v, n) = read_uvarint(&self.data[self.pos..]).ok_or_else(|| self.bad())?;
        self.pos += n;
        Ok(v)
    }

    fn varint(&mut self) -> Result<i64> {
        let (v, n) = read_varint(&self.data[self.pos..]).ok_or_else(|| self.bad())?;
        self.pos += n;
        Ok(v)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(self.bad());
        }
        let s = &self.data[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    /// Decode one node; returns `(name, value)` or `None` at an End ctag.
    fn node(&mut self, tm: &TagsMatcher) -> Result<Option<(TagName, serde_json::Value)>> {
        let ctag = self.uvarint()?;
        let type_tag = ctag & TYPE_MASK;
        let name = (ctag >> TYPE_BITS) as TagName;
        let value = match type_tag {
            TAG_END => return Ok(None),
            TAG_NULL => serde_json::Value::Null,
            TAG_BOOL => {
                let b = self.take(1)?[0];
                serde_json::Value::Bool(b != 0)
            }
            TAG_VARINT => serde_json::Value::Number(Number::from(self.varint()?)),
            TAG_DOUBLE => {
                let bytes: [u8; 8] = self.take(8)?.try_into().expect("8-byte slice");
                let d = f64::from_le_bytes(bytes);
                serde_json::Value::Number(
                    Number::from_f64(d).unwrap_or_else(|| Number::from(0)),
                )
            }
            TAG_STRING => {
                let len = self.uvarint()? as usize;
                let s = std::str::from_utf8(self.take(len)?)
                    .map_err(|_| VellumError::ParseBin("non-utf8 cjson string".to_owned()))?;
                serde_json::Value::String(s.to_owned())
            }
            TAG_ARRAY => {
                let count = self.uvarint()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    match self.node(tm)? {
                        Some((_, v)) => items.push(v),
                        None => return Err(self.bad()),
                    }
                }
                serde_json::Value::Array(items)
            }
            TAG_OBJECT => {
                let mut members = Map::new();
                while let Some((mname, v)) = self.node(tm)? {
                    let key = tm
                        .name_of(mname)
                        .ok_or_else(|| {
                            VellumError::ParseBin(format!("unknown tag {mname} in cjson"))
                        })?
                        .to_owned();
                    members.insert(key, v);
                }
                serde_json::Value::Object(members)
            }
            _ => return Err(self.bad()),
        };
        Ok(Some((name, value)))
    }
}

/// Decode CJSON back into a JSON tree.
pub fn decode(data: &[u8], tm: &TagsMatcher) -> Result<serde_json::Value> {
    if data.is_empty() {
        return Ok(serde_json::Value::Object(Map::new()));
    }
    let mut dec = Decoder { data, pos: 0 };
    match dec.node(tm)? {
        Some((_, v)) => Ok(v),
        None => Ok(serde_json::Value::Object(Map::new())),
    }
}

/// Collect the scalar values at `path` inside encoded CJSON.
///
/// A terminal array contributes every element; a missing path yields an
/// empty list. Used by sparse indexes and `GetByJsonPath`.
pub fn extract(data: &[u8], tm: &TagsMatcher, path: &TagsPath) -> Result<Vec<Value>> {
    let tree = decode(data, tm)?;
    let mut out = Vec::new();
    collect_at_path(&tree, tm, path, 0, &mut out);
    Ok(out)
}

fn collect_at_path(
    node: &serde_json::Value,
    tm: &TagsMatcher,
    path: &TagsPath,
    depth: usize,
    out: &mut Vec<Value>,
) {
    if depth == path.len() {
        match node {
            serde_json::Value::Array(items) => {
                for item in items {
                    out.push(json_to_value(item));
                }
            }
            other => out.push(json_to_value(other)),
        }
        return;
    }
    let Some(name) = tm.name_of(path[depth]) else {
        return;
    };
    match node {
        serde_json::Value::Object(members) => {
            if let Some(child) = members.get(name) {
                collect_at_path(child, tm, path, depth + 1, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_at_path(item, tm, path, depth, out);
            }
        }
        _ => {}
    }
}

/// Convert a scalar JSON node to a [`Value`]; objects become `Null` (an
/// object is not a scalar and callers reject it separately).
#[must_use]
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null | serde_json::Value::Object(_) => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Double(n.as_f64().unwrap_or(0.0)), Value::Int),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Tuple(items.iter().map(json_to_value).collect())
        }
    }
}

/// Convert a [`Value`] back to a JSON node.
#[must_use]
pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number(Number::from(*i)),
        Value::Double(d) => Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Tuple(vs) => serde_json::Value::Array(vs.iter().map(value_to_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut tm = TagsMatcher::new();
        let doc = json!({
            "id": 7,
            "title": "ahoy",
            "price": 9.5,
            "ok": true,
            "missing": null,
            "tags": ["a", "b"],
            "nested": {"deep": {"x": 1}},
        });
        let bytes = encode(&mut tm, &doc).unwrap();
        let back = decode(&bytes, &tm).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_extract_nested() {
        let mut tm = TagsMatcher::new();
        let doc = json!({"a": {"b": [1, 2, 3]}, "c": "x"});
        let bytes = encode(&mut tm, &doc).unwrap();
        let path = tm.path_to_tags("a.b", false).unwrap().unwrap();
        let got = extract(&bytes, &tm, &path).unwrap();
        assert_eq!(got, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_extract_through_array_of_objects() {
        let mut tm = TagsMatcher::new();
        let doc = json!({"items": [{"v": 1}, {"v": 2}]});
        let bytes = encode(&mut tm, &doc).unwrap();
        let path = tm.path_to_tags("items.v", false).unwrap().unwrap();
        let got = extract(&bytes, &tm, &path).unwrap();
        assert_eq!(got, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_extract_missing_path() {
        let mut tm = TagsMatcher::new();
        let doc = json!({"a": 1});
        let bytes = encode(&mut tm, &doc).unwrap();
        tm.name_to_tag("zzz", true).unwrap();
        let path = tm.path_to_tags("zzz", false).unwrap().unwrap();
        assert!(extract(&bytes, &tm, &path).unwrap().is_empty());
    }

    #[test]
    fn test_decode_empty_is_empty_object() {
        let tm = TagsMatcher::new();
        assert_eq!(decode(&[], &tm).unwrap(), json!({}));
    }
}
