//! Item staging: the mutable object an item passes through between the
//! wire format and the namespace.
//!
//! `from_json` splits a document into indexed payload slots plus the
//! CJSON tuple of everything else; `to_json` reassembles it. The item
//! carries its own tags-matcher view, which the namespace structurally
//! merges on modify.

use serde_json::{Map, Value as Json};
use vellum_error::{Result, VellumError};
use vellum_types::cjson::{self, json_to_value, value_to_json};
use vellum_types::{Payload, PayloadType, PayloadValue, PayloadWriter, TagsMatcher, Value};

/// A staged item: detached payload + tags view + source document.
#[derive(Debug, Clone)]
pub struct Item {
    pub payload: PayloadValue,
    pub tags: TagsMatcher,
    pub json: Json,
    pub precepts: Vec<String>,
}

impl Item {
    /// Build an item from JSON text.
    pub fn from_json(json_str: &str, ty: &PayloadType, tags: &TagsMatcher) -> Result<Self> {
        let json: Json = serde_json::from_str(json_str)
            .map_err(|e| VellumError::Parse(format!("item json: {e}")))?;
        Self::from_json_value(json, ty, tags)
    }

    /// Build an item from a parsed JSON document.
    pub fn from_json_value(json: Json, ty: &PayloadType, tags: &TagsMatcher) -> Result<Self> {
        if !json.is_object() {
            return Err(VellumError::Parse("item must be a JSON object".to_owned()));
        }
        let mut item_tags = tags.clone();
        let mut payload = PayloadValue::new(ty);
        let mut rest = json.clone();

        for idx in 1..ty.field_count() {
            let field = ty.field(idx)?.clone();
            let mut values: Vec<Value> = Vec::new();
            for path in &field.json_paths {
                if let Some(node) = take_at_path(&mut rest, path) {
                    match node {
                        Json::Array(items) => values.extend(items.iter().map(json_to_value)),
                        other => values.push(json_to_value(&other)),
                    }
                }
            }
            if values.iter().all(Value::is_null) && values.len() <= 1 {
                continue;
            }
            PayloadWriter::new(ty, &mut payload).set(idx, values)?;
        }

        let tuple = cjson::encode(&mut item_tags, &rest)?;
        PayloadWriter::new(ty, &mut payload).set_tuple(tuple);
        Ok(Self {
            payload,
            tags: item_tags,
            json,
            precepts: Vec::new(),
        })
    }

    /// Rebuild an item from its CJSON form.
    pub fn from_cjson(bytes: &[u8], ty: &PayloadType, tags: &TagsMatcher) -> Result<Self> {
        let json = cjson::decode(bytes, tags)?;
        Self::from_json_value(json, ty, tags)
    }

    /// The item's complete CJSON (indexed fields included), encoded with
    /// the item's tags view.
    pub fn get_cjson(&mut self) -> Result<Vec<u8>> {
        cjson::encode(&mut self.tags, &self.json)
    }

    /// Overwrite one field, keeping the source document in sync so the
    /// CJSON and rendered JSON reflect the change.
    pub fn set_field(&mut self, ty: &PayloadType, name: &str, value: Value) -> Result<()> {
        let idx = ty
            .field_index(name)
            .ok_or_else(|| VellumError::NotFound(format!("field '{name}'")))?;
        PayloadWriter::new(ty, &mut self.payload).set(idx, vec![value.clone()])?;
        if let Some(obj) = self.json.as_object_mut() {
            obj.insert(name.to_owned(), value_to_json(&value));
        }
        Ok(())
    }

    pub fn set_precepts(&mut self, precepts: Vec<String>) {
        self.precepts = precepts;
    }
}

/// Render a stored payload back to a JSON document.
pub fn payload_to_json(
    ty: &PayloadType,
    tags: &TagsMatcher,
    payload: &PayloadValue,
) -> Result<Json> {
    let pl = Payload::new(ty, payload);
    let mut root = cjson::decode(pl.tuple(), tags)?;
    if !root.is_object() {
        root = Json::Object(Map::new());
    }
    for idx in 1..ty.field_count() {
        let field = ty.field(idx)?;
        let values = pl.get(idx)?;
        let Some(path) = field.json_paths.first() else {
            continue;
        };
        if values.is_empty() {
            continue;
        }
        let node = if field.is_array {
            Json::Array(values.iter().map(value_to_json).collect())
        } else {
            value_to_json(&values[0])
        };
        insert_at_path(&mut root, path, node);
    }
    Ok(root)
}

/// Read the node at a dotted path.
#[must_use]
pub fn get_at_path<'a>(json: &'a Json, path: &str) -> Option<&'a Json> {
    let mut node = json;
    for part in path.split('.') {
        node = node.as_object()?.get(part)?;
    }
    Some(node)
}

fn take_at_path(json: &mut Json, path: &str) -> Option<Json> {
    let mut node = json;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let obj = node.as_object_mut()?;
        if parts.peek().is_none() {
            return obj.remove(part);
        }
        node = obj.get_mut(part)?;
    }
    None
}

fn insert_at_path(json: &mut Json, path: &str, value: Json) {
    let mut node = json;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Some(obj) = node.as_object_mut() else {
            return;
        };
        if parts.peek().is_none() {
            obj.insert(part.to_owned(), value);
            return;
        }
        node = obj
            .entry(part.to_owned())
            .or_insert_with(|| Json::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_types::FieldKind;

    fn sample_type() -> PayloadType {
        let mut ty = PayloadType::new("ns");
        ty.add_field("id", FieldKind::Int, false, vec!["id".into()])
            .unwrap();
        ty.add_field("title", FieldKind::String, false, vec!["title".into()])
            .unwrap();
        ty
    }

    #[test]
    fn test_from_json_splits_indexed_and_tuple() {
        let ty = sample_type();
        let tags = TagsMatcher::new();
        let item = Item::from_json(
            r#"{"id": 1, "title": "a", "extra": {"x": 2}}"#,
            &ty,
            &tags,
        )
        .unwrap();
        let pl = Payload::new(&ty, &item.payload);
        assert_eq!(pl.get(1).unwrap(), vec![Value::Int(1)]);
        assert_eq!(pl.get(2).unwrap(), vec![Value::from("a")]);
        // The tuple holds only the non-indexed remainder.
        let tuple_json = cjson::decode(pl.tuple(), &item.tags).unwrap();
        assert_eq!(tuple_json, json!({"extra": {"x": 2}}));
    }

    #[test]
    fn test_json_cjson_json_roundtrip() {
        let ty = sample_type();
        let tags = TagsMatcher::new();
        let mut item = Item::from_json(
            r#"{"id": 5, "title": "t", "nested": {"deep": [1, 2]}}"#,
            &ty,
            &tags,
        )
        .unwrap();
        let cjson_bytes = item.get_cjson().unwrap();
        let restored = Item::from_cjson(&cjson_bytes, &ty, &item.tags).unwrap();
        assert_eq!(restored.json, item.json);
        assert_eq!(restored.payload.hash(), item.payload.hash());
    }

    #[test]
    fn test_payload_to_json_reassembles() {
        let ty = sample_type();
        let tags = TagsMatcher::new();
        let doc = json!({"id": 3, "title": "x", "extra": true});
        let item = Item::from_json_value(doc.clone(), &ty, &tags).unwrap();
        let rendered = payload_to_json(&ty, &item.tags, &item.payload).unwrap();
        assert_eq!(rendered, doc);
    }

    #[test]
    fn test_set_field_updates_json() {
        let ty = sample_type();
        let tags = TagsMatcher::new();
        let mut item = Item::from_json(r#"{"id": 1, "title": "a"}"#, &ty, &tags).unwrap();
        item.set_field(&ty, "id", Value::Int(9)).unwrap();
        assert_eq!(item.json["id"], json!(9));
        let pl = Payload::new(&ty, &item.payload);
        assert_eq!(pl.get(1).unwrap(), vec![Value::Int(9)]);
    }

    #[test]
    fn test_rejects_non_object() {
        let ty = sample_type();
        let tags = TagsMatcher::new();
        assert!(Item::from_json("[1, 2]", &ty, &tags).is_err());
        assert!(Item::from_json("not json", &ty, &tags).is_err());
    }
}
