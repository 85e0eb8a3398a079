//! Row payload layout.
//!
//! A [`PayloadType`] is the ordered field list of a namespace; field 0 is
//! reserved for the "tuple" — the CJSON of everything not covered by an
//! indexed field. A [`PayloadValue`] is the shared row buffer: fixed
//! per-field slots, an array heap the slots point into, and the row LSN.
//! Cloning a `PayloadValue` bumps a reference count, so readers keep a
//! coherent view for the duration of a select while writers copy-on-write.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use vellum_error::{Result, VellumError};
use xxhash_rust::xxh64::Xxh64;

use crate::cjson;
use crate::lsn::Lsn;
use crate::tags::{TagsMatcher, TagsPath};
use crate::value::{CollateMode, FieldKind, Value, ValueArray};

/// Reserved index of the tuple field.
pub const TUPLE_FIELD: usize = 0;

/// One field of a payload type.
#[derive(Debug, Clone)]
pub struct PayloadFieldType {
    pub name: String,
    pub kind: FieldKind,
    pub is_array: bool,
    /// JSON paths feeding this field (usually one; FT composites carry many).
    pub json_paths: Vec<String>,
}

/// Ordered field list of a namespace.
#[derive(Debug, Clone, Default)]
pub struct PayloadType {
    name: String,
    fields: Vec<PayloadFieldType>,
    by_name: HashMap<String, usize>,
    by_json_path: HashMap<String, usize>,
}

impl PayloadType {
    /// Create a payload type with the reserved tuple field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut pt = Self {
            name: name.into(),
            ..Self::default()
        };
        pt.fields.push(PayloadFieldType {
            name: "-tuple".to_owned(),
            kind: FieldKind::String,
            is_array: false,
            json_paths: Vec::new(),
        });
        pt.by_name.insert("-tuple".to_owned(), TUPLE_FIELD);
        pt
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> Result<&PayloadFieldType> {
        self.fields
            .get(idx)
            .ok_or_else(|| VellumError::Logic(format!("field #{idx} out of payload range")))
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn field_by_json_path(&self, path: &str) -> Option<usize> {
        self.by_json_path.get(path).copied()
    }

    #[must_use]
    pub fn fields(&self) -> &[PayloadFieldType] {
        &self.fields
    }

    /// Append a field; returns its index.
    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        kind: FieldKind,
        is_array: bool,
        json_paths: Vec<String>,
    ) -> Result<usize> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(VellumError::Conflict(format!(
                "field '{name}' already exists in payload type '{}'",
                self.name
            )));
        }
        let idx = self.fields.len();
        for path in &json_paths {
            if let Some(&other) = self.by_json_path.get(path) {
                return Err(VellumError::Conflict(format!(
                    "json path '{path}' is already mapped to field '{}'",
                    self.fields[other].name
                )));
            }
        }
        for path in &json_paths {
            self.by_json_path.insert(path.clone(), idx);
        }
        self.by_name.insert(name.clone(), idx);
        self.fields.push(PayloadFieldType {
            name,
            kind,
            is_array,
            json_paths,
        });
        Ok(idx)
    }

    /// Drop a field by index; slots are re-packed by the namespace.
    pub fn drop_field(&mut self, idx: usize) -> Result<()> {
        if idx == TUPLE_FIELD || idx >= self.fields.len() {
            return Err(VellumError::Logic(format!("cannot drop field #{idx}")));
        }
        let removed = self.fields.remove(idx);
        self.by_name.remove(&removed.name);
        for path in &removed.json_paths {
            self.by_json_path.remove(path);
        }
        for (name, i) in &mut self.by_name {
            let _ = name;
            if *i > idx {
                *i -= 1;
            }
        }
        for (_, i) in self.by_json_path.iter_mut() {
            if *i > idx {
                *i -= 1;
            }
        }
        Ok(())
    }
}

/// Slot contents for one field.
#[derive(Debug, Clone, Default)]
enum FieldSlot {
    #[default]
    Null,
    Value(Value),
    /// Header into the row's array heap.
    Array { offset: u32, len: u32 },
    /// The reserved tuple field: CJSON of non-indexed members.
    Tuple(Arc<[u8]>),
}

#[derive(Debug, Clone, Default)]
struct PayloadData {
    lsn: Lsn,
    slots: Vec<FieldSlot>,
    heap: Vec<Value>,
}

/// Reference-counted row buffer.
#[derive(Debug, Clone, Default)]
pub struct PayloadValue {
    data: Arc<PayloadData>,
}

impl PayloadValue {
    /// An all-null row shaped for `ty`.
    #[must_use]
    pub fn new(ty: &PayloadType) -> Self {
        Self {
            data: Arc::new(PayloadData {
                lsn: Lsn::EMPTY,
                slots: vec![FieldSlot::Null; ty.field_count()],
                heap: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.data.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        Arc::make_mut(&mut self.data).lsn = lsn;
    }

    /// True when no other clone shares this buffer.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Content hash of the row (LSN excluded). The namespace `data_hash`
    /// is the XOR of these over all live rows.
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut h = Xxh64::new(0);
        for slot in &self.data.slots {
            match slot {
                FieldSlot::Null => h.update(&[0]),
                FieldSlot::Value(v) => v.hash_into(&mut h),
                FieldSlot::Array { offset, len } => {
                    h.update(&[6]);
                    let start = *offset as usize;
                    let end = start + *len as usize;
                    for v in &self.data.heap[start..end] {
                        v.hash_into(&mut h);
                    }
                }
                FieldSlot::Tuple(bytes) => {
                    h.update(&[7]);
                    h.update(bytes);
                }
            }
        }
        h.digest()
    }

    /// Collect strings referenced by this row (handed to the strings
    /// holder on delete so in-flight readers stay valid).
    #[must_use]
    pub fn strings(&self) -> Vec<Arc<str>> {
        let mut out = Vec::new();
        let mut push = |v: &Value| {
            if let Value::Str(s) = v {
                out.push(Arc::clone(s));
            }
        };
        for slot in &self.data.slots {
            match slot {
                FieldSlot::Value(v) => push(v),
                FieldSlot::Array { offset, len } => {
                    let start = *offset as usize;
                    for v in &self.data.heap[start..start + *len as usize] {
                        push(v);
                    }
                }
                FieldSlot::Null | FieldSlot::Tuple(_) => {}
            }
        }
        out
    }
}

/// Read access to one row through its payload type.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    pub ty: &'a PayloadType,
    pub value: &'a PayloadValue,
}

impl<'a> Payload<'a> {
    #[must_use]
    pub const fn new(ty: &'a PayloadType, value: &'a PayloadValue) -> Self {
        Self { ty, value }
    }

    /// Values of field `idx`: one element for scalars, the heap slice for
    /// arrays, empty for null.
    pub fn get(&self, idx: usize) -> Result<ValueArray> {
        let data = &self.value.data;
        let slot = data
            .slots
            .get(idx)
            .ok_or_else(|| VellumError::Logic(format!("field #{idx} out of row range")))?;
        Ok(match slot {
            FieldSlot::Null => Vec::new(),
            FieldSlot::Value(v) => vec![v.clone()],
            FieldSlot::Array { offset, len } => {
                let start = *offset as usize;
                data.heap[start..start + *len as usize].to_vec()
            }
            FieldSlot::Tuple(_) => Vec::new(),
        })
    }

    /// The tuple field's CJSON bytes.
    #[must_use]
    pub fn tuple(&self) -> &[u8] {
        match &self.value.data.slots[TUPLE_FIELD] {
            FieldSlot::Tuple(bytes) => bytes,
            _ => &[],
        }
    }

    /// Values at a JSON path: an indexed field when one covers the path,
    /// otherwise extracted from the tuple CJSON.
    pub fn get_by_json_path(
        &self,
        path: &str,
        tags_path: &TagsPath,
        tm: &TagsMatcher,
    ) -> Result<ValueArray> {
        if let Some(idx) = self.ty.field_by_json_path(path) {
            return self.get(idx);
        }
        cjson::extract(self.tuple(), tm, tags_path)
    }

    /// Serialize the given fields' values into storage-key bytes.
    pub fn serialize_fields(&self, fields: &[usize]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for &f in fields {
            for v in self.get(f)? {
                serialize_key_value(&v, &mut out);
            }
        }
        Ok(out)
    }

    /// Compare rows field-wise; used by composite index keys and facet
    /// ordering.
    pub fn compare_fields(
        &self,
        other: &PayloadValue,
        fields: &[usize],
        collate: CollateMode,
    ) -> Result<Ordering> {
        let other = Payload::new(self.ty, other);
        for &f in fields {
            let a = self.get(f)?;
            let b = other.get(f)?;
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = x.cmp_with_collate(y, collate);
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            let ord = a.len().cmp(&b.len());
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}

fn serialize_key_value(v: &Value, out: &mut Vec<u8>) {
    use crate::varint::{write_uvarint, write_varint};
    match v {
        Value::Null => out.push(0),
        Value::Bool(b) => {
            out.push(1);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(2);
            write_varint(out, *i);
        }
        Value::Double(d) => {
            out.push(3);
            out.extend_from_slice(&d.to_le_bytes());
        }
        Value::Str(s) => {
            out.push(4);
            write_uvarint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Tuple(vs) => {
            out.push(5);
            write_uvarint(out, vs.len() as u64);
            for v in vs {
                serialize_key_value(v, out);
            }
        }
    }
}

/// Write access to one row; copy-on-write through the shared buffer.
pub struct PayloadWriter<'a> {
    pub ty: &'a PayloadType,
    value: &'a mut PayloadValue,
}

impl<'a> PayloadWriter<'a> {
    pub fn new(ty: &'a PayloadType, value: &'a mut PayloadValue) -> Self {
        Self { ty, value }
    }

    /// Replace field `idx` with `values`, validating against the field kind.
    pub fn set(&mut self, idx: usize, values: ValueArray) -> Result<()> {
        let ftype = self.ty.field(idx)?.clone();
        if idx == TUPLE_FIELD {
            return Err(VellumError::Logic(
                "tuple field is set through set_tuple".to_owned(),
            ));
        }
        if values.len() > 1 && !ftype.is_array {
            return Err(VellumError::Params(format!(
                "field '{}' is not an array, got {} values",
                ftype.name,
                values.len()
            )));
        }
        let mut coerced = Vec::with_capacity(values.len());
        for v in values {
            coerced.push(v.coerce_to(ftype.kind, &ftype.name)?);
        }
        let data = Arc::make_mut(&mut self.value.data);
        if data.slots.len() < self.ty.field_count() {
            data.slots.resize(self.ty.field_count(), FieldSlot::Null);
        }
        data.slots[idx] = if ftype.is_array {
            let offset = data.heap.len() as u32;
            let len = coerced.len() as u32;
            data.heap.extend(coerced);
            FieldSlot::Array { offset, len }
        } else {
            match coerced.into_iter().next() {
                Some(v) if !v.is_null() => FieldSlot::Value(v),
                _ => FieldSlot::Null,
            }
        };
        Ok(())
    }

    /// Store the non-indexed members' CJSON in the reserved tuple field.
    pub fn set_tuple(&mut self, bytes: Vec<u8>) {
        let data = Arc::make_mut(&mut self.value.data);
        if data.slots.is_empty() {
            data.slots.resize(self.ty.field_count(), FieldSlot::Null);
        }
        data.slots[TUPLE_FIELD] = FieldSlot::Tuple(Arc::from(bytes.into_boxed_slice()));
    }

    /// Drop the slot of a removed field, re-packing the remainder.
    pub fn remove_field_slot(&mut self, idx: usize) {
        let data = Arc::make_mut(&mut self.value.data);
        if idx < data.slots.len() {
            data.slots.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_type() -> PayloadType {
        let mut ty = PayloadType::new("ns");
        ty.add_field("id", FieldKind::Int, false, vec!["id".into()])
            .unwrap();
        ty.add_field("title", FieldKind::String, false, vec!["title".into()])
            .unwrap();
        ty.add_field("tags", FieldKind::String, true, vec!["tags".into()])
            .unwrap();
        ty
    }

    #[test]
    fn test_set_get_scalar() {
        let ty = sample_type();
        let mut pv = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut pv)
            .set(1, vec![Value::Int(7)])
            .unwrap();
        assert_eq!(Payload::new(&ty, &pv).get(1).unwrap(), vec![Value::Int(7)]);
    }

    #[test]
    fn test_set_get_array() {
        let ty = sample_type();
        let mut pv = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut pv)
            .set(3, vec![Value::from("a"), Value::from("b")])
            .unwrap();
        let vals = Payload::new(&ty, &pv).get(3).unwrap();
        assert_eq!(vals.len(), 2);
    }

    #[test]
    fn test_non_array_rejects_many() {
        let ty = sample_type();
        let mut pv = PayloadValue::new(&ty);
        let err = PayloadWriter::new(&ty, &mut pv)
            .set(1, vec![Value::Int(1), Value::Int(2)])
            .unwrap_err();
        assert_eq!(err.kind(), vellum_error::ErrorKind::Params);
    }

    #[test]
    fn test_copy_on_write_preserves_reader_view() {
        let ty = sample_type();
        let mut pv = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut pv)
            .set(1, vec![Value::Int(1)])
            .unwrap();
        let reader_copy = pv.clone();
        PayloadWriter::new(&ty, &mut pv)
            .set(1, vec![Value::Int(2)])
            .unwrap();
        assert_eq!(
            Payload::new(&ty, &reader_copy).get(1).unwrap(),
            vec![Value::Int(1)]
        );
        assert_eq!(Payload::new(&ty, &pv).get(1).unwrap(), vec![Value::Int(2)]);
    }

    #[test]
    fn test_hash_ignores_lsn() {
        let ty = sample_type();
        let mut pv = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut pv)
            .set(1, vec![Value::Int(5)])
            .unwrap();
        let h1 = pv.hash();
        pv.set_lsn(Lsn::new(42, 1));
        assert_eq!(pv.hash(), h1);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let ty = sample_type();
        let mut a = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut a)
            .set(1, vec![Value::Int(5)])
            .unwrap();
        let mut b = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut b)
            .set(1, vec![Value::Int(6)])
            .unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_compare_fields() {
        let ty = sample_type();
        let mut a = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut a)
            .set(1, vec![Value::Int(1)])
            .unwrap();
        let mut b = PayloadValue::new(&ty);
        PayloadWriter::new(&ty, &mut b)
            .set(1, vec![Value::Int(2)])
            .unwrap();
        let ord = Payload::new(&ty, &a)
            .compare_fields(&b, &[1], CollateMode::None)
            .unwrap();
        assert_eq!(ord, Ordering::Less);
    }
}
