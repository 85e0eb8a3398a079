//! Write-ahead log: a ring of typed, LSN-tagged records.
//!
//! Every mutating namespace operation emits exactly one record (one per
//! row, or one per statement for statement-replicated bulk updates). The
//! replication bus observes records in LSN order; the binary codec
//! round-trips every field exactly.

use std::collections::VecDeque;

use vellum_error::{Result, VellumError};
use vellum_types::varint::{read_uvarint, write_uvarint};
use vellum_types::Lsn;

/// Item-modify mode carried by [`WalRecord::ItemModify`].
pub const MODE_INSERT: u8 = 0;
pub const MODE_UPDATE: u8 = 1;
pub const MODE_UPSERT: u8 = 2;
pub const MODE_DELETE: u8 = 3;

/// One journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Raw item write during replication catch-up.
    ItemUpdate { cjson: Vec<u8> },
    /// A single item mutation.
    ItemModify {
        mode: u8,
        cjson: Vec<u8>,
        tm_version: u32,
    },
    /// Statement-replicated bulk update/delete (one record per batch).
    UpdateQuery { sql: String },
    IndexAdd { def_json: String },
    IndexUpdate { def_json: String },
    IndexDrop { name: String },
    PutMeta { key: String, value: Vec<u8> },
    SetSchema { schema: String },
    InitTransaction,
    CommitTransaction,
}

const TAG_ITEM_UPDATE: u8 = 1;
const TAG_ITEM_MODIFY: u8 = 2;
const TAG_UPDATE_QUERY: u8 = 3;
const TAG_INDEX_ADD: u8 = 4;
const TAG_INDEX_UPDATE: u8 = 5;
const TAG_INDEX_DROP: u8 = 6;
const TAG_PUT_META: u8 = 7;
const TAG_SET_SCHEMA: u8 = 8;
const TAG_INIT_TX: u8 = 9;
const TAG_COMMIT_TX: u8 = 10;

fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_uvarint(out, data.len() as u64);
    out.extend_from_slice(data);
}

fn read_bytes(data: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let bad = || VellumError::ParseBin("truncated WAL record".to_owned());
    let (len, n) = read_uvarint(&data[*pos..]).ok_or_else(bad)?;
    *pos += n;
    let end = *pos + len as usize;
    if end > data.len() {
        return Err(bad());
    }
    let out = data[*pos..end].to_vec();
    *pos = end;
    Ok(out)
}

fn read_string(data: &[u8], pos: &mut usize) -> Result<String> {
    String::from_utf8(read_bytes(data, pos)?)
        .map_err(|_| VellumError::ParseBin("non-utf8 WAL string".to_owned()))
}

impl WalRecord {
    /// Binary form: a type byte followed by length-prefixed fields.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::ItemUpdate { cjson } => {
                out.push(TAG_ITEM_UPDATE);
                write_bytes(&mut out, cjson);
            }
            Self::ItemModify {
                mode,
                cjson,
                tm_version,
            } => {
                out.push(TAG_ITEM_MODIFY);
                out.push(*mode);
                write_uvarint(&mut out, u64::from(*tm_version));
                write_bytes(&mut out, cjson);
            }
            Self::UpdateQuery { sql } => {
                out.push(TAG_UPDATE_QUERY);
                write_bytes(&mut out, sql.as_bytes());
            }
            Self::IndexAdd { def_json } => {
                out.push(TAG_INDEX_ADD);
                write_bytes(&mut out, def_json.as_bytes());
            }
            Self::IndexUpdate { def_json } => {
                out.push(TAG_INDEX_UPDATE);
                write_bytes(&mut out, def_json.as_bytes());
            }
            Self::IndexDrop { name } => {
                out.push(TAG_INDEX_DROP);
                write_bytes(&mut out, name.as_bytes());
            }
            Self::PutMeta { key, value } => {
                out.push(TAG_PUT_META);
                write_bytes(&mut out, key.as_bytes());
                write_bytes(&mut out, value);
            }
            Self::SetSchema { schema } => {
                out.push(TAG_SET_SCHEMA);
                write_bytes(&mut out, schema.as_bytes());
            }
            Self::InitTransaction => out.push(TAG_INIT_TX),
            Self::CommitTransaction => out.push(TAG_COMMIT_TX),
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let bad = || VellumError::ParseBin("truncated WAL record".to_owned());
        let tag = *data.first().ok_or_else(bad)?;
        let mut pos = 1usize;
        Ok(match tag {
            TAG_ITEM_UPDATE => Self::ItemUpdate {
                cjson: read_bytes(data, &mut pos)?,
            },
            TAG_ITEM_MODIFY => {
                let mode = *data.get(pos).ok_or_else(bad)?;
                pos += 1;
                let (tm_version, n) = read_uvarint(&data[pos..]).ok_or_else(bad)?;
                pos += n;
                Self::ItemModify {
                    mode,
                    tm_version: tm_version as u32,
                    cjson: read_bytes(data, &mut pos)?,
                }
            }
            TAG_UPDATE_QUERY => Self::UpdateQuery {
                sql: read_string(data, &mut pos)?,
            },
            TAG_INDEX_ADD => Self::IndexAdd {
                def_json: read_string(data, &mut pos)?,
            },
            TAG_INDEX_UPDATE => Self::IndexUpdate {
                def_json: read_string(data, &mut pos)?,
            },
            TAG_INDEX_DROP => Self::IndexDrop {
                name: read_string(data, &mut pos)?,
            },
            TAG_PUT_META => Self::PutMeta {
                key: read_string(data, &mut pos)?,
                value: read_bytes(data, &mut pos)?,
            },
            TAG_SET_SCHEMA => Self::SetSchema {
                schema: read_string(data, &mut pos)?,
            },
            TAG_INIT_TX => Self::InitTransaction,
            TAG_COMMIT_TX => Self::CommitTransaction,
            other => {
                return Err(VellumError::ParseBin(format!(
                    "unknown WAL record tag {other}"
                )));
            }
        })
    }
}

/// Bounded in-memory WAL ring.
#[derive(Debug, Clone)]
pub struct Wal {
    records: VecDeque<(Lsn, WalRecord)>,
    next_counter: i64,
    server_id: i16,
    capacity: usize,
}

impl Wal {
    #[must_use]
    pub fn new(capacity: usize, server_id: i16) -> Self {
        Self {
            records: VecDeque::new(),
            next_counter: 0,
            server_id,
            capacity: capacity.max(1),
        }
    }

    /// Restore the counter from persisted replication state.
    pub fn restore_counter(&mut self, counter: i64) {
        self.next_counter = counter.max(self.next_counter);
    }

    /// Append a record, assigning the next LSN.
    pub fn add(&mut self, record: WalRecord) -> Lsn {
        let lsn = Lsn::new(self.next_counter, self.server_id);
        self.next_counter += 1;
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back((lsn, record));
        lsn
    }

    #[must_use]
    pub fn last_lsn(&self) -> Lsn {
        self.records.back().map_or(Lsn::EMPTY, |(lsn, _)| *lsn)
    }

    #[must_use]
    pub fn next_counter(&self) -> i64 {
        self.next_counter
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records at or after `from`, in LSN order.
    pub fn read_since(&self, from: i64) -> impl Iterator<Item = &(Lsn, WalRecord)> {
        self.records.iter().filter(move |(lsn, _)| lsn.counter >= from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialize_roundtrip() {
        let records = [
            WalRecord::ItemUpdate {
                cjson: vec![1, 2, 3],
            },
            WalRecord::ItemModify {
                mode: MODE_UPSERT,
                cjson: vec![9, 8],
                tm_version: 42,
            },
            WalRecord::UpdateQuery {
                sql: "UPDATE ns SET a = 1".to_owned(),
            },
            WalRecord::IndexAdd {
                def_json: "{\"name\":\"id\"}".to_owned(),
            },
            WalRecord::IndexDrop {
                name: "old".to_owned(),
            },
            WalRecord::PutMeta {
                key: "k".to_owned(),
                value: vec![0, 255],
            },
            WalRecord::SetSchema {
                schema: "{}".to_owned(),
            },
            WalRecord::InitTransaction,
            WalRecord::CommitTransaction,
        ];
        for rec in records {
            let bytes = rec.serialize();
            assert_eq!(WalRecord::deserialize(&bytes).unwrap(), rec);
        }
    }

    #[test]
    fn test_lsn_ordering_and_ring() {
        let mut wal = Wal::new(3, 7);
        for i in 0..5 {
            let lsn = wal.add(WalRecord::InitTransaction);
            assert_eq!(lsn.counter, i);
            assert_eq!(lsn.server_id, 7);
        }
        assert_eq!(wal.len(), 3);
        let counters: Vec<i64> = wal.read_since(0).map(|(lsn, _)| lsn.counter).collect();
        assert_eq!(counters, vec![2, 3, 4]);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(WalRecord::deserialize(&[]).is_err());
        assert!(WalRecord::deserialize(&[99]).is_err());
    }
}
