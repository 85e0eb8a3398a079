//! Versioned system records.
//!
//! Singleton namespace state (tags matcher, schema, index definitions,
//! replication state) is persisted under a rolling set of
//! [`SYS_RECORD_SLOTS`] backup slots keyed `<tag>.<N>`. Every record is
//! prefixed with an 8-byte LE version; readers pick the slot with the
//! highest intact version, so a torn write of one slot never loses the
//! record. The very first write emits [`FIRST_WRITE_COPIES`] copies to
//! survive power loss before any rotation happened.

use tracing::debug;
use vellum_error::{Result, VellumError};

use crate::Storage;

/// Number of rolling backup slots per record.
pub const SYS_RECORD_SLOTS: u64 = 8;

/// Copies emitted by the first write of a record.
pub const FIRST_WRITE_COPIES: u64 = 3;

/// Magic embedded in the indexes record body.
pub const SYS_STORAGE_MAGIC: u32 = 0x1234_FEDC;

/// On-disk layout version embedded in the indexes record body.
pub const SYS_STORAGE_VERSION: u32 = 0x8;

/// The singleton records a namespace persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysRecordKind {
    Tags,
    Schema,
    Indexes,
    Replication,
}

impl SysRecordKind {
    #[must_use]
    pub const fn prefix(self) -> &'static [u8] {
        match self {
            Self::Tags => b"tags",
            Self::Schema => b"schema",
            Self::Indexes => b"indexes",
            Self::Replication => b"repl",
        }
    }
}

fn slot_key(kind: SysRecordKind, slot: u64) -> Vec<u8> {
    let mut key = kind.prefix().to_vec();
    key.push(b'.');
    key.push(b'0' + (slot % SYS_RECORD_SLOTS) as u8);
    key
}

/// Write the next version of a sys record.
///
/// `last_version` is the version returned by the previous read/write (0
/// when the record never existed). Returns the version written.
pub fn write_sys_record(
    storage: &dyn Storage,
    kind: SysRecordKind,
    last_version: u64,
    body: &[u8],
) -> Result<u64> {
    let version = last_version + 1;
    let mut value = Vec::with_capacity(8 + body.len());
    value.extend_from_slice(&version.to_le_bytes());
    value.extend_from_slice(body);

    if last_version == 0 {
        // No rotation history yet: triple-write so a torn slot cannot lose
        // the only copy.
        for copy in 0..FIRST_WRITE_COPIES {
            storage.write(&slot_key(kind, version + copy), &value)?;
        }
    } else {
        storage.write(&slot_key(kind, version), &value)?;
    }
    debug!(kind = ?kind, version, "sys record written");
    Ok(version)
}

/// Read the highest-versioned intact copy of a sys record.
///
/// Returns `(version, body)`, or `None` when no slot holds the record.
pub fn read_sys_record(
    storage: &dyn Storage,
    kind: SysRecordKind,
) -> Result<Option<(u64, Vec<u8>)>> {
    let mut best: Option<(u64, Vec<u8>)> = None;
    for slot in 0..SYS_RECORD_SLOTS {
        let Some(value) = storage.read(&slot_key(kind, slot))? else {
            continue;
        };
        if value.len() < 8 {
            return Err(VellumError::ParseBin(format!(
                "sys record {kind:?} slot {slot} is truncated"
            )));
        }
        let version = u64::from_le_bytes(value[..8].try_into().expect("8-byte prefix"));
        if best.as_ref().map_or(true, |(v, _)| version > *v) {
            best = Some((version, value[8..].to_vec()));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStorage;

    #[test]
    fn test_first_write_makes_copies() {
        let s = MemStorage::new();
        let v = write_sys_record(&s, SysRecordKind::Tags, 0, b"body").unwrap();
        assert_eq!(v, 1);
        assert_eq!(s.len(), FIRST_WRITE_COPIES as usize);
        let (rv, body) = read_sys_record(&s, SysRecordKind::Tags).unwrap().unwrap();
        assert_eq!(rv, 3);
        assert_eq!(body, b"body");
    }

    #[test]
    fn test_rotation_highest_wins() {
        let s = MemStorage::new();
        let mut version = 0;
        for i in 0..20u8 {
            version = write_sys_record(&s, SysRecordKind::Indexes, version, &[i]).unwrap();
        }
        let (rv, body) = read_sys_record(&s, SysRecordKind::Indexes)
            .unwrap()
            .unwrap();
        assert_eq!(rv, version);
        assert_eq!(body, vec![19]);
    }

    #[test]
    fn test_missing_record() {
        let s = MemStorage::new();
        assert!(read_sys_record(&s, SysRecordKind::Schema).unwrap().is_none());
    }
}
