//! Storage adapter for VellumDB.
//!
//! The engine consumes a key-ordered KV behind the [`Storage`] trait; a
//! LevelDB-like backend plugs in here. [`MemStorage`] is the bundled
//! ordered in-memory implementation (and the test double).
//! [`AsyncStorage`] layers write batching, a background flush routine,
//! versioned system records and the full-lock handle used while cloning a
//! namespace for a large transaction.

pub mod asyncstorage;
pub mod mem;
pub mod sysrecords;

pub use asyncstorage::{AsyncStorage, FullLockGuard};
pub use mem::MemStorage;
pub use sysrecords::{
    read_sys_record, write_sys_record, SysRecordKind, SYS_RECORD_SLOTS, SYS_STORAGE_MAGIC,
    SYS_STORAGE_VERSION,
};

use vellum_error::Result;

/// Key-ordered KV contract expected from the backend.
///
/// Keys are opaque bytes; `cursor` iterates every pair whose key starts
/// with `prefix`, in key order.
pub trait Storage: Send + Sync {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn write(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn remove(&self, key: &[u8]) -> Result<()>;
    fn cursor(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn flush(&self) -> Result<()>;
}
