//! Ordered in-memory storage backend.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use vellum_error::Result;

use crate::Storage;

/// BTree-backed KV; the default backend for in-memory namespaces and the
/// storage double in tests.
#[derive(Debug, Default)]
pub struct MemStorage {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Storage for MemStorage {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn cursor(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_remove() {
        let s = MemStorage::new();
        s.write(b"k1", b"v1").unwrap();
        assert_eq!(s.read(b"k1").unwrap().as_deref(), Some(&b"v1"[..]));
        s.remove(b"k1").unwrap();
        assert_eq!(s.read(b"k1").unwrap(), None);
    }

    #[test]
    fn test_cursor_prefix_order() {
        let s = MemStorage::new();
        s.write(b"it:b", b"2").unwrap();
        s.write(b"it:a", b"1").unwrap();
        s.write(b"other", b"x").unwrap();
        let got = s.cursor(b"it:").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, b"it:a");
        assert_eq!(got[1].0, b"it:b");
    }
}
