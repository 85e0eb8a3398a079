//! Batched asynchronous writer over a [`Storage`] backend.
//!
//! Writes are staged in memory and pushed to the backend by a background
//! routine once the batch crosses a soft limit (or on an explicit
//! [`AsyncStorage::flush`]). Reads observe staged writes. The
//! [`AsyncStorage::full_lock`] handle freezes all writers while a
//! namespace clone snapshots storage for a copy-mode transaction commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use vellum_error::Result;

use crate::Storage;

/// Default soft limit for the staged batch, in operations.
pub const DEFAULT_BATCH_SOFT_LIMIT: usize = 1000;

const FLUSH_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>),
    Remove,
}

struct Shared {
    pending: Mutex<PendingState>,
    wake: Condvar,
    soft_limit: usize,
    stop: AtomicBool,
}

struct PendingState {
    /// Latest staged op per key; later ops shadow earlier ones.
    ops: HashMap<Vec<u8>, Op>,
    /// Staging order, for deterministic application.
    order: Vec<Vec<u8>>,
    write_locked: bool,
}

/// Write-batching adapter; cheap to share, `Drop` joins the flusher.
pub struct AsyncStorage {
    backend: Arc<dyn Storage>,
    shared: Arc<Shared>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncStorage {
    pub fn new(backend: Arc<dyn Storage>) -> Self {
        Self::with_soft_limit(backend, DEFAULT_BATCH_SOFT_LIMIT)
    }

    pub fn with_soft_limit(backend: Arc<dyn Storage>, soft_limit: usize) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingState {
                ops: HashMap::new(),
                order: Vec::new(),
                write_locked: false,
            }),
            wake: Condvar::new(),
            soft_limit,
            stop: AtomicBool::new(false),
        });
        let flusher = {
            let shared = Arc::clone(&shared);
            let backend = Arc::clone(&backend);
            std::thread::Builder::new()
                .name("vellum-storage-flush".to_owned())
                .spawn(move || flush_loop(&shared, backend.as_ref()))
                .ok()
        };
        Self {
            backend,
            shared,
            flusher: Mutex::new(flusher),
        }
    }

    fn stage(&self, key: &[u8], op: Op) {
        let mut pending = self.shared.pending.lock();
        while pending.write_locked {
            self.shared.wake.wait(&mut pending);
        }
        if !pending.ops.contains_key(key) {
            pending.order.push(key.to_vec());
        }
        pending.ops.insert(key.to_vec(), op);
        if pending.ops.len() >= self.shared.soft_limit {
            self.shared.wake.notify_all();
        }
    }

    fn drain_and_apply(&self) -> Result<()> {
        let drained = {
            let mut pending = self.shared.pending.lock();
            drain(&mut pending)
        };
        apply(self.backend.as_ref(), drained)
    }

    /// Synchronously push every staged write and flush the backend.
    pub fn flush(&self) -> Result<()> {
        self.drain_and_apply()?;
        self.backend.flush()
    }

    /// Freeze writers and snapshot-stabilize storage.
    ///
    /// Staged writes are applied first, so the backend reflects every
    /// operation accepted before the lock. Held for the duration of a
    /// namespace clone.
    pub fn full_lock(&self) -> Result<FullLockGuard> {
        {
            let mut pending = self.shared.pending.lock();
            while pending.write_locked {
                self.shared.wake.wait(&mut pending);
            }
            pending.write_locked = true;
        }
        if let Err(err) = self.drain_and_apply() {
            self.shared.pending.lock().write_locked = false;
            self.shared.wake.notify_all();
            return Err(err);
        }
        self.backend.flush()?;
        Ok(FullLockGuard {
            shared: Arc::clone(&self.shared),
        })
    }
}

impl Storage for AsyncStorage {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let pending = self.shared.pending.lock();
        match pending.ops.get(key) {
            Some(Op::Put(v)) => Ok(Some(v.clone())),
            Some(Op::Remove) => Ok(None),
            None => {
                drop(pending);
                self.backend.read(key)
            }
        }
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.stage(key, Op::Put(value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.stage(key, Op::Remove);
        Ok(())
    }

    fn cursor(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        // Cursor correctness needs the staged batch applied.
        self.drain_and_apply()?;
        self.backend.cursor(prefix)
    }

    fn flush(&self) -> Result<()> {
        Self::flush(self)
    }
}

impl Drop for AsyncStorage {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        if let Err(err) = self.drain_and_apply() {
            warn!(error = %err, "final storage flush failed");
        }
    }
}

/// Guard returned by [`AsyncStorage::full_lock`]; releases on drop.
pub struct FullLockGuard {
    shared: Arc<Shared>,
}

impl Drop for FullLockGuard {
    fn drop(&mut self) {
        self.shared.pending.lock().write_locked = false;
        self.shared.wake.notify_all();
    }
}

fn drain(pending: &mut PendingState) -> Vec<(Vec<u8>, Op)> {
    let mut out = Vec::with_capacity(pending.order.len());
    for key in pending.order.drain(..) {
        if let Some(op) = pending.ops.remove(&key) {
            out.push((key, op));
        }
    }
    pending.ops.clear();
    out
}

fn apply(backend: &dyn Storage, ops: Vec<(Vec<u8>, Op)>) -> Result<()> {
    if ops.is_empty() {
        return Ok(());
    }
    debug!(count = ops.len(), "applying staged storage batch");
    for (key, op) in ops {
        match op {
            Op::Put(value) => backend.write(&key, &value)?,
            Op::Remove => backend.remove(&key)?,
        }
    }
    Ok(())
}

fn flush_loop(shared: &Shared, backend: &dyn Storage) {
    loop {
        let drained = {
            let mut pending = shared.pending.lock();
            if shared.stop.load(Ordering::SeqCst) {
                break;
            }
            if pending.ops.len() < shared.soft_limit {
                let _ = shared.wake.wait_for(&mut pending, FLUSH_TICK);
            }
            if shared.stop.load(Ordering::SeqCst) {
                break;
            }
            if pending.write_locked {
                continue;
            }
            drain(&mut pending)
        };
        if let Err(err) = apply(backend, drained).and_then(|()| backend.flush()) {
            warn!(error = %err, "background storage flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStorage;

    fn pair() -> (Arc<MemStorage>, AsyncStorage) {
        let mem = Arc::new(MemStorage::new());
        let astore = AsyncStorage::new(Arc::clone(&mem) as Arc<dyn Storage>);
        (mem, astore)
    }

    #[test]
    fn test_staged_write_visible_to_reads() {
        let (_, astore) = pair();
        astore.write(b"k", b"v").unwrap();
        assert_eq!(astore.read(b"k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_flush_pushes_to_backend() {
        let (mem, astore) = pair();
        astore.write(b"k", b"v").unwrap();
        AsyncStorage::flush(&astore).unwrap();
        assert_eq!(mem.read(b"k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_remove_shadows_put() {
        let (_, astore) = pair();
        astore.write(b"k", b"v").unwrap();
        astore.remove(b"k").unwrap();
        assert_eq!(astore.read(b"k").unwrap(), None);
        AsyncStorage::flush(&astore).unwrap();
        assert_eq!(astore.read(b"k").unwrap(), None);
    }

    #[test]
    fn test_cursor_sees_staged_batch() {
        let (_, astore) = pair();
        astore.write(b"p:a", b"1").unwrap();
        astore.write(b"p:b", b"2").unwrap();
        let rows = astore.cursor(b"p:").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_full_lock_applies_then_blocks_release() {
        let (mem, astore) = pair();
        astore.write(b"k", b"v").unwrap();
        {
            let _guard = astore.full_lock().unwrap();
            assert_eq!(mem.read(b"k").unwrap().as_deref(), Some(&b"v"[..]));
        }
        astore.write(b"k2", b"v2").unwrap();
        assert_eq!(astore.read(b"k2").unwrap().as_deref(), Some(&b"v2"[..]));
    }
}
