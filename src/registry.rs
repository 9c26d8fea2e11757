use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// All waiter and tombstone transitions happen with the registry mutex
// held; the atomics exist because entries are shared through `Arc`.
#[derive(Debug, Default)]
struct LockEntry {
    file: Mutex<()>,
    waiters: AtomicU32,
    removed: AtomicBool,
}

/// Process-wide map from vector name to its lock entry. The registry
/// mutex guards only lookups and waiter-count transitions; the per-vector
/// mutex inside each entry is held for entire file rewrites without
/// serializing unrelated vectors.
pub struct LockRegistry {
    entries: Mutex<HashMap<String, Arc<LockEntry>>>,
}

/// Handle to an acquired lock entry. Holds one waiter reference; dropping
/// it releases the reference on every exit path and tears the entry down
/// if it was marked for removal and this was the last holder.
pub struct VectorLock<'a> {
    registry: &'a LockRegistry,
    name: String,
    entry: Arc<LockEntry>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    // Registers an entry during the startup directory scan.
    pub fn insert(&self, name: &str) {
        self.lock_entries()
            .entry(name.to_owned())
            .or_insert_with(Default::default);
    }

    /// Returns the entry for `name`, creating one if absent. Returns None
    /// when the slot is occupied by a tombstoned entry, i.e. a destroy of
    /// the same name has not finished tearing down.
    pub fn ensure(&self, name: &str) -> Option<VectorLock<'_>> {
        let mut entries = self.lock_entries();
        let entry = entries.entry(name.to_owned()).or_insert_with(Default::default);
        if entry.removed.load(Ordering::Relaxed) {
            return None;
        }
        entry.waiters.fetch_add(1, Ordering::Relaxed);
        Some(VectorLock {
            registry: self,
            name: name.to_owned(),
            entry: Arc::clone(entry),
        })
    }

    /// Returns the entry for `name`, or None when it is missing or
    /// tombstoned. The caller blocks on the entry's own mutex afterwards,
    /// outside the registry lock.
    pub fn acquire(&self, name: &str) -> Option<VectorLock<'_>> {
        let entries = self.lock_entries();
        let entry = entries.get(name)?;
        if entry.removed.load(Ordering::Relaxed) {
            return None;
        }
        entry.waiters.fetch_add(1, Ordering::Relaxed);
        Some(VectorLock {
            registry: self,
            name: name.to_owned(),
            entry: Arc::clone(entry),
        })
    }

    fn release(&self, name: &str, entry: &Arc<LockEntry>) {
        let mut entries = self.lock_entries();
        let remaining = entry.waiters.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 && entry.removed.load(Ordering::Relaxed) {
            entries.remove(name);
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Arc<LockEntry>>> {
        self.entries.lock().expect("registry mutex poisoned")
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock_entries().len()
    }

    #[cfg(test)]
    fn waiters(&self, name: &str) -> Option<u32> {
        self.lock_entries()
            .get(name)
            .map(|entry| entry.waiters.load(Ordering::Relaxed))
    }
}

impl<'a> VectorLock<'a> {
    /// Blocks until this vector's mutex is free and returns the guard that
    /// serializes file operations on it.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.entry.file.lock().expect("vector mutex poisoned")
    }

    /// Tombstones the entry. New acquires fail immediately; the slot is
    /// physically removed by the last release.
    pub fn mark_removed(&self) {
        let _entries = self.registry.lock_entries();
        self.entry.removed.store(true, Ordering::Relaxed);
    }
}

impl<'a> Drop for VectorLock<'a> {
    fn drop(&mut self) {
        self.registry.release(&self.name, &self.entry);
    }
}
