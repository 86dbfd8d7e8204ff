// Insertion-ordered record storage keyed by id, publishing a shared
// snapshot after each mutation.

use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use tokio::sync::watch;

/// A reactive collection for a single record type.
///
/// Keys are record ids in string form. Every mutation bumps a version
/// counter and rebuilds the shared snapshot. Bulk operations (`replace_all`, `retain`) publish exactly one snapshot.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_key: RwLock<IndexMap<String, Arc<T>>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: RwLock::new(IndexMap::new()),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    ///
    /// A replaced entity keeps its original slot.
    pub(crate) fn upsert(&self, key: String, entity: T) -> bool {
        let mut map = self.write();
        let is_new = map.insert(key, Arc::new(entity)).is_none();
        self.publish(&map);
        is_new
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let mut map = self.write();
        let removed = map.shift_remove(key);
        if removed.is_some() {
            self.publish(&map);
        }
        removed
    }

    /// Apply `f` to a copy of the entity stored under `key` and store the
    /// result. Returns the previous value.
    pub(crate) fn update(&self, key: &str, f: impl FnOnce(&mut T)) -> Option<Arc<T>> {
        let mut map = self.write();
        let slot = map.get_mut(key)?;
        let previous = Arc::clone(slot);
        let mut next = T::clone(&previous);
        f(&mut next);
        *slot = Arc::new(next);
        self.publish(&map);
        Some(previous)
    }

    /// Remove every entity for which `keep` returns `false`, publishing a
    /// single snapshot. Returns the removed entities.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> Vec<Arc<T>> {
        let mut map = self.write();
        let mut removed = Vec::new();
        map.retain(|_, v| {
            if keep(v) {
                true
            } else {
                removed.push(Arc::clone(v));
                false
            }
        });
        if !removed.is_empty() {
            self.publish(&map);
        }
        removed
    }

    /// Replace the contents with `entries` (in their order) and drop keys
    /// not present. Subscribers observe only the final state, never an
    /// empty intermediate one.
    pub(crate) fn replace_all(&self, entries: Vec<(String, T)>) {
        let mut map = self.write();
        let mut fresh: IndexMap<String, Arc<T>> = IndexMap::with_capacity(entries.len());
        for (key, entity) in entries {
            fresh.insert(key, Arc::new(entity));
        }
        *map = fresh;
        self.publish(&map);
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.read().get(key).map(Arc::clone)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    #[allow(dead_code)]
    pub(crate) fn clear(&self) {
        let mut map = self.write();
        map.clear();
        self.publish(&map);
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<T>>> {
        self.by_key.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Arc<T>>> {
        self.by_key.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild the snapshot and bump the version while the write lock is
    /// held, so snapshots are published in mutation order.
    fn publish(&self, map: &IndexMap<String, Arc<T>>) {
        let values: Vec<Arc<T>> = map.values().map(Arc::clone).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
