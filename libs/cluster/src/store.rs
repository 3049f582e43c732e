//! In-memory object stores backing the local views.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A keyed store of immutable object snapshots.
///
/// Multi-reader, single-writer: the watch loop owning the store is the only
/// writer, readers get cheap `Arc` clones and may retain them. Reads are
/// synchronous; no lock is held across an await point.
#[derive(Debug)]
pub struct ObjectStore<T> {
    objects: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> ObjectStore<T> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch one object by key.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.objects
            .read()
            .expect("object store lock poisoned")
            .get(key)
            .cloned()
    }

    /// Snapshot of every object in the store.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.objects
            .read()
            .expect("object store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of the objects matching `predicate`.
    ///
    /// This is the selector primitive: callers express label or field
    /// selection as a predicate over the object.
    pub fn select(&self, predicate: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        self.objects
            .read()
            .expect("object store lock poisoned")
            .values()
            .filter(|object| predicate(object))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .expect("object store lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upsert one object. Called by the owning watch loop.
    pub fn insert(&self, key: String, object: T) {
        self.objects
            .write()
            .expect("object store lock poisoned")
            .insert(key, Arc::new(object));
    }

    pub fn remove(&self, key: &str) {
        self.objects
            .write()
            .expect("object store lock poisoned")
            .remove(key);
    }

    /// Replace the entire contents, used by full relists.
    pub fn replace_all(&self, objects: impl IntoIterator<Item = (String, T)>) {
        let mut map = self.objects.write().expect("object store lock poisoned");
        map.clear();
        for (key, object) in objects {
            map.insert(key, Arc::new(object));
        }
    }
}

impl<T> Default for ObjectStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
