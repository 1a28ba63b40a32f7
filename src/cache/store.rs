//! Versioned object store
//!
//! A mutex-guarded map from object key to the last observed object. Updates
//! only ever move forward: an incoming object whose resource version does
//! not strictly exceed the stored one is dropped, so observed state never
//! regresses even when watch events arrive out of order.

use std::collections::HashMap;
use std::sync::Mutex;

use kube::ResourceExt;

/// Objects that can live in an [`ObjectStore`].
pub trait StoredObject: Clone + Send + 'static {
    /// Cache key: `namespace/name` for namespaced objects, `name` otherwise.
    fn store_key(&self) -> String;

    /// The object's resource version as reported by the API server.
    fn version(&self) -> Option<String>;
}

impl<K> StoredObject for K
where
    K: kube::Resource + Clone + Send + 'static,
{
    fn store_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }

    fn version(&self) -> Option<String> {
        self.resource_version()
    }
}

pub struct ObjectStore<T: StoredObject> {
    objects: Mutex<HashMap<String, T>>,
}

impl<T: StoredObject> ObjectStore<T> {
    pub fn new() -> Self {
        ObjectStore {
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Store `obj` unless a newer copy is already present. Returns whether
    /// the store was updated.
    pub fn put(&self, obj: T) -> bool {
        let key = obj.store_key();
        let mut objects = self.objects.lock().expect("store mutex poisoned");
        if let Some(existing) = objects.get(&key) {
            if !version_advances(existing.version().as_deref(), obj.version().as_deref()) {
                return false;
            }
        }
        objects.insert(key, obj);
        true
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .get(key)
            .cloned()
    }

    pub fn delete(&self, key: &str) -> Option<T> {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn values(&self) -> Vec<T> {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: StoredObject> Default for ObjectStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource versions are numeric on every supported API server; when either
/// side does not parse, the incoming object wins, since opaque versions
/// cannot be ordered.
fn version_advances(current: Option<&str>, incoming: Option<&str>) -> bool {
    let parse = |v: Option<&str>| v.and_then(|v| v.parse::<u64>().ok());
    match (parse(current), parse(incoming)) {
        (Some(cur), Some(inc)) => inc > cur,
        _ => true,
    }
}
