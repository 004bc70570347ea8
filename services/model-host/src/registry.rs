//! Named model instances. Pure bookkeeping: one write lock per swap, never held across an await.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::instance::{ModelInstance, ModelSummary};

#[derive(Debug)]
pub struct Registered {
    pub instance: Arc<ModelInstance>,
    /// Previous holder of the name; the caller must `retire` it.
    pub replaced: Option<Arc<ModelInstance>>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Arc<ModelInstance>>,
    /// Last version handed out per name. Kept after delete so a re-created name never reuses a
    /// version; grows by one small entry per distinct name for the life of the host.
    versions: HashMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    inner: RwLock<Inner>,
}

impl ModelRegistry {
    pub fn new() -> Self { Self::default() }

    /// Insert or atomically supersede. Versions keep counting across deletes.
    pub fn register(&self, instance: ModelInstance) -> Registered {
        let name = instance.name().to_string();
        let mut inner = self.inner.write();
        let version = inner.versions.get(&name).copied().unwrap_or(0) + 1;
        inner.versions.insert(name.clone(), version);
        let instance = Arc::new(instance.with_version(version));
        let replaced = inner.entries.insert(name.clone(), instance.clone());
        debug!(model = %name, version, replaced = replaced.is_some(), "registered");
        Registered { instance, replaced }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModelInstance>> { self.inner.read().entries.get(name).cloned() }

    pub fn delete(&self, name: &str) -> Option<Arc<ModelInstance>> { self.inner.write().entries.remove(name) }

    pub fn list(&self) -> Vec<ModelSummary> {
        let mut out: Vec<ModelSummary> = self.inner.read().entries.values().map(|i| i.summary()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.inner.read().entries.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize { self.inner.read().entries.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Remove everything, for host shutdown.
    pub fn drain(&self) -> Vec<Arc<ModelInstance>> { self.inner.write().entries.drain().map(|(_, v)| v).collect() }
}
