//! Watch-fed caches of child objects
//!
//! The controller already watches every kind it owns. Keeping those watches
//! in reflector stores lets reads be served locally instead of costing an
//! API round trip each.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::FutureExt;
use kube::ResourceExt;
use kube::runtime::reflector::{ObjectRef, Store};

use super::Managed;

/// Reflector stores keyed by the kind they hold
#[derive(Clone, Default)]
pub struct ReflectorCache {
    stores: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ReflectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve reads of `K` from `store`
    pub fn with_store<K: Managed>(mut self, store: Store<K>) -> Self {
        self.stores.insert(TypeId::of::<K>(), Arc::new(store));
        self
    }

    /// The store for `K`, once its initial listing has completed
    fn ready_store<K: Managed>(&self) -> Option<&Store<K>> {
        let store = self
            .stores
            .get(&TypeId::of::<K>())?
            .downcast_ref::<Store<K>>()?;
        // Before the first full listing an absent entry proves nothing
        match store.wait_until_ready().now_or_never() {
            Some(Ok(())) => Some(store),
            _ => None,
        }
    }

    /// Look up one object; `None` when `K` is not cached or still syncing
    pub fn get<K: Managed>(&self, ns: &str, name: &str) -> Option<Option<K>> {
        let store = self.ready_store::<K>()?;
        Some(
            store
                .get(&ObjectRef::new(name).within(ns))
                .map(|obj| (*obj).clone()),
        )
    }

    /// Objects of `K` in `ns` carrying every label in `labels`; `None` when
    /// `K` is not cached or still syncing
    pub fn list<K: Managed>(&self, ns: &str, labels: &BTreeMap<String, String>) -> Option<Vec<K>> {
        let store = self.ready_store::<K>()?;
        let mut found: Vec<K> = store
            .state()
            .into_iter()
            .filter(|obj| obj.namespace().as_deref() == Some(ns))
            .filter(|obj| {
                let own = obj.labels();
                labels.iter().all(|(k, v)| own.get(k) == Some(v))
            })
            .map(|obj| (*obj).clone())
            .collect();
        found.sort_by_key(|obj| obj.name_any());
        Some(found)
    }
}
