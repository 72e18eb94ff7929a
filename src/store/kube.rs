use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

use super::cache::ReflectorCache;
use super::{Managed, ObjectStore, label_selector};
use crate::controller::error::{Error, Result};
use crate::resources::common::FIELD_MANAGER;

/// [`ObjectStore`] backed by the Kubernetes API server
///
/// Reads of kinds held in the reflector cache are served locally once the
/// cache has synced. Absence is always confirmed against the API before a
/// `get` reports it, and writes always go to the API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    cache: ReflectorCache,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: ReflectorCache::default(),
        }
    }

    pub fn with_cache(mut self, cache: ReflectorCache) -> Self {
        self.cache = cache;
        self
    }

    fn api<K: Managed>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, ns: &str, name: &str) -> Result<Option<K>> {
        if let Some(Some(cached)) = self.cache.get::<K>(ns, name) {
            return Ok(Some(cached));
        }
        // A cache miss may only mean the watch has not caught up with a create
        Ok(self.api::<K>(ns).get_opt(name).await?)
    }

    async fn list<K: Managed>(
        &self,
        ns: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        if let Some(cached) = self.cache.list::<K>(ns, labels) {
            return Ok(cached);
        }
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(self.api::<K>(ns).list(&params).await?.items)
    }

    async fn apply<K: Managed>(&self, ns: &str, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey("metadata.name"))?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = self
            .api::<K>(ns)
            .patch(&name, &params, &Patch::Apply(obj))
            .await?;
        debug!(kind = %K::kind(&()), name = %name, "Applied resource");
        Ok(applied)
    }

    async fn patch<K: Managed>(
        &self,
        ns: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<K> {
        let patched = self
            .api::<K>(ns)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(kind = %K::kind(&()), name = %name, "Patched resource");
        Ok(patched)
    }

    async fn delete<K: Managed>(&self, ns: &str, name: &str) -> Result<()> {
        match self
            .api::<K>(ns)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                debug!(kind = %K::kind(&()), name = %name, "Deleted resource");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status<K: Managed>(
        &self,
        ns: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<K> {
        Ok(self
            .api::<K>(ns)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
