//! Observed-state access for the reconciler
//!
//! Sub-controllers never talk to the Kubernetes API directly. They read and
//! write through [`ObjectStore`], which is backed by the API server in
//! production ([`KubeStore`], reading through the controller's watch caches)
//! and by an in-memory object map in tests ([`MemoryStore`]).

mod cache;
mod kube;
mod memory;

pub use self::cache::ReflectorCache;
pub use self::kube::KubeStore;
pub use self::memory::{Fault, MemoryStore, Mutation, Verb};

use std::collections::BTreeMap;
use std::fmt::Debug;

use ::kube::Resource;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;

/// A namespaced object the operator reads or manages
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Namespace-scoped reads and writes of managed objects
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one object; `Ok(None)` when it does not exist
    async fn get<K: Managed>(&self, ns: &str, name: &str) -> Result<Option<K>>;

    /// List objects whose labels contain every pair in `labels`
    async fn list<K: Managed>(&self, ns: &str, labels: &BTreeMap<String, String>)
    -> Result<Vec<K>>;

    /// Create or update with server-side apply, taking ownership of conflicting fields
    async fn apply<K: Managed>(&self, ns: &str, obj: &K) -> Result<K>;

    /// JSON merge patch of an existing object
    async fn patch<K: Managed>(&self, ns: &str, name: &str, patch: serde_json::Value)
    -> Result<K>;

    /// Delete an object; deleting an absent object succeeds
    async fn delete<K: Managed>(&self, ns: &str, name: &str) -> Result<()>;

    /// JSON merge patch of the status subresource
    async fn patch_status<K: Managed>(
        &self,
        ns: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<K>;
}

/// Render a label map as an equality-based selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
