//! Fresh observation of a cluster's children
//!
//! Taken after the apply phase so the status persisted at the end of a pass
//! never reflects a view older than the pass itself. Any read failure aborts
//! the observation; a partial view is never aggregated.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::PostgresCluster;
use crate::resources::common::{
    LABEL_CLUSTER, instance_selector, is_owned_by, names, repo_volume_selector,
};
use crate::resources::patroni::{LABEL_PATRONI_SCOPE, scope};
use crate::store::ObjectStore;

/// Children of one cluster as seen at one point in time
#[derive(Clone, Debug, Default)]
pub struct Observed {
    /// Instance StatefulSets owned by the cluster
    pub instance_sets: Vec<StatefulSet>,
    /// Pods carrying the cluster's Patroni scope
    pub instance_pods: Vec<Pod>,
    /// Repository volumes owned by the cluster
    pub repo_volumes: Vec<PersistentVolumeClaim>,
    pub repo_host: Option<StatefulSet>,
    pub pgbouncer: Option<Deployment>,
}

impl Observed {
    pub fn instance_set(&self, name: &str) -> Option<&StatefulSet> {
        self.instance_sets.iter().find(|s| s.name_any() == name)
    }

    pub fn repo_volume(&self, name: &str) -> Option<&PersistentVolumeClaim> {
        self.repo_volumes.iter().find(|p| p.name_any() == name)
    }
}

/// Read every child the status is derived from
pub async fn observe<S: ObjectStore>(ctx: &Context<S>, cluster: &PostgresCluster) -> Result<Observed> {
    let ns = cluster.namespace().unwrap_or_default();
    let cluster_name = cluster.name_any();
    let uid = cluster.uid().unwrap_or_default();

    let instance_sets = ctx
        .store
        .list::<StatefulSet>(&ns, &instance_selector(&cluster_name))
        .await?
        .into_iter()
        .filter(|s| is_owned_by(s, &uid))
        .collect();

    let pod_selector = BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster_name.clone()),
        (LABEL_PATRONI_SCOPE.to_string(), scope(&cluster_name)),
    ]);
    let instance_pods = ctx.store.list::<Pod>(&ns, &pod_selector).await?;

    let repo_volumes = ctx
        .store
        .list::<PersistentVolumeClaim>(&ns, &repo_volume_selector(&cluster_name))
        .await?
        .into_iter()
        .filter(|p| is_owned_by(p, &uid))
        .collect();

    let repo_host = ctx
        .store
        .get::<StatefulSet>(&ns, &names::repo_host(&cluster_name))
        .await?
        .filter(|s| is_owned_by(s, &uid));

    let pgbouncer = ctx
        .store
        .get::<Deployment>(&ns, &names::pgbouncer(&cluster_name))
        .await?
        .filter(|d| is_owned_by(d, &uid));

    Ok(Observed {
        instance_sets,
        instance_pods,
        repo_volumes,
        repo_host,
        pgbouncer,
    })
}
