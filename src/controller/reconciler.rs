//! Reconciliation logic for PostgresCluster resources
//!
//! One pass re-derives the full desired state from the current declaration,
//! applies it through the sub-controllers, observes the children again and
//! persists the aggregated status. Passes are level-triggered: nothing is
//! carried over from the previous pass except the status itself.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::PassOutcome;
use crate::controller::apply;
use crate::controller::backup::reconcile_backup;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::instances::reconcile_instances;
use crate::controller::observe::{Observed, observe};
use crate::controller::patroni::reconcile_ha;
use crate::controller::proxy::reconcile_proxy;
use crate::controller::status::{aggregate, invalid_status, status_patch};
use crate::controller::validation::validate_spec;
use crate::crd::{DEFAULT_INSTANCE_REPLICAS, PostgresCluster, PostgresClusterStatus};
use crate::resources::common::{LABEL_CLUSTER, is_owned_by};
use crate::store::{Managed, ObjectStore};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "postgres-operator.smoketurner.com/finalizer";

/// Requeue delay while children are still converging
const PENDING_REQUEUE: Duration = Duration::from_secs(10);

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn cluster_key(ns: &str, name: &str) -> String {
    format!("{}/{}", ns, name)
}

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile<S: ObjectStore>(
    cluster: Arc<PostgresCluster>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let started = Instant::now();
    let ctx: &Context<S> = &ctx;
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    // The watch cache may lag; always act on the latest declaration
    let Some(mut current) = ctx.store.get::<PostgresCluster>(&ns, &name).await? else {
        debug!("PostgresCluster no longer exists");
        return Ok(Action::await_change());
    };

    if current.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&current, ctx, &ns).await;
    }

    if !has_finalizer(&current) {
        current = add_finalizer(&current, ctx, &ns).await?;
    }

    current.spec.normalize();

    if let Err(e) = validate_spec(&current.spec) {
        warn!("Specification is invalid: {}", e);
        let status = invalid_status(&current, &e.to_string(), &now());
        persist_status(ctx, &current, status).await?;
        return Err(e);
    }

    info!("Reconciling PostgresCluster");

    let (instances, backup, proxy, ha) = tokio::join!(
        reconcile_instances(ctx, &current),
        reconcile_backup(ctx, &current),
        reconcile_proxy(ctx, &current),
        reconcile_ha(ctx, &current),
    );
    let mut outcome = PassOutcome::default();
    outcome.merge(instances);
    outcome.merge(backup);
    outcome.merge(proxy);
    outcome.merge(ha);

    let observed = observe(ctx, &current).await?;
    let status = aggregate(&current, &observed, &outcome, &now());
    record_cluster_state(ctx, &ns, &name, &current, &observed, &status);
    persist_status(ctx, &current, status).await?;

    if let Some(ref state) = ctx.health_state {
        state
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
        state.touch();
    }

    if !outcome.failures.is_empty() {
        error!(failures = outcome.failures.len(), "Reconciliation pass failed");
        return Err(Error::ReconcileFailed(outcome.failures));
    }

    ctx.reset_attempts(&cluster_key(&ns, &name));
    if outcome.pending.is_empty() {
        info!("Reconciliation completed successfully");
        Ok(Action::requeue(ctx.config.requeue_interval))
    } else {
        info!(pending = ?outcome.pending, "Reconciliation completed, children still converging");
        Ok(Action::requeue(PENDING_REQUEUE))
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy<S: ObjectStore>(
    cluster: Arc<PostgresCluster>,
    error: &Error,
    ctx: Arc<Context<S>>,
) -> Action {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let class = error.class();
    let attempt = ctx.next_attempt(&cluster_key(&ns, &name));

    if let Some(ref state) = ctx.health_state {
        state.metrics.record_error(&ns, &name, class.as_str());
    }

    match ctx.backoff.delay_for_error(error, attempt) {
        Some(delay) => {
            warn!(
                "Retryable {} error for {} (attempt {}): {}, requeuing in {:?}",
                class.as_str(),
                name,
                attempt + 1,
                error,
                delay
            );
            Action::requeue(delay)
        }
        None => {
            error!(
                "Non-retryable error for {}: {}, waiting for the declaration to change",
                name, error
            );
            Action::await_change()
        }
    }
}

fn record_cluster_state<S: ObjectStore>(
    ctx: &Context<S>,
    ns: &str,
    name: &str,
    cluster: &PostgresCluster,
    observed: &Observed,
    status: &PostgresClusterStatus,
) {
    let Some(ref state) = ctx.health_state else {
        return;
    };
    let desired: i64 = cluster
        .spec
        .instance_sets
        .iter()
        .map(|s| i64::from(s.replicas.unwrap_or(DEFAULT_INSTANCE_REPLICAS)))
        .sum();
    let ready: i64 = status
        .instances
        .iter()
        .map(|s| i64::from(s.ready_replicas))
        .sum();
    let repos_bound = status
        .pgbackrest
        .as_ref()
        .map(|p| p.repos.iter().filter(|r| r.bound).count())
        .unwrap_or(0);
    debug!(
        desired,
        ready,
        repos_bound,
        pods = observed.instance_pods.len(),
        "Observed cluster state"
    );
    state
        .metrics
        .set_cluster_state(ns, name, desired, ready, repos_bound as i64);
}

/// Write the status if it differs from what is stored
///
/// A cluster deleted mid-pass has nothing left to write to; that is not an
/// error.
async fn persist_status<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
    status: PostgresClusterStatus,
) -> Result<bool> {
    if cluster.status.as_ref() == Some(&status) {
        debug!("Status unchanged, skipping write");
        return Ok(false);
    }

    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let prior = serde_json::to_value(&cluster.status)?;
    let new = serde_json::to_value(&status)?;
    let patch = json!({ "status": status_patch(&prior, &new) });

    match ctx
        .store
        .patch_status::<PostgresCluster>(&ns, &name, patch)
        .await
    {
        Ok(_) => {
            debug!("Status updated");
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            debug!("PostgresCluster deleted during the pass, skipping status write");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Check if the resource has our finalizer
fn has_finalizer(cluster: &PostgresCluster) -> bool {
    cluster.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer to the resource, keeping any others
async fn add_finalizer<S: ObjectStore>(
    cluster: &PostgresCluster,
    ctx: &Context<S>,
    ns: &str,
) -> Result<PostgresCluster> {
    let name = cluster.name_any();
    let mut finalizers = cluster.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());

    let patched = ctx
        .store
        .patch::<PostgresCluster>(ns, &name, json!({ "metadata": { "finalizers": finalizers } }))
        .await?;

    info!("Added finalizer to {}", name);
    Ok(patched)
}

/// Handle deletion of the PostgresCluster
///
/// Owned children are swept explicitly before the finalizer is released.
/// Repository volumes are included: deleting the declaration deletes every
/// child.
async fn handle_deletion<S: ObjectStore>(
    cluster: &PostgresCluster,
    ctx: &Context<S>,
    ns: &str,
) -> Result<Action> {
    let name = cluster.name_any();
    if !has_finalizer(cluster) {
        return Ok(Action::await_change());
    }
    info!("Handling deletion of {}", name);

    let uid = cluster.uid().unwrap_or_default();
    let selector = BTreeMap::from([(LABEL_CLUSTER.to_string(), name.clone())]);

    let mut removed = 0;
    removed += sweep::<S, StatefulSet>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, Deployment>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, PersistentVolumeClaim>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, Service>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, ConfigMap>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, RoleBinding>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, Role>(ctx, ns, &selector, &uid).await?;
    removed += sweep::<S, ServiceAccount>(ctx, ns, &selector, &uid).await?;
    info!(removed, "Removed owned children");

    let remaining: Vec<String> = cluster
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    let finalizers = if remaining.is_empty() {
        serde_json::Value::Null
    } else {
        json!(remaining)
    };
    match ctx
        .store
        .patch::<PostgresCluster>(ns, &name, json!({ "metadata": { "finalizers": finalizers } }))
        .await
    {
        Ok(_) => info!("Removed finalizer from {}", name),
        Err(e) if e.is_not_found() => debug!("PostgresCluster already gone"),
        Err(e) => return Err(e),
    }

    if let Some(ref state) = ctx.health_state {
        state.metrics.forget_cluster(ns, &name);
    }
    ctx.reset_attempts(&cluster_key(ns, &name));

    Ok(Action::await_change())
}

/// Delete every object of kind `K` carrying the cluster label and owned by `uid`
async fn sweep<S: ObjectStore, K: Managed>(
    ctx: &Context<S>,
    ns: &str,
    selector: &BTreeMap<String, String>,
    uid: &str,
) -> Result<usize> {
    let mut removed = 0;
    for obj in ctx.store.list::<K>(ns, selector).await? {
        if is_owned_by(&obj, uid) {
            apply::delete(ctx, ns, &obj).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
