pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;
pub mod webhooks;

pub use config::{LogFormat, OperatorConfig};
pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::PostgresCluster;
pub use health::{HealthState, Metrics};
pub use store::{KubeStore, MemoryStore, ObjectStore, ReflectorCache};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watch one child kind through a reflector, returning the trigger stream
/// and the store it fills
fn cached_watch<K>(
    client: Client,
    namespace: Option<&str>,
    config: &WatcherConfig,
) -> (
    impl futures::Stream<Item = Result<K, watcher::Error>> + Send + use<K>,
    reflector::Store<K>,
)
where
    K: store::Managed,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(scoped_api::<K>(client, namespace), config.clone()))
        .touched_objects()
        .default_backoff();
    (stream, reader)
}

/// Run the PostgresCluster controller until its watch stream ends.
///
/// Watches `config.watch_namespace` when set, otherwise the whole cluster.
/// Every owned child kind is watched too, so drift on a child triggers a
/// pass of its owning cluster.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: OperatorConfig,
) {
    let namespace = config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    tracing::info!(
        "Starting controller for PostgresCluster resources (scope: {}, concurrency: {})",
        namespace.unwrap_or("cluster-wide"),
        config.reconcile_concurrency
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let controller_config = ControllerConfig::default().concurrency(config.reconcile_concurrency);
    let watcher_config = WatcherConfig::default().any_semantic();

    // Each owned kind is watched once; the same stream feeds the read cache
    // and triggers passes of the owning cluster
    let (statefulsets, statefulset_store) =
        cached_watch::<StatefulSet>(client.clone(), namespace, &watcher_config);
    let (deployments, deployment_store) =
        cached_watch::<Deployment>(client.clone(), namespace, &watcher_config);
    let (claims, claim_store) =
        cached_watch::<PersistentVolumeClaim>(client.clone(), namespace, &watcher_config);
    let (configmaps, configmap_store) =
        cached_watch::<ConfigMap>(client.clone(), namespace, &watcher_config);
    let (services, service_store) =
        cached_watch::<Service>(client.clone(), namespace, &watcher_config);

    let cache = ReflectorCache::new()
        .with_store(statefulset_store)
        .with_store(deployment_store)
        .with_store(claim_store)
        .with_store(configmap_store)
        .with_store(service_store);
    let ctx = Arc::new(Context::new(
        KubeStore::new(client.clone()).with_cache(cache),
        health_state,
        config,
    ));

    let clusters: Api<PostgresCluster> = scoped_api(client.clone(), namespace);

    Controller::new(clusters, watcher_config)
        .with_config(controller_config)
        .owns_stream(statefulsets)
        .owns_stream(deployments)
        .owns_stream(claims)
        .owns_stream(configmaps)
        .owns_stream(services)
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for children can outlive their cluster
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::warn!("Reconciliation error: {}", e);
                    }
                }
            }
        })
        .await;

    tracing::info!("Controller stream ended");
}
