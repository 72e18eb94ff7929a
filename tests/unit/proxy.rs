//! Unit tests for the proxy controller

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use pgcluster_operator::controller::ErrorClass;
use pgcluster_operator::controller::proxy::reconcile_proxy;
use pgcluster_operator::store::{Fault, MemoryStore, Verb};

use crate::common::*;

#[tokio::test]
async fn test_pgbouncer_children_are_applied() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster_with_pgbouncer("db", TEST_NAMESPACE));

    let outcome = reconcile_proxy(&*ctx, &cluster).await;
    assert!(outcome.is_clean());

    let deployment = store.peek::<Deployment>(TEST_NAMESPACE, "db-pgbouncer").unwrap();
    assert_eq!(deployment.spec.unwrap().replicas, Some(1));
    assert!(store.peek::<Service>(TEST_NAMESPACE, "db-pgbouncer").is_some());
    assert!(store.peek::<ConfigMap>(TEST_NAMESPACE, "db-pgbouncer").is_some());
}

#[tokio::test]
async fn test_no_proxy_declared_is_a_noop() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));

    let outcome = reconcile_proxy(&*ctx, &cluster).await;
    assert!(outcome.is_clean());
    assert!(store.mutations().is_empty());
}

#[tokio::test]
async fn test_removing_proxy_deletes_its_children() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster_with_pgbouncer("db", TEST_NAMESPACE));
    reconcile_proxy(&*ctx, &cluster).await;

    let mut without = cluster.clone();
    without.spec.proxy = None;
    store.clear_mutations();
    let outcome = reconcile_proxy(&*ctx, &without).await;

    assert!(outcome.is_clean());
    assert!(store.peek::<Deployment>(TEST_NAMESPACE, "db-pgbouncer").is_none());
    assert!(store.peek::<Service>(TEST_NAMESPACE, "db-pgbouncer").is_none());
    assert!(store.peek::<ConfigMap>(TEST_NAMESPACE, "db-pgbouncer").is_none());
    let deletes = store
        .mutations()
        .iter()
        .filter(|m| m.verb == Verb::Delete)
        .count();
    assert_eq!(deletes, 3);
}

#[tokio::test]
async fn test_failed_step_does_not_stop_siblings() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster_with_pgbouncer("db", TEST_NAMESPACE));
    store.inject(Fault::new(Verb::Create, "Deployment", ErrorClass::ResourceExhausted));

    let outcome = reconcile_proxy(&*ctx, &cluster).await;

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].target, "Deployment/db-pgbouncer");
    assert_eq!(outcome.failures[0].error.class(), ErrorClass::ResourceExhausted);
    assert!(store.peek::<Service>(TEST_NAMESPACE, "db-pgbouncer").is_some());
}
