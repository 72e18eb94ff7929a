//! Unit tests for the instance-set controller

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use pgcluster_operator::controller::instances::reconcile_instances;
use pgcluster_operator::crd::{ResourceList, ResourceRequirements};
use pgcluster_operator::resources::common::LABEL_INSTANCE_SET;
use pgcluster_operator::store::{MemoryStore, Verb};
use serde_json::json;

use crate::common::*;

fn data_volume_size(sts: &StatefulSet) -> Option<Quantity> {
    sts.spec
        .as_ref()?
        .volume_claim_templates
        .as_ref()?
        .first()?
        .spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
        .cloned()
}

#[tokio::test]
async fn test_declared_sets_are_applied() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = PostgresClusterBuilder::new("db", TEST_NAMESPACE)
        .with_uid(TEST_UID)
        .with_instance_set("", None)
        .with_instance_set("", Some(2))
        .with_repo("repo1")
        .build();
    let cluster = seed(&store, &cluster);

    let outcome = reconcile_instances(&*ctx, &cluster).await;
    assert!(outcome.is_clean());
    assert!(outcome.pending.is_empty());

    let mut names = store.names::<StatefulSet>(TEST_NAMESPACE);
    names.sort();
    assert_eq!(names, vec!["db-00", "db-01"]);
    let second = store.peek::<StatefulSet>(TEST_NAMESPACE, "db-01").unwrap();
    assert_eq!(second.spec.unwrap().replicas, Some(2));
}

#[tokio::test]
async fn test_converged_sets_are_not_rewritten() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));

    reconcile_instances(&*ctx, &cluster).await;
    store.clear_mutations();
    reconcile_instances(&*ctx, &cluster).await;

    assert!(store.mutations().is_empty(), "{:?}", store.mutations());
}

#[tokio::test]
async fn test_canonicalized_quantities_do_not_trigger_rewrites() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let mut cluster = create_test_cluster("db", TEST_NAMESPACE);
    cluster.spec.instance_sets[0].resources = Some(ResourceRequirements {
        limits: Some(ResourceList {
            cpu: Some("0.5".to_string()),
            memory: Some("1024Mi".to_string()),
        }),
        requests: None,
    });
    let cluster = seed(&store, &cluster);
    reconcile_instances(&*ctx, &cluster).await;

    // The API server stores quantities in canonical form
    let mut live = serde_json::to_value(store.peek::<StatefulSet>(TEST_NAMESPACE, "db-00").unwrap())
        .unwrap();
    let mut canonicalized = 0;
    for container in live["spec"]["template"]["spec"]["containers"]
        .as_array_mut()
        .unwrap()
    {
        if container["resources"]["limits"].is_object() {
            container["resources"]["limits"] = json!({"cpu": "500m", "memory": "1Gi"});
            canonicalized += 1;
        }
    }
    assert!(canonicalized > 0);
    store
        .insert(&serde_json::from_value::<StatefulSet>(live).unwrap())
        .unwrap();

    store.clear_mutations();
    let outcome = reconcile_instances(&*ctx, &cluster).await;
    assert!(outcome.is_clean());
    assert!(store.mutations().is_empty(), "{:?}", store.mutations());
}

#[tokio::test]
async fn test_claim_template_survives_size_change() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));
    reconcile_instances(&*ctx, &cluster).await;

    let mut resized = cluster.clone();
    resized.spec.instance_sets[0].volume_claim_spec = claim("20Gi");
    resized.spec.instance_sets[0].replicas = Some(3);
    let outcome = reconcile_instances(&*ctx, &resized).await;
    assert!(outcome.is_clean());

    let sts = store.peek::<StatefulSet>(TEST_NAMESPACE, "db-00").unwrap();
    assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));
    assert_eq!(data_volume_size(&sts), Some(Quantity("1Gi".to_string())));
}

#[tokio::test]
async fn test_undeclared_set_is_drained_before_deletion() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = PostgresClusterBuilder::new("db", TEST_NAMESPACE)
        .with_uid(TEST_UID)
        .with_instance_set("a", Some(2))
        .with_instance_set("b", None)
        .with_repo("repo1")
        .build();
    let cluster = seed(&store, &cluster);
    reconcile_instances(&*ctx, &cluster).await;
    assert!(store.set_status::<StatefulSet>(TEST_NAMESPACE, "db-a", json!({"replicas": 2})));

    let mut shrunk = cluster.clone();
    shrunk.spec.instance_sets.remove(0);

    // Pods still running: scale to zero and wait
    let outcome = reconcile_instances(&*ctx, &shrunk).await;
    assert!(outcome.is_clean());
    assert_eq!(outcome.pending.len(), 1);
    let sts = store.peek::<StatefulSet>(TEST_NAMESPACE, "db-a").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(0));

    // Still draining: no second scale patch
    store.clear_mutations();
    let outcome = reconcile_instances(&*ctx, &shrunk).await;
    assert_eq!(outcome.pending.len(), 1);
    assert!(store.mutations().is_empty());

    // Pods gone: the set is deleted
    store.set_status::<StatefulSet>(TEST_NAMESPACE, "db-a", json!({"replicas": 0}));
    let outcome = reconcile_instances(&*ctx, &shrunk).await;
    assert!(outcome.is_clean());
    assert!(outcome.pending.is_empty());
    assert_eq!(store.names::<StatefulSet>(TEST_NAMESPACE), vec!["db-b"]);
    assert!(
        store
            .mutations()
            .iter()
            .any(|m| m.verb == Verb::Delete && m.name == "db-a")
    );
}

#[tokio::test]
async fn test_foreign_statefulsets_are_left_alone() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));
    reconcile_instances(&*ctx, &cluster).await;

    // Same labels, different owner
    let mut other = store.peek::<StatefulSet>(TEST_NAMESPACE, "db-00").unwrap();
    other.metadata.name = Some("db-stray".to_string());
    other.metadata.owner_references.as_mut().unwrap()[0].uid = "someone-else".to_string();
    other
        .metadata
        .labels
        .as_mut()
        .unwrap()
        .insert(LABEL_INSTANCE_SET.to_string(), "zz".to_string());
    store.insert(&other).unwrap();

    let outcome = reconcile_instances(&*ctx, &cluster).await;
    assert!(outcome.is_clean());
    assert!(store.peek::<StatefulSet>(TEST_NAMESPACE, "db-stray").is_some());
}

#[tokio::test]
async fn test_set_without_status_is_scaled_before_deletion() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = PostgresClusterBuilder::new("db", TEST_NAMESPACE)
        .with_uid(TEST_UID)
        .with_instance_set("a", Some(2))
        .with_instance_set("b", None)
        .with_repo("repo1")
        .build();
    let cluster = seed(&store, &cluster);
    reconcile_instances(&*ctx, &cluster).await;
    assert!(
        store
            .peek::<StatefulSet>(TEST_NAMESPACE, "db-a")
            .unwrap()
            .status
            .is_none()
    );

    let mut shrunk = cluster.clone();
    shrunk.spec.instance_sets.remove(0);

    // Pod count unknown: never deleted on the first sighting
    let outcome = reconcile_instances(&*ctx, &shrunk).await;
    assert_eq!(outcome.pending.len(), 1);
    let sts = store.peek::<StatefulSet>(TEST_NAMESPACE, "db-a").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(0));
    assert!(
        !store
            .mutations()
            .iter()
            .any(|m| m.verb == Verb::Delete && m.name == "db-a")
    );

    store.set_status::<StatefulSet>(TEST_NAMESPACE, "db-a", json!({"replicas": 0}));
    let outcome = reconcile_instances(&*ctx, &shrunk).await;
    assert!(outcome.pending.is_empty());
    assert!(store.peek::<StatefulSet>(TEST_NAMESPACE, "db-a").is_none());
}
