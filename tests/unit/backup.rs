//! Unit tests for the backup-repository controller
//!
//! Repository volumes hold backups; most of these tests check that nothing
//! is deleted unless the controller positively knows the repository is gone.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim};
use pgcluster_operator::controller::ErrorClass;
use pgcluster_operator::controller::backup::reconcile_backup;
use pgcluster_operator::resources::common::LABEL_PGBACKREST_REPO;
use pgcluster_operator::resources::instance::generate_instance_set;
use pgcluster_operator::resources::pgbackrest::CONFIG_KEY;
use pgcluster_operator::store::{Fault, MemoryStore, Verb};

use crate::common::*;

fn two_repo_cluster() -> pgcluster_operator::crd::PostgresCluster {
    PostgresClusterBuilder::new("db", TEST_NAMESPACE)
        .with_uid(TEST_UID)
        .with_instance_set("", None)
        .with_repo("repo1")
        .with_repo("repo2")
        .build()
}

fn repo_volumes(store: &MemoryStore) -> Vec<String> {
    let mut names = store.names::<PersistentVolumeClaim>(TEST_NAMESPACE);
    names.sort();
    names
}

fn pgbackrest_conf(store: &MemoryStore) -> String {
    store
        .peek::<ConfigMap>(TEST_NAMESPACE, "db-pgbackrest-config")
        .and_then(|cm| cm.data)
        .and_then(|mut data| data.remove(CONFIG_KEY))
        .unwrap_or_default()
}

#[tokio::test]
async fn test_declared_repos_get_volumes() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &two_repo_cluster());

    let outcome = reconcile_backup(&*ctx, &cluster).await;
    assert!(outcome.is_clean());
    assert_eq!(
        repo_volumes(&store),
        vec!["db-pgbackrest-repo1", "db-pgbackrest-repo2"]
    );
    assert!(pgbackrest_conf(&store).contains("repo2-path=/pgbackrest/repo2"));
}

#[tokio::test]
async fn test_failed_read_never_deletes_volume() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));
    reconcile_backup(&*ctx, &cluster).await;

    store.inject(
        Fault::new(Verb::Get, "PersistentVolumeClaim", ErrorClass::Transient)
            .named("db-pgbackrest-repo1"),
    );
    store.clear_mutations();
    let outcome = reconcile_backup(&*ctx, &cluster).await;

    assert!(!outcome.is_clean());
    assert_eq!(outcome.failures[0].target, "db-pgbackrest-repo1");
    assert_eq!(repo_volumes(&store), vec!["db-pgbackrest-repo1"]);
    assert!(
        !store
            .mutations()
            .iter()
            .any(|m| m.kind == "PersistentVolumeClaim")
    );
}

#[tokio::test]
async fn test_undeclared_repo_kept_until_listing_succeeds() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &two_repo_cluster());
    reconcile_backup(&*ctx, &cluster).await;

    let mut without_repo2 = cluster.clone();
    without_repo2.spec.archive.pgbackrest.repos.truncate(1);

    store.inject(Fault::new(Verb::List, "PersistentVolumeClaim", ErrorClass::Transient));
    let outcome = reconcile_backup(&*ctx, &without_repo2).await;
    assert!(!outcome.is_clean());
    assert_eq!(
        repo_volumes(&store),
        vec!["db-pgbackrest-repo1", "db-pgbackrest-repo2"]
    );

    store.clear_faults();
    let outcome = reconcile_backup(&*ctx, &without_repo2).await;
    assert!(outcome.is_clean());
    assert_eq!(repo_volumes(&store), vec!["db-pgbackrest-repo1"]);
    assert!(!pgbackrest_conf(&store).contains("repo2"));
}

#[tokio::test]
async fn test_malformed_repo_label_is_ignored() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &two_repo_cluster());
    reconcile_backup(&*ctx, &cluster).await;

    let mut odd = store
        .peek::<PersistentVolumeClaim>(TEST_NAMESPACE, "db-pgbackrest-repo2")
        .unwrap();
    odd.metadata.name = Some("db-pgbackrest-scratch".to_string());
    odd.metadata
        .labels
        .as_mut()
        .unwrap()
        .insert(LABEL_PGBACKREST_REPO.to_string(), "scratch".to_string());
    store.insert(&odd).unwrap();

    let outcome = reconcile_backup(&*ctx, &cluster).await;
    assert!(outcome.is_clean());
    assert!(
        store
            .peek::<PersistentVolumeClaim>(TEST_NAMESPACE, "db-pgbackrest-scratch")
            .is_some()
    );
}

#[tokio::test]
async fn test_existing_volume_is_never_rewritten() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));
    reconcile_backup(&*ctx, &cluster).await;

    let mut grown = cluster.clone();
    grown.spec.archive.pgbackrest.repos[0].volume_claim_spec = claim("50Gi");
    store.clear_mutations();
    let outcome = reconcile_backup(&*ctx, &grown).await;

    assert!(outcome.is_clean());
    assert!(
        !store
            .mutations()
            .iter()
            .any(|m| m.kind == "PersistentVolumeClaim")
    );
}

#[tokio::test]
async fn test_repo_host_add_and_remove_keeps_volumes() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let plain = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));
    reconcile_backup(&*ctx, &plain).await;
    assert!(!pgbackrest_conf(&store).contains("repo1-host="));

    let mut with_host = plain.clone();
    with_host.spec.archive.pgbackrest.repo_host = PostgresClusterBuilder::new("db", TEST_NAMESPACE)
        .with_repo_host("pgbackrest:latest")
        .build()
        .spec
        .archive
        .pgbackrest
        .repo_host;
    let outcome = reconcile_backup(&*ctx, &with_host).await;
    assert!(outcome.is_clean());

    let host = store
        .peek::<StatefulSet>(TEST_NAMESPACE, "db-repo-host")
        .unwrap();
    assert_eq!(host.spec.unwrap().replicas, Some(1));
    assert!(pgbackrest_conf(&store).contains("repo1-host=db-repo-host-0."));

    let outcome = reconcile_backup(&*ctx, &plain).await;
    assert!(outcome.is_clean());
    assert!(store.peek::<StatefulSet>(TEST_NAMESPACE, "db-repo-host").is_none());
    assert!(!pgbackrest_conf(&store).contains("repo1-host="));
    assert_eq!(repo_volumes(&store), vec!["db-pgbackrest-repo1"]);
}

#[tokio::test]
async fn test_only_repo_hosts_are_removed() {
    let store = MemoryStore::new();
    let ctx = test_context(store.clone());
    let cluster = seed(&store, &create_test_cluster("db", TEST_NAMESPACE));

    // An owned instance StatefulSet that happens to carry the repository host name
    let mut set = cluster.spec.instance_sets[0].clone();
    set.name = "repo-host".to_string();
    let instance = generate_instance_set(&cluster, &set);
    assert_eq!(instance.metadata.name.as_deref(), Some("db-repo-host"));
    store.insert(&instance).unwrap();

    for _ in 0..2 {
        let outcome = reconcile_backup(&*ctx, &cluster).await;
        assert!(outcome.is_clean());
    }

    assert!(store.peek::<StatefulSet>(TEST_NAMESPACE, "db-repo-host").is_some());
    assert!(
        !store
            .mutations()
            .iter()
            .any(|m| m.verb == Verb::Delete && m.name == "db-repo-host")
    );
    assert!(!pgbackrest_conf(&store).contains("repo1-host="));
}
